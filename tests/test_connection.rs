mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use common::{serve, serve_protocol};
use wicket::http::app::{AppError, Reply};
use wicket::http::protocol::{Protocol, ProtocolOptions};
use wicket::http::request::Environ;
use wicket::http::response::{
    Body, INTERNAL_ERROR_BODY, Response, ResponseBuilder, StatusCode,
};

fn hello(_environ: &mut Environ) -> Result<Reply, AppError> {
    Ok(Response::ok("Hello world!").into())
}

fn echo_path(environ: &mut Environ) -> Result<Reply, AppError> {
    Ok(Response::ok(environ.path_info.clone()).into())
}

fn echo_body(environ: &mut Environ) -> Result<Reply, AppError> {
    let body = environ.input.read_all();
    Ok(Response::ok(body).into())
}

fn chunked(_environ: &mut Environ) -> Result<Reply, AppError> {
    Ok(ResponseBuilder::new(StatusCode::Ok)
        .chunk("a")
        .chunk("")
        .chunk("bc")
        .build_unframed()
        .into())
}

fn failing(_environ: &mut Environ) -> Result<Reply, AppError> {
    Err(anyhow::anyhow!("database unavailable"))
}

fn options() -> ProtocolOptions {
    ProtocolOptions::default()
}

fn limited(max_buffer_size: usize) -> ProtocolOptions {
    ProtocolOptions {
        max_buffer_size,
        ..ProtocolOptions::default()
    }
}

#[tokio::test]
async fn test_round_trip_hello_world() {
    let (mut client, _handle) = serve(hello);

    client
        .send(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await;
    let reply = client.response(false).await;

    assert_eq!(reply.version, "HTTP/1.1");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.reason, "OK");
    assert_eq!(reply.text(), "Hello world!");
    assert_eq!(reply.header("Content-Length"), Some("12"));
    assert_eq!(reply.header("Content-Type"), Some("text/plain"));
    assert!(reply.header("Server").unwrap().starts_with("wicket/"));
    assert!(httpdate::parse_http_date(reply.header("Date").unwrap()).is_ok());
    assert!(reply.header("Connection").is_none());
    assert!(reply.header("Transfer-Encoding").is_none());

    // Still open for another request.
    client
        .send(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await;
    assert_eq!(client.response(false).await.text(), "Hello world!");
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let (mut client, handle) = serve(echo_path);

    client
        .send(
            b"GET /a HTTP/1.1\r\n\r\n\
              GET /b HTTP/1.1\r\n\r\n\
              GET /c HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;

    assert_eq!(client.response(false).await.text(), "/a");
    assert_eq!(client.response(false).await.text(), "/b");

    let last = client.response(false).await;
    assert_eq!(last.text(), "/c");
    assert_eq!(last.header("Connection"), Some("close"));

    assert!(client.closed().await);
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_http10_closes_by_default() {
    let (mut client, _handle) = serve(hello);

    client.send(b"GET / HTTP/1.0\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.version, "HTTP/1.0");
    assert_eq!(reply.text(), "Hello world!");
    assert!(reply.header("Connection").is_none());
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_http10_keep_alive_with_length() {
    let (mut client, _handle) = serve(hello);

    client
        .send(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
        .await;
    let reply = client.response(false).await;
    assert_eq!(reply.header("Connection"), Some("keep-alive"));

    client.send(b"GET / HTTP/1.0\r\n\r\n").await;
    assert_eq!(client.response(false).await.text(), "Hello world!");
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_http10_unframed_body_is_close_delimited() {
    let (mut client, _handle) = serve(chunked);

    client
        .send(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
        .await;
    let reply = client.response(false).await;

    assert!(reply.header("Transfer-Encoding").is_none());
    assert!(reply.header("Content-Length").is_none());
    assert!(reply.header("Connection").is_none());
    assert_eq!(reply.text(), "abc");
}

#[tokio::test]
async fn test_http11_connection_close() {
    let (mut client, _handle) = serve(hello);

    client
        .send(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await;
    let reply = client.response(false).await;

    assert_eq!(reply.header("Connection"), Some("close"));
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_pipelining_disabled_closes_every_response() {
    let protocol = Protocol::new(
        hello,
        ProtocolOptions {
            pipeline: false,
            ..options()
        },
    );
    let (mut client, _handle) = serve_protocol(protocol);

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.header("Connection"), Some("close"));
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_chunked_response_skips_empty_chunks() {
    let (mut client, _handle) = serve(chunked);

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.header("Transfer-Encoding"), Some("chunked"));
    assert_eq!(reply.raw_body, b"1\r\na\r\n2\r\nbc\r\n0\r\n\r\n");
    assert_eq!(reply.text(), "abc");
}

#[tokio::test]
async fn test_chunked_response_with_no_chunks() {
    fn empty(_environ: &mut Environ) -> Result<Reply, AppError> {
        Ok(ResponseBuilder::new(StatusCode::Ok).build_unframed().into())
    }
    let (mut client, _handle) = serve(empty);

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.raw_body, b"0\r\n\r\n");
}

#[tokio::test]
async fn test_head_suppresses_body() {
    let seen = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&seen);
    let app = move |environ: &mut Environ| -> Result<Reply, AppError> {
        flag.store(environ.head_request && environ.method.as_str() == "GET", Ordering::SeqCst);
        Ok(Response::ok("Hello world!").into())
    };
    let (mut client, _handle) = serve(app);

    client.send(b"HEAD / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(true).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Content-Length"), Some("12"));
    assert!(seen.load(Ordering::SeqCst));

    // No stray body bytes precede the next response.
    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(false).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "Hello world!");
}

#[tokio::test]
async fn test_head_suppresses_chunked_terminator() {
    let (mut client, _handle) = serve(chunked);

    client.send(b"HEAD / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(true).await;
    assert_eq!(reply.header("Transfer-Encoding"), Some("chunked"));

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(client.response(false).await.text(), "abc");
}

#[tokio::test]
async fn test_bodiless_status_sends_no_body() {
    fn no_content(_environ: &mut Environ) -> Result<Reply, AppError> {
        Ok(ResponseBuilder::new(StatusCode::NoContent)
            .body("ignored")
            .build_unframed()
            .into())
    }
    let (mut client, _handle) = serve(no_content);

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(false).await;
    assert_eq!(reply.status, 204);
    assert!(reply.header("Transfer-Encoding").is_none());

    client.send(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(client.response(false).await.status, 204);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_application_error_sends_500() {
    let (mut client, _handle) = serve(failing);

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.status, 500);
    assert_eq!(reply.header("Content-Type"), Some("text/plain"));
    assert_eq!(reply.header("Content-Length"), Some("48"));
    assert_eq!(reply.body, INTERNAL_ERROR_BODY);
    assert!(!reply.text().contains("database"));

    // Persistence follows the normal rules after a 500.
    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(client.response(false).await.status, 500);
}

#[tokio::test]
async fn test_application_panic_sends_500() {
    fn panics(_environ: &mut Environ) -> Result<Reply, AppError> {
        panic!("handler bug");
    }
    let (mut client, _handle) = serve(panics);

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.status, 500);
    assert_eq!(reply.body, INTERNAL_ERROR_BODY);
}

#[tokio::test]
async fn test_error_after_headers_aborts_connection() {
    fn partial(_environ: &mut Environ) -> Result<Reply, AppError> {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(anyhow::anyhow!("stream broke")),
        ];
        Ok(Response {
            status: "200 OK".to_string(),
            headers: Vec::new(),
            body: Body::stream(chunks.into_iter()),
        }
        .into())
    }
    let (mut client, handle) = serve(partial);

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let rest = {
        // Read only the head, then everything until close.
        let reply = client.response(true).await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("Transfer-Encoding"), Some("chunked"));
        client.read_to_end().await
    };

    assert_eq!(rest, b"7\r\npartial\r\n");
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_malformed_request_line_gets_400_and_close() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let app = move |_: &mut Environ| -> Result<Reply, AppError> {
        flag.store(true, Ordering::SeqCst);
        Ok(Response::ok("unreachable").into())
    };
    let (mut client, _handle) = serve(app);

    client.send(b"GARBAGE\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.status, 400);
    assert_eq!(reply.header("Connection"), Some("close"));
    assert!(client.closed().await);
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_unsupported_version_gets_505() {
    let (mut client, _handle) = serve(hello);

    client.send(b"GET / HTTP/2.0\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.status, 505);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_unsupported_transfer_coding_gets_501() {
    let (mut client, _handle) = serve(echo_body);

    client
        .send(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n")
        .await;
    let reply = client.response(false).await;

    assert_eq!(reply.status, 501);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_invalid_content_length_gets_400() {
    let (mut client, _handle) = serve(echo_body);

    client
        .send(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n")
        .await;
    let reply = client.response(false).await;

    assert_eq!(reply.status, 400);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_oversized_body_gets_413_without_reaching_app() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let app = move |_: &mut Environ| -> Result<Reply, AppError> {
        flag.store(true, Ordering::SeqCst);
        Ok(Response::ok("unreachable").into())
    };
    let (mut client, _handle) = serve_protocol(Protocol::new(app, limited(64)));

    client
        .send(b"POST / HTTP/1.1\r\nContent-Length: 1000\r\n\r\n")
        .await;
    let reply = client.response(false).await;

    assert_eq!(reply.status, 413);
    assert_eq!(reply.header("Connection"), Some("close"));
    assert!(client.closed().await);
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_oversized_body_on_http10_gets_400() {
    let (mut client, _handle) = serve_protocol(Protocol::new(echo_body, limited(64)));

    client
        .send(b"POST / HTTP/1.0\r\nContent-Length: 1000\r\n\r\n")
        .await;
    let reply = client.response(false).await;

    assert_eq!(reply.version, "HTTP/1.0");
    assert_eq!(reply.status, 400);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_oversized_head_gets_413() {
    let (mut client, _handle) = serve_protocol(Protocol::new(hello, limited(64)));

    let mut request = b"GET / HTTP/1.1\r\nX-Padding: ".to_vec();
    request.extend_from_slice(&[b'x'; 200]);
    request.extend_from_slice(b"\r\n\r\n");
    client.send(&request).await;

    let reply = client.response(false).await;
    assert_eq!(reply.status, 413);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_oversized_head_on_http10_gets_400() {
    let (mut client, _handle) = serve_protocol(Protocol::new(hello, limited(64)));

    let mut request = b"GET / HTTP/1.0\r\nX-Padding: ".to_vec();
    request.extend_from_slice(&[b'x'; 200]);
    request.extend_from_slice(b"\r\n\r\n");
    client.send(&request).await;

    let reply = client.response(false).await;
    assert_eq!(reply.version, "HTTP/1.0");
    assert_eq!(reply.status, 400);
    assert!(client.closed().await);
}

fn bad_length(_environ: &mut Environ) -> Result<Reply, AppError> {
    Ok(Response {
        status: "200 OK".into(),
        headers: vec![("Content-Length".into(), "abc".into())],
        body: Body::from(vec!["hello"]),
    }
    .into())
}

#[tokio::test]
async fn test_non_numeric_content_length_is_500() {
    let (mut client, _handle) = serve(bad_length);

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.status, 500);
    assert_eq!(reply.body, INTERNAL_ERROR_BODY);
}

#[tokio::test]
async fn test_lenient_non_numeric_content_length_is_never_chunked() {
    let lenient = ProtocolOptions {
        pedantic: false,
        ..ProtocolOptions::default()
    };
    let (mut client, _handle) = serve_protocol(Protocol::new(bad_length, lenient));

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let head = client.response(true).await;

    assert_eq!(head.header("Content-Length"), Some("abc"));
    assert!(head.header("Transfer-Encoding").is_none());
    assert_eq!(head.header("Connection"), Some("close"));
    assert_eq!(client.read_to_end().await, b"hello");
}

#[tokio::test]
async fn test_lenient_application_connection_close_closes() {
    fn closing(_environ: &mut Environ) -> Result<Reply, AppError> {
        Ok(ResponseBuilder::new(StatusCode::Ok)
            .header("Connection", "close")
            .body("bye")
            .build()
            .into())
    }
    let lenient = ProtocolOptions {
        pedantic: false,
        ..ProtocolOptions::default()
    };
    let (mut client, _handle) = serve_protocol(Protocol::new(closing, lenient));

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let reply = client.response(false).await;

    assert_eq!(reply.text(), "bye");
    let closes = reply
        .headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("Connection"))
        .count();
    assert_eq!(closes, 1);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_content_length_body_then_pipelined_request() {
    let (mut client, _handle) = serve(echo_body);

    client
        .send(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloPOST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nbye")
        .await;

    assert_eq!(client.response(false).await.text(), "hello");
    assert_eq!(client.response(false).await.text(), "bye");
}

#[tokio::test]
async fn test_chunked_request_body() {
    let (mut client, _handle) = serve(echo_body);

    client
        .send(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n")
        .await;

    assert_eq!(client.response(false).await.text(), "hello world");
}

#[tokio::test]
async fn test_chunked_request_trailers_reach_app() {
    fn trailer(environ: &mut Environ) -> Result<Reply, AppError> {
        let value = environ.trailers.get("HTTP_CHECKSUM").cloned().unwrap_or_default();
        Ok(Response::ok(value).into())
    }
    let (mut client, _handle) = serve(trailer);

    client
        .send(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1\r\nx\r\n0\r\nChecksum: 42\r\n\r\n")
        .await;

    assert_eq!(client.response(false).await.text(), "42");
}

#[tokio::test]
async fn test_malformed_chunk_closes_without_response() {
    let (mut client, handle) = serve(echo_body);

    client
        .send(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nhello\r\n")
        .await;

    assert!(client.closed().await);
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_expect_continue() {
    let (mut client, _handle) = serve(echo_body);

    client
        .send(b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n")
        .await;
    let interim = client.response(false).await;
    assert_eq!(interim.status, 100);

    client.send(b"hello").await;
    let reply = client.response(false).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "hello");
}

#[tokio::test]
async fn test_expect_continue_oversized_gets_413_instead() {
    let (mut client, _handle) = serve_protocol(Protocol::new(echo_body, limited(96)));

    client
        .send(b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5000\r\n\r\n")
        .await;
    let reply = client.response(false).await;

    assert_eq!(reply.status, 413);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_environ_identity_seen_by_app() {
    fn identity(environ: &mut Environ) -> Result<Reply, AppError> {
        let text = format!(
            "{}|{}|{}|{}|{}",
            environ.get("REMOTE_ADDR").unwrap_or_default(),
            environ.get("REMOTE_PORT").unwrap_or_default(),
            environ.get("SERVER_NAME").unwrap_or_default(),
            environ.get("QUERY_STRING").unwrap_or_default(),
            environ.get("HTTP_HOST").unwrap_or_default(),
        );
        Ok(Response::ok(text).into())
    }
    let (mut client, _handle) = serve(identity);

    client
        .send(b"GET /foo?bar=1#frag HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await;

    assert_eq!(
        client.response(false).await.text(),
        "127.0.0.1|40000|localhost|bar=1|localhost"
    );
}

#[tokio::test]
async fn test_stray_line_breaks_between_requests() {
    let (mut client, _handle) = serve(echo_path);

    client
        .send(b"GET /one HTTP/1.1\r\n\r\n\r\n\r\nGET /two HTTP/1.1\r\n\r\n")
        .await;

    assert_eq!(client.response(false).await.text(), "/one");
    assert_eq!(client.response(false).await.text(), "/two");
}

#[tokio::test]
async fn test_peer_close_ends_connection_cleanly() {
    let (client, handle) = serve(hello);
    drop(client);
    assert!(handle.await.unwrap().is_ok());
}
