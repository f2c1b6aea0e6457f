//! Response serialization.
//!
//! The writer completes the application's head with the headers the server
//! owns (`Server`, `Date`, `Connection`, `Transfer-Encoding`), decides how the
//! body is framed, and whether the connection survives the exchange.

use std::fmt::Write as _;
use std::time::SystemTime;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::error::HttpError;
use crate::http::protocol::ProtocolOptions;
use crate::http::request::{Environ, Version};
use crate::http::response::ResponseHead;
use crate::http::stream::Stream;

/// Terminating zero-length chunk with an empty trailer.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Engine applies chunked transfer coding.
    Chunked,
    /// Length is known to the client (`Content-Length`, or the application
    /// frames the body itself).
    Length,
    /// Status never has a body.
    Bodiless,
    /// Body ends when the connection closes.
    CloseDelimited,
}

/// Decides whether the connection persists after this exchange.
///
/// HTTP/1.1 persists unless the request said `Connection: close`. HTTP/1.0
/// persists only when the request asked for `keep-alive` and the response
/// length is determinate. Nothing persists with pipelining disabled.
///
/// # Example
///
/// ```
/// # use wicket::http::request::Version;
/// # use wicket::http::writer::{keep_alive, Framing};
/// assert!(keep_alive(true, Version::Http11, None, Framing::Chunked));
/// assert!(!keep_alive(true, Version::Http11, Some("close"), Framing::Length));
/// assert!(!keep_alive(true, Version::Http10, None, Framing::Length));
/// assert!(keep_alive(true, Version::Http10, Some("Keep-Alive"), Framing::Length));
/// assert!(!keep_alive(false, Version::Http11, None, Framing::Length));
/// ```
pub fn keep_alive(
    pipeline: bool,
    version: Version,
    connection: Option<&str>,
    framing: Framing,
) -> bool {
    if !pipeline || framing == Framing::CloseDelimited {
        return false;
    }

    let has_token = |token: &str| {
        connection.is_some_and(|value| {
            value
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    };

    match version {
        Version::Http11 => !has_token("close"),
        Version::Http10 => has_token("keep-alive"),
    }
}

/// Appends one chunk in chunked transfer coding: lowercase hex length, CRLF,
/// data, CRLF. Empty input writes nothing, since a zero-length chunk would
/// end the body.
pub fn encode_chunk(data: &[u8], buf: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    let _ = write!(buf, "{:x}\r\n", data.len());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// Status line, headers and the blank line, as one buffer.
pub fn serialize_head(version: Version, head: &ResponseHead) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);

    let _ = write!(buf, "{} {}\r\n", version, head.status);

    for (name, value) in &head.headers {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value);
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf
}

/// Writes one response onto a stream.
#[derive(Debug)]
pub struct ResponseWriter {
    version: Version,
    framing: Framing,
    suppress_body: bool,
    keep_alive: bool,
    declared_length: Option<u64>,
    body_bytes: u64,
    head_sent: bool,
}

impl ResponseWriter {
    /// Prepares a writer for a response to `environ`, adding server-owned
    /// headers to `head`.
    pub fn for_environ(
        environ: &Environ,
        head: &mut ResponseHead,
        options: &ProtocolOptions,
    ) -> Self {
        Self::prepare(
            environ.protocol,
            environ.head_request,
            environ.header("Connection").as_deref(),
            head,
            options,
        )
    }

    /// Prepares a writer from the bare request facts. Synthetic error
    /// responses use this with `connection` set to `"close"`.
    pub fn prepare(
        version: Version,
        head_request: bool,
        connection: Option<&str>,
        head: &mut ResponseHead,
        options: &ProtocolOptions,
    ) -> Self {
        if !head.has_header("Server") {
            head.push("Server", options.software.as_bytes());
        }
        if !head.has_header("Date") {
            head.push("Date", httpdate::fmt_http_date(SystemTime::now()));
        }

        let declared_length = head
            .header("Content-Length")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let framing = if head.status.is_bodiless() {
            Framing::Bodiless
        } else if head.has_header("Content-Length") {
            // An unreadable length leaves only the close to mark the end.
            if declared_length.is_some() {
                Framing::Length
            } else {
                Framing::CloseDelimited
            }
        } else if head.has_header("Transfer-Encoding") {
            Framing::Length
        } else if version == Version::Http11 {
            Framing::Chunked
        } else if head_request {
            // No body follows a HEAD response, so its end is known.
            Framing::Bodiless
        } else {
            Framing::CloseDelimited
        };

        let closing = head
            .header("Connection")
            .and_then(|v| std::str::from_utf8(v).ok())
            .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")));
        let keep_alive = !closing && keep_alive(options.pipeline, version, connection, framing);

        if !head.has_header("Connection") {
            match (version, keep_alive) {
                (Version::Http11, false) => head.push("Connection", "close"),
                (Version::Http10, true) => head.push("Connection", "keep-alive"),
                _ => {}
            }
        }

        if framing == Framing::Chunked {
            head.push("Transfer-Encoding", "chunked");
        }

        Self {
            version,
            framing,
            suppress_body: head_request || head.status.is_bodiless(),
            keep_alive,
            declared_length: declared_length.filter(|_| framing == Framing::Length),
            body_bytes: 0,
            head_sent: false,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn head_sent(&self) -> bool {
        self.head_sent
    }

    pub async fn write_head<S>(
        &mut self,
        stream: &mut Stream<S>,
        head: &ResponseHead,
    ) -> Result<(), HttpError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let buf = serialize_head(self.version, head);
        stream.write(&buf).await?;
        self.head_sent = true;
        Ok(())
    }

    /// Writes one body chunk. Empty chunks and every chunk of a HEAD or
    /// bodiless response are dropped.
    pub async fn write_chunk<S>(
        &mut self,
        stream: &mut Stream<S>,
        data: &[u8],
    ) -> Result<(), HttpError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.suppress_body || data.is_empty() {
            return Ok(());
        }

        self.body_bytes += data.len() as u64;

        if self.framing == Framing::Chunked {
            let mut buf = BytesMut::with_capacity(data.len() + 16);
            encode_chunk(data, &mut buf);
            stream.write(&buf).await
        } else {
            stream.write(data).await
        }
    }

    /// Completes the body. Ends a chunked body with the last-chunk marker.
    pub async fn finish<S>(&mut self, stream: &mut Stream<S>) -> Result<(), HttpError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.suppress_body {
            return Ok(());
        }

        if self.framing == Framing::Chunked {
            stream.write(LAST_CHUNK).await?;
        }

        if let Some(declared) = self.declared_length {
            if declared != self.body_bytes {
                tracing::warn!(
                    declared,
                    written = self.body_bytes,
                    "Body length does not match Content-Length; closing connection"
                );
                self.keep_alive = false;
            }
        }

        Ok(())
    }
}
