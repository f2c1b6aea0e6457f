//! One client connection, driven as a state machine.
//!
//! Requests on a connection are handled strictly in order: the next head is
//! not read until the previous response has been fully written. Bytes the
//! client pipelines ahead stay buffered in the stream meanwhile.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::app::{Reply, Responder, Yield};
use crate::http::body::{self, BodyInput};
use crate::http::error::HttpError;
use crate::http::parser::parse_request_head;
use crate::http::protocol::Protocol;
use crate::http::request::{BodyFraming, Environ, EnvironTemplate, Version};
use crate::http::response::{ChunkStream, Response, ResponseHead, Status, StatusCode};
use crate::http::stream::{EOH, Stream};
use crate::http::writer::ResponseWriter;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

pub struct Connection<S> {
    stream: Stream<S>,
    protocol: Arc<Protocol>,
    template: EnvironTemplate,
    peer: SocketAddr,
    state: ConnectionState,
    served: u64,
}

pub enum ConnectionState {
    AwaitingRequest,
    ParsingHeaders(Bytes),
    AwaitingBody(Box<Environ>, BodyFraming),
    AwaitingResponse(Box<Environ>),
    SendingBody(Box<Environ>, ResponseWriter, Outgoing),
    Finished { keep_alive: bool },
    Closed,
}

/// Source of the remaining response body.
pub enum Outgoing {
    Chunks(ChunkStream),
    Steps(Box<dyn Responder>),
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S, peer: SocketAddr, protocol: Arc<Protocol>) -> Self {
        let stream = Stream::new(io, protocol.options().max_buffer_size);
        let template = protocol.template(peer);

        Self {
            stream,
            protocol,
            template,
            peer,
            state: ConnectionState::AwaitingRequest,
            served: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Number of responses completed on this connection.
    pub fn requests_served(&self) -> u64 {
        self.served
    }

    /// Serves requests until the connection closes.
    ///
    /// Protocol and application failures are answered or logged here;
    /// only transport errors are returned.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            let next = match state {
                ConnectionState::AwaitingRequest => self.read_head().await,
                ConnectionState::ParsingHeaders(data) => self.parse_head(&data).await,
                ConnectionState::AwaitingBody(environ, framing) => {
                    self.read_body(environ, framing).await
                }
                ConnectionState::AwaitingResponse(environ) => self.respond(environ).await,
                ConnectionState::SendingBody(environ, writer, outgoing) => {
                    self.send_body(environ, writer, outgoing).await
                }
                ConnectionState::Finished { keep_alive } => {
                    self.served += 1;
                    if keep_alive {
                        Ok(ConnectionState::AwaitingRequest)
                    } else {
                        self.close().await;
                        Ok(ConnectionState::Closed)
                    }
                }
                ConnectionState::Closed => break,
            };

            self.state = match next {
                Ok(state) => state,
                Err(HttpError::Io(e)) => {
                    self.close().await;
                    return Err(anyhow::Error::new(e).context("transport failure"));
                }
                Err(e) => {
                    if e.is_application() {
                        tracing::error!(error = %e, "Application failed mid-response; aborting");
                    } else {
                        tracing::debug!(error = %e, "Closing connection");
                    }
                    self.close().await;
                    ConnectionState::Closed
                }
            };
        }

        Ok(())
    }

    async fn read_head(&mut self) -> Result<ConnectionState, HttpError> {
        match self.stream.read_until(EOH).await {
            Ok(Some(data)) => Ok(ConnectionState::ParsingHeaders(data)),
            Ok(None) => {
                tracing::debug!(served = self.served, "Peer closed connection");
                self.close().await;
                Ok(ConnectionState::Closed)
            }
            Err(e) => {
                let version = version_hint(self.stream.peek());
                self.reject(e, version).await
            }
        }
    }

    async fn parse_head(&mut self, data: &[u8]) -> Result<ConnectionState, HttpError> {
        // Nothing but stray line breaks between pipelined requests.
        if data.iter().all(|&b| b == b'\r' || b == b'\n') {
            return Ok(ConnectionState::AwaitingRequest);
        }

        match parse_request_head(data).and_then(|head| self.template.build(head)) {
            Ok((environ, framing)) => {
                tracing::trace!(
                    method = %environ.original_method(),
                    path = %environ.path_info,
                    ?framing,
                    "Request head parsed"
                );
                Ok(ConnectionState::AwaitingBody(Box::new(environ), framing))
            }
            Err(e) => self.reject(e, version_hint(data)).await,
        }
    }

    async fn read_body(
        &mut self,
        mut environ: Box<Environ>,
        framing: BodyFraming,
    ) -> Result<ConnectionState, HttpError> {
        match self.receive(&environ, framing).await {
            Ok((input, trailers)) => {
                environ.input = input;
                environ.trailers = trailers;
                Ok(ConnectionState::AwaitingResponse(environ))
            }
            Err(e) => self.reject(e, environ.protocol).await,
        }
    }

    async fn receive(
        &mut self,
        environ: &Environ,
        framing: BodyFraming,
    ) -> Result<(BodyInput, std::collections::HashMap<String, String>), HttpError> {
        if let BodyFraming::Length(length) = framing {
            body::check_length(length, self.stream.max_buffer_size())?;
        }

        if framing != BodyFraming::None && expects_continue(environ) {
            self.stream.write(CONTINUE).await?;
        }

        body::read_body(&mut self.stream, framing).await
    }

    async fn respond(&mut self, environ: Box<Environ>) -> Result<ConnectionState, HttpError> {
        let protocol = Arc::clone(&self.protocol);
        let invoker = protocol.invoker();

        let (mut environ, reply) = match invoke(Arc::clone(&protocol), environ).await {
            Ok(done) => done,
            Err((lost, e)) => return self.lost_request(lost, e).await,
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => return self.internal_error(environ, e).await,
        };

        match reply {
            Reply::Ready(response) => {
                let Response {
                    status,
                    headers,
                    body,
                } = response;

                match invoker.validate(&status, headers) {
                    Ok(head) => {
                        let writer = self.start_response(&environ, head).await?;
                        Ok(ConnectionState::SendingBody(
                            environ,
                            writer,
                            Outgoing::Chunks(body.into_chunks()),
                        ))
                    }
                    Err(e) => self.internal_error(environ, e).await,
                }
            }
            Reply::Deferred(mut responder) => loop {
                match invoker.resume(responder.as_mut(), &mut environ) {
                    Ok(Some(Yield::Headers(status, headers))) => {
                        let head = match invoker.validate(&status, headers) {
                            Ok(head) => head,
                            Err(e) => return self.internal_error(environ, e).await,
                        };
                        let writer = self.start_response(&environ, head).await?;
                        return Ok(ConnectionState::SendingBody(
                            environ,
                            writer,
                            Outgoing::Steps(responder),
                        ));
                    }
                    Ok(Some(Yield::Chunk(_))) => {
                        let e = HttpError::ContractViolation("body chunk before headers".into());
                        return self.internal_error(environ, e).await;
                    }
                    Ok(Some(pause)) => suspend(pause).await,
                    Ok(None) => {
                        let e = HttpError::ContractViolation("response ended before headers".into());
                        return self.internal_error(environ, e).await;
                    }
                    Err(e) => return self.internal_error(environ, e).await,
                }
            },
        }
    }

    async fn send_body(
        &mut self,
        mut environ: Box<Environ>,
        mut writer: ResponseWriter,
        outgoing: Outgoing,
    ) -> Result<ConnectionState, HttpError> {
        let protocol = Arc::clone(&self.protocol);
        let invoker = protocol.invoker();

        match outgoing {
            Outgoing::Chunks(mut chunks) => {
                while let Some(chunk) = invoker.next_chunk(&mut chunks) {
                    writer.write_chunk(&mut self.stream, &chunk?).await?;
                }
            }
            Outgoing::Steps(mut responder) => loop {
                match invoker.resume(responder.as_mut(), &mut environ)? {
                    None => break,
                    Some(Yield::Chunk(data)) => writer.write_chunk(&mut self.stream, &data).await?,
                    Some(Yield::Headers(..)) => {
                        return Err(HttpError::ContractViolation("headers sent twice".into()));
                    }
                    Some(pause) => suspend(pause).await,
                }
            },
        }

        writer.finish(&mut self.stream).await?;

        Ok(ConnectionState::Finished {
            keep_alive: writer.keep_alive(),
        })
    }

    async fn start_response(
        &mut self,
        environ: &Environ,
        mut head: ResponseHead,
    ) -> Result<ResponseWriter, HttpError> {
        let mut writer = ResponseWriter::for_environ(environ, &mut head, self.protocol.options());
        writer.write_head(&mut self.stream, &head).await?;

        tracing::info!(
            "{} {} {} {}",
            environ.original_method(),
            environ.request_uri,
            environ.protocol,
            head.status.code()
        );

        Ok(writer)
    }

    /// Replaces a failed application response with the fixed 500.
    /// Persistence follows the usual rules.
    async fn internal_error(
        &mut self,
        environ: Box<Environ>,
        err: HttpError,
    ) -> Result<ConnectionState, HttpError> {
        environ.errors.write(&format!(
            "{} {}: {:#}",
            environ.original_method(),
            environ.request_uri,
            err
        ));

        let keep_alive = self
            .write_fixed(
                environ.protocol,
                environ.head_request,
                environ.header("Connection").as_deref(),
                Response::internal_error(),
                false,
            )
            .await?;

        Ok(ConnectionState::Finished { keep_alive })
    }

    /// Answers a request whose context went down with a failed pool job.
    async fn lost_request(
        &mut self,
        lost: LostRequest,
        err: HttpError,
    ) -> Result<ConnectionState, HttpError> {
        tracing::error!(
            method = %lost.method,
            uri = %lost.request_uri,
            error = %err,
            "Worker job failed before a response"
        );

        let keep_alive = self
            .write_fixed(
                lost.version,
                lost.head_request,
                lost.connection.as_deref(),
                Response::internal_error(),
                false,
            )
            .await?;

        Ok(ConnectionState::Finished { keep_alive })
    }

    /// Answers a protocol error with a synthetic response and closes, or
    /// hands the error back when it has no response.
    async fn reject(&mut self, err: HttpError, version: Version) -> Result<ConnectionState, HttpError> {
        let Some(status) = err.status() else {
            return Err(err);
        };

        // HTTP/1.0 clients predate 413.
        let status = match (status, version) {
            (StatusCode::RequestEntityTooLarge, Version::Http10) => StatusCode::BadRequest,
            (status, _) => status,
        };

        tracing::warn!(error = %err, status = status.as_u16(), "Rejecting request");

        let message = format!("{}\r\n", status.status_line());
        self.write_fixed(version, false, None, Response::simple(status, &message), true)
            .await?;

        Ok(ConnectionState::Finished { keep_alive: false })
    }

    /// Writes an engine-generated response. These bypass application
    /// header validation.
    async fn write_fixed(
        &mut self,
        version: Version,
        head_request: bool,
        connection: Option<&str>,
        response: Response,
        force_close: bool,
    ) -> Result<bool, HttpError> {
        let Response {
            status,
            headers,
            body,
        } = response;

        let status =
            Status::parse(&status).unwrap_or_else(|| StatusCode::InternalServerError.into());
        let mut head = ResponseHead::new(status);
        for (name, value) in headers {
            head.push(name, value);
        }

        let connection = if force_close {
            head.push("Connection", "close");
            Some("close")
        } else {
            connection
        };

        let mut writer = ResponseWriter::prepare(
            version,
            head_request,
            connection,
            &mut head,
            self.protocol.options(),
        );

        writer.write_head(&mut self.stream, &head).await?;
        for chunk in body.into_chunks() {
            let chunk = chunk.map_err(HttpError::Application)?;
            writer.write_chunk(&mut self.stream, &chunk).await?;
        }
        writer.finish(&mut self.stream).await?;

        Ok(writer.keep_alive())
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close().await {
            tracing::debug!(error = %e, "Error while closing connection");
        }
    }
}

/// Request facts kept on the connection while the context itself is out on
/// a worker.
struct LostRequest {
    version: Version,
    head_request: bool,
    connection: Option<String>,
    method: String,
    request_uri: String,
}

impl LostRequest {
    fn from_environ(environ: &Environ) -> Self {
        Self {
            version: environ.protocol,
            head_request: environ.head_request,
            connection: environ.header("Connection").map(|v| v.into_owned()),
            method: environ.original_method().to_string(),
            request_uri: environ.request_uri.clone(),
        }
    }
}

/// Calls the application, on the worker pool when one is configured.
/// The request context moves to the worker and back; if the job fails it
/// is gone and only the saved facts remain.
async fn invoke(
    protocol: Arc<Protocol>,
    mut environ: Box<Environ>,
) -> Result<(Box<Environ>, Result<Reply, HttpError>), (LostRequest, HttpError)> {
    let Some(executor) = protocol.executor() else {
        let reply = protocol.invoker().call(protocol.app().as_ref(), &mut environ);
        return Ok((environ, reply));
    };

    let lost = LostRequest::from_environ(&environ);
    let worker = Arc::clone(&protocol);
    let job = executor.submit(move || {
        let mut environ = environ;
        let reply = worker.invoker().call(worker.app().as_ref(), &mut environ);
        (environ, reply)
    });

    job.await.map_err(|e| (lost, HttpError::Application(e.into())))
}

async fn suspend(pause: Yield) {
    match pause {
        Yield::Continue => tokio::task::yield_now().await,
        Yield::Wait(wakeup) => wakeup.await,
        Yield::Until(at) => {
            let delay = at.duration_since(SystemTime::now()).unwrap_or_default();
            tokio::time::sleep(delay).await;
        }
        Yield::Headers(..) | Yield::Chunk(_) => {}
    }
}

fn expects_continue(environ: &Environ) -> bool {
    environ.protocol == Version::Http11
        && environ.header("Expect").is_some_and(|value| {
            value
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("100-continue"))
        })
}

/// Best guess at the request's version when its head failed to parse.
fn version_hint(data: &[u8]) -> Version {
    let line = data
        .split(|&b| b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    if line.ends_with(b"HTTP/1.0") {
        Version::Http10
    } else {
        Version::Http11
    }
}
