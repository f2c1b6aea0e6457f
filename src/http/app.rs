//! The application contract.
//!
//! An [`Application`] is called once per request with a mutable [`Environ`].
//! It answers with a [`Reply`]: either a complete [`Response`] (simple mode),
//! or a [`Responder`] that is resumed step by step and may suspend the
//! connection between steps (cooperative mode).
//!
//! The [`Invoker`] sits between the connection and the application. It runs
//! filters, turns panics into errors, and validates what the application
//! hands back before any byte reaches the wire.

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::http::error::HttpError;
use crate::http::filter::{Egress, Ingress};
use crate::http::request::{Environ, is_token};
use crate::http::response::{ChunkStream, Headers, Response, ResponseHead, Status};

/// Errors raised by application code.
pub type AppError = anyhow::Error;

/// A future the connection waits on before resuming a responder.
pub type Wakeup = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One step of a cooperative response.
pub enum Yield {
    /// Reschedule on the next loop iteration.
    Continue,
    /// Resume when the future completes.
    Wait(Wakeup),
    /// Resume at (or soon after) the given wall-clock time.
    Until(SystemTime),
    /// Start the response: status and headers. Exactly once, first.
    Headers(String, Headers),
    /// A body chunk. Only after `Headers`.
    Chunk(Bytes),
}

impl Yield {
    pub fn wait<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Yield::Wait(Box::pin(future))
    }

    pub fn headers(status: impl Into<String>, headers: Headers) -> Self {
        Yield::Headers(status.into(), headers)
    }

    pub fn chunk(data: impl Into<Bytes>) -> Self {
        Yield::Chunk(data.into())
    }
}

impl fmt::Debug for Yield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Yield::Continue => f.write_str("Continue"),
            Yield::Wait(_) => f.write_str("Wait(..)"),
            Yield::Until(at) => f.debug_tuple("Until").field(at).finish(),
            Yield::Headers(status, headers) => {
                f.debug_tuple("Headers").field(status).field(headers).finish()
            }
            Yield::Chunk(data) => f.debug_tuple("Chunk").field(&data.len()).finish(),
        }
    }
}

/// A response produced incrementally.
pub trait Responder: Send {
    /// Advances the response by one step. `Ok(None)` means it is complete.
    fn resume(&mut self, environ: &mut Environ) -> Result<Option<Yield>, AppError>;
}

/// Adapts any iterator of steps into a [`Responder`].
pub struct Steps<I>(I);

impl<I> Responder for Steps<I>
where
    I: Iterator<Item = Result<Yield, AppError>> + Send,
{
    fn resume(&mut self, _environ: &mut Environ) -> Result<Option<Yield>, AppError> {
        self.0.next().transpose()
    }
}

/// What an application returns for one request.
pub enum Reply {
    Ready(Response),
    Deferred(Box<dyn Responder>),
}

impl Reply {
    pub fn deferred(responder: impl Responder + 'static) -> Self {
        Reply::Deferred(Box::new(responder))
    }

    /// Cooperative reply driven by a plain iterator of steps.
    pub fn steps<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = Result<Yield, AppError>>,
        I::IntoIter: Send + 'static,
    {
        Reply::Deferred(Box::new(Steps(steps.into_iter())))
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Ready(response)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ready(response) => f.debug_tuple("Ready").field(response).finish(),
            Reply::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// A request handler.
///
/// Closures of the right shape are applications:
///
/// ```
/// # use wicket::http::app::{AppError, Application, Reply};
/// # use wicket::http::request::Environ;
/// # use wicket::http::response::Response;
/// fn hello(_environ: &mut Environ) -> Result<Reply, AppError> {
///     Ok(Response::ok("Hello world!").into())
/// }
/// fn assert_app<A: Application>(_: A) {}
/// assert_app(hello);
/// ```
pub trait Application: Send + Sync + 'static {
    fn call(&self, environ: &mut Environ) -> Result<Reply, AppError>;
}

impl<F> Application for F
where
    F: Fn(&mut Environ) -> Result<Reply, AppError> + Send + Sync + 'static,
{
    fn call(&self, environ: &mut Environ) -> Result<Reply, AppError> {
        self(environ)
    }
}

/// Calls into application code on behalf of a connection.
#[derive(Clone, Default)]
pub struct Invoker {
    pedantic: bool,
    ingress: Vec<Arc<dyn Ingress>>,
    egress: Vec<Arc<dyn Egress>>,
}

impl Invoker {
    pub fn new(pedantic: bool) -> Self {
        Self {
            pedantic,
            ..Self::default()
        }
    }

    pub fn with_ingress(mut self, filter: Arc<dyn Ingress>) -> Self {
        self.ingress.push(filter);
        self
    }

    pub fn with_egress(mut self, filter: Arc<dyn Egress>) -> Self {
        self.egress.push(filter);
        self
    }

    pub fn pedantic(&self) -> bool {
        self.pedantic
    }

    /// Runs ingress filters, the application, then egress filters on a
    /// ready response. Panics surface as [`HttpError::Application`].
    pub fn call(&self, app: &dyn Application, environ: &mut Environ) -> Result<Reply, HttpError> {
        guarded(|| {
            for filter in &self.ingress {
                filter.filter(environ)?;
            }

            match app.call(environ)? {
                Reply::Ready(mut response) => {
                    for filter in &self.egress {
                        response = filter.filter(environ, response)?;
                    }
                    Ok(Reply::Ready(response))
                }
                deferred => Ok(deferred),
            }
        })
    }

    /// Advances a cooperative responder by one step.
    pub fn resume(
        &self,
        responder: &mut dyn Responder,
        environ: &mut Environ,
    ) -> Result<Option<Yield>, HttpError> {
        guarded(|| responder.resume(environ))
    }

    /// Pulls the next chunk from a simple-mode body.
    pub fn next_chunk(&self, chunks: &mut ChunkStream) -> Option<Result<Bytes, HttpError>> {
        guarded(|| chunks.next().transpose()).transpose()
    }

    /// Checks an application's status and headers and converts them to
    /// wire form.
    ///
    /// In pedantic mode header names must be tokens, values may not contain
    /// CR, LF or NUL, hop-by-hop framing headers are reserved for the
    /// server, and text must be ASCII or representable in ISO-8859-1.
    pub fn validate(&self, status: &str, headers: Headers) -> Result<ResponseHead, HttpError> {
        let parsed = Status::parse(status)
            .ok_or_else(|| HttpError::ContractViolation(format!("invalid status {status:?}")))?;
        let mut head = ResponseHead::new(parsed);

        for (name, value) in headers {
            if self.pedantic {
                if !is_token(&name) {
                    return Err(HttpError::ContractViolation(format!(
                        "invalid header name {name:?}"
                    )));
                }
                if name.eq_ignore_ascii_case("Transfer-Encoding")
                    || name.eq_ignore_ascii_case("Connection")
                {
                    return Err(HttpError::ContractViolation(format!(
                        "{name} is managed by the server"
                    )));
                }
                if name.eq_ignore_ascii_case("Content-Length")
                    && value.trim().parse::<u64>().is_err()
                {
                    return Err(HttpError::ContractViolation(format!(
                        "invalid Content-Length {value:?}"
                    )));
                }
                if value.contains(['\r', '\n', '\0']) {
                    return Err(HttpError::ContractViolation(format!(
                        "control character in value of {name}"
                    )));
                }
                let bytes = coerce(&value).ok_or_else(|| {
                    HttpError::ContractViolation(format!(
                        "value of {name} is not representable in ISO-8859-1"
                    ))
                })?;
                head.push(name, bytes);
            } else {
                head.push(name, value.into_bytes());
            }
        }

        Ok(head)
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("pedantic", &self.pedantic)
            .field("ingress", &self.ingress.len())
            .field("egress", &self.egress.len())
            .finish()
    }
}

/// ASCII passes through; otherwise every character must fit in one
/// ISO-8859-1 byte.
fn coerce(value: &str) -> Option<Vec<u8>> {
    if value.is_ascii() {
        return Some(value.as_bytes().to_vec());
    }
    value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect()
}

fn guarded<T>(f: impl FnOnce() -> Result<T, AppError>) -> Result<T, HttpError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(HttpError::Application),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "application panicked".to_string());
            Err(HttpError::Application(anyhow::anyhow!("panic: {message}")))
        }
    }
}
