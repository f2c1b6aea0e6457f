use std::fmt;

use bytes::Bytes;

use crate::http::app::AppError;

/// Status codes the engine itself produces.
///
/// Applications supply their own status strings (`"200 OK"`); this enum covers
/// the synthetic responses written for protocol and application failures plus
/// a few common codes used by the helpers below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 100 Continue
    Continue,
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 413 Request Entity Too Large
    RequestEntityTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 505 HTTP Version Not Supported
    HttpVersionNotSupported,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use wicket::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::RequestEntityTooLarge.as_u16(), 413);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::RequestEntityTooLarge => 413,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::HttpVersionNotSupported => 505,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::RequestEntityTooLarge => "Request Entity Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// The `"<code> <reason>"` form applications hand back.
    pub fn status_line(&self) -> String {
        format!("{} {}", self.as_u16(), self.reason_phrase())
    }
}

/// A validated status: three-digit code plus reason phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: u16,
    reason: String,
}

impl Status {
    /// Parses an application status such as `"200 OK"`.
    ///
    /// The protocol prefix is never part of it; the engine prepends the
    /// request's protocol version when writing the status line.
    pub fn parse(status: &str) -> Option<Self> {
        let (code, reason) = match status.split_once(' ') {
            Some((code, reason)) => (code, reason),
            None => (status, ""),
        };

        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        if reason.bytes().any(|b| b == b'\r' || b == b'\n' || !b.is_ascii()) {
            return None;
        }

        let code: u16 = code.parse().ok()?;
        if !(100..=999).contains(&code) {
            return None;
        }

        Some(Self {
            code,
            reason: reason.to_string(),
        })
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// 1xx, 204 and 304 responses never carry a message body.
    pub fn is_bodiless(&self) -> bool {
        self.code < 200 || self.code == 204 || self.code == 304
    }
}

impl From<StatusCode> for Status {
    fn from(code: StatusCode) -> Self {
        Self {
            code: code.as_u16(),
            reason: code.reason_phrase().to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.reason)
        }
    }
}

/// Ordered header list as supplied by an application.
pub type Headers = Vec<(String, String)>;

/// Lazily produced body chunks.
pub type ChunkStream = Box<dyn Iterator<Item = Result<Bytes, AppError>> + Send>;

/// A response body: either materialized up front or produced on demand.
///
/// A streamed body is finite and cannot be restarted.
pub enum Body {
    Full(Vec<Bytes>),
    Stream(ChunkStream),
}

impl Body {
    pub fn empty() -> Self {
        Body::Full(Vec::new())
    }

    pub fn stream<I>(chunks: I) -> Self
    where
        I: Iterator<Item = Result<Bytes, AppError>> + Send + 'static,
    {
        Body::Stream(Box::new(chunks))
    }

    pub fn into_chunks(self) -> ChunkStream {
        match self {
            Body::Full(chunks) => Box::new(chunks.into_iter().map(Ok)),
            Body::Stream(chunks) => chunks,
        }
    }
}

impl<T: Into<Bytes>> From<Vec<T>> for Body {
    fn from(chunks: Vec<T>) -> Self {
        Body::Full(chunks.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(chunks) => f.debug_tuple("Full").field(&chunks.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A complete simple-mode application response.
#[derive(Debug)]
pub struct Response {
    /// Status without protocol prefix, e.g. `"200 OK"`
    pub status: String,
    /// Headers in the order they should be written
    pub headers: Headers,
    pub body: Body,
}

/// Builder for constructing responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "text/plain")
///     .body(b"Hello world!".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: String,
    headers: Headers,
    body: Vec<Bytes>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self::with_status(status.status_line())
    }

    /// Starts from a raw status string such as `"418 I'm a teapot"`.
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header. Repeated names are kept, in order.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Replaces the body with a single chunk.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = vec![body.into()];
        self
    }

    /// Appends another body chunk.
    pub fn chunk(mut self, chunk: impl Into<Bytes>) -> Self {
        self.body.push(chunk.into());
        self
    }

    /// Builds the response, adding `Content-Length` from the body size unless
    /// one was set explicitly.
    pub fn build(mut self) -> Response {
        let has_length = self
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("Content-Length"));

        if !has_length {
            let length: usize = self.body.iter().map(Bytes::len).sum();
            self.headers
                .push(("Content-Length".to_string(), length.to_string()));
        }

        self.build_unframed()
    }

    /// Builds the response without adding `Content-Length`, leaving framing
    /// to the engine (chunked on HTTP/1.1).
    pub fn build_unframed(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: Body::Full(self.body),
        }
    }
}

/// Body text of the fixed 500 response. Exactly 48 bytes.
pub const INTERNAL_ERROR_BODY: &[u8] = b"The server encountered an unrecoverable error.\r\n";

impl Response {
    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body(body)
            .build()
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        Self::simple(StatusCode::NotFound, "404 Not Found")
    }

    /// The fixed response substituted when the application fails before
    /// sending anything. Never carries error details.
    pub fn internal_error() -> Self {
        ResponseBuilder::new(StatusCode::InternalServerError)
            .header("Content-Type", "text/plain")
            .body(Bytes::from_static(INTERNAL_ERROR_BODY))
            .build()
    }

    /// Plain-text response with a short message body.
    pub fn simple(status: StatusCode, message: &str) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain")
            .body(message.as_bytes().to_vec())
            .build()
    }
}

/// A status line plus headers that passed validation and are ready for the
/// wire. Header names are tokens; values are raw bytes.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: Status,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl ResponseHead {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// First value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.headers.push((name.into(), value.into()));
    }
}
