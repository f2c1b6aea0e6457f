use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use crate::http::body::BodyInput;
use crate::http::error::HttpError;
use crate::http::parser::RequestHead;
use crate::server::pool::Executor;

/// HTTP request methods.
///
/// The common methods get their own variant; any other syntactically valid
/// token is carried as `Extension` and passed through to the application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// CONNECT - Establish a tunnel
    CONNECT,
    /// TRACE - Loop-back test
    TRACE,
    /// Any other method token
    Extension(String),
}

impl Method {
    /// Parses an HTTP method token.
    ///
    /// # Returns
    ///
    /// `Some(Method)` for any valid token (case-sensitive, so `get` becomes an
    /// extension method), `None` if the token contains separators or controls.
    ///
    /// # Example
    ///
    /// ```
    /// # use wicket::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("PURGE"), Some(Method::Extension("PURGE".into())));
    /// assert_eq!(Method::from_str("GE T"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let method = match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            "CONNECT" => Method::CONNECT,
            "TRACE" => Method::TRACE,
            other if is_token(other) => Method::Extension(other.to_string()),
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
            Method::Extension(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 7230 token: visible ASCII minus separators.
pub fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Protocol versions the engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Charset the request path was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriEncoding {
    Utf8,
    Latin1,
}

impl UriEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            UriEncoding::Utf8 => "utf-8",
            UriEncoding::Latin1 => "iso-8859-1",
        }
    }
}

/// Decodes bytes as UTF-8, falling back to ISO-8859-1 (which never fails).
pub fn decode_text(bytes: &[u8]) -> (String, UriEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), UriEncoding::Utf8),
        Err(_) => (bytes.iter().map(|&b| b as char).collect(), UriEncoding::Latin1),
    }
}

/// Percent-decodes a path. Malformed escapes are kept literally.
pub fn percent_decode(input: &str) -> Vec<u8> {
    percent_encoding::percent_decode_str(input).collect()
}

/// How the request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Length(u64),
    Chunked,
}

/// Application diagnostics channel (`wsgi.errors`).
///
/// Scoped to one server and peer; messages go to the tracing pipeline rather
/// than a process-wide file.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    server: String,
    peer: String,
}

impl ErrorSink {
    pub fn new(server: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            peer: peer.into(),
        }
    }

    pub fn write(&self, message: &str) {
        tracing::error!(
            target: "wicket::app",
            server = %self.server,
            peer = %self.peer,
            "{}",
            message.trim_end()
        );
    }
}

/// The request context handed to the application.
///
/// Well-known CGI fields are struct members; request headers other than
/// `Content-Type`/`Content-Length` live in `headers` under their normalized
/// `HTTP_*` names. [`Environ::get`] offers lookup by CGI key.
#[derive(Debug)]
pub struct Environ {
    pub remote_addr: String,
    pub remote_port: u16,
    pub server_name: String,
    pub server_addr: String,
    pub server_port: String,

    /// Method used for dispatch. `HEAD` arrives here as `GET`.
    pub method: Method,
    /// Set when the client actually sent `HEAD`; the body is suppressed.
    pub head_request: bool,
    /// Raw request-target exactly as received
    pub request_uri: String,
    pub script_name: String,
    /// Percent-decoded path
    pub path_info: String,
    pub query_string: String,
    pub fragment: String,
    pub parameters: String,
    pub protocol: Version,

    pub headers: HashMap<String, String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    /// Trailer fields received after a chunked body
    pub trailers: HashMap<String, String>,

    pub input: BodyInput,
    pub errors: ErrorSink,
    pub uri_encoding: UriEncoding,

    pub url_scheme: String,
    pub multithread: bool,
    pub multiprocess: bool,
    pub run_once: bool,
    pub asynchronous: bool,
    pub version: (u8, u8),

    /// Worker pool capability, present when threaded execution is enabled.
    pub executor: Option<Executor>,
}

impl Environ {
    /// Looks up a value by its CGI/WSGI key.
    ///
    /// Returns `None` for absent optional fields (`CONTENT_LENGTH` when no
    /// valid length was sent) and unknown keys.
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        let value = match key {
            "REQUEST_METHOD" => Cow::Borrowed(self.method.as_str()),
            "REQUEST_URI" => Cow::Borrowed(self.request_uri.as_str()),
            "SCRIPT_NAME" => Cow::Borrowed(self.script_name.as_str()),
            "PATH_INFO" => Cow::Borrowed(self.path_info.as_str()),
            "QUERY_STRING" => Cow::Borrowed(self.query_string.as_str()),
            "FRAGMENT" => Cow::Borrowed(self.fragment.as_str()),
            "PARAMETERS" => Cow::Borrowed(self.parameters.as_str()),
            "SERVER_PROTOCOL" => Cow::Borrowed(self.protocol.as_str()),
            "SERVER_NAME" => Cow::Borrowed(self.server_name.as_str()),
            "SERVER_ADDR" => Cow::Borrowed(self.server_addr.as_str()),
            "SERVER_PORT" => Cow::Borrowed(self.server_port.as_str()),
            "REMOTE_ADDR" => Cow::Borrowed(self.remote_addr.as_str()),
            "REMOTE_PORT" => Cow::Owned(self.remote_port.to_string()),
            "CONTENT_TYPE" => Cow::Borrowed(self.content_type.as_deref()?),
            "CONTENT_LENGTH" => Cow::Owned(self.content_length?.to_string()),
            "wsgi.url_scheme" => Cow::Borrowed(self.url_scheme.as_str()),
            "wsgi.uri_encoding" | "uri_encoding" => Cow::Borrowed(self.uri_encoding.as_str()),
            other => Cow::Borrowed(self.headers.get(other)?.as_str()),
        };
        Some(value)
    }

    /// Looks up a request header by its wire name, e.g. `header("Host")`.
    pub fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(&environ_key(name))
    }

    /// The method the client put on the wire.
    pub fn original_method(&self) -> &str {
        if self.head_request { "HEAD" } else { self.method.as_str() }
    }
}

/// Header names that pass through without the `HTTP_` prefix.
const UNPREFIXED: [&str; 2] = ["CONTENT_TYPE", "CONTENT_LENGTH"];

pub const HEADER_PREFIX: &str = "HTTP_";

/// Normalizes a wire header name into its environ key:
/// `Accept-Language` becomes `HTTP_ACCEPT_LANGUAGE`.
pub fn environ_key(name: &str) -> String {
    let key = name.trim().to_ascii_uppercase().replace('-', "_");
    if UNPREFIXED.contains(&key.as_str()) {
        key
    } else {
        format!("{HEADER_PREFIX}{key}")
    }
}

/// Per-connection identity fields every request context starts from.
#[derive(Debug, Clone)]
pub struct EnvironTemplate {
    pub server_name: String,
    pub server_addr: String,
    pub server_port: String,
    pub remote_addr: String,
    pub remote_port: u16,
    pub url_scheme: String,
    pub multithread: bool,
    pub multiprocess: bool,
    pub executor: Option<Executor>,
    pub errors: ErrorSink,
}

impl EnvironTemplate {
    /// Builds a fresh request context from a parsed head and decides how the
    /// body is framed.
    pub fn build(&self, head: RequestHead) -> Result<(Environ, BodyFraming), HttpError> {
        let RequestHead {
            method,
            target,
            scheme,
            path,
            parameters,
            query,
            fragment,
            version,
            mut headers,
        } = head;

        let (path_info, uri_encoding) = decode_text(&percent_decode(&path));

        let content_type = headers.remove("CONTENT_TYPE");
        let content_length = match headers.remove("CONTENT_LENGTH") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| HttpError::InvalidContentLength(raw.clone()))?,
            ),
            None => None,
        };

        let framing = body_framing(headers.get("HTTP_TRANSFER_ENCODING"), content_length)?;

        let (method, head_request) = match method {
            Method::HEAD => (Method::GET, true),
            other => (other, false),
        };

        let environ = Environ {
            remote_addr: self.remote_addr.clone(),
            remote_port: self.remote_port,
            server_name: self.server_name.clone(),
            server_addr: self.server_addr.clone(),
            server_port: self.server_port.clone(),
            method,
            head_request,
            request_uri: target,
            script_name: String::new(),
            path_info,
            query_string: query,
            fragment,
            parameters,
            protocol: version,
            headers,
            content_type,
            content_length,
            trailers: HashMap::new(),
            input: BodyInput::default(),
            errors: self.errors.clone(),
            uri_encoding,
            url_scheme: scheme.unwrap_or_else(|| self.url_scheme.clone()),
            multithread: self.multithread,
            multiprocess: self.multiprocess,
            run_once: false,
            asynchronous: true,
            version: (2, 0),
            executor: self.executor.clone(),
        };

        Ok((environ, framing))
    }
}

fn body_framing(
    transfer_encoding: Option<&String>,
    content_length: Option<u64>,
) -> Result<BodyFraming, HttpError> {
    if let Some(te) = transfer_encoding {
        let codings: Vec<String> = te
            .split(',')
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        if let Some(bad) = codings.iter().find(|c| *c != "chunked" && *c != "identity") {
            return Err(HttpError::UnsupportedTransferCoding(bad.clone()));
        }

        if codings.iter().any(|c| c == "chunked") {
            return Ok(BodyFraming::Chunked);
        }
    }

    Ok(match content_length {
        Some(0) | None => BodyFraming::None,
        Some(n) => BodyFraming::Length(n),
    })
}
