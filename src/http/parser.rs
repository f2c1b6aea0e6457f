//! Request start-line and header block parsing.
//!
//! Input is one complete head, already delimited by the stream at the blank
//! line. Parsing is a pure function of the bytes, so it is re-run from scratch
//! for every pipelined request on a connection.

use std::collections::HashMap;

use url::Url;

use crate::http::error::HttpError;
use crate::http::request::{HEADER_PREFIX, Method, Version, decode_text, environ_key, is_token};

/// Headers whose repeated occurrences are joined with `", "` instead of the
/// last one winning. Stored in normalized (upper-case, underscore) form.
pub const DELIMITED_HEADERS: [&str; 23] = [
    "ACCEPT",
    "ACCEPT_CHARSET",
    "ACCEPT_ENCODING",
    "ACCEPT_LANGUAGE",
    "ACCEPT_RANGES",
    "ALLOW",
    "CACHE_CONTROL",
    "CONNECTION",
    "CONTENT_ENCODING",
    "CONTENT_LANGUAGE",
    "EXPECT",
    "IF_MATCH",
    "IF_NONE_MATCH",
    "PRAGMA",
    "PROXY_AUTHENTICATE",
    "TE",
    "TRAILER",
    "TRANSFER_ENCODING",
    "UPGRADE",
    "VARY",
    "VIA",
    "WARNING",
    "WWW_AUTHENTICATE",
];

/// Structured form of a request start-line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Raw request-target
    pub target: String,
    /// Scheme taken from an absolute-form target
    pub scheme: Option<String>,
    /// Path, still percent-encoded
    pub path: String,
    pub parameters: String,
    pub query: String,
    pub fragment: String,
    pub version: Version,
    /// Normalized header map (`HTTP_HOST`, `CONTENT_TYPE`, ...)
    pub headers: HashMap<String, String>,
}

pub fn parse_request_head(buf: &[u8]) -> Result<RequestHead, HttpError> {
    let mut lines = split_lines(buf);

    // Tolerate stray CRLFs a client leaves behind after a previous body.
    let request_line = lines
        .by_ref()
        .find(|line| !line.is_empty())
        .ok_or_else(|| HttpError::MalformedRequestLine(String::new()))?;

    let (line, _) = decode_text(request_line);
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let [method, target, version] = tokens[..] else {
        return Err(HttpError::MalformedRequestLine(line.clone()));
    };

    let method =
        Method::from_str(method).ok_or_else(|| HttpError::MalformedRequestLine(line.clone()))?;

    let version = Version::parse(version)
        .ok_or_else(|| HttpError::UnsupportedProtocolVersion(version.to_string()))?;

    let (rest, fragment) = split_right(target, '#');
    let (rest, query) = split_right(rest, '?');
    let (path, parameters) = split_right(rest, ';');

    let mut headers = parse_header_lines(lines)?;

    let (scheme, path) = if path.contains("://") {
        let url = Url::parse(path).map_err(|_| HttpError::MalformedRequestLine(line.clone()))?;
        if let Some(host) = url.host_str() {
            let authority = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            headers.insert(format!("{HEADER_PREFIX}HOST"), authority);
        }
        (Some(url.scheme().to_string()), url.path().to_string())
    } else {
        (None, path.to_string())
    };

    Ok(RequestHead {
        method,
        target: target.to_string(),
        scheme,
        path,
        parameters: parameters.to_string(),
        query: query.to_string(),
        fragment: fragment.to_string(),
        version,
        headers,
    })
}

/// Parses a block of header lines (no start-line), such as chunked trailers.
pub fn parse_header_block(buf: &[u8]) -> Result<HashMap<String, String>, HttpError> {
    parse_header_lines(split_lines(buf))
}

/// Inserts a normalized header, comma-joining repeats of delimited headers.
pub fn insert_header(headers: &mut HashMap<String, String>, key: String, value: &str) {
    let delimited = key
        .strip_prefix(HEADER_PREFIX)
        .is_some_and(|name| DELIMITED_HEADERS.contains(&name));

    match headers.get_mut(&key) {
        Some(existing) if delimited && !existing.is_empty() => {
            existing.push_str(", ");
            existing.push_str(value);
        }
        _ => {
            headers.insert(key, value.to_string());
        }
    }
}

fn parse_header_lines<'a>(
    lines: impl Iterator<Item = &'a [u8]>,
) -> Result<HashMap<String, String>, HttpError> {
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut current: Option<String> = None;

    for raw in lines {
        if raw.is_empty() {
            break;
        }

        let (line, _) = decode_text(raw);

        if raw[0] == b' ' || raw[0] == b'\t' {
            let key = current.as_ref().ok_or_else(|| {
                HttpError::MalformedHeader(format!("continuation before any header: {line:?}"))
            })?;
            let folded = line.trim();
            if let Some(value) = headers.get_mut(key) {
                if !folded.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(folded);
                }
            }
            continue;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::MalformedHeader(line.clone()))?;

        if !is_token(name) {
            return Err(HttpError::MalformedHeader(line.clone()));
        }

        let key = environ_key(name);
        insert_header(&mut headers, key.clone(), value.trim());
        current = Some(key);
    }

    Ok(headers)
}

fn split_lines(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    buf.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn split_right(s: &str, delimiter: char) -> (&str, &str) {
    s.rsplit_once(delimiter).unwrap_or((s, ""))
}
