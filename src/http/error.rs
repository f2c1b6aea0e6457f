//! Protocol error taxonomy.
//!
//! Every failure the connection can hit while reading a request, invoking the
//! application or writing the response is one of these. [`HttpError::status`]
//! tells the connection whether a synthetic response can still be produced.

use crate::http::response::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("unsupported protocol version: {0:?}")]
    UnsupportedProtocolVersion(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("unsupported transfer coding: {0:?}")]
    UnsupportedTransferCoding(String),

    #[error("request head exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("request body of {length} bytes exceeds {limit} bytes")]
    ContentTooLarge { length: u64, limit: usize },

    #[error("malformed chunk size: {0:?}")]
    MalformedChunkSize(String),

    #[error("chunk data not terminated by CRLF")]
    MalformedChunkTerminator,

    #[error("application error: {0:#}")]
    Application(anyhow::Error),

    #[error("application contract violation: {0}")]
    ContractViolation(String),

    #[error("connection closed by peer mid-request")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HttpError {
    /// The synthetic status to answer with, or `None` when the only safe
    /// reaction is to drop the connection.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::MalformedRequestLine(_)
            | HttpError::MalformedHeader(_)
            | HttpError::InvalidContentLength(_) => Some(StatusCode::BadRequest),
            HttpError::UnsupportedProtocolVersion(_) => Some(StatusCode::HttpVersionNotSupported),
            HttpError::UnsupportedTransferCoding(_) => Some(StatusCode::NotImplemented),
            HttpError::HeaderTooLarge { .. } | HttpError::ContentTooLarge { .. } => {
                Some(StatusCode::RequestEntityTooLarge)
            }
            HttpError::Application(_) | HttpError::ContractViolation(_) => {
                Some(StatusCode::InternalServerError)
            }
            HttpError::MalformedChunkSize(_)
            | HttpError::MalformedChunkTerminator
            | HttpError::ConnectionClosed
            | HttpError::Io(_) => None,
        }
    }

    /// Whether this failure came from the application rather than the peer.
    pub fn is_application(&self) -> bool {
        matches!(self, HttpError::Application(_) | HttpError::ContractViolation(_))
    }
}
