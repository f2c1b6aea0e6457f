//! Request body consumption.
//!
//! Bodies are read in full before the application runs, either as a declared
//! `Content-Length` or as a chunked stream, into a seekable in-memory buffer.

use std::collections::HashMap;
use std::io::{self, BufRead, Cursor, Read, Seek, SeekFrom};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::error::HttpError;
use crate::http::parser::parse_header_block;
use crate::http::request::BodyFraming;
use crate::http::stream::{CRLF, Stream};

/// The body-input channel handed to the application.
///
/// Fresh for every request; never shared between requests.
#[derive(Debug, Default)]
pub struct BodyInput {
    cursor: Cursor<Vec<u8>>,
}

impl BodyInput {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Everything from the current position to the end.
    pub fn read_all(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        // Reading from an in-memory cursor cannot fail.
        let _ = self.cursor.read_to_end(&mut out);
        out
    }

    /// The next line including its `\n`, or an empty vector at the end.
    pub fn readline(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let _ = self.cursor.read_until(b'\n', &mut out);
        out
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn rewind(&mut self) {
        self.cursor.set_position(0);
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for BodyInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl BufRead for BodyInput {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.cursor.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.cursor.consume(amt)
    }
}

impl Seek for BodyInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

/// Rejects a declared length above the buffer ceiling.
pub fn check_length(length: u64, limit: usize) -> Result<(), HttpError> {
    if length > limit as u64 {
        return Err(HttpError::ContentTooLarge { length, limit });
    }
    Ok(())
}

/// Reads the request body according to `framing`.
///
/// Returns the body plus any trailer fields sent after a chunked body.
pub async fn read_body<S>(
    stream: &mut Stream<S>,
    framing: BodyFraming,
) -> Result<(BodyInput, HashMap<String, String>), HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framing {
        BodyFraming::None => Ok((BodyInput::default(), HashMap::new())),
        BodyFraming::Length(length) => {
            check_length(length, stream.max_buffer_size())?;
            let data = stream.read_bytes(length as usize).await?;
            Ok((BodyInput::new(data.to_vec()), HashMap::new()))
        }
        BodyFraming::Chunked => read_chunked(stream).await,
    }
}

async fn read_chunked<S>(
    stream: &mut Stream<S>,
) -> Result<(BodyInput, HashMap<String, String>), HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let limit = stream.max_buffer_size();
    let mut body = Vec::new();

    loop {
        let line = stream
            .read_until(CRLF)
            .await?
            .ok_or(HttpError::ConnectionClosed)?;
        let size = parse_chunk_size(&line)?;

        if size == 0 {
            break;
        }

        let total = body.len() as u64 + size as u64;
        check_length(total, limit)?;

        let data = stream.read_bytes(size + 2).await?;
        if &data[size..] != CRLF {
            return Err(HttpError::MalformedChunkTerminator);
        }
        body.extend_from_slice(&data[..size]);
    }

    let mut block = Vec::new();
    loop {
        let line = stream
            .read_until(CRLF)
            .await?
            .ok_or(HttpError::ConnectionClosed)?;
        if &line[..] == CRLF {
            break;
        }
        block.extend_from_slice(&line);
        if block.len() > limit {
            return Err(HttpError::HeaderTooLarge { limit });
        }
    }

    let trailers = parse_header_block(&block)?;
    tracing::trace!(bytes = body.len(), trailers = trailers.len(), "chunked body received");

    Ok((BodyInput::new(body), trailers))
}

/// Parses a chunk-size line: hex digits, optionally followed by
/// `;extension` which is ignored.
///
/// # Example
///
/// ```
/// # use wicket::http::body::parse_chunk_size;
/// assert_eq!(parse_chunk_size(b"1a\r\n").unwrap(), 26);
/// assert_eq!(parse_chunk_size(b"0;name=value\r\n").unwrap(), 0);
/// assert!(parse_chunk_size(b"xyz\r\n").is_err());
/// ```
pub fn parse_chunk_size(line: &[u8]) -> Result<usize, HttpError> {
    let malformed = || HttpError::MalformedChunkSize(String::from_utf8_lossy(line).into_owned());

    let text = std::str::from_utf8(line).map_err(|_| malformed())?;
    let size = text
        .trim_end_matches(['\r', '\n'])
        .split(';')
        .next()
        .unwrap_or("")
        .trim();

    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed());
    }

    usize::from_str_radix(size, 16).map_err(|_| malformed())
}
