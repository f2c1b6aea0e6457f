//! Buffered transport wrapper.
//!
//! Gives the protocol the four operations it needs from a socket: read up to
//! a delimiter, read an exact byte count, write with completion, and close.
//! Bytes read past a request stay buffered for the next pipelined request.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::error::HttpError;

pub const CRLF: &[u8] = b"\r\n";
/// End of a header block.
pub const EOH: &[u8] = b"\r\n\r\n";

const READ_CHUNK: usize = 4096;

pub struct Stream<S> {
    io: S,
    buffer: BytesMut,
    max_buffer_size: usize,
    closed: bool,
    writing: bool,
}

impl<S> Stream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S, max_buffer_size: usize) -> Self {
        Self {
            io,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            max_buffer_size,
            closed: false,
            writing: false,
        }
    }

    /// Reads up to and including `delimiter`.
    ///
    /// Returns `Ok(None)` if the peer closed the connection cleanly before
    /// sending anything; a close in the middle of the data is
    /// [`HttpError::ConnectionClosed`].
    pub async fn read_until(&mut self, delimiter: &[u8]) -> Result<Option<Bytes>, HttpError> {
        let mut scanned = 0;

        loop {
            if let Some(pos) = find(&self.buffer[scanned..], delimiter) {
                let end = scanned + pos + delimiter.len();
                if end > self.max_buffer_size {
                    return Err(HttpError::HeaderTooLarge {
                        limit: self.max_buffer_size,
                    });
                }
                return Ok(Some(self.buffer.split_to(end).freeze()));
            }

            if self.buffer.len() > self.max_buffer_size {
                return Err(HttpError::HeaderTooLarge {
                    limit: self.max_buffer_size,
                });
            }

            // A delimiter may straddle the boundary of the next read.
            scanned = self.buffer.len().saturating_sub(delimiter.len() - 1);

            if self.fill().await? == 0 {
                self.closed = true;
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(HttpError::ConnectionClosed)
                };
            }
        }
    }

    /// Reads exactly `n` bytes.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Bytes, HttpError> {
        if self.buffer.len() < n {
            self.buffer.reserve(n - self.buffer.len());
        }

        while self.buffer.len() < n {
            if self.fill().await? == 0 {
                self.closed = true;
                return Err(HttpError::ConnectionClosed);
            }
        }

        Ok(self.buffer.split_to(n).freeze())
    }

    /// Writes the whole buffer and flushes it. Returns once the bytes have
    /// been handed to the transport, so successive writes never interleave.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        }

        self.writing = true;
        let mut result = self.io.write_all(buf).await;
        if result.is_ok() {
            result = self.io.flush().await;
        }
        self.writing = false;

        result.map_err(|e| {
            self.closed = true;
            HttpError::Io(e)
        })
    }

    /// True while a write is still in flight.
    pub fn writing(&self) -> bool {
        self.writing
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.io.shutdown().await
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Received bytes not yet consumed, left in place.
    pub fn peek(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    async fn fill(&mut self) -> io::Result<usize> {
        if self.buffer.capacity() - self.buffer.len() < READ_CHUNK {
            self.buffer.reserve(READ_CHUNK);
        }
        self.io.read_buf(&mut self.buffer).await
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
