#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use wicket::http::app::Application;
use wicket::http::connection::Connection;
use wicket::http::protocol::{Protocol, ProtocolOptions};

const TIMEOUT: Duration = Duration::from_secs(5);

/// A response as seen by the client.
#[derive(Debug)]
pub struct Reply {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// The body exactly as framed on the wire.
    pub raw_body: Vec<u8>,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct Client {
    io: DuplexStream,
    buf: Vec<u8>,
}

/// Runs one connection for `app` with default options.
pub fn serve(app: impl Application) -> (Client, JoinHandle<anyhow::Result<()>>) {
    serve_protocol(Protocol::new(app, ProtocolOptions::default()))
}

pub fn serve_protocol(protocol: Protocol) -> (Client, JoinHandle<anyhow::Result<()>>) {
    let (client, server) = tokio::io::duplex(1 << 20);
    let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let protocol = Arc::new(protocol);

    let handle = tokio::spawn(async move {
        let mut conn = Connection::new(server, peer, protocol);
        conn.run().await
    });

    (
        Client {
            io: client,
            buf: Vec::new(),
        },
        handle,
    )
}

impl Client {
    pub async fn send(&mut self, raw: &[u8]) {
        self.io.write_all(raw).await.unwrap();
    }

    /// Reads one response. `head_request` says the body is never sent.
    pub async fn response(&mut self, head_request: bool) -> Reply {
        let end = self.read_until(b"\r\n\r\n").await;
        let head: Vec<u8> = self.buf.drain(..end).collect();
        let text = String::from_utf8_lossy(&head).into_owned();
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap();
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap().to_string();
        let status: u16 = parts.next().unwrap().parse().unwrap();
        let reason = parts.next().unwrap_or("").to_string();

        let headers: Vec<(String, String)> = lines
            .filter(|l| !l.is_empty())
            .map(|l| {
                let (k, v) = l.split_once(':').unwrap();
                (k.to_string(), v.trim().to_string())
            })
            .collect();

        let mut reply = Reply {
            version,
            status,
            reason,
            headers,
            body: Vec::new(),
            raw_body: Vec::new(),
        };

        let bodiless = head_request || status < 200 || status == 204 || status == 304;
        if bodiless {
            return reply;
        }

        if reply
            .header("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
        {
            self.read_chunked(&mut reply).await;
        } else if let Some(length) = reply.header("Content-Length") {
            let length: usize = length.parse().unwrap();
            self.fill_to(length).await;
            reply.body = self.buf.drain(..length).collect();
            reply.raw_body = reply.body.clone();
        } else {
            reply.body = self.read_to_end().await;
            reply.raw_body = reply.body.clone();
        }

        reply
    }

    /// Everything until the server closes.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.buf);
        tokio::time::timeout(TIMEOUT, self.io.read_to_end(&mut out))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        out
    }

    /// True once the server has closed and sent nothing more.
    pub async fn closed(&mut self) -> bool {
        self.read_to_end().await.is_empty()
    }

    async fn read_chunked(&mut self, reply: &mut Reply) {
        loop {
            let end = self.read_until(b"\r\n").await;
            let line: Vec<u8> = self.buf.drain(..end).collect();
            reply.raw_body.extend_from_slice(&line);

            let size_text = String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
            let size = usize::from_str_radix(size_text.split(';').next().unwrap().trim(), 16)
                .unwrap();

            if size == 0 {
                let end = self.read_until(b"\r\n").await;
                let rest: Vec<u8> = self.buf.drain(..end).collect();
                reply.raw_body.extend_from_slice(&rest);
                return;
            }

            self.fill_to(size + 2).await;
            let data: Vec<u8> = self.buf.drain(..size + 2).collect();
            assert_eq!(&data[size..], b"\r\n");
            reply.raw_body.extend_from_slice(&data);
            reply.body.extend_from_slice(&data[..size]);
        }
    }

    async fn read_until(&mut self, delimiter: &[u8]) -> usize {
        loop {
            if let Some(pos) = self
                .buf
                .windows(delimiter.len())
                .position(|w| w == delimiter)
            {
                return pos + delimiter.len();
            }
            self.fill().await;
        }
    }

    async fn fill_to(&mut self, n: usize) {
        while self.buf.len() < n {
            self.fill().await;
        }
    }

    async fn fill(&mut self) {
        let mut temp = [0u8; 4096];
        let n = tokio::time::timeout(TIMEOUT, self.io.read(&mut temp))
            .await
            .expect("timed out waiting for server")
            .unwrap();
        assert!(n > 0, "server closed mid-response");
        self.buf.extend_from_slice(&temp[..n]);
    }
}
