//! HTTP protocol implementation.
//!
//! This module implements HTTP/1.0 and HTTP/1.1 on top of any async byte
//! stream, with persistent connections, pipelining and chunked transfer
//! coding in both directions.
//!
//! # Architecture
//!
//! - **`stream`**: Buffered transport with delimiter and exact-length reads
//! - **`parser`**: Parses a request head into method, target parts and headers
//! - **`request`**: The request context (`Environ`) handed to applications
//! - **`body`**: Reads `Content-Length` and chunked request bodies
//! - **`app`**: The application contract and the invoker that guards it
//! - **`filter`**: Ingress and egress filters around the application
//! - **`response`**: Status codes, responses and the builder
//! - **`writer`**: Response framing, persistence and serialization
//! - **`connection`**: The per-connection state machine
//! - **`protocol`**: Settings shared by all connections of a server
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │ AwaitingRequest  │ ← Read up to the blank line
//!        └──────┬───────────┘
//!               │ Head received
//!               ▼
//!        ┌──────────────────┐
//!        │ ParsingHeaders   │ ← Build the request context
//!        └──────┬───────────┘
//!               │ Parsed              (errors: 400/413/501/505, close)
//!               ▼
//!        ┌──────────────────┐
//!        │ AwaitingBody     │ ← 100 Continue, then read the body
//!        └──────┬───────────┘
//!               ▼
//!        ┌──────────────────┐
//!        │ AwaitingResponse │ ← Call the application (500 on failure)
//!        └──────┬───────────┘
//!               │ Head written
//!               ▼
//!        ┌──────────────────┐
//!        │ SendingBody      │ ← Stream chunks, yield cooperatively
//!        └──────┬───────────┘
//!               │ Body complete
//!               ├─ Keep-Alive → AwaitingRequest (same connection)
//!               └─ Close → Closed
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio::net::TcpListener;
//! use wicket::http::app::{AppError, Reply};
//! use wicket::http::connection::Connection;
//! use wicket::http::protocol::{Protocol, ProtocolOptions};
//! use wicket::http::request::Environ;
//! use wicket::http::response::Response;
//!
//! fn hello(_environ: &mut Environ) -> Result<Reply, AppError> {
//!     Ok(Response::ok("Hello world!").into())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     let protocol = Arc::new(Protocol::new(hello, ProtocolOptions::default()));
//!
//!     loop {
//!         let (socket, peer) = listener.accept().await?;
//!         let protocol = Arc::clone(&protocol);
//!         tokio::spawn(async move {
//!             let mut conn = Connection::new(socket, peer, protocol);
//!             if let Err(e) = conn.run().await {
//!                 eprintln!("Connection error: {}", e);
//!             }
//!         });
//!     }
//! }
//! ```

pub mod app;
pub mod body;
pub mod connection;
pub mod error;
pub mod filter;
pub mod parser;
pub mod protocol;
pub mod request;
pub mod response;
pub mod stream;
pub mod writer;
