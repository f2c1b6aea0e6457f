//! Wicket - embeddable HTTP/1.x server engine
//!
//! Parses requests off a byte stream, hands each one to an application
//! through a WSGI-style contract, and writes the response back with the
//! framing and persistence rules of HTTP/1.0 and HTTP/1.1.

pub mod config;
pub mod http;
pub mod server;
