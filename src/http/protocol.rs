//! Per-server protocol settings shared by every connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::http::app::{Application, Invoker};
use crate::http::filter::{Egress, Ingress};
use crate::http::request::{EnvironTemplate, ErrorSink};
use crate::server::pool::Executor;

/// Value of the `Server` response header unless configured otherwise.
pub const DEFAULT_SOFTWARE: &str = concat!("wicket/", env!("CARGO_PKG_VERSION"));

/// Largest request head or body the engine buffers (100 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ProtocolOptions {
    pub server_name: String,
    pub software: String,
    /// Allow persistent connections and pipelined requests.
    pub pipeline: bool,
    /// Validate application headers strictly.
    pub pedantic: bool,
    pub max_buffer_size: usize,
    pub url_scheme: String,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            software: DEFAULT_SOFTWARE.to_string(),
            pipeline: true,
            pedantic: true,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            url_scheme: "http".to_string(),
        }
    }
}

impl From<&Config> for ProtocolOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            server_name: cfg.server.name.clone(),
            software: cfg.server.software.clone(),
            pipeline: cfg.http.pipeline,
            pedantic: cfg.http.pedantic,
            max_buffer_size: cfg.http.max_buffer_size,
            url_scheme: "http".to_string(),
        }
    }
}

/// Everything a connection needs to serve requests: the application, the
/// options, filters, and the optional worker pool.
pub struct Protocol {
    app: Arc<dyn Application>,
    options: ProtocolOptions,
    invoker: Invoker,
    executor: Option<Executor>,
    local_addr: Option<SocketAddr>,
}

impl Protocol {
    pub fn new(app: impl Application, options: ProtocolOptions) -> Self {
        Self::from_arc(Arc::new(app), options)
    }

    pub fn from_arc(app: Arc<dyn Application>, options: ProtocolOptions) -> Self {
        let invoker = Invoker::new(options.pedantic);
        Self {
            app,
            options,
            invoker,
            executor: None,
            local_addr: None,
        }
    }

    pub fn with_ingress(mut self, filter: impl Ingress + 'static) -> Self {
        self.invoker = self.invoker.with_ingress(Arc::new(filter));
        self
    }

    pub fn with_egress(mut self, filter: impl Egress + 'static) -> Self {
        self.invoker = self.invoker.with_egress(Arc::new(filter));
        self
    }

    /// Runs application calls on the given pool instead of the I/O task.
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn app(&self) -> &Arc<dyn Application> {
        &self.app
    }

    pub fn options(&self) -> &ProtocolOptions {
        &self.options
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn executor(&self) -> Option<&Executor> {
        self.executor.as_ref()
    }

    /// Identity fields for the requests of one connection.
    pub fn template(&self, peer: SocketAddr) -> EnvironTemplate {
        let (server_addr, server_port) = match self.local_addr {
            Some(addr) => (addr.ip().to_string(), addr.port().to_string()),
            None => (String::new(), "80".to_string()),
        };

        EnvironTemplate {
            server_name: self.options.server_name.clone(),
            server_addr,
            server_port,
            remote_addr: peer.ip().to_string(),
            remote_port: peer.port(),
            url_scheme: self.options.url_scheme.clone(),
            multithread: self.executor.is_some(),
            multiprocess: false,
            executor: self.executor.clone(),
            errors: ErrorSink::new(self.options.server_name.clone(), peer.to_string()),
        }
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("options", &self.options)
            .field("invoker", &self.invoker)
            .field("threaded", &self.executor.is_some())
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
