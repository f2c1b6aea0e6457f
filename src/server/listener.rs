use std::future::{Future, pending};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{Instrument, info};

use crate::config::Config;
use crate::http::app::Application;
use crate::http::connection::Connection;
use crate::http::filter::{Egress, Ingress};
use crate::http::protocol::{Protocol, ProtocolOptions};
use crate::server::pool::{PoolSettings, WorkerPool};

/// A configured server: protocol settings plus the optional worker pool.
///
/// # Example
///
/// ```no_run
/// # use wicket::config::Config;
/// # use wicket::http::app::{AppError, Reply};
/// # use wicket::http::request::Environ;
/// # use wicket::http::response::Response;
/// # use wicket::server::listener::Server;
/// # async fn example() -> anyhow::Result<()> {
/// fn hello(_environ: &mut Environ) -> Result<Reply, AppError> {
///     Ok(Response::ok("Hello world!").into())
/// }
///
/// Server::new(Config::default(), hello)
///     .run_until(async { let _ = tokio::signal::ctrl_c().await; })
///     .await
/// # }
/// ```
pub struct Server {
    config: Config,
    protocol: Protocol,
    pool: Option<WorkerPool>,
}

impl Server {
    pub fn new(config: Config, app: impl Application) -> Self {
        let mut protocol = Protocol::new(app, ProtocolOptions::from(&config));

        let pool = config
            .pool
            .enabled
            .then(|| WorkerPool::new(PoolSettings::from(&config.pool)));
        if let Some(pool) = &pool {
            protocol = protocol.with_executor(pool.executor());
        }

        Self {
            config,
            protocol,
            pool,
        }
    }

    pub fn ingress(mut self, filter: impl Ingress + 'static) -> Self {
        self.protocol = self.protocol.with_ingress(filter);
        self
    }

    pub fn egress(mut self, filter: impl Egress + 'static) -> Self {
        self.protocol = self.protocol.with_egress(filter);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.config.server.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    /// Connections in flight keep running; the worker pool is drained.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        let protocol = Arc::new(self.protocol.with_local_addr(local));
        info!("Listening on {}", local);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::debug!(error = %e, "Could not set TCP_NODELAY");
                    }
                    tracing::debug!("Accepted connection from {}", peer);

                    let protocol = Arc::clone(&protocol);
                    tokio::spawn(
                        async move {
                            let mut conn = Connection::new(socket, peer, protocol);
                            if let Err(e) = conn.run().await {
                                tracing::error!("Connection error from {}: {:#}", peer, e);
                            }
                        }
                        .instrument(tracing::info_span!("connection", %peer)),
                    );
                }
            }
        }

        drop(listener);

        if let Some(pool) = self.pool {
            tokio::task::spawn_blocking(move || pool.shutdown()).await?;
        }

        Ok(())
    }
}

/// Serves `app` on the configured address until the process is stopped.
pub async fn run(cfg: &Config, app: impl Application) -> anyhow::Result<()> {
    Server::new(cfg.clone(), app).run_until(pending()).await
}
