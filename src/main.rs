use wicket::config::Config;
use wicket::http::app::{AppError, Reply};
use wicket::http::request::Environ;
use wicket::http::response::Response;
use wicket::server::listener::Server;

fn hello(_environ: &mut Environ) -> Result<Reply, AppError> {
    Ok(Response::ok("Hello world!").into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.level())
        .init();

    Server::new(cfg, hello)
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
