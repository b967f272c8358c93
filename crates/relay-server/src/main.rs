use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_engine::{ChatCompletionsProvider, RelayConfig, TaskRunner, WebhookNotifier};
use relay_server::{relay_router, AppState};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "relay-worker", version, about = "Async image-generation task relay")]
struct Cli {
    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,
    #[arg(long, env = "RELAY_BIND_HOST", default_value = "0.0.0.0")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(RelayConfig::from_env().context("invalid relay configuration")?);
    tracing::debug!(config = ?config, "configuration loaded");
    if config.webhook.secret.is_none() {
        tracing::warn!("RELAY_WEBHOOK_SECRET is not set; every webhook notification will be dropped");
    }

    let provider = Arc::new(ChatCompletionsProvider::new(config.upstream.clone())?);
    let notifier = Arc::new(WebhookNotifier::new(&config.webhook)?);
    let runner = Arc::new(TaskRunner::new(config, provider, notifier)?);
    let app = relay_router(AppState::new(runner));

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "relay worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested; in-flight tasks are abandoned");
}
