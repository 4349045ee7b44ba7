mod config;
mod logging;
mod routes;

#[cfg(test)]
mod tests;

use anyhow::Context;
use clap::Parser;
use config::Config;
use gk_encoding::StatisticalDetector;
use gk_net::CachingFetcher;
use gk_relay::Relay;
use routes::AppState;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    logging::init(config.log_format);

    let fetcher = CachingFetcher::from_config(&config.fetcher_config())
        .context("failed to build the outbound HTTP client")?;
    let relay = Relay::new(Arc::new(fetcher), Arc::new(StatisticalDetector));
    let state = AppState::new(relay, config.service_host());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(
        bind = %config.bind,
        service_host = %config.service_host(),
        cache_entries = config.cache_entries,
        max_redirects = config.max_redirects,
        "gknot listening"
    );

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated")?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("ctrl-c received, shutting down");
}
