mod api;
mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use tastebud_core::config::{AppConfig, LoadOptions};
use tokio::sync::oneshot;

fn init_logging(config: &AppConfig) {
    use tastebud_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging must be up before bootstrap emits its first event.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let routes = health::router(app.db_pool.clone()).merge(api::router(app.engine.clone()));

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, routes)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "tastebud-server started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "tastebud-server stopping"
    );

    let _ = shutdown_tx.send(());
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "in-flight requests did not finish before the grace period"
        ),
    }

    app.db_pool.close().await;
    Ok(())
}
