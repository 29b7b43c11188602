mod admin;
mod bootstrap;
mod health;
mod service;

use std::time::Duration;

use anyhow::Result;
use tillbot_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use tillbot_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let router = app.router();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tracing::info!(
        event_name = "system.http.start",
        correlation_id = "bootstrap",
        conversation_id = "unknown",
        bind_address = %address,
        "admin and health endpoints listening"
    );
    let server = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.changed().await;
        };
        if let Err(error) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
            tracing::error!(
                event_name = "system.http.error",
                correlation_id = "bootstrap",
                conversation_id = "unknown",
                error = %error,
                "http server terminated unexpectedly"
            );
        }
    });

    tracing::info!(
        event_name = "system.server.chat_transport_mode",
        transport_mode = app.transport.mode(),
        correlation_id = "bootstrap",
        conversation_id = "unknown",
        "chat runner transport mode initialized"
    );
    let chat_runner = app.chat_runner;
    let runner = tokio::spawn(async move {
        if let Err(error) = chat_runner.start().await {
            tracing::error!(
                event_name = "system.chat.error",
                correlation_id = "bootstrap",
                conversation_id = "unknown",
                error = %error,
                "chat runner stopped with an error"
            );
        }
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        conversation_id = "unknown",
        "tillbot-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        conversation_id = "unknown",
        "tillbot-server stopping"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if let Err(error) = app.transport.disconnect().await {
        tracing::warn!(
            event_name = "system.chat.disconnect_failed",
            correlation_id = "shutdown",
            conversation_id = "unknown",
            error = %error,
            "chat transport did not close cleanly"
        );
    }
    let runner_abort = runner.abort_handle();
    if tokio::time::timeout(grace, runner).await.is_err() {
        runner_abort.abort();
    }
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(grace, server).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            conversation_id = "unknown",
            grace_secs = grace.as_secs(),
            "http server did not drain in time"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
