mod bot;
mod error;
mod middleware;
mod observability;
mod routes;
mod state;
mod validation;

use fieldreport_infra::{config::AppConfig, logging::init_tracing};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let state = state::AppState::new(config.clone()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bot = if config.bot_enabled() {
        let runtime = bot::BotRuntime::from_state(&state)?;
        Some(runtime.spawn(shutdown_rx))
    } else {
        tracing::warn!("TELEGRAM_BOT_TOKEN is not set; serving the http api only");
        None
    };

    let app = routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| {
        tracing::error!(error = %err, "server exited");
        err
    })?;

    let _ = shutdown_tx.send(true);
    if let Some(bot) = bot
        && let Err(err) = bot.await
    {
        tracing::error!(error = %err, "bot runtime task failed");
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
