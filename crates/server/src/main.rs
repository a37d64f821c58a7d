use anyhow::Context;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

mod config;
mod error;
mod routes;

use config::AppConfig;
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.server.log_level)?;

    let policy = config.policy()?;
    let pool = estate_storage::create_db(&config.database.path, config.database.max_connections)
        .await
        .with_context(|| format!("opening database {}", config.database.path.display()))?;

    let app = routes::router(AppState { pool, policy }, config.server.body_limit_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        amount_tolerance_cents = config.matching.amount_tolerance_cents,
        time_tolerance_secs = config.matching.time_tolerance_secs,
        locked_periods = config.periods.locked.len(),
        "estate server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    tracing::info!("estate server stopped");
    Ok(())
}

fn init_tracing(default_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;
    let subscriber = Registry::default()
        .with(filter)
        .with(JsonStorageLayer)
        .with(BunyanFormattingLayer::new("estate-server".into(), std::io::stdout));
    tracing::subscriber::set_global_default(subscriber).context("installing tracing subscriber")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
