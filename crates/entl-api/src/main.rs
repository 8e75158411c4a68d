//! # entl-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for the entitlement engine.
//! Binds to a configurable port (default 8080).

use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;

use entl_api::state::AppConfig;
use entl_api::{bootstrap, db, sweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("reading configuration")?;

    // Initialize structured tracing.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(?config, "starting entitlement engine");

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    let port = config.port;
    let sweep_every = Duration::from_secs(config.sweep_interval_secs.max(1));

    // Initialize database pool (optional; absent means in-memory only).
    let db_pool = db::init_pool(config.database_url.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("database initialization failed: {e}");
            e
        })?;

    let mut state = bootstrap::bootstrap(config)
        .map_err(|e| {
            tracing::error!("bootstrap failed: {e}");
            e
        })?
        .with_prometheus(prometheus);

    if let Some(pool) = db_pool {
        state = bootstrap::attach_database(state, pool).await?;
    }

    sweeper::spawn_sweeper(state.clone(), sweep_every);

    let app = entl_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("entitlement API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
