//! procgate_server - REST server for dynamic stored-procedure execution.
//!
//! Configuration is read from the environment (see [`procgate_server::config`]);
//! a `.env` file in the working directory is honoured.

use std::sync::Arc;

use anyhow::Context;
use procgate_core::ProcedureService;
use procgate_postgres::PgStores;
use procgate_server::config::ServerConfig;
use procgate_server::router::build_router;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,procgate_server=debug,procgate_core=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    tracing::info!("Connected to database");

    let stores = PgStores::new(pool);
    let service = Arc::new(
        ProcedureService::new(
            Arc::new(stores.catalog),
            Arc::new(stores.executor),
            Arc::new(stores.logs),
            config.execution.clone(),
        )
        .with_allow_list(config.allow_list()),
    );

    // Expired cache entries are purged in the background until shutdown.
    let shutdown = CancellationToken::new();
    tokio::spawn(
        Arc::clone(service.cache()).sweep_every(config.cache_sweep_interval, shutdown.clone()),
    );
    tracing::info!(
        row_limit = config.execution.row_limit,
        timeout_secs = config.execution.command_timeout.as_secs(),
        cache_ttl_secs = config.execution.cache_ttl.as_secs(),
        diagnostic_errors = config.execution.diagnostic_errors,
        restricted = config.allowed_procedures.is_some(),
        "execution settings"
    );

    let app = build_router(service);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!("procgate_server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown requested");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
