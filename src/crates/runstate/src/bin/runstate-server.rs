//! runstate server binary
//!
//! Serves the namespace-scoped engine API and runs the retry supervisor
//! alongside it.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;

use runstate::api::create_router;
use runstate::config::{SecurityMode, SecurityState, ServerConfig};
use runstate::db::DatabaseConnection;
use runstate::executor::RetrySupervisor;
use runstate::services::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing/logging
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    tracing::info!("Loading server configuration...");
    let mut config = match ServerConfig::load() {
        Ok(cfg) => {
            tracing::info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            tracing::warn!("Failed to load configuration file: {}. Using defaults.", e);
            ServerConfig::default()
        }
    };
    config.apply_env_overrides();

    tracing::info!("Server name: {}", config.server.name);
    tracing::info!("Security mode: {:?}", config.security.mode);
    tracing::info!("Database path: {}", config.database.path);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    let database_url = config.database_url();
    tracing::info!("Connecting to database: {}", database_url);
    let db = DatabaseConnection::with_max_connections(&database_url, config.database.max_connections)
        .await
        .context("failed to open database")?;

    tracing::info!("Running database migrations");
    db.run_migrations().await.context("failed to run migrations")?;

    tracing::info!("Performing database health check");
    db.health_check().await.context("database health check failed")?;

    let security_state = SecurityState::new(config.security.clone());
    security_state
        .ensure_configured()
        .context("refusing to start without an API key")?;
    if security_state.mode() == SecurityMode::Open {
        tracing::warn!("Security mode is open; the API accepts unauthenticated requests");
    }
    let security_state = Arc::new(security_state);
    let engine = Engine::new(db.clone(), config.engine.clone());

    let supervisor = RetrySupervisor::new(db.clone(), config.engine.clone()).spawn();

    tracing::info!("Building API router");
    let app = create_router(engine, security_state);

    tracing::info!("Starting runstate server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    db.close().await;

    tracing::info!("runstate server shut down gracefully");
    Ok(())
}

/// Signal for graceful shutdown (Ctrl-C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received CTRL-C signal, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down");
        }
    }
}
