//! Becayis exchange server
//!
//! Wires the document store, the exchange core, the live connection
//! registry, and the HTTP router, then serves until Ctrl-C.

mod config;

use app_core::Exchange;
use clap::Parser;
use networking::{AppState, ConnectionRegistry, JwtAuthenticator};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "becayis=info,networking=info,app_core=info,info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        tracing::error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let store = args.open_store()?;
    let connections = Arc::new(ConnectionRegistry::new());
    let exchange = Arc::new(Exchange::new(store, connections.clone(), args.core_config()));
    let auth = Arc::new(JwtAuthenticator::new(args.jwt_secret.as_bytes()));

    let app = networking::router(AppState::new(exchange, connections, auth));
    let listener = tokio::net::TcpListener::bind(args.bind).await?;

    tracing::info!(
        bind = %args.bind,
        persistent = args.data_dir.is_some(),
        "Becayis listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
