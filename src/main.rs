//! Application entry point and server initialization
//!
//! Loads configuration, opens the embedded database and serves the HTTP API
//! until SIGINT or SIGTERM.

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use linkpage::config::Config;
use linkpage::database::{AppState, RedbStore};
use linkpage::route::create_app;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if it exists
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("linkpage=debug,tower_http=debug")),
        )
        .init();

    let config = Config::from_env();
    if config.webhook_secret.is_none() {
        info!("WEBHOOK_SECRET not set, payment webhooks will be refused");
    }

    let store = match RedbStore::open(&config.database_url) {
        Ok(store) => store,
        Err(err) => {
            error!(path = %config.database_url, error = %err, "failed to initialize database");
            std::process::exit(1);
        }
    };

    let port = config.port;
    let database_url = config.database_url.clone();
    let app = create_app(AppState::new(store, config)).layer(TraceLayer::new_for_http());

    // Bind to all network interfaces on the specified port
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind listener");

    info!(%addr, database = %database_url, "server running");

    // The server keeps running until it receives SIGTERM or SIGINT
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM
///
/// Open connections are allowed to finish so no redb write transaction is
/// cut off mid-commit.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
