//! VidRelay Server
//!
//! Receives videos from a web client and relays them to YouTube with a
//! resumable, retrying upload.

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidrelay_server::config::Config;
use vidrelay_server::routes;
use vidrelay_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidrelay_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    // Unset variables take their defaults; a malformed one stops startup
    let config = Config::from_env()?;

    tracing::info!("Starting VidRelay Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Upload endpoint: {}", config.youtube.upload_url);
    tracing::info!("Credentials directory: {}", config.oauth.credentials_dir.display());
    tracing::info!(
        "Retry policy: {} retries on {:?}",
        config.retry.max_retries,
        config.retry.retriable_status_codes
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app_state = AppState::from_config(config).await?;
    let app = routes::app(app_state);

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("VidRelay Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
