mod admin;

use std::path::PathBuf;

use anyhow::Context;
use nmea_mux::config::DEFAULT_CONFIG_PATH;
use nmea_mux::{Factory, MuxConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,nmea_mux=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    tracing::info!("NMEA multiplexer starting with {}", path.display());

    let config = MuxConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    let mux = Factory::new()
        .build(&config)
        .await
        .context("building the multiplexer")?;

    let http_handle = match &config.admin {
        Some(admin) => {
            let addr = admin.address()?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding admin API on {}", addr))?;
            tracing::info!("Admin API listening on {}", addr);
            let app = admin::create_router(admin::AppState::new(mux.clone()));
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("Admin API error: {}", e);
                }
            }))
        }
        None => None,
    };

    tracing::info!("Multiplexer ready");

    // Wait for shutdown signal
    match http_handle {
        Some(handle) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down...");
                }
                _ = handle => {
                    tracing::warn!("Admin API stopped");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            tracing::info!("Received Ctrl+C, shutting down...");
        }
    }

    mux.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}
