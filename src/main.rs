mod captcha;
mod cleanup;
mod config;
mod cookies;
mod cors;
mod error;
mod extractor;
mod files;
mod metadata;
mod process;
mod routes;
mod timecode;
mod transcode;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::ApiError,
    routes::{AppState, router},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "clipfetch=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = AppConfig::from_env();

    tokio::fs::create_dir_all(&config.downloads_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "could not create downloads directory {:?}: {error}",
                config.downloads_dir
            ))
        })?;

    if config.captcha_secret.is_some() {
        info!("CAPTCHA verification enabled");
    } else {
        warn!("CAPTCHA_SECRET_KEY not set; downloads are not CAPTCHA-protected");
    }
    if config.youtube_api_keys.is_empty() {
        info!("YOUTUBE_API_KEYS not set; titles and duration checks are skipped");
    }

    let cors = cors::build_cors_layer(&config.allowed_origins)?;
    let addr = config.bind_addr.clone();
    let app = router(AppState::new(config)?, cors);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("could not bind {addr}: {error}")))?;

    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
