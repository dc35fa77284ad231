use std::sync::Arc;

use anyhow::Context;
use processviz::{
    config::Config,
    gemini::GeminiConnector,
    routes::{router, AppState},
};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    tracing::info!(
        "Text model: {}, image model: {} ({:?})",
        config.gemini.text_model,
        config.gemini.image_model,
        config.gemini.image_backend
    );

    let state = AppState::new(Arc::new(GeminiConnector::new(config.gemini.clone())));
    if let Some(key) = &config.preset_api_key {
        state.session.lock().set_api_key(key)?;
        tracing::info!("🔑 Session key preset from GEMINI_API_KEY");
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    tracing::info!(addr = %config.addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
