//! NutriLabel scorer - nutrition label OCR and LLM scoring server.

use anyhow::Context;
use nutrilabel_scorer::analyzer::Analyzer;
use nutrilabel_scorer::config::AppConfig;
use nutrilabel_scorer::gateways::Gateways;
use nutrilabel_scorer::server::{build_router, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "nutrilabel_scorer=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    let bind_addr = config.bind_addr.clone();

    // OCR and LLM clients are built lazily on the first request
    let gateways = Gateways::new(config)?;
    let state = AppState::new(Analyzer::new(Arc::new(gateways)));
    let app = build_router(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
