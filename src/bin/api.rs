use bank_claims_orchestrator::{api::start_server, config::Settings, processor::ClaimProcessor};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    if settings.gemini.api_key.is_empty() {
        warn!("GEMINI_API_KEY not set; every model call will fail");
    }

    info!("Bank claims orchestrator - API server");
    info!(port = settings.port, banking_api = %settings.gateway.base_url, "Configuration loaded");

    let processor = Arc::new(ClaimProcessor::from_settings(&settings)?);

    start_server(processor, settings.port).await?;

    Ok(())
}
