//! Queue-style worker: JSON-lines claims on stdin, JSON-lines resolutions on stdout.

use bank_claims_orchestrator::{
    config::Settings,
    models::InboundClaim,
    processor::{malformed_claim_resolution, ClaimProcessor},
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // stdout carries resolutions; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env()?;
    let processor = ClaimProcessor::from_settings(&settings)?;

    info!("Claims worker started, reading claims from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut handled = 0usize;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let resolution = match serde_json::from_str::<InboundClaim>(&line) {
            Ok(claim) => processor.process(claim).await,
            Err(e) => match malformed_claim_resolution(&line) {
                Some(resolution) => {
                    warn!(claim_id = %resolution.id, error = %e, "Malformed claim, answering with ERROR");
                    resolution
                }
                None => {
                    warn!(error = %e, "Skipping malformed line without an id");
                    continue;
                }
            },
        };

        let mut out = serde_json::to_string(&resolution)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
        handled += 1;
    }

    info!(handled, "Input closed, worker stopping");
    Ok(())
}
