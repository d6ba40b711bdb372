//! pulmoscan — pipeline entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Init logger at default level
//!   3. Load config
//!   4. Build the classifier provider and probe the endpoint
//!   5. Print status and exit
//!
//! Exam intake and report delivery live upstream; this binary verifies
//! that a deployment is wired correctly before it is handed work.

use tracing::info;

use pulmoscan::classify::providers;
use pulmoscan::{config, error, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), error::AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    // Bootstrap logger at "info" before config is available.
    logger::init("info", None)?;

    let config = config::load()?;

    info!(
        instance = %config.instance_name,
        work_dir = %config.work_dir.display(),
        log_level = %config.log_level,
        provider = %config.classifier.provider,
        "config loaded"
    );

    let provider = providers::build(&config.classifier, config.api_key.clone())
        .map_err(|e| error::AppError::Config(e.to_string()))?;

    provider
        .ping()
        .await
        .map_err(|e| error::AppError::Config(format!("classifier endpoint unreachable: {e}")))?;

    info!(
        screen_model = %config.classifier.screen.model,
        escalate_model = %config.classifier.escalate.model,
        "classifier endpoint reachable"
    );
    println!(
        "✓ Pipeline initialized: instance={} provider={}",
        config.instance_name, config.classifier.provider
    );

    Ok(())
}
