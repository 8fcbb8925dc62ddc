mod api;
mod config;
mod extract;
mod ocr;
mod permits;
mod policy;
mod types;

use crate::api::AppState;
use crate::config::Config;
use crate::ocr::RekognitionClient;
use crate::permits::PermitDirectory;
use crate::policy::PlatePolicy;
use env_logger::Env;
use log::{debug, error, info};
use std::sync::Arc;

#[macro_use]
extern crate failure;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-permits");

    if let Err(e) = run().await {
        error!("Startup failed: {}", e);
        std::process::exit(1);
    }
    info!("Exiting main");
}

async fn run() -> Result<(), failure::Error> {
    let config = Config::from_env()?;
    info!("Using OCR endpoint {}", config.ocr.endpoint);

    let permits = PermitDirectory::load(&config.permits_path)?;
    let policy = match &config.policy_path {
        Some(path) => {
            info!("Loading plate policy from {}", path.display());
            PlatePolicy::load(path)?
        }
        None => PlatePolicy::builtin(),
    };
    info!(
        "{} plate patterns, {} denylisted lines",
        policy.patterns.len(),
        policy.denylist.len()
    );
    for pattern in &policy.patterns {
        debug!("Plate pattern {}: {}", pattern.name, pattern.as_str());
    }

    let state = Arc::new(AppState {
        detector: Arc::new(RekognitionClient::new(config.ocr)),
        permits,
        policy,
    });
    api::run(config.http, state).await;
    Ok(())
}
