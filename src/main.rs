//! propcard - build, size and select prop cards from scored legs
//!
//! Usage: propcard [legs.json]
//!
//! Settings come from config/default.yaml, config/local.yaml and PROPCARD__*
//! environment variables. The run report is written to stdout as JSON; logs
//! go to stderr.

use anyhow::{Context, Result};
use propcard::config::{AppConfig, LogConfig};
use propcard::ev_provider::EvProvider;
use propcard::pipeline::Optimizer;
use propcard::types::Leg;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = AppConfig::load()?;
    init_logging(&config.log);

    if let Some(path) = std::env::args().nth(1) {
        config.run.legs_path = path;
    }
    info!("⚙️ Config: {}", config);

    let raw = tokio::fs::read_to_string(&config.run.legs_path)
        .await
        .with_context(|| format!("Failed to read legs from {}", config.run.legs_path))?;
    let legs: Vec<Leg> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse legs in {}", config.run.legs_path))?;
    info!("📥 Loaded {} legs from {}", legs.len(), config.run.legs_path);

    let table = Arc::new(config.payout_table()?);
    info!("📋 {} payout ladders", table.len());

    let provider = Arc::new(EvProvider::from_config(&config.ev_provider, Arc::clone(&table)));
    let optimizer = Optimizer::new(config.optimizer_config(), table, Arc::clone(&provider));

    let report = optimizer.run(&legs).await.context("Optimization run failed")?;
    if report.provider_degraded {
        warn!("Remote EV provider ended the run degraded");
    }

    let out = if config.run.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", out);

    Ok(())
}

fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    if log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
