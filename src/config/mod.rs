//! Configuration management for propcard
//!
//! Loads from YAML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::builder::BuilderConfig;
use crate::ev_provider::{EvProviderConfig, ProviderMode};
use crate::filters::CorrelationConfig;
use crate::kelly::KellyConfig;
use crate::payout::PayoutTable;
use crate::pipeline::OptimizerConfig;
use crate::portfolio::PortfolioConstraints;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunConfig,
    pub log: LogConfig,
    pub builder: BuilderConfig,
    pub correlation: CorrelationConfig,
    pub kelly: KellyConfig,
    pub portfolio: PortfolioConstraints,
    pub ev_provider: EvProviderConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let builder = Config::builder()
            .set_default("run.legs_path", "data/legs.json")?
            .set_default("run.pretty", true)?
            .set_default("log.level", "info")?
            .set_default("log.json", false)?
            .set_default("ev_provider.mode", "local")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PROPCARD__*)
            .add_source(Environment::with_prefix("PROPCARD").separator("__"));

        Self::from_builder(builder)
    }

    /// Load from one explicit file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let builder = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(Environment::with_prefix("PROPCARD").separator("__"));

        Self::from_builder(builder)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Payout ladders from `run.payouts_path`, or the built-in set
    pub fn payout_table(&self) -> Result<PayoutTable> {
        match &self.run.payouts_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read payout table {}", path))?;
                PayoutTable::from_yaml_str(&raw)
                    .with_context(|| format!("Invalid payout table {}", path))
            }
            None => Ok(PayoutTable::builtin()),
        }
    }

    pub fn optimizer_config(&self) -> OptimizerConfig {
        let mut builder = self.builder.clone();
        if self.run.seed.is_some() {
            builder.seed = self.run.seed;
        }
        OptimizerConfig {
            site: self.run.site,
            builder,
            correlation: self.correlation.clone(),
            kelly: self.kelly.clone(),
            portfolio: self.portfolio.clone(),
        }
    }

    pub fn digest(&self) -> String {
        let provider = match self.ev_provider.mode {
            ProviderMode::Local => "local".to_string(),
            ProviderMode::Remote => format!("remote({})", self.ev_provider.remote.endpoint),
        };
        format!(
            "legs={} site={} provider={} bankroll={:.0} kelly_mult={:.2} budget={:.1}% pool={} seed={:?}",
            self.run.legs_path,
            self.run
                .site
                .map(|s| s.to_string())
                .unwrap_or_else(|| "all".to_string()),
            provider,
            self.kelly.bankroll,
            self.kelly.global_multiplier,
            self.portfolio.daily_risk_budget * 100.0,
            self.builder.pool_size,
            self.run.seed.or(self.builder.seed)
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
