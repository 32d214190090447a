//! EV Provider - prices a structure at a rounded average leg probability
//!
//! Two strategies behind one contract:
//! - `Local`: closed-form binomial pricing against the payout table
//! - `Remote`: an external calculation service behind a cache, a pending
//!   batch, a bounded wait and a circuit breaker

pub mod breaker;
pub mod local;
pub mod oracle;
pub mod remote;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState, TripReason};
pub use local::LocalEvProvider;
pub use oracle::{EvOracle, HttpEvOracle, OracleBatch, OracleError};
pub use remote::{RemoteConfig, RemoteEvProvider};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreResult;
use crate::payout::{PayoutTable, StructureId};

/// Average leg probability rounded to 4 decimal places, stored as ten-thousandths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbabilityKey(u32);

impl ProbabilityKey {
    pub const SCALE: f64 = 10_000.0;

    /// Round to the nearest key; input is clamped to `[0, 1]`
    pub fn from_probability(p: f64) -> Self {
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        Self((p * Self::SCALE).round() as u32)
    }

    pub fn average(probs: &[f64]) -> Self {
        if probs.is_empty() {
            return Self(0);
        }
        Self::from_probability(probs.iter().sum::<f64>() / probs.len() as f64)
    }

    pub fn probability(self) -> f64 {
        self.0 as f64 / Self::SCALE
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProbabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.probability())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvQuote {
    pub ev: f64,
    pub roi: f64,
}

impl EvQuote {
    pub const ZERO: EvQuote = EvQuote { ev: 0.0, roi: 0.0 };
}

/// How a quote was obtained; callers aggregate these into run metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Local,
    CacheHit,
    Batched,
    TimeoutFallback,
    DegradedFallback,
}

impl QuoteSource {
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            QuoteSource::TimeoutFallback | QuoteSource::DegradedFallback
        )
    }
}

impl fmt::Display for QuoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteSource::Local => write!(f, "local"),
            QuoteSource::CacheHit => write!(f, "cache_hit"),
            QuoteSource::Batched => write!(f, "batched"),
            QuoteSource::TimeoutFallback => write!(f, "timeout_fallback"),
            QuoteSource::DegradedFallback => write!(f, "degraded_fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricedEv {
    pub quote: EvQuote,
    pub source: QuoteSource,
}

impl PricedEv {
    pub fn new(quote: EvQuote, source: QuoteSource) -> Self {
        Self { quote, source }
    }

    pub fn fallback(source: QuoteSource) -> Self {
        Self::new(EvQuote::ZERO, source)
    }
}

/// Result of one batch flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FlushOutcome {
    /// Nothing was pending
    Empty,
    Success,
    Timeout,
    RateLimited,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushReport {
    pub keys_sent: usize,
    #[serde(flatten)]
    pub outcome: FlushOutcome,
}

impl FlushReport {
    pub fn empty() -> Self {
        Self {
            keys_sent: 0,
            outcome: FlushOutcome::Empty,
        }
    }
}

/// Counters for one provider instance, reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub unique_keys: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub rate_limited: u64,
    pub timeouts: u64,
    pub fallbacks: u64,
    pub degraded: bool,
}

/// Which strategy a run uses; selected once from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Local,
    Remote,
}

impl Default for ProviderMode {
    fn default() -> Self {
        ProviderMode::Local
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvProviderConfig {
    pub mode: ProviderMode,
    pub remote: RemoteConfig,
}

impl Default for EvProviderConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Local,
            remote: RemoteConfig::default(),
        }
    }
}

pub enum EvProvider {
    Local(LocalEvProvider),
    Remote(RemoteEvProvider),
}

impl EvProvider {
    /// Build the configured strategy. Remote mode talks HTTP to `remote.endpoint`.
    pub fn from_config(config: &EvProviderConfig, table: Arc<PayoutTable>) -> Self {
        match config.mode {
            ProviderMode::Local => EvProvider::Local(LocalEvProvider::new(table)),
            ProviderMode::Remote => {
                let oracle = HttpEvOracle::new(
                    config.remote.endpoint.clone(),
                    Duration::from_millis(config.remote.request_timeout_ms),
                );
                EvProvider::Remote(RemoteEvProvider::new(Arc::new(oracle), config.remote.clone()))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EvProvider::Local(_) => "local",
            EvProvider::Remote(_) => "remote",
        }
    }

    /// Quote `structure` at `key`. Never blocks past the remote wait bound.
    pub async fn get_ev(
        &self,
        structure: &StructureId,
        key: ProbabilityKey,
    ) -> CoreResult<PricedEv> {
        match self {
            EvProvider::Local(local) => local.get_ev(structure, key),
            EvProvider::Remote(remote) => Ok(remote.get_ev(structure, key).await),
        }
    }

    pub fn is_degraded(&self) -> bool {
        match self {
            EvProvider::Local(_) => false,
            EvProvider::Remote(remote) => remote.is_degraded(),
        }
    }

    /// Flush anything still pending. Call once at the end of a run.
    pub async fn finalize(&self) -> FlushReport {
        match self {
            EvProvider::Local(_) => FlushReport::empty(),
            EvProvider::Remote(remote) => remote.flush().await,
        }
    }

    pub fn stats(&self) -> ProviderStats {
        match self {
            EvProvider::Local(local) => local.stats(),
            EvProvider::Remote(remote) => remote.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_key_rounds_to_four_places() {
        assert_eq!(ProbabilityKey::from_probability(0.61234).raw(), 6123);
        assert_eq!(ProbabilityKey::from_probability(0.61236).raw(), 6124);
        assert_eq!(ProbabilityKey::from_probability(1.7).raw(), 10_000);
        assert_eq!(ProbabilityKey::from_probability(f64::NAN).raw(), 0);
        assert_eq!(ProbabilityKey::average(&[0.6, 0.62]).to_string(), "0.6100");
    }

    #[test]
    fn fallback_sources() {
        assert!(QuoteSource::TimeoutFallback.is_fallback());
        assert!(QuoteSource::DegradedFallback.is_fallback());
        assert!(!QuoteSource::CacheHit.is_fallback());
        assert_eq!(PricedEv::fallback(QuoteSource::DegradedFallback).quote, EvQuote::ZERO);
    }

    #[test]
    fn configured_strategy_is_selected_once() {
        let table = Arc::new(PayoutTable::builtin());
        let local = EvProvider::from_config(&EvProviderConfig::default(), Arc::clone(&table));
        assert_eq!(local.name(), "local");
        assert!(!local.is_degraded());
        assert_eq!(tokio_test::block_on(local.finalize()), FlushReport::empty());

        let remote_cfg = EvProviderConfig {
            mode: ProviderMode::Remote,
            ..Default::default()
        };
        let remote = EvProvider::from_config(&remote_cfg, table);
        assert_eq!(remote.name(), "remote");
    }
}
