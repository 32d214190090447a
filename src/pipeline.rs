//! Full optimization run: build → finalize provider → filter → size → select

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::builder::{BuilderConfig, CardBuilder, StructureBuildStats};
use crate::card::CandidateCard;
use crate::error::CoreResult;
use crate::ev_provider::{EvProvider, FlushReport, ProviderStats};
use crate::filters::{CorrelationConfig, CorrelationFilter, FilterReason};
use crate::kelly::{KellyConfig, KellySizer};
use crate::payout::{PayoutLadder, PayoutTable};
use crate::portfolio::{select_portfolio, PortfolioConstraints, PortfolioResult};
use crate::types::{Leg, Site};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Restrict the run to one site's ladders
    pub site: Option<Site>,
    pub builder: BuilderConfig,
    pub correlation: CorrelationConfig,
    pub kelly: KellyConfig,
    pub portfolio: PortfolioConstraints,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSummary {
    pub input: usize,
    pub kept: usize,
    pub adjusted: usize,
    pub removed: BTreeMap<FilterReason, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub provider: String,
    pub legs: usize,
    pub structures: Vec<StructureBuildStats>,
    pub built: usize,
    pub filter: FilterSummary,
    /// Post-filter candidates with Kelly results attached
    pub candidates: Vec<CandidateCard>,
    pub portfolio: PortfolioResult,
    pub final_flush: FlushReport,
    pub provider_stats: ProviderStats,
    pub provider_degraded: bool,
}

pub struct Optimizer {
    config: OptimizerConfig,
    table: Arc<PayoutTable>,
    provider: Arc<EvProvider>,
}

impl Optimizer {
    pub fn new(
        config: OptimizerConfig,
        table: Arc<PayoutTable>,
        provider: Arc<EvProvider>,
    ) -> Self {
        Self {
            config,
            table,
            provider,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn provider(&self) -> &EvProvider {
        &self.provider
    }

    fn ladders(&self) -> Vec<PayoutLadder> {
        self.table
            .iter()
            .filter(|l| self.config.site.map_or(true, |site| l.site == site))
            .cloned()
            .collect()
    }

    /// Run once over `legs`. Malformed legs fail the run; everything else
    /// (empty structures, a degraded provider, full budgets) is reported.
    pub async fn run(&self, legs: &[Leg]) -> CoreResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        for leg in legs {
            leg.validate()?;
        }
        info!(
            "🚀 Run {} | {} legs | provider={} | site={}",
            run_id,
            legs.len(),
            self.provider.name(),
            self.config
                .site
                .map(|s| s.to_string())
                .unwrap_or_else(|| "all".to_string())
        );

        let builder = CardBuilder::new(self.config.builder.clone(), Arc::clone(&self.provider));
        let build = builder.build_all(legs, &self.ladders()).await;
        let built = build.candidates.len();

        let final_flush = self.provider.finalize().await;
        let provider_degraded = self.provider.is_degraded();
        if provider_degraded {
            warn!("⚠️ EV provider degraded; results use candidates accepted before degradation");
        }

        let filter =
            CorrelationFilter::new(self.config.correlation.clone(), Arc::clone(&self.table))
                .with_min_ev(self.config.builder.min_ev.clone());
        let filtered = filter.apply(build.candidates)?;

        let sizer = KellySizer::new(self.config.kelly.clone(), Arc::clone(&self.table));
        let candidates = sizer.size_all(filtered.kept)?;

        let portfolio = select_portfolio(&candidates, &self.config.portfolio);

        let report = RunReport {
            run_id,
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            provider: self.provider.name().to_string(),
            legs: legs.len(),
            structures: build.stats,
            built,
            filter: FilterSummary {
                input: filtered.original_count,
                kept: filtered.final_count,
                adjusted: filtered.adjusted,
                removed: filtered.removal_reasons,
            },
            candidates,
            portfolio,
            final_flush,
            provider_stats: self.provider.stats(),
            provider_degraded,
        };

        info!(
            "✅ Run {} done in {}ms | built={} filtered={} selected={} stake=${:.2}",
            report.run_id,
            report.elapsed_ms,
            report.built,
            report.filter.kept,
            report.portfolio.totals.selected_count,
            report.portfolio.totals.total_stake
        );
        Ok(report)
    }
}
