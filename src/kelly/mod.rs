//! Mean-variance Kelly stake sizing
//!
//! `f* ≈ μ / σ²` over the card's net-return distribution, followed by a fixed
//! chain of caps. Every input maps to a priced result or a tagged zero result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::card::CandidateCard;
use crate::error::CoreResult;
use crate::payout::{HitDistribution, PayoutLadder, PayoutTable, StructureId};
use crate::types::Sport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KellyConfig {
    pub bankroll: f64,
    /// 0.5 = half Kelly
    pub global_multiplier: f64,
    pub max_per_card_fraction: f64,
    pub min_card_ev: f64,
    pub max_raw_fraction: f64,
    pub variance_epsilon: f64,
    pub sport_weights: HashMap<Sport, f64>,
    pub structure_weights: HashMap<StructureId, f64>,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            bankroll: 750.0,
            global_multiplier: 0.5,
            max_per_card_fraction: 0.05,
            min_card_ev: 0.03,
            max_raw_fraction: 0.10,
            variance_epsilon: 1e-10,
            sport_weights: HashMap::new(),
            structure_weights: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapReason {
    ZeroVariance,
    RawKellyCap,
    GlobalMultiplier,
    SportWeight,
    StructureWeight,
    PerCardCap,
    BelowMinEv,
    NegativeKelly,
}

impl std::fmt::Display for CapReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CapReason::ZeroVariance => "ZERO_VARIANCE",
            CapReason::RawKellyCap => "RAW_KELLY_CAP",
            CapReason::GlobalMultiplier => "GLOBAL_MULTIPLIER",
            CapReason::SportWeight => "SPORT_WEIGHT",
            CapReason::StructureWeight => "STRUCTURE_WEIGHT",
            CapReason::PerCardCap => "PER_CARD_CAP",
            CapReason::BelowMinEv => "BELOW_MIN_EV",
            CapReason::NegativeKelly => "NEGATIVE_KELLY",
        };
        write!(f, "{}", s)
    }
}

/// How far the final fraction sits below raw Kelly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLabel {
    FullKelly,
    HalfKelly,
    QuarterKelly,
    Conservative,
    NoBet,
}

impl RiskLabel {
    fn from_ratio(final_fraction: f64, raw_fraction: f64) -> Self {
        let denom = if raw_fraction == 0.0 { 1.0 } else { raw_fraction };
        let ratio = final_fraction / denom;
        if ratio >= 0.9 {
            RiskLabel::FullKelly
        } else if ratio >= 0.4 {
            RiskLabel::HalfKelly
        } else if ratio >= 0.2 {
            RiskLabel::QuarterKelly
        } else {
            RiskLabel::Conservative
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KellyResult {
    pub mean: f64,
    pub variance: f64,
    pub raw_fraction: f64,
    pub capped_fraction: f64,
    pub safe_fraction: f64,
    pub final_fraction: f64,
    pub recommended_stake: f64,
    pub expected_profit: f64,
    pub max_potential_win: f64,
    pub risk_label: RiskLabel,
    /// Caps in the order they fired
    pub caps: Vec<CapReason>,
}

impl KellyResult {
    pub fn zero(reason: CapReason) -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            raw_fraction: 0.0,
            capped_fraction: 0.0,
            safe_fraction: 0.0,
            final_fraction: 0.0,
            recommended_stake: 0.0,
            expected_profit: 0.0,
            max_potential_win: 0.0,
            risk_label: RiskLabel::NoBet,
            caps: vec![reason],
        }
    }

    pub fn is_bet(&self) -> bool {
        self.final_fraction > 0.0
    }

    pub fn is_capped(&self) -> bool {
        !self.caps.is_empty()
    }
}

/// Net-return mean and variance of a card under `ladder`
pub fn mean_variance(distribution: &HitDistribution, ladder: &PayoutLadder) -> (f64, f64) {
    let outcomes: Vec<(f64, f64)> = distribution
        .iter()
        .filter(|(_, p)| p.is_finite() && *p > 0.0)
        .map(|(k, p)| (p, ladder.multiplier(k) - 1.0))
        .collect();
    let mean: f64 = outcomes.iter().map(|(p, r)| p * r).sum();
    let variance: f64 = outcomes.iter().map(|(p, r)| p * (r - mean).powi(2)).sum();
    (mean, variance)
}

/// Size one card. Pure: identical inputs give identical outputs.
pub fn compute_kelly_for_card(
    card_ev: f64,
    distribution: &HitDistribution,
    ladder: &PayoutLadder,
    sport: Sport,
    config: &KellyConfig,
) -> KellyResult {
    let (mean, variance) = mean_variance(distribution, ladder);
    if !variance.is_finite() || variance < config.variance_epsilon {
        return KellyResult::zero(CapReason::ZeroVariance);
    }

    let mut caps = Vec::new();
    let raw_fraction = mean / variance;

    let mut capped_fraction = raw_fraction;
    if raw_fraction > config.max_raw_fraction {
        capped_fraction = config.max_raw_fraction;
        caps.push(CapReason::RawKellyCap);
    }

    let mut safe_fraction = capped_fraction * config.global_multiplier;
    if config.global_multiplier < 1.0 {
        caps.push(CapReason::GlobalMultiplier);
    }
    if let Some(&w) = config.sport_weights.get(&sport) {
        safe_fraction *= w;
        if w < 1.0 {
            caps.push(CapReason::SportWeight);
        }
    }
    if let Some(&w) = config.structure_weights.get(&ladder.id) {
        safe_fraction *= w;
        if w < 1.0 {
            caps.push(CapReason::StructureWeight);
        }
    }

    let mut final_fraction = safe_fraction;
    if safe_fraction > config.max_per_card_fraction {
        final_fraction = config.max_per_card_fraction;
        caps.push(CapReason::PerCardCap);
    }

    if !card_ev.is_finite() || card_ev < config.min_card_ev {
        return KellyResult::zero(CapReason::BelowMinEv);
    }
    if !final_fraction.is_finite() || final_fraction <= 0.0 {
        return KellyResult::zero(CapReason::NegativeKelly);
    }

    let recommended_stake = config.bankroll * final_fraction;
    KellyResult {
        mean,
        variance,
        raw_fraction,
        capped_fraction,
        safe_fraction,
        final_fraction,
        recommended_stake,
        expected_profit: recommended_stake * card_ev,
        max_potential_win: recommended_stake * (ladder.max_multiplier() - 1.0),
        risk_label: RiskLabel::from_ratio(final_fraction, raw_fraction),
        caps,
    }
}

/// Attaches Kelly results to cards, looking up each card's ladder
pub struct KellySizer {
    config: KellyConfig,
    table: Arc<PayoutTable>,
}

impl KellySizer {
    pub fn new(config: KellyConfig, table: Arc<PayoutTable>) -> Self {
        Self { config, table }
    }

    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    pub fn size(&self, mut card: CandidateCard) -> CoreResult<CandidateCard> {
        let ladder = self.table.get(&card.structure)?;
        card.kelly = Some(compute_kelly_for_card(
            card.card_ev,
            &card.distribution,
            ladder,
            card.sport(),
            &self.config,
        ));
        Ok(card)
    }

    pub fn size_all(&self, cards: Vec<CandidateCard>) -> CoreResult<Vec<CandidateCard>> {
        cards.into_iter().map(|c| self.size(c)).collect()
    }
}
