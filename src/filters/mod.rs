//! Correlation & Structure Filter
//!
//! Second, independent pass over built cards. Rejections are reason-coded and
//! counted; in adjust mode an over-concentrated card is trimmed and repriced
//! against the sibling ladder of its new size, then held to that ladder's EV
//! floor. Survivors are deduplicated by structure and leg set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::builder::MinEvThresholds;
use crate::card::CandidateCard;
use crate::error::CoreResult;
use crate::payout::{PayoutTable, StructureId};
use crate::types::{Leg, Sport};

/// What to do with a card that has too many legs from one team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamConcentrationMode {
    Reject,
    Adjust,
}

impl Default for TeamConcentrationMode {
    fn default() -> Self {
        TeamConcentrationMode::Reject
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub allow_same_player_opposites: bool,
    /// Correlated stat pairs need at least this much combined leg EV
    pub correlation_threshold: f64,
    pub default_max_per_team: usize,
    pub max_per_team: HashMap<Sport, usize>,
    /// Structure-specific team limits, checked before the sport-wide ones
    pub structure_team_limits: HashMap<StructureId, HashMap<Sport, usize>>,
    pub team_mode: TeamConcentrationMode,
    pub min_viable_legs: usize,
    pub correlated_stats: Vec<(String, String)>,
    /// Stat pairs that cannot appear on one card (goalie vs skater)
    pub invalid_combos: Vec<(String, String)>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        let sports = [
            Sport::NBA,
            Sport::NFL,
            Sport::MLB,
            Sport::NHL,
            Sport::NCAAB,
            Sport::NCAAF,
        ];
        let limits = |base: usize, hockey: usize| -> HashMap<Sport, usize> {
            sports
                .iter()
                .map(|&s| (s, if s == Sport::NHL { hockey } else { base }))
                .collect()
        };

        let mut structure_team_limits = HashMap::new();
        for id in ["2P", "3P", "3F"] {
            structure_team_limits.insert(StructureId::new(id), limits(2, 1));
        }
        for id in ["4P", "4F", "5P", "5F", "6P", "6F"] {
            structure_team_limits.insert(StructureId::new(id), limits(3, 2));
        }

        let pair = |a: &str, b: &str| (a.to_string(), b.to_string());
        Self {
            allow_same_player_opposites: false,
            correlation_threshold: 0.10,
            default_max_per_team: 3,
            max_per_team: limits(3, 2),
            structure_team_limits,
            team_mode: TeamConcentrationMode::Reject,
            min_viable_legs: 2,
            correlated_stats: vec![
                pair("points", "rebounds"),
                pair("points", "assists"),
                pair("rebounds", "assists"),
                pair("saves", "goals_against"),
                pair("shots_on_goal", "goals"),
            ],
            invalid_combos: vec![pair("goals", "goals_against"), pair("saves", "points")],
        }
    }
}

impl CorrelationConfig {
    pub fn team_limit(&self, structure: &StructureId, sport: Sport) -> usize {
        self.structure_team_limits
            .get(structure)
            .and_then(|m| m.get(&sport))
            .or_else(|| self.max_per_team.get(&sport))
            .copied()
            .unwrap_or(self.default_max_per_team)
    }

    fn is_correlated(&self, a: &str, b: &str) -> bool {
        self.correlated_stats.iter().any(|(x, y)| {
            (x.eq_ignore_ascii_case(a) && y.eq_ignore_ascii_case(b))
                || (x.eq_ignore_ascii_case(b) && y.eq_ignore_ascii_case(a))
        })
    }
}

/// Rejection reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    SamePlayerConflict,
    TeamConcentration,
    BelowMinimumSize,
    NoLadderForSize,
    LowEvCorrelation,
    LegCountMismatch,
    DuplicatePlayer,
    InvalidStatCombo,
    UnknownStructure,
    BelowEvFloor,
    DuplicateCard,
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterReason::SamePlayerConflict => write!(f, "same_player_conflict"),
            FilterReason::TeamConcentration => write!(f, "team_concentration_exceeded"),
            FilterReason::BelowMinimumSize => write!(f, "below_minimum_size"),
            FilterReason::NoLadderForSize => write!(f, "no_ladder_for_size"),
            FilterReason::LowEvCorrelation => write!(f, "low_ev_correlation"),
            FilterReason::LegCountMismatch => write!(f, "leg_count_mismatch"),
            FilterReason::DuplicatePlayer => write!(f, "duplicate_player"),
            FilterReason::InvalidStatCombo => write!(f, "invalid_stat_combo"),
            FilterReason::UnknownStructure => write!(f, "unknown_structure"),
            FilterReason::BelowEvFloor => write!(f, "below_ev_floor"),
            FilterReason::DuplicateCard => write!(f, "duplicate_card"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Allow,
    /// Card was trimmed to satisfy team limits and repriced
    Adjust(Box<CandidateCard>),
    Reject(FilterReason),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    pub kept: Vec<CandidateCard>,
    pub original_count: usize,
    pub final_count: usize,
    pub adjusted: usize,
    pub removal_reasons: BTreeMap<FilterReason, usize>,
}

pub struct CorrelationFilter {
    config: CorrelationConfig,
    table: Arc<PayoutTable>,
    min_ev: MinEvThresholds,
}

impl CorrelationFilter {
    pub fn new(config: CorrelationConfig, table: Arc<PayoutTable>) -> Self {
        Self {
            config,
            table,
            min_ev: MinEvThresholds::default(),
        }
    }

    /// Floors applied to repriced cards; should match the builder's
    pub fn with_min_ev(mut self, min_ev: MinEvThresholds) -> Self {
        self.min_ev = min_ev;
        self
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    pub fn apply(&self, cards: Vec<CandidateCard>) -> CoreResult<FilterReport> {
        let mut report = FilterReport {
            original_count: cards.len(),
            ..Default::default()
        };

        // structure:leg_key -> index in kept
        let mut seen: HashMap<String, usize> = HashMap::new();
        for card in cards {
            let card = match self.evaluate(&card)? {
                FilterDecision::Allow => card,
                FilterDecision::Adjust(adjusted) => {
                    report.adjusted += 1;
                    *adjusted
                }
                FilterDecision::Reject(reason) => {
                    debug!("Filtered {} [{}]: {}", card.structure, card.leg_key(), reason);
                    *report.removal_reasons.entry(reason).or_insert(0) += 1;
                    continue;
                }
            };

            let key = format!("{}:{}", card.structure, card.leg_key());
            match seen.get(&key) {
                Some(&idx) => {
                    *report
                        .removal_reasons
                        .entry(FilterReason::DuplicateCard)
                        .or_insert(0) += 1;
                    if card.card_ev > report.kept[idx].card_ev {
                        report.kept[idx] = card;
                    }
                }
                None => {
                    seen.insert(key, report.kept.len());
                    report.kept.push(card);
                }
            }
        }

        report.final_count = report.kept.len();
        info!(
            "🧹 Correlation filter: {} -> {} cards ({} adjusted, removed {:?})",
            report.original_count, report.final_count, report.adjusted, report.removal_reasons
        );
        Ok(report)
    }

    pub fn evaluate(&self, card: &CandidateCard) -> CoreResult<FilterDecision> {
        if !self.config.allow_same_player_opposites && has_opposite_sides(&card.legs) {
            return Ok(FilterDecision::Reject(FilterReason::SamePlayerConflict));
        }

        let mut adjusted: Option<CandidateCard> = None;
        let limit = self.config.team_limit(&card.structure, card.sport());
        if max_team_count(&card.legs) > limit {
            match self.config.team_mode {
                TeamConcentrationMode::Reject => {
                    return Ok(FilterDecision::Reject(FilterReason::TeamConcentration));
                }
                TeamConcentrationMode::Adjust => match self.trim_team_concentration(card, limit)? {
                    Ok(trimmed) => adjusted = Some(trimmed),
                    Err(reason) => return Ok(FilterDecision::Reject(reason)),
                },
            }
        }

        let current = adjusted.as_ref().unwrap_or(card);
        if let Some(reason) = self.correlation_violation(current) {
            return Ok(FilterDecision::Reject(reason));
        }
        if let Some(reason) = self.structure_violation(current) {
            return Ok(FilterDecision::Reject(reason));
        }

        Ok(match adjusted {
            Some(card) => FilterDecision::Adjust(Box::new(card)),
            None => FilterDecision::Allow,
        })
    }

    /// Drop the lowest-EV legs of each over-limit team, then reprice
    fn trim_team_concentration(
        &self,
        card: &CandidateCard,
        limit: usize,
    ) -> CoreResult<Result<CandidateCard, FilterReason>> {
        let mut legs = card.legs.clone();

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for team in legs.iter().filter_map(|l| l.team_key()) {
            *counts.entry(team.to_string()).or_insert(0) += 1;
        }
        for (team, count) in counts {
            if count <= limit {
                continue;
            }
            let mut team_legs: Vec<(f64, String)> = legs
                .iter()
                .filter(|l| l.team_key() == Some(team.as_str()))
                .map(|l| (l.ranking_ev(), l.id.clone()))
                .collect();
            team_legs.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            let drop: HashSet<String> = team_legs
                .into_iter()
                .take(count - limit)
                .map(|(_, id)| id)
                .collect();
            legs.retain(|l| !drop.contains(&l.id));
        }

        if legs.len() < self.config.min_viable_legs.max(1) {
            return Ok(Err(FilterReason::BelowMinimumSize));
        }
        let ladder = match self.table.find(card.site, card.kind, legs.len()) {
            Some(ladder) => ladder,
            None => return Ok(Err(FilterReason::NoLadderForSize)),
        };
        let mut trimmed = CandidateCard::assemble(ladder, legs)?;
        trimmed.correlation_penalty = card.correlation_penalty;
        trimmed.card_ev = trimmed.exact_ev * card.correlation_penalty;

        let floor = self.min_ev.threshold(&trimmed.structure, trimmed.sport());
        if !trimmed.card_ev.is_finite() || trimmed.card_ev < floor {
            return Ok(Err(FilterReason::BelowEvFloor));
        }
        Ok(Ok(trimmed))
    }

    fn correlation_violation(&self, card: &CandidateCard) -> Option<FilterReason> {
        if self.config.correlation_threshold <= 0.0 {
            return None;
        }
        for (i, a) in card.legs.iter().enumerate() {
            for b in &card.legs[i + 1..] {
                if a.sport != b.sport || !self.config.is_correlated(&a.stat, &b.stat) {
                    continue;
                }
                if a.ranking_ev() + b.ranking_ev() < self.config.correlation_threshold {
                    return Some(FilterReason::LowEvCorrelation);
                }
            }
        }
        None
    }

    fn structure_violation(&self, card: &CandidateCard) -> Option<FilterReason> {
        let expected = match self.table.get(&card.structure) {
            Ok(ladder) => ladder.picks,
            Err(_) => return Some(FilterReason::UnknownStructure),
        };
        if card.legs.len() != expected {
            return Some(FilterReason::LegCountMismatch);
        }
        let mut players = HashSet::new();
        if !card.legs.iter().all(|l| players.insert(l.player.as_str())) {
            return Some(FilterReason::DuplicatePlayer);
        }
        let has = |stat: &str| card.legs.iter().any(|l| l.stat.eq_ignore_ascii_case(stat));
        if self
            .config
            .invalid_combos
            .iter()
            .any(|(a, b)| has(a) && has(b))
        {
            return Some(FilterReason::InvalidStatCombo);
        }
        None
    }
}

/// Same player and stat taken on both sides
fn has_opposite_sides(legs: &[Leg]) -> bool {
    let mut seen: HashMap<(&str, String), crate::types::Side> = HashMap::new();
    for leg in legs {
        let key = (leg.player.as_str(), leg.stat.to_lowercase());
        match seen.get(&key) {
            Some(side) if *side != leg.side => return true,
            Some(_) => {}
            None => {
                seen.insert(key, leg.side);
            }
        }
    }
    false
}

fn max_team_count(legs: &[Leg]) -> usize {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for team in legs.iter().filter_map(|l| l.team_key()) {
        *counts.entry(team).or_insert(0) += 1;
    }
    counts.values().copied().max().unwrap_or(0)
}
