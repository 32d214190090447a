//! Card Builder - budgeted randomized search for priced candidate cards
//!
//! Per structure:
//! 1. Pool = top legs by edge
//! 2. Attempt budget from combinatorics, target cards and a global share
//! 3. Shuffle, greedily fill respecting player/team/game caps
//! 4. Feasibility prune, then price through the EV Provider
//! 5. Dedupe by leg set, sort by EV
//!
//! Structures run as independent tokio tasks sharing one EV Provider. A
//! degraded provider cancels the remaining search across all structures.

pub mod budget;
pub mod feasibility;

pub use budget::{attempt_budget, combinations};
pub use feasibility::FeasibilityIndex;

use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::card::{duplicate_player_overflow, CandidateCard};
use crate::error::CoreResult;
use crate::ev_provider::{EvProvider, ProbabilityKey, QuoteSource};
use crate::payout::{PayoutLadder, StructureId};
use crate::types::{Leg, Sport};

/// Minimum card EV, by structure and optionally by sport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinEvThresholds {
    pub default: f64,
    pub by_structure: HashMap<StructureId, f64>,
    pub by_sport: HashMap<Sport, HashMap<StructureId, f64>>,
}

impl Default for MinEvThresholds {
    fn default() -> Self {
        let by_structure = [
            ("UD_2P_STD", 0.008),
            ("UD_3P_STD", 0.015),
            ("UD_4P_STD", 0.02),
            ("UD_5P_STD", 0.025),
            ("UD_6P_STD", 0.03),
            ("UD_3F_FLX", 0.015),
            ("UD_4F_FLX", 0.02),
            ("UD_5F_FLX", 0.025),
            ("UD_6F_FLX", 0.03),
            ("UD_7F_FLX", 0.04),
            ("UD_8F_FLX", 0.05),
        ]
        .into_iter()
        .map(|(id, ev)| (StructureId::new(id), ev))
        .collect();

        Self {
            default: 0.035,
            by_structure,
            by_sport: HashMap::new(),
        }
    }
}

impl MinEvThresholds {
    pub fn uniform(floor: f64) -> Self {
        Self {
            default: floor,
            by_structure: HashMap::new(),
            by_sport: HashMap::new(),
        }
    }

    pub fn threshold(&self, structure: &StructureId, sport: Sport) -> f64 {
        self.by_sport
            .get(&sport)
            .and_then(|m| m.get(structure))
            .or_else(|| self.by_structure.get(structure))
            .copied()
            .unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Legs kept in the working pool, ranked by edge
    pub pool_size: usize,
    pub global_attempt_budget: usize,
    pub attempts_per_card: usize,
    /// Share of the global budget one structure may use
    pub max_fraction_per_structure: f64,
    pub default_target_cards: usize,
    pub target_cards: HashMap<StructureId, usize>,
    pub max_legs_per_team: usize,
    pub max_legs_per_game: usize,
    pub feasibility_pruning: bool,
    /// Scales average leg EV into a card EV upper bound
    pub feasibility_multiplier: f64,
    /// EV decay per duplicate-player overflow leg
    pub duplicate_player_decay: f64,
    pub min_ev: MinEvThresholds,
    /// Leg pre-filters, applied before pool selection
    pub min_leg_edge: Option<f64>,
    pub min_leg_ev: Option<f64>,
    /// Fixed seed for reproducible searches
    pub seed: Option<u64>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        let target_cards = [
            ("2P", 1),
            ("3P", 2),
            ("3F", 2),
            ("4P", 2),
            ("4F", 3),
            ("5P", 3),
            ("5F", 8),  // main structure
            ("6P", 2),
            ("6F", 6),  // second main structure
            ("UD_2P_STD", 8),
            ("UD_3P_STD", 8),
            ("UD_4P_STD", 8),
            ("UD_5P_STD", 8),
            ("UD_6P_STD", 8),
            ("UD_3F_FLX", 6),
            ("UD_4F_FLX", 6),
            ("UD_5F_FLX", 6),
            ("UD_6F_FLX", 6),
            ("UD_7F_FLX", 6),
            ("UD_8F_FLX", 6),
        ]
        .into_iter()
        .map(|(id, n)| (StructureId::new(id), n))
        .collect();

        Self {
            pool_size: 30,
            global_attempt_budget: 3000,
            attempts_per_card: 25,
            max_fraction_per_structure: 0.4,
            default_target_cards: 3,
            target_cards,
            max_legs_per_team: 3,
            max_legs_per_game: 4,
            feasibility_pruning: true,
            feasibility_multiplier: 1.2,
            duplicate_player_decay: 0.95,
            min_ev: MinEvThresholds::default(),
            min_leg_edge: None,
            min_leg_ev: None,
            seed: None,
        }
    }
}

impl BuilderConfig {
    pub fn target_for(&self, structure: &StructureId) -> usize {
        self.target_cards
            .get(structure)
            .copied()
            .unwrap_or(self.default_target_cards)
    }

    pub fn passes_prefilter(&self, leg: &Leg) -> bool {
        self.min_leg_edge.map_or(true, |min| leg.edge() >= min)
            && self.min_leg_ev.map_or(true, |min| leg.ranking_ev() >= min)
    }
}

/// Per-structure search metrics, returned to the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureBuildStats {
    pub structure: StructureId,
    pub pool_size: usize,
    pub attempts_allocated: usize,
    pub attempts_used: usize,
    pub failed_fills: usize,
    pub feasibility_pruned: usize,
    pub ev_calls: usize,
    pub ev_rejected: usize,
    pub cache_hits: usize,
    pub fallbacks: usize,
    pub accepted: usize,
    pub final_candidates: usize,
    pub aborted_degraded: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureBuild {
    pub stats: StructureBuildStats,
    pub cards: Vec<CandidateCard>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub candidates: Vec<CandidateCard>,
    pub stats: Vec<StructureBuildStats>,
}

#[derive(Clone)]
pub struct CardBuilder {
    config: Arc<BuilderConfig>,
    provider: Arc<EvProvider>,
    cancelled: Arc<AtomicBool>,
}

impl CardBuilder {
    pub fn new(config: BuilderConfig, provider: Arc<EvProvider>) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Set once the provider degrades; sticky for the rest of the run
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Build every ladder concurrently. A structure whose task fails
    /// contributes no candidates; the others are unaffected.
    pub async fn build_all(&self, legs: &[Leg], ladders: &[PayoutLadder]) -> BuildOutput {
        let legs: Arc<Vec<Leg>> = Arc::new(
            legs.iter()
                .filter(|l| self.config.passes_prefilter(l))
                .cloned()
                .collect(),
        );
        info!(
            "🧱 Building {} structures from {} legs",
            ladders.len(),
            legs.len()
        );

        let handles: Vec<_> = ladders
            .iter()
            .cloned()
            .map(|ladder| {
                let builder = self.clone();
                let legs = Arc::clone(&legs);
                let id = ladder.id.clone();
                let handle = tokio::spawn(async move {
                    let site_legs: Vec<Leg> =
                        legs.iter().filter(|l| l.site == ladder.site).cloned().collect();
                    builder.build_structure(&site_legs, &ladder).await
                });
                (id, handle)
            })
            .collect();

        let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let mut output = BuildOutput::default();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(Ok(build)) => {
                    output.candidates.extend(build.cards);
                    output.stats.push(build.stats);
                }
                Ok(Err(e)) => {
                    error!("Structure {} failed: {}", id, e);
                    output.stats.push(StructureBuildStats {
                        structure: id,
                        ..Default::default()
                    });
                }
                Err(e) => {
                    error!("Structure {} task panicked: {}", id, e);
                    output.stats.push(StructureBuildStats {
                        structure: id,
                        ..Default::default()
                    });
                }
            }
        }

        sort_by_ev(&mut output.candidates);
        output
    }

    /// Search one structure. Attempts are sequential.
    pub async fn build_structure(
        &self,
        legs: &[Leg],
        ladder: &PayoutLadder,
    ) -> CoreResult<StructureBuild> {
        let started = Instant::now();
        let cfg = &*self.config;
        let picks = ladder.picks;

        let mut pool: Vec<&Leg> = legs.iter().collect();
        pool.sort_by(|a, b| b.edge().total_cmp(&a.edge()).then_with(|| a.id.cmp(&b.id)));
        pool.truncate(cfg.pool_size);

        let target = cfg.target_for(&ladder.id);
        let budget = attempt_budget(
            pool.len(),
            picks,
            target,
            cfg.attempts_per_card,
            cfg.global_attempt_budget,
            cfg.max_fraction_per_structure,
        );

        let mut stats = StructureBuildStats {
            structure: ladder.id.clone(),
            pool_size: pool.len(),
            attempts_allocated: budget,
            ..Default::default()
        };
        info!(
            "🎯 {}: {} attempts (target {} cards, {} pool legs)",
            ladder.id, budget, target, pool.len()
        );
        if budget == 0 {
            stats.elapsed_ms = started.elapsed().as_millis() as u64;
            return Ok(StructureBuild {
                stats,
                cards: Vec::new(),
            });
        }

        let feasibility = FeasibilityIndex::new(pool.iter().copied(), cfg.feasibility_multiplier);
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(structure_seed(seed, &ladder.id)),
            None => StdRng::from_entropy(),
        };
        let mut order = pool.clone();
        let mut accepted: Vec<CandidateCard> = Vec::new();

        for attempt in 0..budget {
            if self.is_cancelled() || self.provider.is_degraded() {
                self.cancelled.store(true, Ordering::SeqCst);
                stats.aborted_degraded = true;
                warn!(
                    "🚨 EV provider degraded, aborting {} after {} attempts",
                    ladder.id, attempt
                );
                break;
            }
            stats.attempts_used += 1;

            // first attempt keeps pool order so the top legs are always tried
            if attempt > 0 {
                order.shuffle(&mut rng);
            }

            let chosen = greedy_fill(&order, picks, cfg.max_legs_per_team, cfg.max_legs_per_game);
            if chosen.len() < picks {
                stats.failed_fills += 1;
                continue;
            }

            let sport = chosen[0].sport;
            let floor = cfg.min_ev.threshold(&ladder.id, sport);

            if cfg.feasibility_pruning {
                let bound = feasibility.upper_bound(&chosen, picks);
                if bound < floor {
                    stats.feasibility_pruned += 1;
                    if stats.feasibility_pruned <= 3 {
                        debug!(
                            "{} attempt {}: pruned, bound {:.4} < floor {:.4}",
                            ladder.id, attempt, bound, floor
                        );
                    }
                    continue;
                }
            }

            let probs: Vec<f64> = chosen.iter().map(|l| l.true_prob).collect();
            let key = ProbabilityKey::average(&probs);
            let priced = self.provider.get_ev(&ladder.id, key).await?;
            stats.ev_calls += 1;
            match priced.source {
                QuoteSource::CacheHit => stats.cache_hits += 1,
                s if s.is_fallback() => stats.fallbacks += 1,
                _ => {}
            }

            let (ev, penalty) = penalized_ev(
                priced.quote.ev,
                chosen.iter().copied(),
                cfg.duplicate_player_decay,
            );
            if !ev.is_finite() || ev < floor {
                stats.ev_rejected += 1;
                continue;
            }

            let card = CandidateCard::assemble(ladder, chosen.into_iter().cloned().collect())?
                .with_provider_ev(priced, penalty);
            accepted.push(card);
            stats.accepted += 1;
        }

        let mut cards = dedupe_by_legs(accepted);
        sort_by_ev(&mut cards);
        stats.final_candidates = cards.len();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            "📈 {}: {} candidates ({} used, {} failed fills, {} pruned, {} EV calls, {} EV rejected)",
            ladder.id,
            stats.final_candidates,
            stats.attempts_used,
            stats.failed_fills,
            stats.feasibility_pruned,
            stats.ev_calls,
            stats.ev_rejected
        );

        Ok(StructureBuild { stats, cards })
    }
}

/// Provider EV after `decay^overflow` for repeated players, with the factor
pub fn penalized_ev<'a>(
    raw_ev: f64,
    legs: impl IntoIterator<Item = &'a Leg>,
    decay: f64,
) -> (f64, f64) {
    let overflow = duplicate_player_overflow(legs);
    let penalty = decay.powi(overflow as i32);
    (raw_ev * penalty, penalty)
}

fn structure_seed(seed: u64, structure: &StructureId) -> u64 {
    let mut hasher = DefaultHasher::new();
    structure.hash(&mut hasher);
    seed ^ hasher.finish()
}

/// Fill slots in `order`, one leg per player, within per-card team/game caps
pub fn greedy_fill<'a>(
    order: &[&'a Leg],
    picks: usize,
    max_team: usize,
    max_game: usize,
) -> Vec<&'a Leg> {
    let mut chosen = Vec::with_capacity(picks);
    let mut players: HashSet<&str> = HashSet::new();
    let mut teams: HashMap<&str, usize> = HashMap::new();
    let mut games: HashMap<String, usize> = HashMap::new();

    for &leg in order {
        if chosen.len() >= picks {
            break;
        }
        if players.contains(leg.player.as_str()) {
            continue;
        }
        let team = leg.team_key();
        if let Some(team) = team {
            if teams.get(team).copied().unwrap_or(0) + 1 > max_team {
                continue;
            }
        }
        let game = leg.game_key();
        if let Some(game) = &game {
            if games.get(game).copied().unwrap_or(0) + 1 > max_game {
                continue;
            }
        }

        players.insert(leg.player.as_str());
        if let Some(team) = team {
            *teams.entry(team).or_insert(0) += 1;
        }
        if let Some(game) = game {
            *games.entry(game).or_insert(0) += 1;
        }
        chosen.push(leg);
    }
    chosen
}

/// Keep the highest-EV card for each leg set
pub fn dedupe_by_legs(cards: Vec<CandidateCard>) -> Vec<CandidateCard> {
    let mut best: HashMap<String, CandidateCard> = HashMap::new();
    for card in cards {
        let key = format!("{}:{}", card.structure, card.leg_key());
        match best.get(&key) {
            Some(existing) if existing.card_ev >= card.card_ev => {}
            _ => {
                best.insert(key, card);
            }
        }
    }
    best.into_values().collect()
}

/// EV descending, then leg key for a stable order
pub fn sort_by_ev(cards: &mut [CandidateCard]) {
    cards.sort_by(|a, b| {
        b.card_ev
            .total_cmp(&a.card_ev)
            .then_with(|| a.structure.cmp(&b.structure))
            .then_with(|| a.leg_key().cmp(&b.leg_key()))
    });
}
