//! Greedy portfolio selection
//!
//! Cards are ranked by `ev / (capped kelly + ε)` and accepted one at a time while
//! the daily risk budget and the per-player, per-game and per-team caps allow.
//! Every card is considered; a full budget does not end the walk.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::card::CandidateCard;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConstraints {
    /// Fraction of bankroll
    pub daily_risk_budget: f64,
    pub max_cards_per_player: usize,
    pub max_cards_per_game: usize,
    pub max_cards_per_team: usize,
    pub min_card_ev: f64,
    pub min_kelly_fraction: f64,
    pub efficiency_epsilon: f64,
}

impl Default for PortfolioConstraints {
    fn default() -> Self {
        Self {
            daily_risk_budget: 0.08,
            max_cards_per_player: 3,
            max_cards_per_game: 5,
            max_cards_per_team: 4,
            min_card_ev: 0.03,
            min_kelly_fraction: 0.001,
            efficiency_epsilon: 1e-4,
        }
    }
}

impl PortfolioConstraints {
    pub fn efficiency(&self, card: &CandidateCard) -> f64 {
        let capped = card.kelly.as_ref().map(|k| k.capped_fraction).unwrap_or(0.0);
        card.card_ev / (capped + self.efficiency_epsilon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    MinEv,
    MinKelly,
    RiskBudget,
    Player,
    Game,
    Team,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConstraintKind::MinEv => "MIN_EV",
            ConstraintKind::MinKelly => "MIN_KELLY",
            ConstraintKind::RiskBudget => "RISK_BUDGET",
            ConstraintKind::Player => "PLAYER",
            ConstraintKind::Game => "GAME",
            ConstraintKind::Team => "TEAM",
        };
        write!(f, "{}", s)
    }
}

/// A constraint that blocked a card, with the value it would have reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintHit {
    pub kind: ConstraintKind,
    /// Player, game key, team, or "budget"
    pub entity: String,
    pub current: f64,
    pub limit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedCard {
    pub card: CandidateCard,
    pub hit: ConstraintHit,
    /// 1-based position in the ranked walk; 0 for ineligible cards
    pub step: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioTotals {
    pub selected_count: usize,
    pub total_kelly_fraction: f64,
    pub total_stake: f64,
    pub total_expected_profit: f64,
    /// `total_kelly_fraction / daily_risk_budget`
    pub budget_utilization: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioResult {
    pub selected: Vec<CandidateCard>,
    pub rejected: Vec<RejectedCard>,
    pub totals: PortfolioTotals,
    /// First hit per (kind, entity)
    pub constraints_hit: Vec<ConstraintHit>,
    pub rejection_counts: BTreeMap<ConstraintKind, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedCard {
    pub card: CandidateCard,
    pub selected: bool,
    /// 1-based rank among selected cards
    pub portfolio_rank: Option<usize>,
    pub efficiency: Option<f64>,
}

/// Efficiency desc, EV desc, cash probability desc, then sorted leg ids
fn rank_order(a: &(f64, &CandidateCard), b: &(f64, &CandidateCard)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| b.1.card_ev.total_cmp(&a.1.card_ev))
        .then_with(|| b.1.win_prob_cash.total_cmp(&a.1.win_prob_cash))
        .then_with(|| a.1.sorted_leg_ids().cmp(&b.1.sorted_leg_ids()))
        .then_with(|| a.1.structure.cmp(&b.1.structure))
}

#[derive(Default)]
struct Usage {
    kelly: f64,
    players: HashMap<String, usize>,
    games: HashMap<String, usize>,
    teams: HashMap<String, usize>,
}

impl Usage {
    fn check(&self, card: &CandidateCard, c: &PortfolioConstraints) -> Option<ConstraintHit> {
        let fraction = card.kelly_fraction();
        if self.kelly + fraction > c.daily_risk_budget {
            return Some(ConstraintHit {
                kind: ConstraintKind::RiskBudget,
                entity: "budget".to_string(),
                current: self.kelly + fraction,
                limit: c.daily_risk_budget,
            });
        }

        let entity_hit = |kind: ConstraintKind,
                          entities: Vec<String>,
                          used: &HashMap<String, usize>,
                          limit: usize|
         -> Option<ConstraintHit> {
            entities.into_iter().find_map(|e| {
                let next = used.get(&e).copied().unwrap_or(0) + 1;
                (next > limit).then(|| ConstraintHit {
                    kind,
                    entity: e,
                    current: next as f64,
                    limit: limit as f64,
                })
            })
        };

        let players = card.players().into_iter().map(str::to_string).collect();
        let teams = card.teams().into_iter().map(str::to_string).collect();
        let games = card.games().into_iter().collect();
        entity_hit(ConstraintKind::Player, players, &self.players, c.max_cards_per_player)
            .or_else(|| entity_hit(ConstraintKind::Game, games, &self.games, c.max_cards_per_game))
            .or_else(|| entity_hit(ConstraintKind::Team, teams, &self.teams, c.max_cards_per_team))
    }

    fn accept(&mut self, card: &CandidateCard) {
        self.kelly += card.kelly_fraction();
        for p in card.players() {
            *self.players.entry(p.to_string()).or_insert(0) += 1;
        }
        for g in card.games() {
            *self.games.entry(g).or_insert(0) += 1;
        }
        for t in card.teams() {
            *self.teams.entry(t.to_string()).or_insert(0) += 1;
        }
    }
}

fn record_rejection(
    result: &mut PortfolioResult,
    card: &CandidateCard,
    hit: ConstraintHit,
    step: usize,
) {
    *result.rejection_counts.entry(hit.kind).or_insert(0) += 1;
    if !result
        .constraints_hit
        .iter()
        .any(|h| h.kind == hit.kind && h.entity == hit.entity)
    {
        result.constraints_hit.push(hit.clone());
    }
    result.rejected.push(RejectedCard {
        card: card.clone(),
        hit,
        step,
    });
}

pub fn select_portfolio(
    cards: &[CandidateCard],
    constraints: &PortfolioConstraints,
) -> PortfolioResult {
    let mut result = PortfolioResult::default();
    let mut ranked: Vec<(f64, &CandidateCard)> = Vec::with_capacity(cards.len());
    for card in cards {
        let fraction = card.kelly_fraction();
        if !(card.card_ev >= constraints.min_card_ev) {
            let hit = ConstraintHit {
                kind: ConstraintKind::MinEv,
                entity: card.leg_key(),
                current: card.card_ev,
                limit: constraints.min_card_ev,
            };
            record_rejection(&mut result, card, hit, 0);
        } else if card.kelly.is_none() || !(fraction >= constraints.min_kelly_fraction) {
            let hit = ConstraintHit {
                kind: ConstraintKind::MinKelly,
                entity: card.leg_key(),
                current: fraction,
                limit: constraints.min_kelly_fraction,
            };
            record_rejection(&mut result, card, hit, 0);
        } else {
            ranked.push((constraints.efficiency(card), card));
        }
    }
    let eligible = ranked.len();
    ranked.sort_by(rank_order);

    let mut usage = Usage::default();
    for (i, (_, card)) in ranked.into_iter().enumerate() {
        match usage.check(card, constraints) {
            Some(hit) => record_rejection(&mut result, card, hit, i + 1),
            None => {
                usage.accept(card);
                result.selected.push(card.clone());
            }
        }
    }

    let stake: f64 = result
        .selected
        .iter()
        .filter_map(|c| c.kelly.as_ref())
        .map(|k| k.recommended_stake)
        .sum();
    let profit: f64 = result
        .selected
        .iter()
        .filter_map(|c| c.kelly.as_ref())
        .map(|k| k.expected_profit)
        .sum();
    result.totals = PortfolioTotals {
        selected_count: result.selected.len(),
        total_kelly_fraction: usage.kelly,
        total_stake: stake,
        total_expected_profit: profit,
        budget_utilization: if constraints.daily_risk_budget > 0.0 {
            usage.kelly / constraints.daily_risk_budget
        } else {
            0.0
        },
    };

    info!(
        "🎯 Portfolio: {} input, {} eligible, {} selected | kelly {:.2}% | stake ${:.2} | exp profit ${:.2} | budget {:.1}%",
        cards.len(),
        eligible,
        result.totals.selected_count,
        result.totals.total_kelly_fraction * 100.0,
        result.totals.total_stake,
        result.totals.total_expected_profit,
        result.totals.budget_utilization * 100.0
    );
    if !result.rejection_counts.is_empty() {
        info!("   Rejections by reason: {:?}", result.rejection_counts);
    }

    result
}

/// Annotate every card with its selection status and rank
pub fn mark_portfolio(
    cards: &[CandidateCard],
    result: &PortfolioResult,
    constraints: &PortfolioConstraints,
) -> Vec<MarkedCard> {
    let ranks: HashMap<(String, String), usize> = result
        .selected
        .iter()
        .enumerate()
        .map(|(i, c)| ((c.structure.to_string(), c.leg_key()), i + 1))
        .collect();

    cards
        .iter()
        .map(|card| {
            let rank = ranks
                .get(&(card.structure.to_string(), card.leg_key()))
                .copied();
            MarkedCard {
                card: card.clone(),
                selected: rank.is_some(),
                portfolio_rank: rank,
                efficiency: rank.map(|_| constraints.efficiency(card)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kelly::{KellyResult, RiskLabel};
    use crate::payout::{PayoutTable, StructureId};
    use crate::types::{Leg, Side, Site, Sport};

    fn make_leg(id: &str, player: &str, team: &str, opponent: &str) -> Leg {
        Leg {
            id: id.to_string(),
            player: player.to_string(),
            stat: "points".to_string(),
            line: 20.5,
            side: Side::Over,
            true_prob: 0.6,
            leg_ev: None,
            site: Site::PrizePicks,
            sport: Sport::NBA,
            team: Some(team.to_string()),
            opponent: Some(opponent.to_string()),
            game_id: None,
            start_time: None,
        }
    }

    fn sized(legs: Vec<Leg>, ev: f64, fraction: f64) -> CandidateCard {
        let table = PayoutTable::builtin();
        let ladder = table.get(&StructureId::new("2P")).unwrap();
        let mut card = CandidateCard::assemble(ladder, legs).unwrap();
        card.card_ev = ev;
        card.kelly = Some(KellyResult {
            mean: ev,
            variance: 1.0,
            raw_fraction: fraction * 2.0,
            capped_fraction: fraction * 2.0,
            safe_fraction: fraction,
            final_fraction: fraction,
            recommended_stake: 750.0 * fraction,
            expected_profit: 750.0 * fraction * ev,
            max_potential_win: 750.0 * fraction * 2.0,
            risk_label: RiskLabel::HalfKelly,
            caps: vec![],
        });
        card
    }

    #[test]
    fn ineligible_cards_are_reported() {
        let low_ev = sized(
            vec![make_leg("a", "A", "LAL", "BOS"), make_leg("b", "B", "MIA", "NYK")],
            0.01,
            0.02,
        );
        let low_kelly = sized(
            vec![make_leg("c", "C", "LAL", "BOS"), make_leg("d", "D", "MIA", "NYK")],
            0.10,
            0.0005,
        );
        let r = select_portfolio(&[low_ev, low_kelly], &PortfolioConstraints::default());
        assert!(r.selected.is_empty());
        assert_eq!(r.rejection_counts.get(&ConstraintKind::MinEv), Some(&1));
        assert_eq!(r.rejection_counts.get(&ConstraintKind::MinKelly), Some(&1));
        assert_eq!(r.totals.budget_utilization, 0.0);
    }

    #[test]
    fn ranks_by_efficiency() {
        // efficiency ≈ 0.10 / 0.04 vs 0.10 / 0.02
        let heavy = sized(
            vec![make_leg("a", "A", "LAL", "BOS"), make_leg("b", "B", "MIA", "NYK")],
            0.10,
            0.02,
        );
        let light = sized(
            vec![make_leg("c", "C", "DAL", "DEN"), make_leg("d", "D", "PHX", "SAC")],
            0.10,
            0.01,
        );
        let r = select_portfolio(&[heavy.clone(), light.clone()], &PortfolioConstraints::default());
        assert_eq!(r.selected, vec![light, heavy]);
        assert!((r.totals.total_kelly_fraction - 0.03).abs() < 1e-12);
        assert!((r.totals.budget_utilization - 0.375).abs() < 1e-9);
    }

    #[test]
    fn budget_is_never_exceeded_and_walk_continues() {
        let constraints = PortfolioConstraints {
            daily_risk_budget: 0.055,
            ..Default::default()
        };
        let big = sized(
            vec![make_leg("a", "A", "T1", "T2"), make_leg("b", "B", "T3", "T4")],
            0.30,
            0.04,
        );
        let too_big = sized(
            vec![make_leg("c", "C", "T5", "T6"), make_leg("d", "D", "T7", "T8")],
            0.20,
            0.03,
        );
        let small = sized(
            vec![make_leg("e", "E", "T9", "T10"), make_leg("f", "F", "T11", "T12")],
            0.04,
            0.01,
        );

        let r = select_portfolio(&[big.clone(), too_big, small.clone()], &constraints);
        assert_eq!(r.selected.len(), 2);
        assert!(r.selected.contains(&big));
        assert!(r.selected.contains(&small));
        assert!(r.totals.total_kelly_fraction <= constraints.daily_risk_budget + 1e-12);
        assert_eq!(r.rejection_counts.get(&ConstraintKind::RiskBudget), Some(&1));
        let hit = &r.rejected[0].hit;
        assert_eq!(hit.kind, ConstraintKind::RiskBudget);
        assert!((hit.current - 0.07).abs() < 1e-12);
        assert!((hit.limit - 0.055).abs() < 1e-12);
    }

    #[test]
    fn player_cap_blocks_fourth_card() {
        let constraints = PortfolioConstraints {
            daily_risk_budget: 1.0,
            max_cards_per_game: 100,
            max_cards_per_team: 100,
            ..Default::default()
        };
        let cards: Vec<CandidateCard> = (0..4)
            .map(|i| {
                sized(
                    vec![
                        make_leg(&format!("star{}", i), "Star", "LAL", "BOS"),
                        make_leg(&format!("x{}", i), &format!("Other{}", i), "MIA", "NYK"),
                    ],
                    0.10 + i as f64 * 0.01,
                    0.01,
                )
            })
            .collect();
        let r = select_portfolio(&cards, &constraints);
        assert_eq!(r.selected.len(), 3);
        let hit = r
            .constraints_hit
            .iter()
            .find(|h| h.kind == ConstraintKind::Player)
            .unwrap();
        assert_eq!(hit.entity, "Star");
        assert_eq!(hit.current, 4.0);
        assert_eq!(hit.limit, 3.0);
    }

    #[test]
    fn game_and_team_caps() {
        let constraints = PortfolioConstraints {
            daily_risk_budget: 1.0,
            max_cards_per_game: 2,
            max_cards_per_team: 1,
            ..Default::default()
        };
        let a = sized(
            vec![make_leg("a", "A", "LAL", "BOS"), make_leg("b", "B", "BOS", "LAL")],
            0.20,
            0.01,
        );
        let b = sized(
            vec![make_leg("c", "C", "LAL", "BOS"), make_leg("d", "D", "MIA", "NYK")],
            0.15,
            0.01,
        );
        let r = select_portfolio(&[a.clone(), b], &constraints);
        assert_eq!(r.selected, vec![a]);
        // game LAL_vs_BOS has room, team LAL does not
        assert_eq!(r.rejected[0].hit.kind, ConstraintKind::Team);
        assert_eq!(r.rejected[0].hit.entity, "LAL");
    }

    #[test]
    fn marks_selected_cards_with_rank() {
        let a = sized(
            vec![make_leg("a", "A", "LAL", "BOS"), make_leg("b", "B", "MIA", "NYK")],
            0.10,
            0.01,
        );
        let b = sized(
            vec![make_leg("c", "C", "LAL", "BOS"), make_leg("d", "D", "MIA", "NYK")],
            0.01,
            0.01,
        );
        let constraints = PortfolioConstraints::default();
        let r = select_portfolio(&[a.clone(), b.clone()], &constraints);
        let marked = mark_portfolio(&[a, b], &r, &constraints);
        assert!(marked[0].selected);
        assert_eq!(marked[0].portfolio_rank, Some(1));
        assert!(marked[0].efficiency.is_some());
        assert!(!marked[1].selected);
        assert_eq!(marked[1].efficiency, None);
    }
}
