//! Candidate cards

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::CoreResult;
use crate::ev_provider::{PricedEv, ProbabilityKey, QuoteSource};
use crate::kelly::KellyResult;
use crate::payout::{
    ev_from_distribution, hit_distribution, HitDistribution, PayoutLadder, StructureId,
    StructureKind,
};
use crate::types::{Leg, Site, Sport};

/// A fixed-size bundle of legs priced against one payout ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateCard {
    pub structure: StructureId,
    pub site: Site,
    pub kind: StructureKind,
    pub legs: Vec<Leg>,
    pub distribution: HitDistribution,
    /// EV used for gating and ranking (provider quote after penalties)
    pub card_ev: f64,
    /// EV of the exact heterogeneous distribution
    pub exact_ev: f64,
    pub win_prob_cash: f64,
    pub win_prob_any: f64,
    pub avg_prob: f64,
    pub probability_key: ProbabilityKey,
    pub quote_source: QuoteSource,
    pub correlation_penalty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kelly: Option<KellyResult>,
}

impl CandidateCard {
    /// Price `legs` exactly against `ladder`. `card_ev` starts as the exact EV.
    pub fn assemble(ladder: &PayoutLadder, legs: Vec<Leg>) -> CoreResult<Self> {
        let probs: Vec<f64> = legs.iter().map(|l| l.true_prob).collect();
        let distribution = hit_distribution(&probs)?;
        let quote = ev_from_distribution(&distribution, ladder, 1.0);
        let avg_prob = if probs.is_empty() {
            0.0
        } else {
            probs.iter().sum::<f64>() / probs.len() as f64
        };

        Ok(Self {
            structure: ladder.id.clone(),
            site: ladder.site,
            kind: ladder.kind,
            legs,
            distribution,
            card_ev: quote.ev,
            exact_ev: quote.ev,
            win_prob_cash: quote.win_prob_cash,
            win_prob_any: quote.win_prob_any,
            avg_prob,
            probability_key: ProbabilityKey::average(&probs),
            quote_source: QuoteSource::Local,
            correlation_penalty: 1.0,
            kelly: None,
        })
    }

    /// Replace the gating EV with a provider quote scaled by `penalty`
    pub fn with_provider_ev(mut self, priced: PricedEv, penalty: f64) -> Self {
        self.card_ev = priced.quote.ev * penalty;
        self.quote_source = priced.source;
        self.correlation_penalty = penalty;
        self
    }

    pub fn size(&self) -> usize {
        self.legs.len()
    }

    pub fn sorted_leg_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.legs.iter().map(|l| l.id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Order-independent identity of the leg set
    pub fn leg_key(&self) -> String {
        self.sorted_leg_ids().join("|")
    }

    pub fn players(&self) -> BTreeSet<&str> {
        self.legs.iter().map(|l| l.player.as_str()).collect()
    }

    pub fn teams(&self) -> BTreeSet<&str> {
        self.legs.iter().filter_map(|l| l.team_key()).collect()
    }

    pub fn games(&self) -> BTreeSet<String> {
        self.legs.iter().filter_map(|l| l.game_key()).collect()
    }

    /// Most common sport on the card; ties go to the first leg's sport
    pub fn sport(&self) -> Sport {
        let mut counts: HashMap<Sport, usize> = HashMap::new();
        for leg in &self.legs {
            *counts.entry(leg.sport).or_insert(0) += 1;
        }
        let mut best = self.legs.first().map(|l| l.sport).unwrap_or_default();
        let mut best_count = counts.get(&best).copied().unwrap_or(0);
        for leg in &self.legs {
            let c = counts[&leg.sport];
            if c > best_count {
                best = leg.sport;
                best_count = c;
            }
        }
        best
    }

    pub fn kelly_fraction(&self) -> f64 {
        self.kelly.as_ref().map(|k| k.final_fraction).unwrap_or(0.0)
    }
}

/// Extra legs beyond the first for any player appearing more than once
pub fn duplicate_player_overflow<'a>(legs: impl IntoIterator<Item = &'a Leg>) -> usize {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for leg in legs {
        *counts.entry(leg.player.as_str()).or_insert(0) += 1;
    }
    counts.values().filter(|&&c| c > 1).map(|c| c - 1).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::PayoutTable;
    use crate::types::Side;

    fn make_leg(id: &str, player: &str, prob: f64, sport: Sport) -> Leg {
        Leg {
            id: id.to_string(),
            player: player.to_string(),
            stat: "points".to_string(),
            line: 20.5,
            side: Side::Over,
            true_prob: prob,
            leg_ev: None,
            site: Site::PrizePicks,
            sport,
            team: None,
            opponent: None,
            game_id: None,
            start_time: None,
        }
    }

    #[test]
    fn assemble_prices_exactly() {
        let table = PayoutTable::builtin();
        let ladder = table.get(&StructureId::new("2P")).unwrap();
        let card = CandidateCard::assemble(
            ladder,
            vec![
                make_leg("b", "B", 0.6, Sport::NBA),
                make_leg("a", "A", 0.7, Sport::NBA),
            ],
        )
        .unwrap();
        // 3 * 0.42 - 1
        assert!((card.exact_ev - 0.26).abs() < 1e-12);
        assert_eq!(card.card_ev, card.exact_ev);
        assert_eq!(card.leg_key(), "a|b");
        assert_eq!(card.probability_key.raw(), 6500);
    }

    #[test]
    fn majority_sport_wins() {
        let table = PayoutTable::builtin();
        let ladder = table.get(&StructureId::new("3P")).unwrap();
        let card = CandidateCard::assemble(
            ladder,
            vec![
                make_leg("a", "A", 0.6, Sport::NFL),
                make_leg("b", "B", 0.6, Sport::NHL),
                make_leg("c", "C", 0.6, Sport::NHL),
            ],
        )
        .unwrap();
        assert_eq!(card.sport(), Sport::NHL);
    }

    #[test]
    fn overflow_counts_extra_legs_only() {
        let legs = vec![
            make_leg("a", "A", 0.6, Sport::NBA),
            make_leg("b", "A", 0.6, Sport::NBA),
            make_leg("c", "A", 0.6, Sport::NBA),
            make_leg("d", "B", 0.6, Sport::NBA),
        ];
        assert_eq!(duplicate_player_overflow(&legs), 2);
        assert_eq!(duplicate_player_overflow(&legs[2..]), 0);
    }
}
