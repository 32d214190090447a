//! Cheap upper bound on card EV, checked before any EV Provider call
//!
//! The bound completes a leg set with the best remaining leg EVs and scales
//! the resulting average by a generous multiplier. It is a heuristic: tests
//! compare pruned and unpruned searches rather than assume it is sound.

use std::collections::HashSet;

use crate::types::Leg;

pub struct FeasibilityIndex {
    /// (ranking EV, leg id), best first
    ranked: Vec<(f64, String)>,
    multiplier: f64,
}

impl FeasibilityIndex {
    pub fn new<'a>(pool: impl IntoIterator<Item = &'a Leg>, multiplier: f64) -> Self {
        let mut ranked: Vec<(f64, String)> = pool
            .into_iter()
            .map(|l| (l.ranking_ev(), l.id.clone()))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Self {
            ranked,
            multiplier: multiplier.max(1.0),
        }
    }

    /// Best achievable card EV for `current` completed to `picks` legs
    pub fn upper_bound(&self, current: &[&Leg], picks: usize) -> f64 {
        if picks == 0 {
            return 0.0;
        }
        let used: HashSet<&str> = current.iter().map(|l| l.id.as_str()).collect();
        let mut evs: Vec<f64> = current.iter().map(|l| l.ranking_ev()).collect();

        let remaining = picks.saturating_sub(evs.len());
        evs.extend(
            self.ranked
                .iter()
                .filter(|(_, id)| !used.contains(id.as_str()))
                .take(remaining)
                .map(|(ev, _)| *ev),
        );
        if evs.len() < picks {
            return f64::NEG_INFINITY;
        }

        evs.sort_by(|a, b| b.total_cmp(a));
        let avg = evs.iter().take(picks).sum::<f64>() / picks as f64;
        avg * self.multiplier
    }
}
