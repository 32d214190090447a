//! Pricing a hit distribution against a payout ladder

use serde::{Deserialize, Serialize};

use super::distribution::{binomial_distribution, HitDistribution};
use super::PayoutLadder;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardEvQuote {
    /// Expected net profit per unit staked
    pub ev: f64,
    pub expected_return: f64,
    /// P(return > stake)
    pub win_prob_cash: f64,
    /// P(any nonzero return)
    pub win_prob_any: f64,
}

/// Price `dist` against `ladder` for a positive `stake`.
///
/// Hit counts without a tier pay zero.
pub fn ev_from_distribution(
    dist: &HitDistribution,
    ladder: &PayoutLadder,
    stake: f64,
) -> CardEvQuote {
    let mut expected_return = 0.0;
    let mut win_prob_cash = 0.0;
    let mut win_prob_any = 0.0;

    for (hits, p) in dist.iter() {
        let mult = ladder.multiplier(hits);
        expected_return += p * mult * stake;
        if mult > 1.0 {
            win_prob_cash += p;
        }
        if mult > 0.0 {
            win_prob_any += p;
        }
    }

    CardEvQuote {
        ev: expected_return / stake - 1.0,
        expected_return,
        win_prob_cash,
        win_prob_any,
    }
}

/// Per-leg probability at which `ladder` has zero EV under the homogeneous model.
///
/// Returns `None` for ladders that cannot break even at any probability.
pub fn breakeven_probability(ladder: &PayoutLadder) -> Option<f64> {
    let ev_at = |p: f64| -> Option<f64> {
        binomial_distribution(ladder.picks, p)
            .ok()
            .map(|d| ev_from_distribution(&d, ladder, 1.0).ev)
    };

    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    let ev_lo = ev_at(lo)?;
    let ev_hi = ev_at(hi)?;
    if ev_hi <= 0.0 || ev_lo >= 0.0 {
        return None;
    }

    for _ in 0..200 {
        if hi - lo < 1e-12 {
            break;
        }
        let mid = 0.5 * (lo + hi);
        if ev_at(mid)? < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(0.5 * (lo + hi))
}
