//! Per-structure attempt budgeting

/// Exact binomial coefficient, saturating at `u64::MAX`
pub fn combinations(n: usize, k: usize) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        acc = acc * (n - i) as u128 / (i + 1) as u128;
        if acc > u64::MAX as u128 {
            return u64::MAX;
        }
    }
    acc as u64
}

/// Attempts a structure may spend:
/// `min(C(pool, picks), target * attempts_per_card, floor(global * fraction))`
pub fn attempt_budget(
    pool_len: usize,
    picks: usize,
    target_cards: usize,
    attempts_per_card: usize,
    global_budget: usize,
    max_fraction: f64,
) -> usize {
    if picks == 0 || pool_len < picks || target_cards == 0 {
        return 0;
    }
    let ceiling = combinations(pool_len, picks);
    let desired = target_cards.saturating_mul(attempts_per_card) as u64;
    let fraction = if max_fraction.is_finite() {
        max_fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let global_share = (global_budget as f64 * fraction).floor() as u64;

    ceiling.min(desired).min(global_share) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binomial_coefficients() {
        assert_eq!(combinations(5, 0), 1);
        assert_eq!(combinations(5, 2), 10);
        assert_eq!(combinations(30, 6), 593_775);
        assert_eq!(combinations(3, 5), 0);
        assert_eq!(combinations(200, 100), u64::MAX);
    }

    #[test]
    fn budget_takes_the_tightest_bound() {
        // target bound: 8 * 25 = 200
        assert_eq!(attempt_budget(30, 5, 8, 25, 3000, 0.4), 200);
        // global share bound: floor(3000 * 0.04) = 120
        assert_eq!(attempt_budget(30, 5, 8, 25, 3000, 0.04), 120);
        // combinatorial bound: C(6, 5) = 6
        assert_eq!(attempt_budget(6, 5, 8, 25, 3000, 0.4), 6);
    }

    #[test]
    fn zero_budget_cases() {
        assert_eq!(attempt_budget(4, 5, 8, 25, 3000, 0.4), 0);
        assert_eq!(attempt_budget(30, 5, 0, 25, 3000, 0.4), 0);
        assert_eq!(attempt_budget(30, 5, 3, 25, 3000, f64::NAN), 0);
    }
}
