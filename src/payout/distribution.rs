//! Hit-count distributions
//!
//! Exact distributions come from convolving heterogeneous leg probabilities.
//! The binomial path serves the homogeneous approximation used for cache keys.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Allowed drift of the total mass away from 1 before it counts as a defect
pub const MASS_TOLERANCE: f64 = 1e-9;

/// Probability mass indexed by number of hits, `0..=n`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitDistribution {
    mass: Vec<f64>,
}

impl HitDistribution {
    /// Validate and renormalize a raw mass vector.
    ///
    /// Negative entries are never clamped; they indicate a defect upstream.
    pub fn from_masses(mass: Vec<f64>) -> CoreResult<Self> {
        if mass.is_empty() {
            return Err(CoreError::NotNormalized { total: 0.0 });
        }
        for (hits, &m) in mass.iter().enumerate() {
            if m.is_nan() || m < 0.0 {
                return Err(CoreError::NegativeMass { hits, mass: m });
            }
        }
        let total: f64 = mass.iter().sum();
        if !total.is_finite() || (total - 1.0).abs() > MASS_TOLERANCE {
            return Err(CoreError::NotNormalized { total });
        }
        let mass = mass.into_iter().map(|m| m / total).collect();
        Ok(Self { mass })
    }

    /// Number of legs the distribution covers
    pub fn legs(&self) -> usize {
        self.mass.len() - 1
    }

    pub fn prob(&self, hits: usize) -> f64 {
        self.mass.get(hits).copied().unwrap_or(0.0)
    }

    pub fn masses(&self) -> &[f64] {
        &self.mass
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.mass.iter().copied().enumerate()
    }

    pub fn total(&self) -> f64 {
        self.mass.iter().sum()
    }

    pub fn expected_hits(&self) -> f64 {
        self.iter().map(|(k, p)| k as f64 * p).sum()
    }
}

/// Exact distribution of hits across independent legs. O(n^2).
pub fn hit_distribution(probs: &[f64]) -> CoreResult<HitDistribution> {
    let mut mass = Vec::with_capacity(probs.len() + 1);
    mass.push(1.0);

    for (index, &p) in probs.iter().enumerate() {
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(CoreError::InvalidProbability { index, value: p });
        }
        let q = 1.0 - p;
        let mut next = vec![0.0; mass.len() + 1];
        for (k, &m) in mass.iter().enumerate() {
            next[k] += m * q;
            next[k + 1] += m * p;
        }
        mass = next;
    }

    HitDistribution::from_masses(mass)
}

/// `P(X = k)` for `X ~ Bin(n, p)`. Out-of-range `k` has zero mass.
pub fn binomial_pmf(k: usize, n: usize, p: f64) -> f64 {
    if k > n {
        return 0.0;
    }
    let mut coeff = 1.0;
    for i in 0..k {
        coeff = coeff * (n - i) as f64 / (i + 1) as f64;
    }
    coeff * p.powi(k as i32) * (1.0 - p).powi((n - k) as i32)
}

/// Homogeneous approximation: every leg hits with the same `p`
pub fn binomial_distribution(n: usize, p: f64) -> CoreResult<HitDistribution> {
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(CoreError::InvalidProbability { index: 0, value: p });
    }
    HitDistribution::from_masses((0..=n).map(|k| binomial_pmf(k, n, p)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_normalized(dist: &HitDistribution) {
        assert!(
            (dist.total() - 1.0).abs() <= MASS_TOLERANCE,
            "mass sums to {}",
            dist.total()
        );
        assert!(dist.masses().iter().all(|&m| m >= 0.0));
    }

    #[test]
    fn empty_card_is_certain_zero_hits() {
        let dist = hit_distribution(&[]).unwrap();
        assert_eq!(dist.legs(), 0);
        assert_eq!(dist.prob(0), 1.0);
    }

    #[test]
    fn two_legs_match_hand_computation() {
        let dist = hit_distribution(&[0.6, 0.7]).unwrap();
        assert!((dist.prob(0) - 0.12).abs() < 1e-12);
        assert!((dist.prob(1) - 0.46).abs() < 1e-12);
        assert!((dist.prob(2) - 0.42).abs() < 1e-12);
    }

    #[test]
    fn heterogeneous_vectors_stay_normalized() {
        let vectors: [&[f64]; 4] = [
            &[0.51, 0.99, 0.01, 0.73, 0.5],
            &[0.0, 1.0, 0.5],
            &[0.55; 8],
            &[0.612, 0.587, 0.644, 0.533, 0.701, 0.568],
        ];
        for probs in vectors {
            let dist = hit_distribution(probs).unwrap();
            assert_eq!(dist.legs(), probs.len());
            assert_normalized(&dist);
            let mean: f64 = probs.iter().sum();
            assert!((dist.expected_hits() - mean).abs() < 1e-9);
        }
    }

    #[test]
    fn homogeneous_exact_matches_binomial() {
        let exact = hit_distribution(&[0.6; 5]).unwrap();
        let approx = binomial_distribution(5, 0.6).unwrap();
        for k in 0..=5 {
            assert!((exact.prob(k) - approx.prob(k)).abs() < 1e-12);
        }
    }

    #[test]
    fn binomial_pmf_edges() {
        assert_eq!(binomial_pmf(6, 5, 0.5), 0.0);
        assert_eq!(binomial_pmf(0, 4, 0.0), 1.0);
        assert_eq!(binomial_pmf(4, 4, 1.0), 1.0);
        assert!((binomial_pmf(2, 4, 0.5) - 0.375).abs() < 1e-12);
    }

    #[test]
    fn invalid_probability_fails_loudly() {
        let err = hit_distribution(&[0.5, 1.2]).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidProbability {
                index: 1,
                value: 1.2
            }
        );
        assert!(hit_distribution(&[f64::NAN]).is_err());
        assert!(binomial_distribution(3, -0.1).is_err());
    }

    #[test]
    fn negative_mass_is_never_clamped() {
        let err = HitDistribution::from_masses(vec![0.6, -0.1, 0.5]).unwrap_err();
        assert!(matches!(err, CoreError::NegativeMass { hits: 1, .. }));
        assert!(matches!(
            HitDistribution::from_masses(vec![0.4, 0.4]),
            Err(CoreError::NotNormalized { .. })
        ));
    }
}
