//! Error taxonomy for input defects
//!
//! Only upstream defects (bad probabilities, malformed ladders) are errors.
//! Structural and economic rejections are reported as reason codes instead.

use thiserror::Error;

use crate::payout::StructureId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("probability {value} at position {index} is outside [0, 1]")]
    InvalidProbability { index: usize, value: f64 },

    #[error("leg {leg_id} is invalid: {reason}")]
    InvalidLeg { leg_id: String, reason: String },

    #[error("negative probability mass {mass} at {hits} hits")]
    NegativeMass { hits: usize, mass: f64 },

    #[error("hit distribution sums to {total}, expected 1")]
    NotNormalized { total: f64 },

    #[error("malformed payout ladder {structure}: {reason}")]
    MalformedLadder { structure: String, reason: String },

    #[error("unknown structure {0}")]
    UnknownStructure(StructureId),

    #[error("failed to parse payout table: {0}")]
    PayoutParse(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
