//! Circuit breaker for the remote EV oracle
//!
//! Consecutive timeouts and consecutive rate-limit rejections are counted
//! separately. Crossing either threshold opens the circuit; any successful
//! batch closes it again.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Remote lookups allowed
    Closed,
    /// Degraded - every lookup short-circuits to a zero quote
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TripReason {
    ConsecutiveTimeouts(u32),
    ConsecutiveRateLimits(u32),
    Manual(String),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::ConsecutiveTimeouts(n) => write!(f, "{} consecutive timeouts", n),
            TripReason::ConsecutiveRateLimits(n) => write!(f, "{} consecutive 429s", n),
            TripReason::Manual(reason) => write!(f, "manual: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_timeouts: u32,
    pub consecutive_rate_limits: u32,
    pub total_trips: u64,
}

pub struct CircuitBreaker {
    timeout_threshold: u32,
    rate_limit_threshold: u32,
    open: AtomicBool,
    consecutive_timeouts: AtomicU32,
    consecutive_rate_limits: AtomicU32,
    total_trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(timeout_threshold: u32, rate_limit_threshold: u32) -> Self {
        Self {
            timeout_threshold: timeout_threshold.max(1),
            rate_limit_threshold: rate_limit_threshold.max(1),
            open: AtomicBool::new(false),
            consecutive_timeouts: AtomicU32::new(0),
            consecutive_rate_limits: AtomicU32::new(0),
            total_trips: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        if self.open.load(Ordering::SeqCst) {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn trip(&self, reason: TripReason) {
        if !self.open.swap(true, Ordering::SeqCst) {
            self.total_trips.fetch_add(1, Ordering::SeqCst);
            warn!("🚨 EV oracle degraded ({}); lookups return EV=0 until a batch succeeds", reason);
        }
    }

    pub fn record_success(&self) {
        self.consecutive_timeouts.store(0, Ordering::SeqCst);
        self.consecutive_rate_limits.store(0, Ordering::SeqCst);
        if self.open.swap(false, Ordering::SeqCst) {
            info!("🔄 EV oracle recovered from degraded mode");
        }
    }

    pub fn record_timeout(&self) {
        let n = self.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.timeout_threshold {
            self.trip(TripReason::ConsecutiveTimeouts(n));
        }
    }

    pub fn record_rate_limit(&self) {
        let n = self.consecutive_rate_limits.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.rate_limit_threshold {
            self.trip(TripReason::ConsecutiveRateLimits(n));
        }
    }

    /// Generic failures break a rate-limit streak but do not trip the circuit
    pub fn record_error(&self) {
        self.consecutive_rate_limits.store(0, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state(),
            consecutive_timeouts: self.consecutive_timeouts.load(Ordering::SeqCst),
            consecutive_rate_limits: self.consecutive_rate_limits.load(Ordering::SeqCst),
            total_trips: self.total_trips.load(Ordering::SeqCst),
        }
    }
}
