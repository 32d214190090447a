//! Remote EV strategy - cache, pending batch, bounded wait, circuit breaker
//!
//! Concurrency model:
//! - `state` (std mutex, never held across an await) owns the cache and the
//!   pending/in-flight key sets, so a key is requested at most once at a time
//! - `flush_lock` (tokio mutex) serializes remote round trips; callers that
//!   fill a batch hand it to a spawned task and never hold this lock
//! - `resolved` wakes every waiter after each flush so they re-check the cache

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::breaker::{BreakerSnapshot, CircuitBreaker, TripReason};
use super::oracle::{EvOracle, OracleError};
use super::{
    EvQuote, FlushOutcome, FlushReport, PricedEv, ProbabilityKey, ProviderStats, QuoteSource,
};
use crate::payout::StructureId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Batch pricing endpoint
    pub endpoint: String,
    /// Pending keys that trigger a flush
    pub batch_size: usize,
    /// Longest a caller waits for its key before getting EV=0
    pub wait_timeout_ms: u64,
    /// Upper bound on one remote round trip
    pub request_timeout_ms: u64,
    pub max_consecutive_timeouts: u32,
    pub max_consecutive_rate_limits: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787/ev/batch".to_string(),
            batch_size: 3,
            wait_timeout_ms: 3000,
            request_timeout_ms: 3000,
            max_consecutive_timeouts: 25,
            max_consecutive_rate_limits: 10,
        }
    }
}

#[derive(Default)]
struct RemoteState {
    cache: HashMap<ProbabilityKey, HashMap<StructureId, EvQuote>>,
    pending: BTreeSet<ProbabilityKey>,
    in_flight: HashSet<ProbabilityKey>,
}

impl RemoteState {
    /// Resolved keys missing a structure price that structure at zero
    fn quote(&self, key: ProbabilityKey, structure: &StructureId) -> Option<EvQuote> {
        self.cache
            .get(&key)
            .map(|quotes| quotes.get(structure).copied().unwrap_or(EvQuote::ZERO))
    }

    fn requeue(&mut self, keys: &[ProbabilityKey]) {
        for key in keys {
            self.in_flight.remove(key);
            self.pending.insert(*key);
        }
    }
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    unique_keys: AtomicU64,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    rate_limited: AtomicU64,
    timeouts: AtomicU64,
    fallbacks: AtomicU64,
}

enum Lookup {
    Hit(EvQuote),
    Queued { flush: bool },
}

struct Shared {
    oracle: Arc<dyn EvOracle>,
    config: RemoteConfig,
    state: Mutex<RemoteState>,
    flush_lock: tokio::sync::Mutex<()>,
    /// Set while a threshold flush task is queued on `flush_lock`
    flush_scheduled: AtomicBool,
    resolved: Notify,
    breaker: CircuitBreaker,
    counters: Counters,
}

pub struct RemoteEvProvider {
    shared: Arc<Shared>,
}

impl RemoteEvProvider {
    pub fn new(oracle: Arc<dyn EvOracle>, config: RemoteConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.max_consecutive_timeouts,
            config.max_consecutive_rate_limits,
        );
        Self {
            shared: Arc::new(Shared {
                oracle,
                config,
                state: Mutex::new(RemoteState::default()),
                flush_lock: tokio::sync::Mutex::new(()),
                flush_scheduled: AtomicBool::new(false),
                resolved: Notify::new(),
                breaker,
                counters: Counters::default(),
            }),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_degraded(&self) -> bool {
        self.shared.breaker.is_open()
    }

    /// Open the circuit without waiting for failures to accumulate
    pub fn force_degraded(&self, reason: &str) {
        self.shared.breaker.trip(TripReason::Manual(reason.to_string()));
        self.shared.resolved.notify_waiters();
    }

    pub fn breaker(&self) -> BreakerSnapshot {
        self.shared.breaker.snapshot()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Cached quote, or wait for the batch holding `key`.
    ///
    /// The caller never runs a round trip itself: a full batch is handed to a
    /// background flush task, and the wait is bounded by `wait_timeout_ms`
    /// from the moment of the call.
    pub async fn get_ev(&self, structure: &StructureId, key: ProbabilityKey) -> PricedEv {
        let deadline = Instant::now() + Duration::from_millis(self.shared.config.wait_timeout_ms);
        let shared = &self.shared;
        Self::bump(&shared.counters.requests);

        if shared.breaker.is_open() {
            Self::bump(&shared.counters.fallbacks);
            return PricedEv::fallback(QuoteSource::DegradedFallback);
        }

        let lookup = {
            let mut st = shared.state();
            match st.quote(key, structure) {
                Some(quote) => Lookup::Hit(quote),
                None => {
                    if !st.pending.contains(&key) && !st.in_flight.contains(&key) {
                        st.pending.insert(key);
                        Self::bump(&shared.counters.unique_keys);
                    }
                    Lookup::Queued {
                        flush: st.pending.len() >= shared.config.batch_size.max(1),
                    }
                }
            }
        };

        match lookup {
            Lookup::Hit(quote) => {
                Self::bump(&shared.counters.cache_hits);
                PricedEv::new(quote, QuoteSource::CacheHit)
            }
            Lookup::Queued { flush } => {
                if flush {
                    self.schedule_flush();
                }
                self.wait_for(structure, key, deadline).await
            }
        }
    }

    /// At most one threshold flush waits on `flush_lock` at a time
    fn schedule_flush(&self) {
        if self.shared.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let _guard = shared.flush_lock.lock().await;
            shared.flush_scheduled.store(false, Ordering::Release);
            shared.flush_locked().await;
        });
    }

    async fn wait_for(
        &self,
        structure: &StructureId,
        key: ProbabilityKey,
        deadline: Instant,
    ) -> PricedEv {
        let shared = &self.shared;
        loop {
            let notified = shared.resolved.notified();
            tokio::pin!(notified);
            // Register before checking so a flush between check and await is not missed
            notified.as_mut().enable();

            if let Some(quote) = shared.cached(key, structure) {
                return PricedEv::new(quote, QuoteSource::Batched);
            }
            if shared.breaker.is_open() {
                Self::bump(&shared.counters.fallbacks);
                return PricedEv::fallback(QuoteSource::DegradedFallback);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        // The key stays pending (or in flight) for the next batch
        Self::bump(&shared.counters.timeouts);
        warn!(
            "EV timeout for p={} after {}ms, treating as EV=0",
            key, shared.config.wait_timeout_ms
        );
        shared.breaker.record_timeout();
        Self::bump(&shared.counters.fallbacks);
        PricedEv::fallback(QuoteSource::TimeoutFallback)
    }

    /// Send every pending key in one request. Serialized across callers.
    ///
    /// An explicit flush is also the recovery probe while degraded.
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.shared.flush_lock.lock().await;
        self.shared.flush_locked().await
    }

    pub fn stats(&self) -> ProviderStats {
        let c = &self.shared.counters;
        ProviderStats {
            requests: c.requests.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            unique_keys: c.unique_keys.load(Ordering::Relaxed),
            batches_sent: c.batches_sent.load(Ordering::Relaxed),
            batches_failed: c.batches_failed.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            degraded: self.shared.breaker.is_open(),
        }
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RemoteState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cached(&self, key: ProbabilityKey, structure: &StructureId) -> Option<EvQuote> {
        self.state().quote(key, structure)
    }

    /// One round trip. Caller holds `flush_lock`.
    async fn flush_locked(&self) -> FlushReport {
        let keys: Vec<ProbabilityKey> = {
            let mut st = self.state();
            let pending = std::mem::take(&mut st.pending);
            let keys: Vec<_> = pending
                .into_iter()
                .filter(|k| !st.cache.contains_key(k))
                .collect();
            st.in_flight.extend(keys.iter().copied());
            keys
        };

        if keys.is_empty() {
            return FlushReport::empty();
        }

        RemoteEvProvider::bump(&self.counters.batches_sent);
        info!("📤 Sending EV batch with {} probability keys", keys.len());

        let request_timeout = Duration::from_millis(self.config.request_timeout_ms);
        let request = self.oracle.price_batch(keys.clone());
        let result = match tokio::time::timeout(request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout),
        };

        let outcome = match result {
            Ok(mut batch) => {
                {
                    let mut st = self.state();
                    for key in &keys {
                        st.in_flight.remove(key);
                        let quotes = batch.remove(key).unwrap_or_default();
                        st.cache.insert(*key, quotes);
                    }
                }
                self.breaker.record_success();
                debug!("EV batch resolved {} keys", keys.len());
                FlushOutcome::Success
            }
            Err(OracleError::Timeout) => {
                RemoteEvProvider::bump(&self.counters.batches_failed);
                self.state().requeue(&keys);
                self.breaker.record_timeout();
                warn!("EV batch timed out; {} keys re-queued", keys.len());
                FlushOutcome::Timeout
            }
            Err(OracleError::RateLimited) => {
                RemoteEvProvider::bump(&self.counters.batches_failed);
                RemoteEvProvider::bump(&self.counters.rate_limited);
                self.state().requeue(&keys);
                self.breaker.record_rate_limit();
                warn!("EV batch rate limited (429); {} keys re-queued", keys.len());
                FlushOutcome::RateLimited
            }
            Err(e) => {
                RemoteEvProvider::bump(&self.counters.batches_failed);
                {
                    let mut st = self.state();
                    for key in &keys {
                        st.in_flight.remove(key);
                        st.cache.insert(*key, HashMap::new());
                    }
                }
                self.breaker.record_error();
                warn!("EV batch failed ({}); {} keys priced at EV=0", e, keys.len());
                FlushOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        self.resolved.notify_waiters();
        FlushReport {
            keys_sent: keys.len(),
            outcome,
        }
    }
}
