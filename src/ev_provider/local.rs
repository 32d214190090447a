//! Local closed-form EV strategy

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{EvQuote, PricedEv, ProbabilityKey, ProviderStats, QuoteSource};
use crate::error::CoreResult;
use crate::payout::{binomial_distribution, ev_from_distribution, PayoutTable, StructureId};

/// Prices the homogeneous binomial model directly. No I/O, always available.
pub struct LocalEvProvider {
    table: Arc<PayoutTable>,
    memo: Mutex<HashMap<(StructureId, ProbabilityKey), EvQuote>>,
    requests: AtomicU64,
    hits: AtomicU64,
}

impl LocalEvProvider {
    pub fn new(table: Arc<PayoutTable>) -> Self {
        Self {
            table,
            memo: Mutex::new(HashMap::new()),
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn quote(&self, structure: &StructureId, key: ProbabilityKey) -> CoreResult<EvQuote> {
        let ladder = self.table.get(structure)?;
        let dist = binomial_distribution(ladder.picks, key.probability())?;
        let ev = ev_from_distribution(&dist, ladder, 1.0).ev;
        Ok(EvQuote { ev, roi: ev })
    }

    pub fn get_ev(&self, structure: &StructureId, key: ProbabilityKey) -> CoreResult<PricedEv> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let memo_key = (structure.clone(), key);

        if let Ok(memo) = self.memo.lock() {
            if let Some(quote) = memo.get(&memo_key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(PricedEv::new(*quote, QuoteSource::CacheHit));
            }
        }

        let quote = self.quote(structure, key)?;
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(memo_key, quote);
        }
        Ok(PricedEv::new(quote, QuoteSource::Local))
    }

    pub fn stats(&self) -> ProviderStats {
        let unique_keys = match self.memo.lock() {
            Ok(memo) => memo.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        ProviderStats {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.hits.load(Ordering::Relaxed),
            unique_keys: unique_keys as u64,
            ..Default::default()
        }
    }
}
