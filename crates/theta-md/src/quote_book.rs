//! Latest-price table shared between the quote worker and readers.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use theta_core::time_util;

use crate::QuoteSource;

/// Last observed price for a symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    /// Local receive time, ms since epoch.
    pub recv_ms: u64,
}

/// Symbol → latest quote. Cheap to clone; clones share the table.
#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    inner: Arc<RwLock<AHashMap<String, Quote>>>,
    max_age_ms: Option<u64>,
}

impl QuoteBook {
    /// Quotes older than `max_age_ms` are reported as absent.
    pub fn new(max_age_ms: Option<u64>) -> Self {
        Self { inner: Arc::default(), max_age_ms }
    }

    pub fn update(&self, symbol: &str, price: f64, recv_ms: u64) {
        let mut map = self.inner.write();
        match map.get_mut(symbol) {
            Some(q) => *q = Quote { price, recv_ms },
            None => {
                map.insert(symbol.to_string(), Quote { price, recv_ms });
            }
        }
    }

    /// Record `price` as received now.
    pub fn set(&self, symbol: &str, price: f64) {
        self.update(symbol, price, time_util::now_ms());
    }

    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.inner.read().get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn is_fresh(&self, q: &Quote, now_ms: u64) -> bool {
        match self.max_age_ms {
            Some(max) => now_ms.saturating_sub(q.recv_ms) <= max,
            None => true,
        }
    }
}

impl QuoteSource for QuoteBook {
    fn last_price(&self, symbol: &str) -> Option<f64> {
        let q = self.get(symbol)?;
        self.is_fresh(&q, time_util::now_ms()).then_some(q.price)
    }
}
