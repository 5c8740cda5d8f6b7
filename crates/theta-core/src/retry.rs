//! Bounded retry with fixed backoff.
//!
//! [`RetryPolicy`] is the one retry primitive in the workspace. Quote lookups
//! for order pricing and instrument resolution go through it instead of
//! hand-rolled loops at each call site.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::QuoteConfig;

/// Up to `attempts` tries with a fixed `backoff` sleep between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 5, backoff: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts: attempts.max(1), backoff }
    }

    /// A single attempt, no backoff.
    pub fn once() -> Self {
        Self { attempts: 1, backoff: Duration::ZERO }
    }

    pub fn from_config(cfg: &QuoteConfig) -> Self {
        Self::new(cfg.retry_attempts, Duration::from_millis(cfg.retry_backoff_ms))
    }

    /// Run `op` until it yields `Some`, sleeping `backoff` between attempts.
    ///
    /// Returns `None` once every attempt came back empty. `label` only
    /// prefixes the warning logs.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(v) = op().await {
                return Some(v);
            }
            if attempt < attempts {
                warn!(
                    "[retry] {label}: attempt {attempt}/{attempts} came back empty, retrying in {:?}",
                    self.backoff
                );
                tokio::time::sleep(self.backoff).await;
            }
        }
        None
    }
}
