//! # theta-md
//!
//! Quote ingestion and lookup.
//!
//! ## Architecture
//!
//! ```text
//! WsConnection ──► parser ──► crossbeam bounded ──► quote worker ──► QuoteBook
//!                                                                      │
//!                                       monitor / order manager ◄──────┘ (QuoteSource)
//! ```
//!
//! The quote worker is the only writer of the [`QuoteBook`]; everything else
//! reads through the [`QuoteSource`] trait.
//!
//! ## Shared infrastructure
//!
//! - [`pipeline`]: `StreamDef` + `TickFeed` ingestion engine
//! - [`quote_worker`]: blocking loop that applies ticks to the book
//! - [`ws_helper`]: WebSocket connection helper
//! - [`json_util`]: JSON parsing helpers
//! - [`touchline`]: touchline feed format (subscribe, parse)

pub mod json_util;
pub mod pipeline;
pub mod quote_book;
pub mod quote_worker;
pub mod touchline;
pub mod ws_helper;

use anyhow::Result;
use async_trait::async_trait;
use theta_core::ThetaError;
use theta_core::retry::RetryPolicy;

pub use quote_book::{Quote, QuoteBook};

/// Latest-price lookup by symbol.
pub trait QuoteSource: Send + Sync {
    /// Last traded price, or `None` if nothing usable is known.
    fn last_price(&self, symbol: &str) -> Option<f64>;
}

/// Look up a price under `policy`, failing with
/// [`ThetaError::QuoteUnavailable`] once every attempt came back empty.
///
/// Non-finite and non-positive prices count as empty.
pub async fn fetch_price(
    source: &dyn QuoteSource,
    symbol: &str,
    policy: &RetryPolicy,
) -> Result<f64, ThetaError> {
    policy
        .run(symbol, || async move {
            source.last_price(symbol).filter(|p| p.is_finite() && *p > 0.0)
        })
        .await
        .ok_or_else(|| ThetaError::QuoteUnavailable {
            symbol: symbol.to_string(),
            attempts: policy.attempts,
        })
}

/// Trait implemented by quote feeds.
///
/// Only `Send` is required (not `Sync`) because feeds are driven
/// sequentially by the runner, never concurrently.
#[async_trait]
pub trait QuoteFeed: Send {
    fn name(&self) -> &str;
    /// Connect and begin writing quotes.
    async fn start(&mut self) -> Result<()>;
    /// Gracefully stop all connections and tasks.
    async fn stop(&mut self) -> Result<()>;
}
