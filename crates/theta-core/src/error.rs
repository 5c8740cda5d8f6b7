//! Typed error definitions for the theta engine.
//!
//! Provides [`ThetaError`] for the failure modes the engine distinguishes
//! between. All variants implement `std::error::Error` via `thiserror`, so they
//! integrate seamlessly with `anyhow::Result` at the process edges.

use thiserror::Error;

/// Domain-specific errors for the theta engine.
#[derive(Debug, Error)]
pub enum ThetaError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// No usable price for a symbol after the retry policy was exhausted.
    #[error("quote unavailable for {symbol} after {attempts} attempt(s)")]
    QuoteUnavailable { symbol: String, attempts: u32 },

    /// An order could not be placed (missing price, broker rejection, ...).
    #[error("order placement failed for {symbol}: {reason}")]
    OrderPlacementFailed { symbol: String, reason: String },

    /// Close (or mark) requested for a symbol with no ledger entry.
    #[error("inconsistent close request: no open position for {symbol}")]
    InconsistentCloseRequest { symbol: String },

    /// The external margin figure could not be resolved.
    #[error("margin resolution failed: {0}")]
    MarginResolutionFailed(String),

    /// Adding on the opposite side of an open position without netting to zero.
    #[error("opposite-side add rejected for {symbol}: held {held}, delta {delta}")]
    OppositeSideAdd { symbol: String, held: i64, delta: i64 },

    /// Zero quantity handed to the ledger.
    #[error("invalid zero quantity for {symbol}")]
    InvalidQuantity { symbol: String },

    /// Option legs could not be resolved.
    #[error("instrument resolution failed: {0}")]
    InstrumentResolution(String),

    /// Durable order-record store failure.
    #[error("order store error: {0}")]
    OrderStore(String),

    /// WebSocket connection, handshake, or communication error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Market data or broker response parsing error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl ThetaError {
    /// Whether the condition is absorbed locally (logged) rather than
    /// aborting the current phase.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::QuoteUnavailable { .. } | Self::InconsistentCloseRequest { .. }
        )
    }
}
