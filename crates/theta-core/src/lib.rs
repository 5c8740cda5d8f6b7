//! # theta-core
//!
//! Core crate for the theta short-straddle engine, providing:
//!
//! - **Types** (`types`): enums, order/position/fill structs, option legs
//! - **Ledger** (`ledger`): position ledger with realized/unrealized PnL
//! - **Configuration** (`config`): JSON config deserialization + validation
//! - **Error types** (`error`): domain-specific `ThetaError` via thiserror
//! - **Retry** (`retry`): the single bounded retry primitive
//! - **WebSocket** (`ws`): WS client with auto-reconnect
//! - **Time utilities** (`time_util`): timestamps, session clock, time-of-day parsing
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod retry;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use error::ThetaError;
pub use types::*;
