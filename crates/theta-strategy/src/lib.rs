//! # theta-strategy
//!
//! The short-straddle session: leg selection, margin, telemetry, and the
//! risk monitor that drives SETUP → ACTIVE → CLOSING → DONE.

pub mod instruments;
pub mod margin;
pub mod monitor;
pub mod telemetry;

pub use instruments::{AtmChainResolver, InstrumentResolver, StaticLegs};
pub use margin::{FixedMargin, MarginSource, SpanMarginClient};
pub use monitor::{ExitReason, MonitorConfig, Phase, SessionSummary, StopRecord, StraddleMonitor};
pub use telemetry::{JsonlSink, LogSink, NullSink, TelemetrySink};
