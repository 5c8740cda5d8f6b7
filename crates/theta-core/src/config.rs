//! Configuration parsing for the theta engine.
//!
//! All components read their settings from a single JSON config file, loaded
//! once at startup. There is no reconfiguration mid-session.
//!
//! # Example config
//!
//! ```json
//! {
//!   "Theta": { "module_name": "theta", "log_path": "/tmp/log" },
//!   "strategy": {
//!     "lots": 1,
//!     "stop_loss_percentage": 10,
//!     "start_time": "09:20:00",
//!     "end_time": "15:15:00",
//!     "instruments": {
//!       "mode": "static",
//!       "legs": [
//!         { "symbol": "NIFTY25JAN22150CE", "option_type": "CE", "lot_size": 75 },
//!         { "symbol": "NIFTY25JAN22150PE", "option_type": "PE", "lot_size": 75 }
//!       ]
//!     }
//!   },
//!   "quotes": { "retry_attempts": 5, "retry_backoff_ms": 1000 },
//!   "margin": { "mode": "fixed", "trade_margin": 150000 }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveTime;
use serde::Deserialize;

use crate::error::ThetaError;
use crate::time_util::parse_time_of_day;
use crate::types::{OptionLeg, OptionType};

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    #[serde(rename = "Theta", default)]
    pub meta: Option<ModuleMeta>,

    pub strategy: StrategyConfig,

    #[serde(default)]
    pub quotes: QuoteConfig,

    /// Live quote feed. Without it, quotes must be supplied some other way.
    #[serde(default)]
    pub feed: Option<FeedConfig>,

    pub margin: MarginConfig,

    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,

    /// File-backed order records. In-memory when absent.
    #[serde(default)]
    pub order_store: Option<OrderStoreConfig>,
}

impl AppConfig {
    /// Returns the module name, defaulting to `"theta"`.
    pub fn module_name(&self) -> String {
        self.meta.as_ref().and_then(|m| m.module_name.clone()).unwrap_or_else(|| "theta".into())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.meta.as_ref().and_then(|m| m.log_path.clone())
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ThetaError> {
        let s = &self.strategy;
        if s.lots == 0 {
            return Err(ThetaError::Config("strategy.lots must be > 0".into()));
        }
        if !(s.stop_loss_percentage > 0.0 && s.stop_loss_percentage.is_finite()) {
            return Err(ThetaError::Config("strategy.stop_loss_percentage must be > 0".into()));
        }
        if s.poll_interval_ms == 0 {
            return Err(ThetaError::Config("strategy.poll_interval_ms must be > 0".into()));
        }
        s.end_time()?;
        s.start_time()?;

        match &s.instruments {
            InstrumentConfig::Static { legs } => {
                if legs.is_empty() {
                    return Err(ThetaError::Config("strategy.instruments.legs is empty".into()));
                }
                if legs.iter().any(|l| l.lot_size == 0) {
                    return Err(ThetaError::Config("leg lot_size must be > 0".into()));
                }
            }
            InstrumentConfig::Atm { strike_step, chain, .. } => {
                if *strike_step <= 0.0 {
                    return Err(ThetaError::Config("strategy.instruments.strike_step must be > 0".into()));
                }
                if chain.is_empty() {
                    return Err(ThetaError::Config("strategy.instruments.chain is empty".into()));
                }
            }
        }

        if let MarginConfig::Fixed { trade_margin } = self.margin {
            if trade_margin < 0.0 {
                return Err(ThetaError::Config("margin.trade_margin must be >= 0".into()));
            }
        }
        if let Some(feed) = &self.feed {
            if feed.url.is_empty() {
                return Err(ThetaError::Config("feed.url is empty".into()));
            }
        }
        Ok(())
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Short-straddle session settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Number of lots sold per leg.
    pub lots: u32,

    /// Stop distance from entry, in percent (`10` = 10%).
    pub stop_loss_percentage: f64,

    /// Local time to start the session (`HH:MM:SS`). Starts immediately when absent.
    #[serde(default)]
    pub start_time: Option<String>,

    /// Local time at which everything still open is liquidated.
    pub end_time: String,

    /// Evaluation cadence of the active loop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Decimal places stop triggers are rounded to.
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,

    /// Liquidate open legs when the process is asked to shut down.
    #[serde(default = "default_true")]
    pub liquidate_on_shutdown: bool,

    pub instruments: InstrumentConfig,
}

impl StrategyConfig {
    /// Stop distance as a fraction (`0.1` for 10%).
    pub fn stop_loss_fraction(&self) -> f64 {
        self.stop_loss_percentage / 100.0
    }

    pub fn end_time(&self) -> Result<NaiveTime, ThetaError> {
        parse_time_of_day(&self.end_time)
    }

    pub fn start_time(&self) -> Result<Option<NaiveTime>, ThetaError> {
        self.start_time.as_deref().map(parse_time_of_day).transpose()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How the straddle's legs are chosen.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum InstrumentConfig {
    /// Explicit legs.
    Static { legs: Vec<OptionLeg> },
    /// Pick the call/put around the underlying's at-the-money strike.
    Atm {
        /// Quote symbol of the underlying (future or index).
        underlying: String,
        strike_step: f64,
        #[serde(default)]
        otm_points: f64,
        #[serde(default)]
        bias_points: f64,
        /// Candidate contracts to choose from.
        chain: Vec<OptionLeg>,
    },
}

impl InstrumentConfig {
    /// Every leg the session could trade (for feed subscriptions).
    pub fn candidate_legs(&self) -> &[OptionLeg] {
        match self {
            Self::Static { legs } => legs,
            Self::Atm { chain, .. } => chain,
        }
    }

    /// Legs of one option type among the candidates.
    pub fn legs_of(&self, option_type: OptionType) -> impl Iterator<Item = &OptionLeg> {
        self.candidate_legs().iter().filter(move |l| l.option_type == option_type)
    }
}

// ---------------------------------------------------------------------------
// Quotes & feed
// ---------------------------------------------------------------------------

/// Quote lookup policy.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Quotes older than this are treated as absent.
    #[serde(default)]
    pub max_age_ms: Option<u64>,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_age_ms: None,
        }
    }
}

/// Touchline WebSocket feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,

    /// Messages sent right after each connect, before subscribing (e.g. session auth).
    #[serde(default)]
    pub init_messages: Vec<String>,

    /// Extra `EXCHANGE|TOKEN` keys to subscribe besides the legs (e.g. the underlying).
    #[serde(default)]
    pub subscribe: Vec<String>,

    /// Ping interval in seconds (application-level keep-alive).
    #[serde(default)]
    pub ping_interval_sec: Option<u64>,

    /// Capacity of the ingestion → quote-worker channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Extra HTTP headers for the WebSocket handshake.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Margin, telemetry, order store
// ---------------------------------------------------------------------------

/// Where the trade margin comes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum MarginConfig {
    /// A configured figure.
    Fixed { trade_margin: f64 },
    /// Broker SPAN calculator.
    Span {
        url: String,
        user: String,
        account_id: String,
        /// Environment variable holding the session token.
        token_env: String,
        #[serde(default = "default_product")]
        product: String,
        /// Safety multiplier applied to the returned margin.
        #[serde(default = "default_margin_buffer")]
        buffer: f64,
    },
}

/// Telemetry sink selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "sink", rename_all = "lowercase")]
pub enum TelemetryConfig {
    Log,
    Jsonl {
        path: String,
    },
    Influx {
        url: String,
        org: String,
        bucket: String,
        token_env: String,
        #[serde(default)]
        measurement_prefix: Option<String>,
    },
}

/// File-backed order records.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderStoreConfig {
    pub dir: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_price_decimals() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_channel_capacity() -> usize {
    8192
}

fn default_product() -> String {
    "I".into()
}

fn default_margin_buffer() -> f64 {
    1.009
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate a JSON config document.
pub fn parse_config(content: &str) -> Result<AppConfig, ThetaError> {
    let config: AppConfig =
        serde_json::from_str(content).map_err(|e| ThetaError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
