//! Touchline JSON message parser.
//!
//! Routes by the `t` field:
//!
//! - `tk`: subscription acknowledgement. Carries the trading symbol (`ts`)
//!   and usually the current last price.
//! - `tf`: incremental update. Only changed fields are present, so `lp` may
//!   be missing.
//!
//! Everything else (`ck` connect acks, heartbeats, depth) yields `None`.

use theta_core::time_util;

use crate::json_util::{parse_str_f64, value_to_string};

/// One parsed touchline update.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Feed token (`tk`).
    pub token: String,
    /// Exchange segment (`e`).
    pub exchange: Option<String>,
    /// Trading symbol (`ts`), present on acknowledgements.
    pub symbol: Option<String>,
    /// Last traded price (`lp`).
    pub price: Option<f64>,
    /// Local receive time, ms since epoch.
    pub recv_ms: u64,
}

/// Parse a touchline message into a [`Tick`].
pub fn parse_message(text: &str) -> Option<Tick> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;

    match v.get("t")?.as_str()? {
        "tk" | "tf" => parse_touchline(&v),
        _ => None,
    }
}

fn parse_touchline(v: &serde_json::Value) -> Option<Tick> {
    let recv_ms = time_util::now_ms();
    let token = value_to_string(v.get("tk"))?;
    let price = parse_str_f64(v.get("lp"));
    let symbol = v.get("ts").and_then(|s| s.as_str()).map(str::to_string);

    if price.is_none() && symbol.is_none() {
        return None;
    }

    Some(Tick {
        token,
        exchange: v.get("e").and_then(|s| s.as_str()).map(str::to_string),
        symbol,
        price,
        recv_ms,
    })
}

/// Build the touchline subscription for `EXCHANGE|TOKEN` keys.
pub fn build_subscribe(keys: &[String]) -> String {
    serde_json::json!({
        "t": "t",
        "k": keys.join("#"),
    })
    .to_string()
}

/// Application heartbeat payload.
pub fn heartbeat() -> serde_json::Value {
    serde_json::json!({ "t": "h" })
}
