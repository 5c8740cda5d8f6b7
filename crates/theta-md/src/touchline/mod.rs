//! Touchline feed: stream definition.
//!
//! Produces one [`StreamDef`] subscribing the legs' `EXCHANGE|TOKEN` keys
//! plus any extra keys from the feed config.

pub mod json_parser;

use std::time::Duration;

use ahash::AHashMap;
use anyhow::{Result, bail};
use theta_core::config::FeedConfig;
use theta_core::types::OptionLeg;
use theta_core::ws::PingPayload;

use crate::pipeline::{PingConfig, StreamDef};

/// Build the touchline stream definition for `legs`.
pub fn build(cfg: &FeedConfig, legs: &[OptionLeg]) -> Result<Vec<StreamDef>> {
    let mut keys: Vec<String> = legs.iter().filter_map(OptionLeg::feed_key).collect();
    for k in &cfg.subscribe {
        if !keys.contains(k) {
            keys.push(k.clone());
        }
    }
    if keys.is_empty() {
        bail!("touchline feed has nothing to subscribe (legs need exchange and token)");
    }

    // Acks carry `ts` as well, this only covers ticks that arrive before them.
    let token_symbols: AHashMap<String, String> = legs
        .iter()
        .filter_map(|l| l.token.clone().map(|t| (t, l.symbol.clone())))
        .collect();

    let ping = cfg.ping_interval_sec.map(|secs| PingConfig {
        interval: Duration::from_secs(secs),
        payload: PingPayload::Json(json_parser::heartbeat()),
    });

    Ok(vec![StreamDef {
        label: "touchline".into(),
        ws_url: cfg.url.clone(),
        init_msgs: cfg.init_messages.clone(),
        subscribe_msg: json_parser::build_subscribe(&keys),
        ping,
        extra_headers: cfg.extra_headers.clone(),
        channel_capacity: cfg.channel_capacity,
        token_symbols,
        text_parser: Box::new(|data| json_parser::parse_message(data).into_iter().collect()),
    }])
}
