//! WebSocket connection helper for quote streams.

use std::{collections::HashMap, sync::Arc};

use crossbeam_channel::Sender;
use theta_core::ws::client::{OnMessageCallback, WsConnConfig, WsConnection};
use tokio::sync::watch;
use tracing::warn;

use crate::pipeline::PingConfig;
use crate::touchline::json_parser::Tick;

/// Parameters for a text-mode WebSocket quote stream.
pub struct TextStreamParams<F> {
    pub url: String,
    pub init_msgs: Vec<String>,
    pub subscribe_msg: String,
    pub extra_headers: HashMap<String, String>,
    pub ping: Option<PingConfig>,
    pub tx: Sender<Tick>,
    pub parser: F,
    pub label: String,
}

/// Run a text-mode WebSocket connection that parses messages and forwards
/// them to the quote worker until `shutdown` flips.
pub async fn run_ws_text_stream<F>(params: TextStreamParams<F>, mut shutdown: watch::Receiver<bool>)
where
    F: Fn(&str) -> Vec<Tick> + Send + Sync + 'static,
{
    let TextStreamParams { url, init_msgs, subscribe_msg, extra_headers, ping, tx, parser, label } =
        params;

    let on_msg: OnMessageCallback = Arc::new(move |_conn_id, text| {
        for tick in parser(text) {
            if tx.try_send(tick).is_err() {
                warn!("[{label}] quote channel full");
            }
        }
    });

    let config = WsConnConfig {
        url,
        init_msgs,
        subscribe_msg: Some(subscribe_msg),
        extra_headers,
        ping_interval: ping.as_ref().map(|p| p.interval),
        ping_payload: ping.map(|p| p.payload),
        id: 0,
    };

    let mut conn = WsConnection::new(config);
    conn.start(on_msg);
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
    conn.stop().await;
}
