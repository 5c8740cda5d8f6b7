//! Quote ingestion engine.
//!
//! Provides [`TickFeed`], a data-driven implementation of [`QuoteFeed`].
//! A feed format only has to describe its streams as [`StreamDef`]s; the
//! engine handles channel wiring, the quote worker and WebSocket connections.
//!
//! # Architecture
//!
//! ```text
//! StreamDef ──► TickFeed.start() ──► [channel + quote worker + WS task] per stream
//!          ──► TickFeed.stop()  ──► shutdown WS tasks, worker drains and exits
//! ```

use std::collections::HashMap;
use std::time::Duration;

use ahash::AHashMap;
use anyhow::Result;
use async_trait::async_trait;
use theta_core::ws::PingPayload;
use tokio::sync::watch;
use tracing::info;

use crate::quote_book::QuoteBook;
use crate::touchline::json_parser::Tick;
use crate::{QuoteFeed, quote_worker, ws_helper};

// ---------------------------------------------------------------------------
// StreamDef
// ---------------------------------------------------------------------------

/// A text message parser: `raw_json -> Vec<Tick>`.
pub type TextParser = Box<dyn Fn(&str) -> Vec<Tick> + Send + Sync>;

/// Ping / keep-alive configuration for a WebSocket connection.
#[derive(Debug, Clone)]
pub struct PingConfig {
    pub interval: Duration,
    pub payload: PingPayload,
}

/// Everything needed to set up one WS-to-book pipeline.
pub struct StreamDef {
    /// Human-readable label (e.g. `"touchline"`).
    pub label: String,
    pub ws_url: String,
    /// Sent after every connect, before the subscription.
    pub init_msgs: Vec<String>,
    pub subscribe_msg: String,
    pub ping: Option<PingConfig>,
    /// Extra HTTP headers for the WS handshake.
    pub extra_headers: HashMap<String, String>,
    /// Capacity of the WS → worker channel.
    pub channel_capacity: usize,
    /// Initial token → symbol map for the worker.
    pub token_symbols: AHashMap<String, String>,
    pub text_parser: TextParser,
}

// ---------------------------------------------------------------------------
// TickFeed
// ---------------------------------------------------------------------------

/// Quote feed driven by [`StreamDef`] descriptors, writing into one
/// [`QuoteBook`].
pub struct TickFeed {
    name: String,
    streams: Vec<StreamDef>,
    book: QuoteBook,
    shutdown_tx: Option<watch::Sender<bool>>,
    ws_tasks: Vec<tokio::task::JoinHandle<()>>,
    workers: Vec<tokio::task::JoinHandle<quote_worker::WorkerStats>>,
}

impl TickFeed {
    pub fn new(name: String, streams: Vec<StreamDef>, book: QuoteBook) -> Self {
        Self {
            name,
            streams,
            book,
            shutdown_tx: None,
            ws_tasks: Vec::new(),
            workers: Vec::new(),
        }
    }

    pub fn book(&self) -> &QuoteBook {
        &self.book
    }
}

#[async_trait]
impl QuoteFeed for TickFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for stream in self.streams.drain(..) {
            let StreamDef {
                label,
                ws_url,
                init_msgs,
                subscribe_msg,
                ping,
                extra_headers,
                channel_capacity,
                token_symbols,
                text_parser,
            } = stream;

            let (tx, rx) = crossbeam_channel::bounded::<Tick>(channel_capacity.max(1));

            let book = self.book.clone();
            let worker_label = label.clone();
            self.workers.push(tokio::task::spawn_blocking(move || {
                quote_worker::run_quote_loop(&worker_label, rx, book, token_symbols)
            }));

            let params = ws_helper::TextStreamParams {
                url: ws_url,
                init_msgs,
                subscribe_msg,
                extra_headers,
                ping,
                tx,
                parser: text_parser,
                label,
            };
            let rx = shutdown_rx.clone();
            self.ws_tasks.push(tokio::spawn(async move {
                ws_helper::run_ws_text_stream(params, rx).await;
            }));
        }

        self.shutdown_tx = Some(shutdown_tx);
        info!("[{}] started {} streams", self.name, self.ws_tasks.len());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        for task in self.ws_tasks.drain(..) {
            let _ = task.await;
        }
        // Senders are gone with the WS tasks, so the workers drain and exit.
        for worker in self.workers.drain(..) {
            worker.await?;
        }
        info!("[{}] stopped", self.name);
        Ok(())
    }
}
