//! Single WebSocket connection with auto-reconnect and ping keep-alive.
//!
//! Each `WsConnection` runs as a tokio task that:
//! 1. Connects to the feed endpoint.
//! 2. Sends the init messages (session auth), then the subscription.
//! 3. Reads text frames and forwards them to a callback.
//! 4. Sends periodic application pings.
//! 5. Reconnects on disconnection with exponential backoff, replaying step 2.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Callback invoked for each received text message.
///
/// Parameters: `(connection_id, message_text)`
pub type OnMessageCallback = Arc<dyn Fn(usize, &str) + Send + Sync>;

/// Ping payload format.
#[derive(Debug, Clone)]
pub enum PingPayload {
    /// Send a text frame verbatim.
    Text(String),
    /// Send a JSON object as text (e.g. `{"t":"h"}` heartbeats).
    Json(serde_json::Value),
    /// Use the standard WebSocket ping frame.
    WebSocketPing,
}

/// Configuration for a single WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsConnConfig {
    pub url: String,
    /// Sent in order right after every connect, before `subscribe_msg`.
    pub init_msgs: Vec<String>,
    /// Subscription request.
    pub subscribe_msg: Option<String>,
    /// Extra HTTP headers for the handshake.
    pub extra_headers: HashMap<String, String>,
    pub ping_interval: Option<Duration>,
    pub ping_payload: Option<PingPayload>,
    /// Connection identifier, used in log prefixes.
    pub id: usize,
}

/// A single WebSocket connection managed by a background tokio task.
pub struct WsConnection {
    pub config: WsConnConfig,
    outbound_tx: Option<mpsc::Sender<String>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WsConnection {
    /// Create a new (not yet started) connection.
    pub fn new(config: WsConnConfig) -> Self {
        Self { config, outbound_tx: None, shutdown_tx: None, task: None }
    }

    /// Start the connection task. Text frames are forwarded to `on_text`.
    pub fn start(&mut self, on_text: OnMessageCallback) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            connection_loop(config, on_text, outbound_rx, shutdown_rx).await;
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.outbound_tx = Some(outbound_tx);
        self.task = Some(task);
    }

    /// Send a text message on this connection.
    pub async fn send(&self, msg: String) -> anyhow::Result<()> {
        if let Some(tx) = &self.outbound_tx {
            tx.send(msg).await?;
        }
        Ok(())
    }

    /// Stop the connection and wait for the task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Messages to send after a connect, in order.
fn handshake_msgs(config: &WsConnConfig) -> impl Iterator<Item = &String> {
    config.init_msgs.iter().chain(config.subscribe_msg.iter())
}

async fn connection_loop(
    config: WsConnConfig,
    on_text: OnMessageCallback,
    mut outbound_rx: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(30);
    let conn_id = config.id;

    loop {
        if *shutdown_rx.borrow() {
            info!("[ws-{conn_id}] shutdown requested");
            return;
        }

        info!("[ws-{conn_id}] connecting to {}", config.url);

        let ws_stream = match connect_ws(&config).await {
            Ok(s) => {
                backoff = Duration::from_millis(100);
                info!("[ws-{conn_id}] connected");
                s
            }
            Err(e) => {
                error!("[ws-{conn_id}] connection failed: {e}, retrying in {backoff:?}");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {},
                    _ = shutdown_rx.changed() => return,
                }
                backoff = (backoff * 2).min(max_backoff);
                continue;
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let mut handshake_ok = true;
        for msg in handshake_msgs(&config) {
            debug!("[ws-{conn_id}] sending: {msg}");
            if let Err(e) = ws_write.send(Message::Text(msg.clone().into())).await {
                error!("[ws-{conn_id}] handshake send failed: {e}");
                handshake_ok = false;
                break;
            }
        }

        if handshake_ok {
            let ping_interval = config.ping_interval.map(tokio::time::interval);

            tokio::pin! {
                let ping_tick = async {
                    if let Some(mut interval) = ping_interval {
                        interval.tick().await;
                        loop {
                            interval.tick().await;
                        }
                    } else {
                        std::future::pending::<()>().await
                    }
                };
            }

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("[ws-{conn_id}] shutdown signal received");
                        let _ = ws_write.close().await;
                        return;
                    }

                    msg = ws_read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                on_text(conn_id, &text);
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = ws_write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) => {
                                warn!("[ws-{conn_id}] received close frame");
                                break;
                            }
                            Some(Err(e)) => {
                                error!("[ws-{conn_id}] read error: {e}");
                                break;
                            }
                            None => {
                                warn!("[ws-{conn_id}] stream ended");
                                break;
                            }
                            _ => {} // Binary, Pong, Frame
                        }
                    }

                    Some(msg) = outbound_rx.recv() => {
                        if let Err(e) = ws_write.send(Message::Text(msg.into())).await {
                            error!("[ws-{conn_id}] send error: {e}");
                            break;
                        }
                    }

                    _ = &mut ping_tick => {
                        let ping_msg = match &config.ping_payload {
                            Some(PingPayload::Text(t)) => Message::Text(t.clone().into()),
                            Some(PingPayload::Json(j)) => Message::Text(j.to_string().into()),
                            Some(PingPayload::WebSocketPing) | None => {
                                Message::Ping(vec![].into())
                            }
                        };
                        if let Err(e) = ws_write.send(ping_msg).await {
                            error!("[ws-{conn_id}] ping send error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        warn!("[ws-{conn_id}] disconnected, reconnecting in {backoff:?}");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {},
            _ = shutdown_rx.changed() => return,
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn connect_ws(
    config: &WsConnConfig,
) -> anyhow::Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

    let mut request = config.url.as_str().into_client_request()?;
    for (key, value) in &config.extra_headers {
        request
            .headers_mut()
            .insert(HeaderName::from_bytes(key.as_bytes())?, HeaderValue::from_str(value)?);
    }

    debug!("[ws-{}] handshake host={}", config.id, extract_host(&config.url));
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("").to_string())
        .unwrap_or_default()
}
