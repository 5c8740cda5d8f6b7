//! Ledger snapshot export.
//!
//! Sinks are write-only and fire-and-forget: `publish` never blocks and never
//! fails. File and HTTP sinks hand snapshots to a background task over an
//! unbounded channel; write errors are logged there and dropped.

use std::fmt::Write as _;
use std::sync::Arc;

use theta_core::config::TelemetryConfig;
use theta_core::logging::PNL;
use theta_core::{LedgerSnapshot, ThetaError};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub trait TelemetrySink: Send + Sync {
    fn publish(&self, snapshot: &LedgerSnapshot);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn publish(&self, _snapshot: &LedgerSnapshot) {}
}

/// Logs a one-line PnL summary on the `theta::pnl` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&self, s: &LedgerSnapshot) {
        info!(
            target: PNL,
            "[pnl] positions={} realized={:.2} unrealized={:.2} total={:.2} roi={:.3}%",
            s.positions.len(),
            s.realized_pnl,
            s.unrealized_pnl,
            s.total_pnl,
            s.roi
        );
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Appends one JSON snapshot per line to a file.
pub struct JsonlSink {
    tx: mpsc::UnboundedSender<LedgerSnapshot>,
}

impl JsonlSink {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(path: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LedgerSnapshot>();
        tokio::spawn(async move {
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) => {
                    warn!("[telemetry] cannot open {path}: {e}; snapshots dropped");
                    return;
                }
            };
            while let Some(snap) = rx.recv().await {
                let mut line = match serde_json::to_string(&snap) {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("[telemetry] serialize failed: {e}");
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!("[telemetry] write to {path} failed: {e}");
                    continue;
                }
                if let Err(e) = file.flush().await {
                    warn!("[telemetry] flush of {path} failed: {e}");
                }
            }
        });
        Self { tx }
    }
}

impl TelemetrySink for JsonlSink {
    fn publish(&self, snapshot: &LedgerSnapshot) {
        let _ = self.tx.send(snapshot.clone());
    }
}

// ---------------------------------------------------------------------------
// InfluxDB
// ---------------------------------------------------------------------------

/// Escape a tag value for line protocol.
fn escape_tag(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        if matches!(c, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Render a snapshot as InfluxDB line protocol (ms precision): one
/// `positions` line per open position plus one `pnl` line.
pub fn line_protocol(s: &LedgerSnapshot, prefix: Option<&str>) -> String {
    let prefix = prefix.unwrap_or("");
    let ts = s.timestamp_ms;
    let mut out = String::new();

    for p in &s.positions {
        let _ = writeln!(
            out,
            "{prefix}positions,symbol={} signed_quantity={}i,entry_price={},mark_price={},unrealized_pnl={} {ts}",
            escape_tag(&p.symbol),
            p.signed_quantity,
            p.entry_price,
            p.mark_price,
            p.unrealized_pnl()
        );
    }
    let _ = writeln!(
        out,
        "{prefix}pnl realized_pnl={},unrealized_pnl={},total_pnl={},roi={},trade_margin={},total_entry_value={},total_current_value={} {ts}",
        s.realized_pnl,
        s.unrealized_pnl,
        s.total_pnl,
        s.roi,
        s.trade_margin,
        s.total_entry_value,
        s.total_current_value
    );
    out
}

/// Writes snapshots to an InfluxDB v2 bucket over HTTP.
pub struct InfluxSink {
    tx: mpsc::UnboundedSender<LedgerSnapshot>,
}

impl InfluxSink {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(
        url: &str,
        org: &str,
        bucket: &str,
        token: String,
        measurement_prefix: Option<String>,
    ) -> Result<Self, ThetaError> {
        let mut endpoint = reqwest::Url::parse(url)
            .and_then(|u| u.join("api/v2/write"))
            .map_err(|e| ThetaError::Config(format!("influx url {url}: {e}")))?;
        endpoint
            .query_pairs_mut()
            .append_pair("org", org)
            .append_pair("bucket", bucket)
            .append_pair("precision", "ms");

        let http = reqwest::Client::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<LedgerSnapshot>();
        tokio::spawn(async move {
            while let Some(snap) = rx.recv().await {
                let body = line_protocol(&snap, measurement_prefix.as_deref());
                let sent = http
                    .post(endpoint.clone())
                    .header("Authorization", format!("Token {token}"))
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body(body)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status());
                if let Err(e) = sent {
                    warn!("[telemetry] influx write failed: {e}");
                }
            }
        });
        Ok(Self { tx })
    }
}

impl TelemetrySink for InfluxSink {
    fn publish(&self, snapshot: &LedgerSnapshot) {
        let _ = self.tx.send(snapshot.clone());
    }
}

/// Build the sink described by `cfg`; no config means [`LogSink`].
pub fn sink_from_config(cfg: Option<&TelemetryConfig>) -> Result<Arc<dyn TelemetrySink>, ThetaError> {
    Ok(match cfg {
        None | Some(TelemetryConfig::Log) => Arc::new(LogSink),
        Some(TelemetryConfig::Jsonl { path }) => Arc::new(JsonlSink::spawn(path.clone())),
        Some(TelemetryConfig::Influx { url, org, bucket, token_env, measurement_prefix }) => {
            let token = std::env::var(token_env)
                .map_err(|_| ThetaError::Config(format!("environment variable {token_env} not set")))?;
            Arc::new(InfluxSink::spawn(url, org, bucket, token, measurement_prefix.clone())?)
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use theta_core::Position;

    use super::*;

    fn snapshot() -> LedgerSnapshot {
        LedgerSnapshot {
            timestamp_ms: 1_700_000_000_000,
            positions: vec![Position {
                symbol: "NIFTY 22150 CE".into(),
                signed_quantity: -75,
                entry_price: 118.0,
                mark_price: 110.0,
            }],
            realized_pnl: -975.0,
            unrealized_pnl: 600.0,
            total_pnl: -375.0,
            roi: -0.375,
            trade_margin: 100_000.0,
            total_entry_value: 8850.0,
            total_current_value: 8250.0,
        }
    }

    #[test]
    fn line_protocol_lines() {
        let lp = line_protocol(&snapshot(), Some("straddle_"));
        let lines: Vec<&str> = lp.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "straddle_positions,symbol=NIFTY\\ 22150\\ CE signed_quantity=-75i,entry_price=118,mark_price=110,unrealized_pnl=600 1700000000000"
        );
        assert!(lines[1].starts_with("straddle_pnl realized_pnl=-975,unrealized_pnl=600,total_pnl=-375,"));
        assert!(lines[1].ends_with(" 1700000000000"));
    }

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pnl.jsonl");
        let sink = JsonlSink::spawn(path.to_string_lossy().into_owned());
        sink.publish(&snapshot());
        sink.publish(&snapshot());

        let mut content = String::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            content = std::fs::read_to_string(&path).unwrap_or_default();
            if content.lines().count() == 2 {
                break;
            }
        }
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: LedgerSnapshot = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(back, snapshot());
    }

    #[test]
    fn tag_escaping() {
        assert_eq!(escape_tag("a,b c=d"), "a\\,b\\ c\\=d");
    }
}
