//! # theta-runner
//!
//! Runs one short-straddle session from a JSON config file.
//!
//! Wires the quote feed, order manager, broker, margin source and telemetry
//! sink into a [`StraddleMonitor`], waits for the configured start time, and
//! runs the session until every leg is stopped out, the deadline passes, or
//! Ctrl+C is pressed.
//!
//! # Usage
//!
//! ```bash
//! theta-runner config.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use clap::Parser;
use theta_core::config::AppConfig;
use theta_core::logging::ORDERS;
use theta_core::retry::RetryPolicy;
use theta_core::time_util::{SystemClock, delay_until};
use theta_md::pipeline::TickFeed;
use theta_md::{QuoteBook, QuoteFeed, touchline};
use theta_strategy::instruments::resolver_from_config;
use theta_strategy::margin::margin_from_config;
use theta_strategy::telemetry::sink_from_config;
use theta_strategy::{MonitorConfig, StraddleMonitor};
use theta_td::{FileOrderStore, MemoryOrderStore, OrderManager, OrderStore, PaperBroker, event};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Short-straddle session runner.
#[derive(Parser)]
#[command(name = "theta-runner", about = "Short-straddle session runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log directory for file output. Overrides the config's `log_path`.
    #[arg(long)]
    log_dir: Option<String>,

    /// Write the log file as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Start immediately instead of waiting for `start_time`.
    #[arg(long)]
    now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration, then logging (the log path may come from the config)
    let config = theta_core::config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    let module_name = config.module_name();
    theta_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &module_name, cli.json_logs);

    info!("theta-runner starting: config={}, log_level={}", cli.config.display(), cli.log_level);

    // 2. Quotes
    let book = QuoteBook::new(config.quotes.max_age_ms);
    let retry = RetryPolicy::from_config(&config.quotes);
    let mut feed = start_feed(&config, &book).await?;

    // 3. Orders
    let store: Arc<dyn OrderStore> = match &config.order_store {
        Some(cfg) => Arc::new(FileOrderStore::open(&cfg.dir)?),
        None => Arc::new(MemoryOrderStore::new()),
    };
    let (events_tx, mut events_rx) = event::channel();
    let event_logger = tokio::spawn(async move {
        while let Some(ev) = events_rx.recv().await {
            info!(target: ORDERS, "[orders] {ev}");
        }
    });

    let broker = Arc::new(PaperBroker::new());
    let mut orders = OrderManager::new(Arc::new(book.clone()), broker, store, retry)
        .with_events(events_tx);
    let recovered = orders.recover()?;
    if recovered > 0 {
        warn!("{recovered} order record(s) left by a previous run; reconcile them with the broker");
    }

    // 4. Strategy collaborators
    let telemetry = sink_from_config(config.telemetry.as_ref())?;
    let resolver = resolver_from_config(&config.strategy.instruments, Arc::new(book.clone()), retry);
    let margin = margin_from_config(&config.margin)?;
    let monitor_cfg = MonitorConfig::from_strategy(&config.strategy)?;

    let mut monitor = StraddleMonitor::new(
        monitor_cfg,
        orders,
        Arc::new(book.clone()),
        resolver,
        margin,
        telemetry,
        Arc::new(SystemClock),
    );

    // 5. Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // 6. Wait for the start time
    let started = match config.strategy.start_time()? {
        Some(start) if !cli.now => wait_for_start(start, shutdown_rx.clone()).await,
        _ => true,
    };

    // 7. Session
    let result = if started {
        monitor.run(shutdown_rx).await.map(Some)
    } else {
        info!("stopped before the session started");
        Ok(None)
    };

    // 8. Teardown
    if let Some(feed) = feed.as_mut() {
        if let Err(e) = feed.stop().await {
            error!("error stopping feed '{}': {e}", feed.name());
        }
    }
    // The monitor owns the last event sender.
    drop(monitor);
    let _ = event_logger.await;

    match result {
        Ok(Some(summary)) => {
            info!(
                "session finished ({:?}): realized={:.2} total={:.2} roi={:.3}%",
                summary.reason, summary.realized_pnl, summary.total_pnl, summary.roi
            );
            if !summary.unliquidated.is_empty() {
                warn!("left open: {:?}", summary.unliquidated);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            error!("session aborted: {e}");
            Err(e.into())
        }
    }
}

/// Start the touchline feed over every candidate leg, if one is configured.
async fn start_feed(config: &AppConfig, book: &QuoteBook) -> Result<Option<TickFeed>> {
    let Some(feed_cfg) = &config.feed else {
        warn!("no quote feed configured; the quote book stays empty");
        return Ok(None);
    };
    let streams = touchline::build(feed_cfg, config.strategy.instruments.candidate_legs())?;
    let mut feed = TickFeed::new("touchline".into(), streams, book.clone());
    feed.start().await?;
    info!("feed '{}' started", feed.name());
    Ok(Some(feed))
}

/// Sleep until `start`. A start time already behind us starts right away.
/// Returns `false` if shutdown was requested first.
async fn wait_for_start(start: NaiveTime, mut shutdown: watch::Receiver<bool>) -> bool {
    let now = Local::now().time();
    if now >= start {
        return true;
    }
    let wait = delay_until(now, start);
    info!("waiting {}s for start time {start}", wait.as_secs());
    tokio::select! {
        _ = tokio::time::sleep(wait) => true,
        _ = shutdown.changed() => false,
    }
}
