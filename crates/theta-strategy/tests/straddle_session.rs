//! End-to-end straddle sessions against the paper broker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;
use theta_core::retry::RetryPolicy;
use theta_core::time_util::ManualClock;
use theta_core::{LedgerSnapshot, OptionLeg, OptionType, OrderKind, ThetaError};
use theta_md::QuoteBook;
use theta_strategy::monitor::PassOutcome;
use theta_strategy::{
    ExitReason, FixedMargin, MarginSource, MonitorConfig, Phase, StaticLegs, StraddleMonitor,
    TelemetrySink,
};
use theta_td::{MemoryOrderStore, OrderManager, OrderStore, PaperBroker};
use tokio::sync::watch;

const CE: &str = "NIFTY25JAN22150CE";
const PE: &str = "NIFTY25JAN22150PE";
const EPS: f64 = 1e-9;

#[derive(Default)]
struct RecordingSink {
    snapshots: Mutex<Vec<LedgerSnapshot>>,
}

impl TelemetrySink for RecordingSink {
    fn publish(&self, snapshot: &LedgerSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}

struct FailingMargin;

#[async_trait]
impl MarginSource for FailingMargin {
    async fn trade_margin(&self, _legs: &[OptionLeg], _quantity: u64) -> Result<f64, ThetaError> {
        Err(ThetaError::MarginResolutionFailed("calculator down".into()))
    }
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn leg(symbol: &str, option_type: OptionType) -> OptionLeg {
    OptionLeg {
        symbol: symbol.into(),
        exchange: Some("NFO".into()),
        token: None,
        option_type,
        strike: Some(22_150.0),
        lot_size: 75,
        instrument: None,
        underlying: None,
        expiry: None,
    }
}

struct Session {
    book: QuoteBook,
    broker: Arc<PaperBroker>,
    store: Arc<MemoryOrderStore>,
    clock: Arc<ManualClock>,
    sink: Arc<RecordingSink>,
    monitor: StraddleMonitor,
}

fn session(margin: Arc<dyn MarginSource>, liquidate_on_shutdown: bool) -> Session {
    let book = QuoteBook::new(Some(60_000));
    book.set(CE, 120.0);
    book.set(PE, 118.0);

    let broker = Arc::new(PaperBroker::new());
    let store = Arc::new(MemoryOrderStore::new());
    let clock = Arc::new(ManualClock::new(t(10, 0)));
    let sink = Arc::new(RecordingSink::default());

    let orders = OrderManager::new(
        Arc::new(book.clone()),
        broker.clone(),
        store.clone(),
        RetryPolicy::new(2, Duration::ZERO),
    );
    let cfg = MonitorConfig {
        lots: 1,
        stop_loss_fraction: 0.1,
        price_decimals: 2,
        poll_interval: Duration::from_millis(5),
        end_time: t(15, 15),
        liquidate_on_shutdown,
    };
    let monitor = StraddleMonitor::new(
        cfg,
        orders,
        Arc::new(book.clone()),
        Arc::new(StaticLegs::new(vec![leg(CE, OptionType::Call), leg(PE, OptionType::Put)])),
        margin,
        sink.clone(),
        clock.clone(),
    );

    Session { book, broker, store, clock, sink, monitor }
}

#[tokio::test]
async fn stop_then_deadline() {
    let mut s = session(Arc::new(FixedMargin(100_000.0)), true);

    s.monitor.setup().await.unwrap();
    assert_eq!(s.monitor.phase(), Phase::Active);

    let ledger = s.monitor.ledger();
    assert_eq!(ledger.position(CE).unwrap().signed_quantity, -75);
    assert_eq!(ledger.position(PE).unwrap().entry_price, 118.0);
    assert_eq!(ledger.trade_margin(), 100_000.0);

    let stops = s.monitor.stops();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[0].symbol, CE);
    assert!((stops[0].trigger_price - 132.0).abs() < EPS);
    assert!((stops[1].trigger_price - 129.8).abs() < EPS);
    assert!(stops.iter().all(|st| st.parent_order_id.is_some()));
    // Two stop records outstanding; the entry records were confirmed away.
    assert_eq!(s.store.len(), 2);

    // Quiet pass: nothing moves.
    assert_eq!(s.monitor.evaluate_pass().await, PassOutcome::Continue);
    assert_eq!(s.monitor.ledger().realized_pnl(), 0.0);

    // CE rallies through its stop; PE drifts lower.
    s.book.set(CE, 133.0);
    s.book.set(PE, 110.0);
    assert_eq!(s.monitor.evaluate_pass().await, PassOutcome::Continue);

    let ledger = s.monitor.ledger();
    assert!(ledger.position(CE).is_none());
    assert_eq!(ledger.position(PE).unwrap().mark_price, 110.0);
    assert!((ledger.realized_pnl() + 975.0).abs() < EPS);
    assert!((ledger.unrealized_pnl() - 600.0).abs() < EPS);
    assert_eq!(s.monitor.stops().len(), 1);
    assert_eq!(s.monitor.stops()[0].symbol, PE);
    assert_eq!(s.store.len(), 1);

    // Deadline: PE is force-closed at its last price.
    s.book.set(PE, 118.0);
    s.clock.set(t(15, 15));
    assert_eq!(s.monitor.evaluate_pass().await, PassOutcome::Deadline);
    let left = s.monitor.liquidate().await;
    assert!(left.is_empty());

    let ledger = s.monitor.ledger();
    assert!(ledger.is_flat());
    assert!((ledger.realized_pnl() + 975.0).abs() < EPS);
    assert_eq!(ledger.unrealized_pnl(), 0.0);
    assert!(s.monitor.stops().is_empty());
    assert!(s.store.load_all().unwrap().is_empty());
    assert!(s.monitor.orders().open_orders().is_empty());

    // Liquidation was a market buy of 75 PE priced at 118.
    let last = s.broker.submitted().pop().unwrap();
    assert_eq!(last.symbol, PE);
    assert_eq!(last.kind, OrderKind::Market);
    assert_eq!(last.price, Some(118.0));

    let snaps = s.sink.snapshots.lock().unwrap();
    assert!(snaps.len() >= 4);
    assert!(snaps.last().unwrap().positions.is_empty());
}

#[tokio::test]
async fn run_past_deadline_closes_everything() {
    let mut s = session(Arc::new(FixedMargin(100_000.0)), true);
    s.clock.set(t(15, 30));

    let (_tx, rx) = watch::channel(false);
    let summary = s.monitor.run(rx).await.unwrap();

    assert_eq!(summary.phase, Phase::Done);
    assert_eq!(summary.reason, ExitReason::Deadline);
    assert!(summary.unliquidated.is_empty());
    assert!(summary.realized_pnl.abs() < EPS);
    assert!(s.monitor.ledger().is_flat());
    assert!(s.store.is_empty());
}

#[tokio::test]
async fn run_ends_when_every_leg_is_stopped() {
    let mut s = session(Arc::new(FixedMargin(100_000.0)), true);
    let book = s.book.clone();

    let (_tx, rx) = watch::channel(false);
    let bump = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        book.set(CE, 140.0);
        book.set(PE, 130.0);
    });
    let summary = s.monitor.run(rx).await.unwrap();
    bump.await.unwrap();

    assert_eq!(summary.reason, ExitReason::AllStopped);
    // (120 - 140) * 75 + (118 - 130) * 75
    assert!((summary.realized_pnl + 2400.0).abs() < EPS);
    assert!((summary.roi + 2.4).abs() < EPS);
    assert!(s.store.is_empty());
}

#[tokio::test]
async fn shutdown_without_liquidation_keeps_positions() {
    let s = session(Arc::new(FixedMargin(100_000.0)), false);
    let Session { store, mut monitor, .. } = s;

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let summary = monitor.run(rx).await;
        (monitor, summary)
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    tx.send(true).unwrap();

    let (monitor, summary) = handle.await.unwrap();
    let summary = summary.unwrap();
    assert_eq!(summary.reason, ExitReason::Shutdown);
    assert_eq!(summary.unliquidated, [CE.to_string(), PE.to_string()]);
    assert_eq!(monitor.ledger().len(), 2);
    // Stop records survive for reconciliation.
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn second_leg_failure_liquidates_first() {
    let mut s = session(Arc::new(FixedMargin(100_000.0)), true);
    s.broker.reject_symbol(PE);

    let err = s.monitor.setup().await.unwrap_err();
    assert!(matches!(err, ThetaError::OrderPlacementFailed { ref symbol, .. } if symbol == PE));
    assert_eq!(s.monitor.phase(), Phase::Done);
    assert!(s.monitor.ledger().is_flat());
    assert!(s.monitor.stops().is_empty());
    assert!(s.store.is_empty());
    // The CE stop was cancelled at the broker.
    assert_eq!(s.broker.cancelled().len(), 1);
}

#[tokio::test]
async fn margin_failure_opens_nothing() {
    let mut s = session(Arc::new(FailingMargin), true);
    let err = s.monitor.setup().await.unwrap_err();
    assert!(matches!(err, ThetaError::MarginResolutionFailed(_)));
    assert!(s.broker.submitted().is_empty());
    assert!(s.monitor.ledger().is_flat());
}

#[tokio::test]
async fn stale_quote_skips_symbol_for_the_pass() {
    let mut s = session(Arc::new(FixedMargin(100_000.0)), true);
    s.monitor.setup().await.unwrap();

    // A stale print far through the CE stop must not fire it.
    s.book.update(CE, 200.0, 0);
    s.book.set(PE, 100.0);
    assert_eq!(s.monitor.evaluate_pass().await, PassOutcome::Continue);

    let ledger = s.monitor.ledger();
    assert_eq!(ledger.position(CE).unwrap().mark_price, 120.0);
    assert_eq!(ledger.position(PE).unwrap().mark_price, 100.0);
    assert_eq!(ledger.len(), 2);
    assert_eq!(s.monitor.stops().len(), 2);
}
