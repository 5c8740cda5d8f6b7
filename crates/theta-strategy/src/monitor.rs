//! Short-straddle risk monitor.
//!
//! Drives one session through `Setup → Active → Closing → Done`:
//!
//! - **Setup**: resolve legs and margin, sell every leg at market, and place
//!   one protective stop per leg.
//! - **Active**: every `poll_interval`, mark each open leg to its latest
//!   quote and fire the stops whose trigger was crossed.
//! - **Closing**: at the deadline (or on shutdown), buy back whatever is
//!   still open and cancel the remaining stops.
//!
//! The monitor is the single owner of the ledger and the order manager, so
//! every mutation happens on this task, one at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use theta_core::config::StrategyConfig;
use theta_core::ledger::{Applied, Ledger};
use theta_core::logging::PNL;
use theta_core::time_util::{self, Clock};
use theta_core::{
    Direction, Fill, FillSide, OptionLeg, OrderSpec, ThetaError, round_price, sized_quantity,
};
use theta_md::QuoteSource;
use theta_td::OrderManager;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::instruments::InstrumentResolver;
use crate::margin::MarginSource;
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub lots: u32,
    /// Stop distance as a fraction of entry (`0.1` = 10%).
    pub stop_loss_fraction: f64,
    pub price_decimals: u32,
    pub poll_interval: Duration,
    /// Local time at which everything still open is liquidated.
    pub end_time: NaiveTime,
    pub liquidate_on_shutdown: bool,
}

impl MonitorConfig {
    pub fn from_strategy(cfg: &StrategyConfig) -> Result<Self, ThetaError> {
        Ok(Self {
            lots: cfg.lots,
            stop_loss_fraction: cfg.stop_loss_fraction(),
            price_decimals: cfg.price_decimals,
            poll_interval: cfg.poll_interval(),
            end_time: cfg.end_time()?,
            liquidate_on_shutdown: cfg.liquidate_on_shutdown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Active,
    Closing,
    Done,
}

/// Why the active phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Every leg was stopped out.
    AllStopped,
    Deadline,
    Shutdown,
}

/// A protective stop tracked by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct StopRecord {
    pub symbol: String,
    pub order_id: u64,
    /// Entry order this stop protects.
    pub parent_order_id: Option<u64>,
    pub trigger_price: f64,
    /// Direction of the stop order (`Buy` protects a short).
    pub direction: Direction,
}

impl StopRecord {
    /// Buy stops fire at or above the trigger, sell stops at or below.
    pub fn is_hit(&self, mark: f64) -> bool {
        match self.direction {
            Direction::Buy => mark >= self.trigger_price,
            Direction::Sell => mark <= self.trigger_price,
        }
    }
}

/// Stop trigger for a position of `signed_quantity` entered at `entry`.
pub fn stop_trigger(entry: f64, signed_quantity: i64, fraction: f64, decimals: u32) -> f64 {
    let raw = if signed_quantity < 0 { entry * (1.0 + fraction) } else { entry * (1.0 - fraction) };
    round_price(raw, decimals)
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Continue,
    Flat,
    Deadline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub phase: Phase,
    pub reason: ExitReason,
    pub realized_pnl: f64,
    pub total_pnl: f64,
    pub roi: f64,
    /// Symbols still open when the session ended.
    pub unliquidated: Vec<String>,
}

pub struct StraddleMonitor {
    cfg: MonitorConfig,
    phase: Phase,
    ledger: Ledger,
    orders: OrderManager,
    quotes: Arc<dyn QuoteSource>,
    resolver: Arc<dyn InstrumentResolver>,
    margin: Arc<dyn MarginSource>,
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    stops: Vec<StopRecord>,
}

impl StraddleMonitor {
    pub fn new(
        cfg: MonitorConfig,
        orders: OrderManager,
        quotes: Arc<dyn QuoteSource>,
        resolver: Arc<dyn InstrumentResolver>,
        margin: Arc<dyn MarginSource>,
        telemetry: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cfg,
            phase: Phase::Setup,
            ledger: Ledger::new(),
            orders,
            quotes,
            resolver,
            margin,
            telemetry,
            clock,
            stops: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn stops(&self) -> &[StopRecord] {
        &self.stops
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Open every leg and protect it with a stop.
    ///
    /// A failure after anything was opened liquidates what is open before the
    /// error is returned.
    pub async fn setup(&mut self) -> Result<(), ThetaError> {
        self.phase = Phase::Setup;

        let legs = self.resolver.resolve().await?;
        let first = legs
            .first()
            .ok_or_else(|| ThetaError::InstrumentResolution("resolver returned no legs".into()))?;
        let quantity = sized_quantity(self.cfg.lots, first.lot_size);
        if quantity == 0 {
            return Err(ThetaError::InvalidQuantity { symbol: first.symbol.clone() });
        }

        let margin = self.margin.trade_margin(&legs, quantity).await?;
        self.ledger.set_trade_margin(margin);
        info!(
            "[monitor] setup: {} legs x {quantity}, margin {margin:.2}",
            legs.len()
        );

        for leg in &legs {
            if let Err(e) = self.open_leg(leg, quantity).await {
                error!("[monitor] setup failed on {}: {e}", leg.symbol);
                let left = self.liquidate().await;
                if !left.is_empty() {
                    error!("[monitor] could not liquidate after failed setup: {left:?}");
                }
                self.phase = Phase::Done;
                return Err(e);
            }
        }

        self.phase = Phase::Active;
        self.publish();
        Ok(())
    }

    async fn open_leg(&mut self, leg: &OptionLeg, quantity: u64) -> Result<(), ThetaError> {
        let entry = self.orders.place(OrderSpec::market(&leg.symbol, Direction::Sell, quantity)).await?;
        let price = entry.price.ok_or_else(|| ThetaError::OrderPlacementFailed {
            symbol: leg.symbol.clone(),
            reason: "market order without a price".into(),
        })?;
        self.orders.confirm(
            &mut self.ledger,
            Fill::new(&leg.symbol, quantity, price, FillSide::Sell).for_order(entry.id),
        )?;

        let pos = self
            .ledger
            .position(&leg.symbol)
            .ok_or_else(|| ThetaError::InconsistentCloseRequest { symbol: leg.symbol.clone() })?;
        let trigger = stop_trigger(
            pos.entry_price,
            pos.signed_quantity,
            self.cfg.stop_loss_fraction,
            self.cfg.price_decimals,
        );
        let direction = Direction::closing(pos.signed_quantity);

        let stop = self
            .orders
            .place(OrderSpec::stop_market(&leg.symbol, direction, quantity, trigger, Some(entry.id)))
            .await?;
        info!(
            "[monitor] {} sold {quantity} @ {price}, stop #{} {direction} @ {trigger}",
            leg.symbol, stop.id
        );
        self.stops.push(StopRecord {
            symbol: leg.symbol.clone(),
            order_id: stop.id,
            parent_order_id: Some(entry.id),
            trigger_price: trigger,
            direction,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Active
    // -----------------------------------------------------------------------

    fn deadline_reached(&self) -> bool {
        self.clock.time_of_day() >= self.cfg.end_time
    }

    /// One evaluation pass over every open symbol.
    pub async fn evaluate_pass(&mut self) -> PassOutcome {
        if self.deadline_reached() {
            return PassOutcome::Deadline;
        }

        for symbol in self.ledger.symbols() {
            if self.deadline_reached() {
                return PassOutcome::Deadline;
            }
            let Some(mark) = self.quotes.last_price(&symbol).filter(|p| p.is_finite() && *p > 0.0)
            else {
                debug!("[monitor] no quote for {symbol}, skipping this pass");
                continue;
            };
            self.ledger.mark(&symbol, mark);
            self.check_stops(&symbol, mark).await;
        }

        self.drop_orphan_stops().await;
        self.publish();

        if self.ledger.is_flat() { PassOutcome::Flat } else { PassOutcome::Continue }
    }

    async fn check_stops(&mut self, symbol: &str, mark: f64) {
        let hit: Vec<StopRecord> =
            self.stops.iter().filter(|s| s.symbol == symbol && s.is_hit(mark)).cloned().collect();

        for stop in hit {
            let Some(quantity) = self.ledger.position(symbol).map(|p| p.abs_quantity()) else {
                break;
            };
            warn!(
                "[monitor] stop #{} hit on {symbol}: mark {mark} vs trigger {}",
                stop.order_id, stop.trigger_price
            );
            let fill = Fill::new(symbol, quantity, mark, FillSide::Close).for_order(stop.order_id);
            match self.orders.confirm(&mut self.ledger, fill) {
                Ok(Applied::Closed(t)) => {
                    info!(target: PNL, "[monitor] {symbol} stopped out, pnl {:.2}", t.pnl);
                    self.stops.retain(|s| s.order_id != stop.order_id);
                }
                Ok(other) => {
                    warn!("[monitor] unexpected ledger change for stop on {symbol}: {other:?}");
                    self.stops.retain(|s| s.order_id != stop.order_id);
                }
                Err(e) if e.is_recoverable() => {
                    warn!("[monitor] {e}");
                    self.cancel_stop(stop.order_id).await;
                }
                Err(e) => error!("[monitor] stop #{} on {symbol} not applied: {e}", stop.order_id),
            }
        }
    }

    /// Cancel stops whose position is already gone.
    async fn drop_orphan_stops(&mut self) {
        let orphans: Vec<u64> = self
            .stops
            .iter()
            .filter(|s| self.ledger.position(&s.symbol).is_none())
            .map(|s| s.order_id)
            .collect();
        for id in orphans {
            debug!("[monitor] dropping stop #{id}, position already closed");
            self.cancel_stop(id).await;
        }
    }

    async fn cancel_stop(&mut self, order_id: u64) {
        self.stops.retain(|s| s.order_id != order_id);
        if let Err(e) = self.orders.cancel(order_id).await {
            error!("[monitor] cancel of stop #{order_id} failed: {e}");
        }
    }

    /// Poll until every leg is flat, the deadline passes, or `shutdown` flips.
    ///
    /// Shutdown is only observed between passes.
    pub async fn run_active(&mut self, shutdown: &mut watch::Receiver<bool>) -> ExitReason {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut watching = true;

        loop {
            if *shutdown.borrow() {
                return ExitReason::Shutdown;
            }

            let tick = tokio::select! {
                changed = shutdown.changed(), if watching => {
                    if changed.is_err() {
                        // Sender gone, nobody can ask for shutdown any more.
                        watching = false;
                    }
                    false
                }
                _ = ticker.tick() => true,
            };
            if !tick {
                continue;
            }

            match self.evaluate_pass().await {
                PassOutcome::Continue => {}
                PassOutcome::Flat => return ExitReason::AllStopped,
                PassOutcome::Deadline => return ExitReason::Deadline,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Closing
    // -----------------------------------------------------------------------

    /// Buy back (or sell out) every open position at market, then cancel
    /// every remaining stop. Returns the symbols that could not be closed.
    pub async fn liquidate(&mut self) -> Vec<String> {
        let mut unliquidated = Vec::new();

        for symbol in self.ledger.symbols() {
            let Some(signed) = self.ledger.position(&symbol).map(|p| p.signed_quantity) else {
                continue;
            };
            let quantity = signed.unsigned_abs();
            let spec = OrderSpec::market(&symbol, Direction::closing(signed), quantity);

            let order = match self.orders.place(spec).await {
                Ok(o) => o,
                Err(e) => {
                    error!("[monitor] liquidation of {symbol} failed: {e}");
                    unliquidated.push(symbol);
                    continue;
                }
            };
            let Some(price) = order.price else {
                unliquidated.push(symbol);
                continue;
            };

            let fill = Fill::new(&symbol, quantity, price, FillSide::Close).for_order(order.id);
            match self.orders.confirm(&mut self.ledger, fill) {
                Ok(Applied::Closed(t)) => {
                    info!(target: PNL, "[monitor] {symbol} liquidated @ {price}, pnl {:.2}", t.pnl)
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[monitor] liquidation fill for {symbol} not applied: {e}");
                    unliquidated.push(symbol);
                }
            }
        }

        let remaining: Vec<u64> = self.stops.iter().map(|s| s.order_id).collect();
        for id in remaining {
            self.cancel_stop(id).await;
        }

        self.publish();
        unliquidated
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Run the whole session.
    ///
    /// Setup errors are returned after best-effort liquidation. Once active,
    /// the session always ends with a summary.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SessionSummary, ThetaError> {
        self.setup().await?;

        let reason = self.run_active(&mut shutdown).await;
        info!("[monitor] active phase ended: {reason:?}");

        let unliquidated = match reason {
            ExitReason::Shutdown if !self.cfg.liquidate_on_shutdown => {
                let open = self.ledger.symbols();
                if !open.is_empty() {
                    warn!(
                        "[monitor] shutdown without liquidation, leaving {open:?} and {} stops open",
                        self.stops.len()
                    );
                }
                open
            }
            ExitReason::AllStopped => self.liquidate().await,
            ExitReason::Deadline | ExitReason::Shutdown => {
                self.phase = Phase::Closing;
                info!("[monitor] closing all positions");
                self.liquidate().await
            }
        };

        self.phase = Phase::Done;
        let summary = SessionSummary {
            phase: self.phase,
            reason,
            realized_pnl: self.ledger.realized_pnl(),
            total_pnl: self.ledger.total_pnl(),
            roi: self.ledger.roi(),
            unliquidated,
        };
        info!(
            target: PNL,
            "[monitor] session done ({:?}): realized={:.2} total={:.2} roi={:.3}%",
            summary.reason,
            summary.realized_pnl,
            summary.total_pnl,
            summary.roi
        );
        Ok(summary)
    }

    fn publish(&self) {
        let snap = self.ledger.snapshot(time_util::now_ms());
        debug!(
            target: PNL,
            "[monitor] realized={:.2} unrealized={:.2} total={:.2}",
            snap.realized_pnl, snap.unrealized_pnl, snap.total_pnl
        );
        self.telemetry.publish(&snap);
    }
}

#[cfg(test)]
mod tests {
    use theta_core::OptionType;
    use theta_core::retry::RetryPolicy;
    use theta_core::time_util::ManualClock;
    use theta_md::QuoteBook;
    use theta_td::{MemoryOrderStore, OrderStore, PaperBroker};

    use super::*;
    use crate::instruments::StaticLegs;
    use crate::margin::FixedMargin;
    use crate::telemetry::NullSink;

    fn stop(direction: Direction, trigger: f64) -> StopRecord {
        StopRecord {
            symbol: "A".into(),
            order_id: 2,
            parent_order_id: Some(1),
            trigger_price: trigger,
            direction,
        }
    }

    #[test]
    fn short_stop_fires_at_or_above_trigger() {
        let trigger = stop_trigger(100.0, -75, 0.05, 2);
        assert_eq!(trigger, 105.0);
        let s = stop(Direction::closing(-75), trigger);
        assert!(!s.is_hit(104.99));
        assert!(s.is_hit(105.00));
        assert!(s.is_hit(130.0));
    }

    #[test]
    fn long_stop_fires_at_or_below_trigger() {
        let trigger = stop_trigger(100.0, 75, 0.05, 2);
        assert_eq!(trigger, 95.0);
        let s = stop(Direction::closing(75), trigger);
        assert!(!s.is_hit(95.01));
        assert!(s.is_hit(95.0));
    }

    #[test]
    fn trigger_rounding() {
        assert_eq!(stop_trigger(120.0, -75, 0.1, 2), 132.0);
        assert!((stop_trigger(118.0, -75, 0.1, 2) - 129.8).abs() < 1e-9);
        assert_eq!(stop_trigger(117.0, -1, 0.1, 0), 129.0);
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

    #[tokio::test]
    async fn second_stop_on_closed_symbol_is_dropped() {
        let book = QuoteBook::new(None);
        book.set("CE", 120.0);
        book.set("PE", 118.0);
        let broker = Arc::new(PaperBroker::new());
        let store = Arc::new(MemoryOrderStore::new());
        let orders =
            OrderManager::new(Arc::new(book.clone()), broker.clone(), store.clone(), RetryPolicy::once());
        let cfg = MonitorConfig {
            lots: 1,
            stop_loss_fraction: 0.1,
            price_decimals: 2,
            poll_interval: Duration::from_millis(5),
            end_time: NaiveTime::from_hms_opt(15, 15, 0).unwrap(),
            liquidate_on_shutdown: true,
        };
        let mut m = StraddleMonitor::new(
            cfg,
            orders,
            Arc::new(book.clone()),
            Arc::new(StaticLegs::new(vec![leg("CE", OptionType::Call), leg("PE", OptionType::Put)])),
            Arc::new(FixedMargin(100_000.0)),
            Arc::new(NullSink),
            Arc::new(ManualClock::new(NaiveTime::from_hms_opt(10, 0, 0).unwrap())),
        );
        m.setup().await.unwrap();

        // A tighter second stop on CE, below the first one at 132.
        let extra = m
            .orders
            .place(OrderSpec::stop_market("CE", Direction::Buy, 75, 130.0, None))
            .await
            .unwrap();
        m.stops.push(StopRecord {
            symbol: "CE".into(),
            order_id: extra.id,
            parent_order_id: None,
            trigger_price: 130.0,
            direction: Direction::Buy,
        });
        assert_eq!(store.len(), 3);

        book.set("CE", 133.0);
        assert_eq!(m.evaluate_pass().await, PassOutcome::Continue);

        // One close only, at the mark.
        assert!(m.ledger.position("CE").is_none());
        assert!((m.ledger.realized_pnl() + 975.0).abs() < 1e-9);
        assert_eq!(m.ledger.len(), 1);

        // The leftover CE stop was cancelled; only the PE stop remains.
        assert_eq!(broker.cancelled(), [extra.id]);
        assert_eq!(m.stops().len(), 1);
        assert_eq!(m.stops()[0].symbol, "PE");
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
