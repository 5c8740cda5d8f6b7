//! Order lifecycle manager.
//!
//! Owns the open-order set and is the only path by which fills reach the
//! [`Ledger`]. Placement resolves market prices through the quote source
//! under the configured [`RetryPolicy`]; stop orders carry their trigger and
//! need no quote.
//!
//! # Ids
//!
//! Order ids come from an atomic counter and are strictly increasing.
//! [`OrderManager::recover`] seeds the counter past the highest id found in
//! the durable store, so ids do not repeat across restarts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use theta_core::ledger::{Applied, Ledger};
use theta_core::logging::ORDERS;
use theta_core::retry::RetryPolicy;
use theta_core::{
    Direction, Fill, FillSide, Order, OrderKind, OrderSpec, OrderStatus, ThetaError, time_util,
};
use theta_md::{QuoteSource, fetch_price};
use tracing::{debug, info, warn};

use crate::Broker;
use crate::event::{OrderEvent, OrderEventSender};
use crate::store::OrderStore;

pub struct OrderManager {
    next_id: AtomicU64,
    open: AHashMap<u64, Order>,
    quotes: Arc<dyn QuoteSource>,
    broker: Arc<dyn Broker>,
    store: Arc<dyn OrderStore>,
    events: Option<OrderEventSender>,
    retry: RetryPolicy,
}

impl OrderManager {
    pub fn new(
        quotes: Arc<dyn QuoteSource>,
        broker: Arc<dyn Broker>,
        store: Arc<dyn OrderStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            open: AHashMap::new(),
            quotes,
            broker,
            store,
            events: None,
            retry,
        }
    }

    /// Publish lifecycle events on `tx`.
    pub fn with_events(mut self, tx: OrderEventSender) -> Self {
        self.events = Some(tx);
        self
    }

    /// Next order id. Safe to call concurrently.
    pub fn next_order_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Reload outstanding records from the store and move the id counter past
    /// them. Returns the number of records reloaded.
    pub fn recover(&mut self) -> Result<usize, ThetaError> {
        let records = self.store.load_all()?;
        if let Some(max) = records.iter().map(|o| o.id).max() {
            self.next_id.fetch_max(max + 1, Ordering::SeqCst);
        }
        for order in &records {
            warn!(target: ORDERS, "[orders] outstanding from previous run: {order}");
        }
        let n = records.len();
        self.open.extend(records.into_iter().map(|o| (o.id, o)));
        Ok(n)
    }

    /// Place an order.
    ///
    /// Market orders are priced from the quote source and fail with
    /// [`ThetaError::QuoteUnavailable`] without submitting anything once the
    /// retry policy is exhausted.
    pub async fn place(&mut self, spec: OrderSpec) -> Result<Order, ThetaError> {
        if spec.quantity == 0 {
            return Err(ThetaError::OrderPlacementFailed {
                symbol: spec.symbol,
                reason: "zero quantity".into(),
            });
        }

        let (price, trigger_price) = match spec.kind {
            OrderKind::Market => {
                let p = fetch_price(self.quotes.as_ref(), &spec.symbol, &self.retry).await?;
                (Some(p), None)
            }
            OrderKind::StopMarket => match spec.trigger_price {
                Some(t) if t.is_finite() && t > 0.0 => (None, Some(t)),
                _ => {
                    return Err(ThetaError::OrderPlacementFailed {
                        symbol: spec.symbol,
                        reason: "stop order without a positive trigger price".into(),
                    });
                }
            },
        };

        let order = Order {
            id: self.next_order_id(),
            symbol: spec.symbol,
            direction: spec.direction,
            quantity: spec.quantity,
            kind: spec.kind,
            price,
            trigger_price,
            parent_order_id: spec.parent_order_id,
            status: OrderStatus::Pending,
            created_ms: time_util::now_ms(),
        };

        self.store.put(&order)?;

        if let Err(e) = self.broker.submit(&order).await {
            if let Err(se) = self.store.remove(order.id) {
                warn!("[orders] failed to drop record #{} after rejection: {se}", order.id);
            }
            return Err(ThetaError::OrderPlacementFailed {
                symbol: order.symbol,
                reason: e.to_string(),
            });
        }

        info!(target: ORDERS, "[orders] placed {order}");
        self.open.insert(order.id, order.clone());
        self.emit(OrderEvent::Placed(order.clone()));
        Ok(order)
    }

    /// Apply a fill to `ledger`.
    ///
    /// This is the only place a fill's direction becomes a signed quantity.
    /// When the fill names an order, that order is marked confirmed and its
    /// record discarded. If the ledger rejects the fill, the ledger and the
    /// order are untouched. Once the ledger has taken the fill, a failure to
    /// delete the durable record is only logged: the fill has happened, so the
    /// event is still emitted and the change returned.
    pub fn confirm(&mut self, ledger: &mut Ledger, fill: Fill) -> Result<Applied, ThetaError> {
        let applied = match fill.side {
            FillSide::Buy => ledger.open_or_add(
                &fill.symbol,
                Direction::Buy.signed(fill.quantity),
                fill.price,
            )?,
            FillSide::Sell => ledger.open_or_add(
                &fill.symbol,
                Direction::Sell.signed(fill.quantity),
                fill.price,
            )?,
            FillSide::Close => ledger
                .close(&fill.symbol, fill.price, fill.quantity)
                .map(Applied::Closed)
                .ok_or_else(|| ThetaError::InconsistentCloseRequest {
                    symbol: fill.symbol.clone(),
                })?,
        };

        if let Some(id) = fill.order_id {
            self.finish(id, OrderStatus::Confirmed);
        }

        let realized_pnl = match &applied {
            Applied::Closed(t) => Some(t.pnl),
            _ => None,
        };
        info!(
            target: ORDERS,
            "[orders] confirmed {} {} {} @ {}{}",
            fill.side,
            fill.quantity,
            fill.symbol,
            fill.price,
            realized_pnl.map(|p| format!(" pnl={p:.2}")).unwrap_or_default()
        );
        self.emit(OrderEvent::Confirmed {
            order_id: fill.order_id,
            symbol: fill.symbol,
            side: fill.side,
            quantity: fill.quantity,
            price: fill.price,
            realized_pnl,
        });
        Ok(applied)
    }

    /// Cancel an open order. Unknown ids return `Ok(None)`.
    ///
    /// A broker-side failure is logged; the order is dropped locally either way.
    pub async fn cancel(&mut self, order_id: u64) -> Result<Option<Order>, ThetaError> {
        let Some(mut order) = self.open.remove(&order_id) else {
            debug!("[orders] cancel of unknown order #{order_id} ignored");
            return Ok(None);
        };

        if let Err(e) = self.broker.cancel(&order).await {
            warn!("[orders] broker cancel failed for #{order_id}: {e}");
        }
        order.status = OrderStatus::Cancelled;
        self.store.remove(order_id)?;

        info!(target: ORDERS, "[orders] cancelled {order}");
        self.emit(OrderEvent::Cancelled(order.clone()));
        Ok(Some(order))
    }

    /// Outstanding orders, sorted by id.
    pub fn open_orders(&self) -> Vec<&Order> {
        let mut v: Vec<&Order> = self.open.values().collect();
        v.sort_by_key(|o| o.id);
        v
    }

    pub fn get(&self, order_id: u64) -> Option<&Order> {
        self.open.get(&order_id)
    }

    fn finish(&mut self, id: u64, status: OrderStatus) {
        match self.open.remove(&id) {
            Some(mut order) => {
                order.status = status;
                debug!("[orders] #{id} -> {status:?}");
            }
            None => debug!("[orders] #{id} was not open"),
        }
        if let Err(e) = self.store.remove(id) {
            warn!(target: ORDERS, "[orders] record of #{id} left behind: {e}");
        }
    }

    fn emit(&self, event: OrderEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use theta_md::QuoteBook;

    use super::*;
    use crate::event;
    use crate::paper::PaperBroker;
    use crate::store::MemoryOrderStore;

    struct Fixture {
        book: QuoteBook,
        broker: Arc<PaperBroker>,
        store: Arc<MemoryOrderStore>,
        mgr: OrderManager,
    }

    fn fixture() -> Fixture {
        let book = QuoteBook::new(None);
        let broker = Arc::new(PaperBroker::new());
        let store = Arc::new(MemoryOrderStore::new());
        let mgr = OrderManager::new(
            Arc::new(book.clone()),
            broker.clone(),
            store.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        Fixture { book, broker, store, mgr }
    }

    #[test]
    fn ids_are_unique_under_concurrency() {
        let f = fixture();
        let mgr = &f.mgr;
        let ids: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..1000).map(|_| mgr.next_order_id()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 8000);

        let a = mgr.next_order_id();
        let b = mgr.next_order_id();
        assert!(b > a && a > *ids.iter().max().unwrap());
    }

    #[tokio::test]
    async fn market_order_is_priced_from_quotes() {
        let mut f = fixture();
        f.book.set("CE", 120.0);
        let (tx, mut rx) = event::channel();
        f.mgr = f.mgr.with_events(tx);

        let o = f.mgr.place(OrderSpec::market("CE", Direction::Sell, 75)).await.unwrap();
        assert_eq!(o.price, Some(120.0));
        assert_eq!(o.status, OrderStatus::Pending);
        assert_eq!(f.broker.submitted().len(), 1);
        assert_eq!(f.store.len(), 1);
        assert!(f.mgr.get(o.id).is_some());
        assert!(matches!(rx.try_recv(), Ok(OrderEvent::Placed(p)) if p.id == o.id));
    }

    #[tokio::test]
    async fn missing_quote_never_submits() {
        let mut f = fixture();
        let first = f.mgr.next_order_id();
        let err = f.mgr.place(OrderSpec::market("CE", Direction::Sell, 75)).await.unwrap_err();
        assert!(matches!(err, ThetaError::QuoteUnavailable { attempts: 3, .. }));
        assert!(f.broker.submitted().is_empty());
        assert!(f.store.is_empty());
        assert!(f.mgr.open_orders().is_empty());
        // No id was consumed by the failed placement.
        assert_eq!(f.mgr.next_order_id(), first + 1);
    }

    #[tokio::test]
    async fn stop_order_needs_trigger_not_quote() {
        let mut f = fixture();
        let o = f
            .mgr
            .place(OrderSpec::stop_market("CE", Direction::Buy, 75, 132.0, Some(1)))
            .await
            .unwrap();
        assert_eq!(o.trigger_price, Some(132.0));
        assert_eq!(o.price, None);
        assert_eq!(o.parent_order_id, Some(1));

        let mut bad = OrderSpec::stop_market("CE", Direction::Buy, 75, 0.0, None);
        assert!(matches!(
            f.mgr.place(bad.clone()).await,
            Err(ThetaError::OrderPlacementFailed { .. })
        ));
        bad.trigger_price = None;
        assert!(f.mgr.place(bad).await.is_err());
    }

    #[tokio::test]
    async fn broker_rejection_leaves_no_record() {
        let mut f = fixture();
        f.book.set("PE", 118.0);
        f.broker.reject_symbol("PE");
        let err = f.mgr.place(OrderSpec::market("PE", Direction::Sell, 75)).await.unwrap_err();
        assert!(matches!(err, ThetaError::OrderPlacementFailed { .. }));
        assert!(f.store.is_empty());
        assert!(f.mgr.open_orders().is_empty());
    }

    #[tokio::test]
    async fn confirm_signs_and_discards_record() {
        let mut f = fixture();
        let mut ledger = Ledger::new();
        f.book.set("CE", 120.0);

        let o = f.mgr.place(OrderSpec::market("CE", Direction::Sell, 75)).await.unwrap();
        let fill = Fill::new("CE", 75, 120.0, FillSide::Sell).for_order(o.id);
        assert_eq!(f.mgr.confirm(&mut ledger, fill).unwrap(), Applied::Opened);
        assert_eq!(ledger.position("CE").unwrap().signed_quantity, -75);
        assert!(f.store.is_empty());
        assert!(f.mgr.get(o.id).is_none());

        let closed = f.mgr.confirm(&mut ledger, Fill::new("CE", 75, 133.0, FillSide::Close)).unwrap();
        match closed {
            Applied::Closed(t) => assert!((t.pnl + 975.0).abs() < 1e-9),
            other => panic!("expected close, got {other:?}"),
        }
        assert!(ledger.is_flat());
    }

    struct StuckStore(MemoryOrderStore);

    impl OrderStore for StuckStore {
        fn put(&self, order: &Order) -> Result<(), ThetaError> {
            self.0.put(order)
        }
        fn remove(&self, _id: u64) -> Result<(), ThetaError> {
            Err(ThetaError::OrderStore("disk full".into()))
        }
        fn load_all(&self) -> Result<Vec<Order>, ThetaError> {
            self.0.load_all()
        }
    }

    #[tokio::test]
    async fn confirm_survives_record_removal_failure() {
        let book = QuoteBook::new(None);
        book.set("CE", 120.0);
        let store = Arc::new(StuckStore(MemoryOrderStore::new()));
        let (tx, mut rx) = event::channel();
        let mut mgr = OrderManager::new(
            Arc::new(book),
            Arc::new(PaperBroker::new()),
            store.clone(),
            RetryPolicy::once(),
        )
        .with_events(tx);
        let mut ledger = Ledger::new();

        let o = mgr.place(OrderSpec::market("CE", Direction::Sell, 75)).await.unwrap();
        let fill = Fill::new("CE", 75, 120.0, FillSide::Sell).for_order(o.id);
        assert_eq!(mgr.confirm(&mut ledger, fill).unwrap(), Applied::Opened);

        assert_eq!(ledger.position("CE").unwrap().signed_quantity, -75);
        assert!(mgr.get(o.id).is_none());
        // The record could not be deleted and is still there.
        assert_eq!(store.load_all().unwrap().len(), 1);

        assert!(matches!(rx.try_recv(), Ok(OrderEvent::Placed(_))));
        assert!(matches!(
            rx.try_recv(),
            Ok(OrderEvent::Confirmed { order_id: Some(id), .. }) if id == o.id
        ));
    }

    #[tokio::test]
    async fn close_of_absent_symbol_is_inconsistent() {
        let mut f = fixture();
        let mut ledger = Ledger::new();
        let stop = f
            .mgr
            .place(OrderSpec::stop_market("CE", Direction::Buy, 75, 132.0, None))
            .await
            .unwrap();
        let err = f
            .mgr
            .confirm(&mut ledger, Fill::new("CE", 75, 133.0, FillSide::Close).for_order(stop.id))
            .unwrap_err();
        assert!(matches!(err, ThetaError::InconsistentCloseRequest { .. }));
        assert!(err.is_recoverable());
        // The stop is still outstanding.
        assert!(f.mgr.get(stop.id).is_some());
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn cancel_removes_record() {
        let mut f = fixture();
        let stop = f
            .mgr
            .place(OrderSpec::stop_market("CE", Direction::Buy, 75, 132.0, None))
            .await
            .unwrap();
        let c = f.mgr.cancel(stop.id).await.unwrap().unwrap();
        assert_eq!(c.status, OrderStatus::Cancelled);
        assert!(f.store.is_empty());
        assert_eq!(f.broker.cancelled(), [stop.id]);
        assert!(f.mgr.cancel(stop.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recover_seeds_counter_and_open_set() {
        let f = fixture();
        let mut first = f.mgr;
        first
            .place(OrderSpec::stop_market("CE", Direction::Buy, 75, 132.0, None))
            .await
            .unwrap();
        let last = first
            .place(OrderSpec::stop_market("PE", Direction::Buy, 75, 129.8, None))
            .await
            .unwrap();

        let mut restarted = OrderManager::new(
            Arc::new(f.book.clone()),
            f.broker.clone(),
            f.store.clone(),
            RetryPolicy::once(),
        );
        assert_eq!(restarted.recover().unwrap(), 2);
        assert_eq!(restarted.open_orders().len(), 2);
        assert!(restarted.next_order_id() > last.id);
    }
}
