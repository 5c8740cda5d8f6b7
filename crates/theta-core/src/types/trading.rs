//! Trading-related data structures: orders, fills, positions, and snapshots.
//!
//! These types flow between the risk monitor, the order lifecycle manager,
//! the ledger, and the telemetry sinks.

use serde::{Deserialize, Serialize};

use super::enums::{Direction, FillSide, OrderKind, OrderStatus};

// ---------------------------------------------------------------------------
// Order intent (monitor → order manager)
// ---------------------------------------------------------------------------

/// An order request handed to the order manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Trading symbol of the leg.
    pub symbol: String,
    /// Buy or sell.
    pub direction: Direction,
    /// Order quantity (contracts).
    pub quantity: u64,
    /// Market or stop-market.
    pub kind: OrderKind,
    /// Trigger price (stop-market only).
    pub trigger_price: Option<f64>,
    /// Entry order this protective order belongs to.
    pub parent_order_id: Option<u64>,
}

impl OrderSpec {
    /// A market order, priced from the quote source at placement.
    pub fn market(symbol: impl Into<String>, direction: Direction, quantity: u64) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            quantity,
            kind: OrderKind::Market,
            trigger_price: None,
            parent_order_id: None,
        }
    }

    /// A protective stop-market order linked to `parent_order_id`.
    pub fn stop_market(
        symbol: impl Into<String>,
        direction: Direction,
        quantity: u64,
        trigger_price: f64,
        parent_order_id: Option<u64>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            quantity,
            kind: OrderKind::StopMarket,
            trigger_price: Some(trigger_price),
            parent_order_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Order record
// ---------------------------------------------------------------------------

/// A submitted order as recorded by the order manager and the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Process-unique, monotonically increasing id.
    pub id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: u64,
    pub kind: OrderKind,
    /// Resolved execution price (market orders).
    pub price: Option<f64>,
    /// Trigger price (stop-market orders).
    pub trigger_price: Option<f64>,
    /// Back-reference to the protected entry order. Lookup only.
    pub parent_order_id: Option<u64>,
    pub status: OrderStatus,
    /// Submission time (ms since epoch).
    pub created_ms: u64,
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} {} {} {}", self.id, self.kind, self.direction, self.quantity, self.symbol)?;
        match (self.price, self.trigger_price) {
            (Some(p), _) => write!(f, " @ {p}"),
            (None, Some(t)) => write!(f, " trigger @ {t}"),
            (None, None) => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fill (broker → order manager → ledger)
// ---------------------------------------------------------------------------

/// A confirmed execution to be applied to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    /// Unsigned quantity; the sign is derived from `side` at confirmation.
    pub quantity: u64,
    pub price: f64,
    pub side: FillSide,
    /// Outstanding order record to discard once applied.
    pub order_id: Option<u64>,
}

impl Fill {
    pub fn new(symbol: impl Into<String>, quantity: u64, price: f64, side: FillSide) -> Self {
        Self { symbol: symbol.into(), quantity, price, side, order_id: None }
    }

    /// Attach the order id whose record should be removed on confirmation.
    pub fn for_order(mut self, order_id: u64) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// One open exposure in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Net quantity (positive = long, negative = short). Never zero.
    pub signed_quantity: i64,
    /// Quantity-weighted average entry price.
    pub entry_price: f64,
    /// Last price used for unrealized PnL.
    pub mark_price: f64,
}

impl Position {
    #[inline]
    pub fn abs_quantity(&self) -> u64 {
        self.signed_quantity.unsigned_abs()
    }

    /// Mark-to-market PnL of this position.
    #[inline]
    pub fn unrealized_pnl(&self) -> f64 {
        (self.mark_price - self.entry_price) * self.signed_quantity as f64
    }
}

/// Result of a close applied to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    /// Closed quantity carrying the sign of the position it came from.
    pub closed_signed_quantity: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Realized PnL of this close.
    pub pnl: f64,
    /// Signed quantity left open (0 = position removed).
    pub remaining: i64,
}

// ---------------------------------------------------------------------------
// Ledger snapshot (ledger → telemetry)
// ---------------------------------------------------------------------------

/// Immutable view of the ledger for telemetry export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Snapshot time (ms since epoch).
    pub timestamp_ms: u64,
    /// Open positions, sorted by symbol.
    pub positions: Vec<Position>,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_pnl: f64,
    /// Total PnL as a percentage of the trade margin (0 without margin).
    pub roi: f64,
    pub trade_margin: f64,
    /// Σ entry_price × |quantity|.
    pub total_entry_value: f64,
    /// Σ mark_price × |quantity|.
    pub total_current_value: f64,
}
