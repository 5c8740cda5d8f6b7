//! Events emitted by the order manager to downstream consumers.
//!
//! The runner subscribes to an [`OrderEventReceiver`] and logs every event on
//! the `theta::orders` target.

use theta_core::{FillSide, Order};

/// A typed order lifecycle event.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    /// An order was accepted by the broker and is outstanding.
    Placed(Order),

    /// A fill was applied to the ledger.
    Confirmed {
        /// Order whose record was discarded, if any.
        order_id: Option<u64>,
        symbol: String,
        side: FillSide,
        quantity: u64,
        price: f64,
        /// Realized PnL of the fill, for closes.
        realized_pnl: Option<f64>,
    },

    /// An outstanding order was cancelled.
    Cancelled(Order),
}

impl std::fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placed(o) => write!(f, "placed {o}"),
            Self::Confirmed { order_id, symbol, side, quantity, price, realized_pnl } => {
                write!(f, "confirmed {side} {quantity} {symbol} @ {price}")?;
                if let Some(id) = order_id {
                    write!(f, " (order #{id})")?;
                }
                if let Some(pnl) = realized_pnl {
                    write!(f, " pnl={pnl:.2}")?;
                }
                Ok(())
            }
            Self::Cancelled(o) => write!(f, "cancelled {o}"),
        }
    }
}

/// Sender half of the order event channel.
pub type OrderEventSender = tokio::sync::mpsc::UnboundedSender<OrderEvent>;

/// Receiver half of the order event channel.
pub type OrderEventReceiver = tokio::sync::mpsc::UnboundedReceiver<OrderEvent>;

/// Create an order event channel.
pub fn channel() -> (OrderEventSender, OrderEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
