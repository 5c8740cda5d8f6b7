//! # theta-td
//!
//! Order lifecycle: placement, confirmation into the ledger, cancellation,
//! and durable order records.
//!
//! The lifecycle of one order is:
//! `OrderManager::place` → [`Broker::submit`] → `OrderManager::confirm` (or
//! `OrderManager::cancel` → [`Broker::cancel`]).
//!
//! ## Brokers
//!
//! | Broker         | Module  | Fills                           |
//! |----------------|---------|---------------------------------|
//! | `PaperBroker`  | `paper` | immediate, at the resolved price |

pub mod event;
pub mod manager;
pub mod paper;
pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use theta_core::Order;

pub use event::{OrderEvent, OrderEventReceiver, OrderEventSender};
pub use manager::OrderManager;
pub use paper::PaperBroker;
pub use store::{FileOrderStore, MemoryOrderStore, OrderStore};

/// Transport to the execution venue.
///
/// Both operations take `&self` so one broker can be shared behind an `Arc`.
#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a priced order. An `Err` means the venue did not accept it.
    async fn submit(&self, order: &Order) -> Result<()>;

    /// Cancel a previously submitted order.
    async fn cancel(&self, order: &Order) -> Result<()>;
}
