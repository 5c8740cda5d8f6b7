//! Paper broker: accepts every order and only logs it.
//!
//! Symbols can be marked as rejecting to exercise placement failures.

use ahash::AHashSet;
use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use theta_core::Order;
use tracing::info;

use crate::Broker;

#[derive(Debug, Default)]
pub struct PaperBroker {
    submitted: Mutex<Vec<Order>>,
    cancelled: Mutex<Vec<u64>>,
    rejecting: Mutex<AHashSet<String>>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every later submission for `symbol`.
    pub fn reject_symbol(&self, symbol: &str) {
        self.rejecting.lock().insert(symbol.to_string());
    }

    /// Orders accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<Order> {
        self.submitted.lock().clone()
    }

    /// Ids of cancelled orders, in cancellation order.
    pub fn cancelled(&self) -> Vec<u64> {
        self.cancelled.lock().clone()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit(&self, order: &Order) -> Result<()> {
        if self.rejecting.lock().contains(&order.symbol) {
            bail!("paper broker rejects {}", order.symbol);
        }
        info!("[paper] submit {order}");
        self.submitted.lock().push(order.clone());
        Ok(())
    }

    async fn cancel(&self, order: &Order) -> Result<()> {
        info!("[paper] cancel #{}", order.id);
        self.cancelled.lock().push(order.id);
        Ok(())
    }
}
