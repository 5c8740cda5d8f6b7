//! Position ledger: symbol → position map plus aggregate PnL figures.
//!
//! The ledger is pure state and arithmetic: no I/O, no suspension points.
//! Quantities arrive already signed (positive = long, negative = short); the
//! conversion from a fill's direction happens once, at order confirmation.
//!
//! # PnL conventions
//!
//! - Unrealized: `Σ (mark - entry) × signed_qty`, recomputed in full on every
//!   mutation.
//! - Realized: `(exit - entry) × closed_signed_qty`, where the closed quantity
//!   carries the sign of the position it reduces, so a favourable move is
//!   always positive.
//!
//! # Thread safety
//!
//! Not thread-safe. The ledger has a single owner (the monitor task) and all
//! mutations are applied one at a time.

use ahash::AHashMap;
use tracing::warn;

use crate::error::ThetaError;
use crate::types::{ClosedTrade, LedgerSnapshot, Position};

/// What an [`Ledger::open_or_add`] call did.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// New position created.
    Opened,
    /// Same-side add; entry price re-averaged.
    Added { entry_price: f64, signed_quantity: i64 },
    /// The add netted the position to exactly zero.
    Closed(ClosedTrade),
}

#[derive(Debug, Default)]
pub struct Ledger {
    positions: AHashMap<String, Position>,
    realized_pnl: f64,
    unrealized_pnl: f64,
    trade_margin: f64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the margin committed to the trade (ROI denominator).
    pub fn set_trade_margin(&mut self, margin: f64) {
        self.trade_margin = margin;
    }

    pub fn trade_margin(&self) -> f64 {
        self.trade_margin
    }

    /// Open a position or add same-side exposure to it.
    ///
    /// An add that nets the position to exactly zero is applied as a full
    /// close at `price`. An opposite-side add that leaves a residual is
    /// rejected and the ledger is left untouched.
    pub fn open_or_add(
        &mut self,
        symbol: &str,
        signed_delta: i64,
        price: f64,
    ) -> Result<Applied, ThetaError> {
        if signed_delta == 0 {
            return Err(ThetaError::InvalidQuantity { symbol: symbol.to_string() });
        }

        let Some(held) = self.positions.get(symbol).map(|p| p.signed_quantity) else {
            self.positions.insert(
                symbol.to_string(),
                Position {
                    symbol: symbol.to_string(),
                    signed_quantity: signed_delta,
                    entry_price: price,
                    mark_price: price,
                },
            );
            self.recompute_unrealized();
            return Ok(Applied::Opened);
        };

        let total = held + signed_delta;

        if total == 0 {
            let closed = self.close(symbol, price, signed_delta.unsigned_abs());
            return closed
                .map(Applied::Closed)
                .ok_or_else(|| ThetaError::InconsistentCloseRequest { symbol: symbol.to_string() });
        }

        if held.signum() != signed_delta.signum() {
            return Err(ThetaError::OppositeSideAdd {
                symbol: symbol.to_string(),
                held,
                delta: signed_delta,
            });
        }

        let pos = self
            .positions
            .get_mut(symbol)
            .ok_or_else(|| ThetaError::InconsistentCloseRequest { symbol: symbol.to_string() })?;
        pos.entry_price =
            (held as f64 * pos.entry_price + signed_delta as f64 * price) / total as f64;
        pos.signed_quantity = total;
        let applied = Applied::Added { entry_price: pos.entry_price, signed_quantity: total };

        self.recompute_unrealized();
        Ok(applied)
    }

    /// Close up to `quantity_to_close` of the position at `exit_price`.
    ///
    /// Returns `None` if the symbol has no position. The quantity is clamped to
    /// the open amount, so a close never flips the side.
    pub fn close(
        &mut self,
        symbol: &str,
        exit_price: f64,
        quantity_to_close: u64,
    ) -> Option<ClosedTrade> {
        let pos = self.positions.get_mut(symbol)?;

        let qty = quantity_to_close.min(pos.abs_quantity()) as i64;
        let closed_signed = qty * pos.signed_quantity.signum();
        let pnl = (exit_price - pos.entry_price) * closed_signed as f64;

        self.realized_pnl += pnl;
        pos.signed_quantity -= closed_signed;

        let trade = ClosedTrade {
            symbol: symbol.to_string(),
            closed_signed_quantity: closed_signed,
            entry_price: pos.entry_price,
            exit_price,
            pnl,
            remaining: pos.signed_quantity,
        };

        if pos.signed_quantity == 0 {
            self.positions.remove(symbol);
        }

        self.recompute_unrealized();
        Some(trade)
    }

    /// Mark a position to `price`. Returns `false` (no-op) if absent.
    pub fn mark(&mut self, symbol: &str, price: f64) -> bool {
        let Some(pos) = self.positions.get_mut(symbol) else {
            warn!("[ledger] mark of {symbol} ignored, no open position");
            return false;
        };
        pos.mark_price = price;
        self.recompute_unrealized();
        true
    }

    fn recompute_unrealized(&mut self) {
        self.unrealized_pnl = self.positions.values().map(Position::unrealized_pnl).sum();
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Open symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut syms: Vec<String> = self.positions.keys().cloned().collect();
        syms.sort();
        syms
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl
    }

    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl
    }

    /// Total PnL as a percentage of the trade margin; 0 without margin.
    pub fn roi(&self) -> f64 {
        if self.trade_margin == 0.0 {
            0.0
        } else {
            self.total_pnl() / self.trade_margin * 100.0
        }
    }

    /// Immutable view of positions and aggregates.
    pub fn snapshot(&self, timestamp_ms: u64) -> LedgerSnapshot {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let total_entry_value =
            positions.iter().map(|p| p.entry_price * p.abs_quantity() as f64).sum();
        let total_current_value =
            positions.iter().map(|p| p.mark_price * p.abs_quantity() as f64).sum();

        LedgerSnapshot {
            timestamp_ms,
            positions,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            total_pnl: self.total_pnl(),
            roi: self.roi(),
            trade_margin: self.trade_margin,
            total_entry_value,
            total_current_value,
        }
    }
}
