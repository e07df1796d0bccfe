use core_types::{Instrument, Quotation};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Per-instrument trading state held by the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub instrument_uid: String,
    pub figi: String,
    pub in_stock: bool,
    /// Execution price of the open buy; meaningless while `in_stock` is false.
    pub entry_price: Quotation,
    /// Order size in lots, fixed at construction.
    pub quantity: i64,
    pub lot: i64,
    pub currency: String,
    pub stop_loss_pct: Decimal,
}

impl Position {
    pub fn new(instrument: &Instrument, quantity: i64, stop_loss_pct: Decimal) -> Self {
        Self {
            instrument_uid: instrument.uid.clone(),
            figi: instrument.figi.clone(),
            in_stock: false,
            entry_price: Quotation::ZERO,
            quantity,
            lot: instrument.lot,
            currency: instrument.currency.clone(),
            stop_loss_pct,
        }
    }

    /// Number of pieces one order moves.
    pub fn pieces(&self) -> i64 {
        self.quantity.saturating_mul(self.lot)
    }

    /// `(last - entry) / entry * 100`, or `None` while flat.
    pub fn profit_pct(&self, last: Quotation) -> Option<Decimal> {
        let entry = self.entry_price.to_decimal();
        if !self.in_stock || entry.is_zero() {
            return None;
        }
        Some((last.to_decimal() - entry) / entry * Decimal::ONE_HUNDRED)
    }

    /// Whether the loss at `last` reached the stop-loss threshold.
    pub fn stop_loss_triggered(&self, last: Quotation) -> bool {
        self.profit_pct(last)
            .is_some_and(|profit| -profit >= self.stop_loss_pct)
    }
}

/// The executor's book: positions keyed by instrument UID plus the running
/// realized result. Only [`crate::Executor`] mutates it, and only together
/// with a filled order.
#[derive(Debug, Clone, Default)]
pub struct Portfolio {
    positions: HashMap<String, Position>,
    realized_per_unit: Decimal,
    realized_money: Decimal,
    closed_trades: usize,
}

impl Portfolio {
    pub fn new(positions: impl IntoIterator<Item = Position>) -> Self {
        Self {
            positions: positions
                .into_iter()
                .map(|p| (p.instrument_uid.clone(), p))
                .collect(),
            ..Default::default()
        }
    }

    pub fn get(&self, instrument_uid: &str) -> Option<&Position> {
        self.positions.get(instrument_uid)
    }

    /// Looks a position up by UID first, then by figi.
    pub fn find(&self, id: &str) -> Option<&Position> {
        self.positions
            .get(id)
            .or_else(|| self.positions.values().find(|p| p.figi == id))
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Records a filled buy.
    pub fn open(&mut self, instrument_uid: &str, executed_price: Quotation) {
        if let Some(position) = self.positions.get_mut(instrument_uid) {
            position.in_stock = true;
            position.entry_price = executed_price;
        }
    }

    /// Records a filled sell and returns the per-unit result
    /// `executed_price - entry_price`. `None` if nothing was open.
    pub fn close(&mut self, instrument_uid: &str, executed_price: Quotation) -> Option<Decimal> {
        let position = self.positions.get_mut(instrument_uid)?;
        if !position.in_stock {
            return None;
        }
        let per_unit = executed_price.to_decimal() - position.entry_price.to_decimal();
        position.in_stock = false;
        self.realized_per_unit += per_unit;
        self.realized_money += per_unit * Decimal::from(position.pieces());
        self.closed_trades += 1;
        Some(per_unit)
    }

    /// Sum of every per-unit sell result.
    pub fn realized_total(&self) -> Decimal {
        self.realized_per_unit
    }

    /// Realized result in the instruments' currency, before commission.
    pub fn realized_money(&self) -> Decimal {
        self.realized_money
    }

    pub fn closed_trades(&self) -> usize {
        self.closed_trades
    }
}
