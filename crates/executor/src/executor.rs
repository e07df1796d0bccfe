use crate::error::ExecutorError;
use crate::exchange::OrderGateway;
use crate::portfolio::{Portfolio, Position};
use crate::prices::LastPriceTable;
use configuration::ExecutorConfig;
use core_types::{Instrument, OrderReport, OrderRequest, OrderSide, Quotation};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lots per order for an instrument whose lot costs `lot_price`, or `None`
/// when a single lot is above `max`.
pub fn position_quantity(lot_price: Decimal, preferred: Decimal, max: Decimal) -> Option<i64> {
    if lot_price <= Decimal::ZERO || lot_price > max {
        return None;
    }
    if lot_price < preferred {
        (preferred / lot_price).floor().to_i64()
    } else {
        Some(1)
    }
}

/// The single component allowed to submit orders.
///
/// Keeps per-instrument positions, sizes orders, and applies the profit
/// target and stop-loss. Position changes happen under the book lock together
/// with the order that caused them.
pub struct Executor {
    gateway: Arc<dyn OrderGateway>,
    prices: LastPriceTable,
    book: Mutex<Portfolio>,
    min_profit_pct: Decimal,
}

impl Executor {
    /// Sizes every instrument against the current last prices. Instruments
    /// without a price or whose lot costs more than `max_position_price` are
    /// dropped.
    pub async fn new(
        gateway: Arc<dyn OrderGateway>,
        instruments: &[Instrument],
        prices: LastPriceTable,
        config: &ExecutorConfig,
    ) -> Self {
        let mut positions = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let Some(last) = prices.get(&instrument.uid).await else {
                tracing::warn!(instrument = %instrument.uid, "No last price, instrument dropped.");
                continue;
            };
            let lot_price = last.to_decimal() * Decimal::from(instrument.lot);
            match position_quantity(lot_price, config.preferred_position_price, config.max_position_price) {
                Some(quantity) => {
                    tracing::debug!(instrument = %instrument.uid, %lot_price, quantity, "Instrument sized.");
                    positions.push(Position::new(instrument, quantity, config.stop_loss_pct));
                }
                None => {
                    tracing::info!(instrument = %instrument.uid, %lot_price, max = %config.max_position_price, "Lot too expensive, instrument dropped.");
                }
            }
        }

        Self {
            gateway,
            prices,
            book: Mutex::new(Portfolio::new(positions)),
            min_profit_pct: config.min_profit_pct,
        }
    }

    /// UIDs of the instruments that survived sizing.
    pub async fn instruments(&self) -> Vec<String> {
        let mut uids: Vec<String> = self
            .book
            .lock()
            .await
            .positions()
            .map(|p| p.instrument_uid.clone())
            .collect();
        uids.sort();
        uids
    }

    pub async fn position(&self, instrument_uid: &str) -> Option<Position> {
        self.book.lock().await.get(instrument_uid).cloned()
    }

    pub async fn in_stock(&self, instrument_uid: &str) -> bool {
        self.book
            .lock()
            .await
            .get(instrument_uid)
            .is_some_and(|p| p.in_stock)
    }

    /// Sum of the per-unit results of every filled sell.
    pub async fn realized_total(&self) -> Decimal {
        self.book.lock().await.realized_total()
    }

    /// Realized result in currency, before commission.
    pub async fn realized_money(&self) -> Decimal {
        self.book.lock().await.realized_money()
    }

    pub async fn closed_trades(&self) -> usize {
        self.book.lock().await.closed_trades()
    }

    pub async fn last_price_update(&self, instrument_uid: &str, price: Quotation) {
        self.prices.update(instrument_uid, price).await;
    }

    /// Opens a position with a market buy. Returns `true` when the order
    /// filled. No-op if already in stock, the instrument is not traded, or the
    /// account lacks the cash for the order.
    pub async fn buy(&self, instrument_uid: &str) -> Result<bool, ExecutorError> {
        let mut book = self.book.lock().await;
        let Some(position) = book.get(instrument_uid) else {
            tracing::debug!(instrument = %instrument_uid, "Buy ignored, instrument is not traded.");
            return Ok(false);
        };
        if position.in_stock {
            return Ok(false);
        }
        let Some(last) = self.prices.get(instrument_uid).await else {
            tracing::warn!(instrument = %instrument_uid, "Buy skipped, no last price.");
            return Ok(false);
        };

        let required = last.to_decimal() * Decimal::from(position.pieces());
        let cash = self.gateway.available_cash(&position.currency).await?;
        if cash.to_decimal() < required {
            tracing::info!(instrument = %instrument_uid, %required, available = %cash, currency = %position.currency, "Buy skipped, insufficient funds.");
            return Ok(false);
        }

        let request = OrderRequest::market(
            self.gateway.account_id(),
            instrument_uid,
            OrderSide::Buy,
            position.quantity,
        );
        let Some(report) = self.submit(&request).await? else {
            return Ok(false);
        };

        let entry = report.executed_price.unwrap_or(last);
        book.open(instrument_uid, entry);
        tracing::info!(instrument = %instrument_uid, %entry, lots = report.lots_executed, "Bought.");
        Ok(true)
    }

    /// Closes the position when the profit target is exceeded or the
    /// stop-loss is hit. Returns the realized result per unit,
    /// `executed_price - entry_price`, when the sell filled.
    pub async fn sell(&self, instrument_uid: &str) -> Result<Option<Decimal>, ExecutorError> {
        self.close(instrument_uid, true).await
    }

    /// Closes the position only if its stop-loss is hit.
    pub async fn stop_loss(&self, instrument_uid: &str) -> Result<Option<Decimal>, ExecutorError> {
        self.close(instrument_uid, false).await
    }

    async fn close(&self, instrument_uid: &str, take_profit: bool) -> Result<Option<Decimal>, ExecutorError> {
        let mut book = self.book.lock().await;
        let Some(position) = book.get(instrument_uid) else {
            return Ok(None);
        };
        if !position.in_stock {
            return Ok(None);
        }
        let Some(last) = self.prices.get(instrument_uid).await else {
            tracing::warn!(instrument = %instrument_uid, "Sell skipped, no last price.");
            return Ok(None);
        };

        let Some(profit_pct) = position.profit_pct(last) else {
            return Ok(None);
        };
        let stop_loss = position.stop_loss_triggered(last);
        let target = take_profit && profit_pct > self.min_profit_pct;
        if !target && !stop_loss {
            return Ok(None);
        }

        let request = OrderRequest::market(
            self.gateway.account_id(),
            instrument_uid,
            OrderSide::Sell,
            position.quantity,
        );
        let Some(report) = self.submit(&request).await? else {
            return Ok(None);
        };

        let realized = book.close(instrument_uid, report.executed_price.unwrap_or(last));
        tracing::info!(instrument = %instrument_uid, %profit_pct, stop_loss, realized = ?realized, "Sold.");
        Ok(realized)
    }

    /// Flattens every security held on the account with a market order in the
    /// opposite direction of its balance. Holdings of instruments this
    /// executor does not trade are left alone. Returns the number of filled
    /// orders.
    pub async fn sell_out(&self) -> Result<usize, ExecutorError> {
        let holdings = self.gateway.holdings().await?;
        let mut book = self.book.lock().await;
        let mut flattened = 0;

        for security in holdings {
            let Some(position) = book
                .find(&security.instrument_uid)
                .or_else(|| book.find(&security.figi))
            else {
                tracing::debug!(instrument = %security.instrument_uid, figi = %security.figi, "Sell-out skips unknown instrument.");
                continue;
            };
            let lots = security.balance / position.lot;
            if lots == 0 {
                continue;
            }
            let uid = position.instrument_uid.clone();
            let side = if lots > 0 { OrderSide::Sell } else { OrderSide::Buy };

            let request = OrderRequest::market(self.gateway.account_id(), &uid, side, lots.abs());
            let Some(report) = self.submit(&request).await? else {
                continue;
            };
            flattened += 1;
            if side == OrderSide::Sell {
                if let Some(price) = report.executed_price.or(self.prices.get(&uid).await) {
                    book.close(&uid, price);
                }
            }
            tracing::info!(instrument = %uid, ?side, lots = lots.abs(), "Position flattened.");
        }

        Ok(flattened)
    }

    /// Submits through the gateway. `None` means the order did not fill; the
    /// reason has been logged and the caller leaves its state unchanged.
    async fn submit(&self, request: &OrderRequest) -> Result<Option<OrderReport>, ExecutorError> {
        match self.gateway.submit(request).await {
            Ok(report) if report.status.is_filled() => Ok(Some(report)),
            Ok(report) => {
                tracing::warn!(
                    order_id = %report.order_id,
                    instrument = %report.instrument_uid,
                    status = ?report.status,
                    message = report.message.as_deref().unwrap_or("-"),
                    "Order not filled."
                );
                Ok(None)
            }
            Err(e) if e.is_rejection() => {
                tracing::warn!(order_id = %request.order_id, instrument = %request.instrument_uid, error = %e, "Order rejected.");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
