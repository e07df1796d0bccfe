use crate::enums::{CandleInterval, OrderExecutionStatus, OrderSide, OrderType};
use crate::error::CoreError;
use crate::quotation::Quotation;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tradable instrument as returned by the reference-data RPC.
/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub uid: String,
    pub figi: String,
    pub ticker: String,
    pub exchange: String,
    /// Number of pieces in one lot; always positive.
    pub lot: i64,
    pub currency: String,
    pub min_price_increment: Quotation,
    pub for_qualified_investor: bool,
}

/// An OHLC bar for one instrument at a fixed interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument_uid: String,
    pub interval: CandleInterval,
    /// Start of the bar, aligned to `interval`.
    pub time: DateTime<Utc>,
    pub open: Quotation,
    pub close: Quotation,
    pub high: Quotation,
    pub low: Quotation,
    pub volume: i64,
    pub is_complete: bool,
}

impl Candle {
    /// Checks `low <= open,close <= high`, `volume >= 0` and time alignment.
    pub fn validate(&self) -> Result<(), CoreError> {
        let within = |p: Quotation| self.low <= p && p <= self.high;
        if !within(self.open) || !within(self.close) {
            return Err(CoreError::InvalidCandle(format!(
                "{} at {}: open {} / close {} outside [{}, {}]",
                self.instrument_uid, self.time, self.open, self.close, self.low, self.high
            )));
        }
        if self.volume < 0 {
            return Err(CoreError::InvalidCandle(format!(
                "{} at {}: negative volume {}",
                self.instrument_uid, self.time, self.volume
            )));
        }
        if !self.interval.is_aligned(self.time) {
            return Err(CoreError::InvalidCandle(format!(
                "{} at {}: not aligned to {}",
                self.instrument_uid, self.time, self.interval
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Quotation,
    /// Quantity in lots.
    pub quantity: i64,
}

/// An order book snapshot. Bids descend by price, asks ascend; empty levels
/// are omitted rather than padded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    pub figi: String,
    pub instrument_uid: String,
    pub depth: u32,
    /// `false` marks a recoverable gap; consumers drop such snapshots.
    pub is_consistent: bool,
    pub time: DateTime<Utc>,
    pub limit_up: Option<Quotation>,
    pub limit_down: Option<Quotation>,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPrice {
    pub figi: String,
    pub instrument_uid: String,
    pub price: Quotation,
    pub time: DateTime<Utc>,
}

/// An anonymous market trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub figi: String,
    pub instrument_uid: String,
    pub direction: OrderSide,
    pub price: Quotation,
    pub quantity: i64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingStatus {
    pub figi: String,
    pub instrument_uid: String,
    pub status: String,
    pub time: DateTime<Utc>,
    pub limit_order_available: bool,
    pub market_order_available: bool,
}

/// One exchange day of the published trading schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingDay {
    pub exchange: String,
    pub date: NaiveDate,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_trading_day: bool,
}

impl TradingDay {
    /// Main session bounds, if this is a trading day with a published session.
    pub fn session(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.is_trading_day, self.start_time, self.end_time) {
            (true, Some(start), Some(end)) if start < end => Some((start, end)),
            _ => None,
        }
    }
}

/// A request to post an order. `order_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: Uuid,
    pub account_id: String,
    pub instrument_uid: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Quantity in lots.
    pub quantity: i64,
    pub price: Option<Quotation>,
}

impl OrderRequest {
    pub fn market(account_id: &str, instrument_uid: &str, side: OrderSide, quantity: i64) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            instrument_uid: instrument_uid.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }
}

/// The broker's answer to an order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReport {
    pub order_id: Uuid,
    pub instrument_uid: String,
    pub side: OrderSide,
    pub status: OrderExecutionStatus,
    pub lots_requested: i64,
    pub lots_executed: i64,
    /// Average execution price per piece, when anything executed.
    pub executed_price: Option<Quotation>,
    pub message: Option<String>,
}

/// A security held on the account. `balance` is in pieces and signed:
/// negative balances are short positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSecurity {
    pub figi: String,
    pub instrument_uid: String,
    pub balance: i64,
    pub blocked: i64,
}
