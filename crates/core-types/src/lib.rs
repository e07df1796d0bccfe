//! # Core Types
//!
//! Shared vocabulary of the workspace: the exact `(units, nano)` price
//! representation and the market entities every other crate exchanges.
//! This crate has no knowledge of transports, storage or strategies.

pub mod enums;
pub mod error;
pub mod quotation;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{CandleInterval, OrderExecutionStatus, OrderSide, OrderType};
pub use error::CoreError;
pub use quotation::{tick_count, MoneyValue, Quotation, NANO_PER_UNIT};
pub use structs::{
    Candle, Instrument, LastPrice, OrderBook, OrderBookLevel, OrderReport, OrderRequest,
    PortfolioSecurity, Trade, TradingDay, TradingStatus,
};
