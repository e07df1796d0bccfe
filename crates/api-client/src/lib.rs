//! # API Client Crate
//!
//! The interfaces through which the runtime talks to the brokerage.
//!
//! ## Architectural Principles
//!
//! - **Injected clients:** every consumer receives an implementation of the
//!   traits below; there is no process-wide client state. Concrete RPC stubs
//!   live outside this workspace and only need to implement these traits.
//! - **Retry at the edge:** [`RetryingClient`] wraps any client and retries
//!   idempotent calls on `Unavailable`. Order submission is never retried.
//! - **One stream, five queues:** [`stream::MarketDataStream`] multiplexes all
//!   market-data subscriptions over a single bidirectional stream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{
    Candle, CandleInterval, Instrument, LastPrice, OrderBook, OrderReport, OrderRequest,
    TradingDay,
};
use uuid::Uuid;

pub mod auth;
pub mod error;
pub mod responses;
pub mod retry;
pub mod stream;

// --- Public API ---
pub use auth::RequestMetadata;
pub use error::{ApiError, StatusCode, StreamError};
pub use responses::{Portfolio, PortfolioPosition, Positions, ResponseMetadata};
pub use retry::{RetryPolicy, RetryingClient};

/// Unary market-data and reference-data calls. All of them are idempotent.
#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Lists the tradable shares.
    async fn instruments(&self) -> Result<Vec<Instrument>, ApiError>;

    async fn instrument_by_uid(&self, uid: &str) -> Result<Instrument, ApiError>;

    /// Historical candles with `time` in `[from, to)`. The broker caps the
    /// span of one request at [`CandleInterval::max_request_span`].
    async fn candles(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ApiError>;

    async fn last_prices(&self, instrument_uids: &[String]) -> Result<Vec<LastPrice>, ApiError>;

    async fn order_book(&self, instrument_uid: &str, depth: u32) -> Result<OrderBook, ApiError>;

    /// Published schedule of `exchange` for the days between `from` and `to`.
    async fn trading_schedules(
        &self,
        exchange: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradingDay>, ApiError>;
}

/// Account state. (Authenticated)
#[async_trait]
pub trait OperationsApi: Send + Sync {
    async fn positions(&self, account_id: &str) -> Result<crate::Positions, ApiError>;

    /// Valued holdings of the account.
    async fn portfolio(&self, account_id: &str) -> Result<crate::Portfolio, ApiError>;
}

/// Order management. (Authenticated)
#[async_trait]
pub trait OrdersApi: Send + Sync {
    /// Places a new order. `request.order_id` is the idempotency key.
    async fn post_order(&self, request: &OrderRequest) -> Result<OrderReport, ApiError>;

    async fn cancel_order(&self, account_id: &str, order_id: Uuid) -> Result<(), ApiError>;

    async fn order_state(&self, account_id: &str, order_id: Uuid) -> Result<OrderReport, ApiError>;
}

/// The slice of [`MarketDataApi`] the candle store depends on.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ApiError>;
}

#[async_trait]
impl<T: MarketDataApi + ?Sized> CandleSource for T {
    async fn fetch_candles(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ApiError> {
        self.candles(instrument_uid, interval, from, to).await
    }
}

/// The slice of [`MarketDataApi`] the session timer depends on.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn schedule(
        &self,
        exchange: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradingDay>, ApiError>;
}

#[async_trait]
impl<T: MarketDataApi + ?Sized> ScheduleSource for T {
    async fn schedule(
        &self,
        exchange: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradingDay>, ApiError> {
        self.trading_schedules(exchange, from, to).await
    }
}
