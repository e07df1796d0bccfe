use crate::error::ApiError;
use crate::responses::{Portfolio, Positions};
use crate::{MarketDataApi, OperationsApi, OrdersApi};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{
    Candle, CandleInterval, Instrument, LastPrice, OrderBook, OrderReport, OrderRequest,
    TradingDay,
};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// Constant-backoff retry on `Unavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Runs `call` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. The last error is returned as is.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(operation, attempt, error = %err, "Transient failure, retrying.");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Wraps a client and applies a [`RetryPolicy`] to its idempotent calls.
#[derive(Debug, Clone)]
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: MarketDataApi> MarketDataApi for RetryingClient<C> {
    async fn instruments(&self) -> Result<Vec<Instrument>, ApiError> {
        let inner = &self.inner;
        self.policy.run("instruments", move || inner.instruments()).await
    }

    async fn instrument_by_uid(&self, uid: &str) -> Result<Instrument, ApiError> {
        let inner = &self.inner;
        self.policy
            .run("instrument_by_uid", move || inner.instrument_by_uid(uid))
            .await
    }

    async fn candles(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ApiError> {
        let inner = &self.inner;
        self.policy
            .run("candles", move || inner.candles(instrument_uid, interval, from, to))
            .await
    }

    async fn last_prices(&self, instrument_uids: &[String]) -> Result<Vec<LastPrice>, ApiError> {
        let inner = &self.inner;
        self.policy
            .run("last_prices", move || inner.last_prices(instrument_uids))
            .await
    }

    async fn order_book(&self, instrument_uid: &str, depth: u32) -> Result<OrderBook, ApiError> {
        let inner = &self.inner;
        self.policy
            .run("order_book", move || inner.order_book(instrument_uid, depth))
            .await
    }

    async fn trading_schedules(
        &self,
        exchange: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradingDay>, ApiError> {
        let inner = &self.inner;
        self.policy
            .run("trading_schedules", move || inner.trading_schedules(exchange, from, to))
            .await
    }
}

#[async_trait]
impl<C: OperationsApi> OperationsApi for RetryingClient<C> {
    async fn positions(&self, account_id: &str) -> Result<Positions, ApiError> {
        let inner = &self.inner;
        self.policy.run("positions", move || inner.positions(account_id)).await
    }

    async fn portfolio(&self, account_id: &str) -> Result<Portfolio, ApiError> {
        let inner = &self.inner;
        self.policy.run("portfolio", move || inner.portfolio(account_id)).await
    }
}

#[async_trait]
impl<C: OrdersApi> OrdersApi for RetryingClient<C> {
    // Not idempotent from the transport's point of view: passed through once.
    async fn post_order(&self, request: &OrderRequest) -> Result<OrderReport, ApiError> {
        self.inner.post_order(request).await
    }

    async fn cancel_order(&self, account_id: &str, order_id: Uuid) -> Result<(), ApiError> {
        self.inner.cancel_order(account_id, order_id).await
    }

    async fn order_state(&self, account_id: &str, order_id: Uuid) -> Result<OrderReport, ApiError> {
        let inner = &self.inner;
        self.policy
            .run("order_state", move || inner.order_state(account_id, order_id))
            .await
    }
}
