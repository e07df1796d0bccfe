//! # Engine Crate
//!
//! Runs the strategies against the live exchange. Each configured strategy is
//! a [`Bot`]: it owns a market-data stream and a session timer, and trades
//! through its own executor while the exchange session is open.
//!
//! ## Architectural Principles
//!
//! - **Supervision tree:** the engine's root token has one child per bot, and
//!   each bot hands child tokens to its stream driver and timer. A failing bot
//!   cancels only its own subtree and, when `sell_out` is set, flattens its
//!   positions before it returns.
//! - **Injected clients:** the RPC clients, the order gateway and the clock
//!   arrive through [`EngineContext`]; nothing here is process-global.
//! - **Session gating:** order books and candles are only acted on between a
//!   `Start` and the following `Stop`.
//!
//! ## Public API
//!
//! - `LiveEngine`: Builds the bots from the configuration and supervises them.
//! - `Bot`, `OrderBookBot`, `IntervalBot`: The live strategy runners.
//! - `EngineContext`: The clients and settings shared by all bots.
//! - `EngineError`: The specific error types that can be returned from this crate.

use crate::error::EngineError;
use api_client::stream::{StreamConfig, StreamTransport};
use api_client::{MarketDataApi, OperationsApi, OrdersApi, ScheduleSource};
use async_trait::async_trait;
use configuration::{Config, ExecutorConfig, TimerConfig};
use database::CandleStore;
use executor::{LastPriceTable, LiveGateway, OrderGateway};
use std::sync::Arc;
use timer::{Clock, SystemClock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub mod error;
pub mod interval_bot;
pub mod order_book_bot;
mod runtime;
#[cfg(test)]
mod testing;

pub use interval_bot::IntervalBot;
pub use order_book_bot::OrderBookBot;

/// Everything a bot needs from the outside world.
pub struct EngineContext {
    pub market_data: Arc<dyn MarketDataApi>,
    pub schedule: Arc<dyn ScheduleSource>,
    pub transport: Arc<dyn StreamTransport>,
    pub gateway: Arc<dyn OrderGateway>,
    pub clock: Arc<dyn Clock>,
    /// Shared by the stream consumers, the executors and the gateway.
    pub prices: LastPriceTable,
    pub executor: ExecutorConfig,
    pub timer: TimerConfig,
    pub stream: StreamConfig,
}

impl EngineContext {
    /// Wires the brokerage clients for trading on `config.api.account_id`.
    pub fn live<M: MarketDataApi + 'static>(
        market_data: Arc<M>,
        transport: Arc<dyn StreamTransport>,
        orders: Arc<dyn OrdersApi>,
        operations: Arc<dyn OperationsApi>,
        config: &Config,
    ) -> Self {
        Self {
            market_data: market_data.clone(),
            schedule: market_data,
            transport,
            gateway: Arc::new(LiveGateway::new(orders, operations, config.api.account_id.clone())),
            clock: Arc::new(SystemClock),
            prices: LastPriceTable::new(),
            executor: config.executor.clone(),
            timer: config.timer.clone(),
            stream: StreamConfig::default(),
        }
    }
}

/// A live strategy runner.
#[async_trait]
pub trait Bot: Send + Sync {
    fn name(&self) -> &'static str;

    /// Trades until `cancel` fires or the bot fails. Returns `Ok` only on
    /// cancellation.
    async fn run(&self, context: Arc<EngineContext>, cancel: CancellationToken) -> Result<(), EngineError>;
}

/// The central orchestrator for the live trading application.
pub struct LiveEngine {
    context: Arc<EngineContext>,
    bots: Vec<Arc<dyn Bot>>,
}

impl LiveEngine {
    pub fn new(context: EngineContext) -> Self {
        Self {
            context: Arc::new(context),
            bots: Vec::new(),
        }
    }

    /// Creates a bot for every strategy section present in `config`.
    pub async fn from_config(config: &Config, context: EngineContext) -> Result<Self, EngineError> {
        let mut engine = Self::new(context);

        if let Some(params) = &config.order_book {
            engine = engine.with_bot(OrderBookBot::new(params.clone())?);
        }
        if let Some(params) = &config.interval {
            let history = chrono::Duration::days(config.storage.history_days);
            let store = CandleStore::open(&config.storage.path).await?.with_history_depth(history);
            engine = engine.with_bot(IntervalBot::new(params.clone(), store, history)?);
        }

        if engine.bots.is_empty() {
            return Err(EngineError::Configuration(
                "neither [order_book] nor [interval] is configured".to_string(),
            ));
        }
        Ok(engine)
    }

    pub fn with_bot(mut self, bot: impl Bot + 'static) -> Self {
        self.bots.push(Arc::new(bot));
        self
    }

    pub fn bots(&self) -> Vec<&'static str> {
        self.bots.iter().map(|bot| bot.name()).collect()
    }

    /// Runs every bot under a child of `cancel` until all of them have
    /// returned. A failed bot does not stop the others; the first failure is
    /// returned once everything has wound down.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        let mut tasks = JoinSet::new();
        for bot in &self.bots {
            let bot = bot.clone();
            let context = self.context.clone();
            let token = cancel.child_token();
            tracing::info!(bot = bot.name(), "Starting bot.");
            tasks.spawn(async move { (bot.name(), bot.run(context, token).await) });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = joined?;
            match result {
                Ok(()) => tracing::info!(bot = name, "Bot stopped."),
                Err(e) => {
                    tracing::error!(bot = name, error = %e, "Bot failed.");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_for, market, TestExchange};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Fails right away.
    struct Broken;

    #[async_trait]
    impl Bot for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn run(&self, _context: Arc<EngineContext>, _cancel: CancellationToken) -> Result<(), EngineError> {
            Err(EngineError::Closed("market data stream"))
        }
    }

    /// Waits for cancellation and records it.
    struct Patient {
        cancelled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Bot for Patient {
        fn name(&self) -> &'static str {
            "patient"
        }

        async fn run(&self, _context: Arc<EngineContext>, cancel: CancellationToken) -> Result<(), EngineError> {
            cancel.cancelled().await;
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_bot_leaves_siblings_running() {
        let exchange = TestExchange::new(market(&[("SBER", 100)])).await;
        let cancelled = Arc::new(AtomicBool::new(false));
        let engine = LiveEngine::new(context_for(&exchange))
            .with_bot(Broken)
            .with_bot(Patient {
                cancelled: cancelled.clone(),
            });
        assert_eq!(engine.bots(), vec!["broken", "patient"]);

        let root = CancellationToken::new();
        let run = tokio::spawn({
            let root = root.clone();
            async move { engine.run(root).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!cancelled.load(Ordering::SeqCst));

        root.cancel();
        let result = run.await.unwrap();
        assert!(matches!(result, Err(EngineError::Closed(_))));
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_failure_surfaces_from_the_bot() {
        let exchange = TestExchange::new(market(&[("SBER", 100)])).await;
        let mut context = context_for(&exchange);
        // Nothing trades on this exchange in the test schedule.
        context.timer.exchange = "NOWHERE".to_string();
        context.timer.max_lookahead_windows = 1;
        let params = configuration::OrderBookParams {
            instruments: vec!["SBER".to_string()],
            depth: 10,
            buy_ratio: dec!(2),
            sell_ratio: dec!(2),
            sell_out: true,
        };
        let engine = LiveEngine::new(context).with_bot(OrderBookBot::new(params).unwrap());

        let result = engine.run(CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(EngineError::Timer(timer::TimerError::NoTradingDay { .. }))
        ));
    }
}
