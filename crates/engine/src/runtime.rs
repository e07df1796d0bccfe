//! Plumbing shared by every bot: the subtree of tasks a bot owns and the
//! per-session executor.

use crate::EngineContext;
use crate::error::EngineError;
use api_client::MarketDataApi;
use api_client::stream::MarketDataStream;
use api_client::StreamError;
use configuration::ExecutorConfig;
use core_types::Instrument;
use executor::{Executor, LastPriceTable};
use std::sync::Arc;
use timer::{SessionEvent, SessionTimer, TimerError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why a bot's receive loop returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    Cancelled,
    TimerClosed,
    StreamClosed,
}

/// The stream driver and session timer of one bot, running under a child
/// token of the bot's own token.
pub(crate) struct BotRuntime {
    pub stream: Arc<MarketDataStream>,
    pub events: mpsc::Receiver<SessionEvent>,
    subtree: CancellationToken,
    timer: JoinHandle<Result<(), TimerError>>,
    listener: JoinHandle<Result<(), StreamError>>,
}

impl BotRuntime {
    pub fn start(context: &EngineContext, cancel: &CancellationToken) -> Self {
        let subtree = cancel.child_token();

        let stream = Arc::new(MarketDataStream::new(
            context.transport.clone(),
            context.stream,
            subtree.child_token(),
        ));
        let listener = tokio::spawn({
            let stream = stream.clone();
            async move { stream.listen().await }
        });

        let (events, timer) = SessionTimer::new(context.schedule.clone(), context.clock.clone(), &context.timer)
            .spawn(subtree.child_token());

        Self {
            stream,
            events,
            subtree,
            timer,
            listener,
        }
    }

    /// Cancels the subtree, waits for the timer and the stream driver, and
    /// turns the way the receive loop ended into the bot's result.
    pub async fn shutdown(self, exit: Result<Exit, EngineError>) -> Result<(), EngineError> {
        self.subtree.cancel();
        let timer = self.timer.await?;
        let stream = self.listener.await?;

        match exit? {
            Exit::Cancelled => Ok(()),
            Exit::TimerClosed => {
                timer?;
                Err(EngineError::Closed("session timer"))
            }
            Exit::StreamClosed => {
                stream?;
                Err(EngineError::Closed("market data stream"))
            }
        }
    }
}

/// The executor of a bot and whether the exchange session is open.
///
/// The executor is built on the first `Start` and kept across sessions until a
/// sell-out flattens it; the next `Start` then sizes a fresh one.
pub(crate) struct Session {
    bot: &'static str,
    executor: Option<Executor>,
    open: bool,
}

impl Session {
    pub fn new(bot: &'static str) -> Self {
        Self {
            bot,
            executor: None,
            open: false,
        }
    }

    /// The executor, while the session is open.
    pub fn active(&self) -> Option<&Executor> {
        self.executor.as_ref().filter(|_| self.open)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub async fn start(
        &mut self,
        context: &EngineContext,
        instruments: &[Instrument],
        config: &ExecutorConfig,
    ) -> Result<(), EngineError> {
        if self.executor.is_none() {
            let uids: Vec<String> = instruments.iter().map(|i| i.uid.clone()).collect();
            seed_prices(context.market_data.as_ref(), &context.prices, &uids).await?;
            let executor = Executor::new(context.gateway.clone(), instruments, context.prices.clone(), config).await;
            let sized = executor.instruments().await;
            tracing::info!(bot = self.bot, instruments = ?sized, "Executor sized.");
            self.executor = Some(executor);
        }
        self.open = true;
        Ok(())
    }

    pub async fn stop(&mut self, sell_out: bool) -> Result<(), EngineError> {
        self.open = false;
        if !sell_out {
            return Ok(());
        }
        if let Some(executor) = self.executor.take() {
            let orders = executor.sell_out().await?;
            let realized = executor.realized_money().await;
            tracing::info!(
                bot = self.bot,
                orders,
                %realized,
                "Session closed, positions flattened."
            );
        }
        Ok(())
    }

    /// Flattens on the way out of a bot. Failures are only logged since the
    /// bot is already ending.
    pub async fn abandon(mut self, sell_out: bool) {
        let Some(executor) = self.executor.take() else {
            return;
        };
        if !sell_out {
            return;
        }
        match executor.sell_out().await {
            Ok(orders) => tracing::info!(bot = self.bot, orders, "Positions flattened on shutdown."),
            Err(e) => tracing::error!(bot = self.bot, error = %e, "Sell-out on shutdown failed."),
        }
    }
}

/// Loads the current last prices of `uids` into the shared table.
pub(crate) async fn seed_prices(
    market_data: &dyn MarketDataApi,
    prices: &LastPriceTable,
    uids: &[String],
) -> Result<(), EngineError> {
    for price in market_data.last_prices(uids).await? {
        prices.update(&price.instrument_uid, price.price).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_for, market, TestExchange};

    fn assert_send<T: Send>(_: T) {}

    #[tokio::test]
    async fn test_session_is_send_across_start_and_stop() {
        let exchange = TestExchange::new(market(&[("SBER", 100)])).await;
        let context = context_for(&exchange);
        let instruments = exchange.market.instruments().await.unwrap();
        let mut session = Session::new("test");

        assert_send(session.start(&context, &instruments, &context.executor));
        assert_send(session.stop(true));

        session.start(&context, &instruments, &context.executor).await.unwrap();
        assert!(session.is_open());
        assert!(session.active().is_some());

        session.stop(true).await.unwrap();
        assert!(!session.is_open());
        assert!(session.active().is_none());
    }
}
