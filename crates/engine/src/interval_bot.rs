use crate::error::EngineError;
use crate::runtime::{BotRuntime, Exit, Session};
use crate::{Bot, EngineContext};
use api_client::stream::CandleParams;
use async_trait::async_trait;
use configuration::{ExecutorConfig, InstrumentSpec, IntervalParams};
use core_types::{Candle, CandleInterval, Instrument};
use database::CandleStore;
use executor::Executor;
use std::sync::Arc;
use std::time::Duration;
use strategies::{IntervalStrategy, Signal};
use timer::SessionEvent;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const NAME: &str = "interval";

/// Trades the corridors of the best `top_instruments_quantity` instruments.
///
/// Corridors are computed from the candle store when a session starts and
/// every `interval_update_delay_secs` while it is open; each refresh first
/// brings the store up to date. Decisions are taken on closed minute candles.
pub struct IntervalBot {
    params: IntervalParams,
    store: CandleStore,
    lookback: chrono::Duration,
}

impl IntervalBot {
    /// `lookback` is how much stored history is handed to the corridor
    /// computation; it must cover `days_to_calculate_interval` trading days.
    pub fn new(params: IntervalParams, store: CandleStore, lookback: chrono::Duration) -> Result<Self, EngineError> {
        IntervalStrategy::new(params.corridor.clone(), params.top_instruments_quantity)?;
        Ok(Self {
            params,
            store,
            lookback,
        })
    }

    fn executor_config(&self, base: &ExecutorConfig) -> ExecutorConfig {
        ExecutorConfig {
            min_profit_pct: self.params.corridor.min_profit_pct,
            stop_loss_pct: self.params.corridor.stop_loss_pct,
            ..base.clone()
        }
    }

    /// Updates the store and recomputes every corridor. Returns the selection.
    async fn refresh(
        &self,
        context: &EngineContext,
        instruments: &[Instrument],
        strategy: &mut IntervalStrategy,
    ) -> Result<Vec<String>, EngineError> {
        let now = context.clock.now();
        let mut history = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let written = self
                .store
                .update(&instrument.uid, CandleInterval::OneMinute, now, context.market_data.as_ref())
                .await?;
            let candles = self
                .store
                .load(&instrument.uid, CandleInterval::OneMinute, now - self.lookback, now)
                .await?;
            tracing::debug!(bot = NAME, instrument = %instrument.uid, written, loaded = candles.len(), "History refreshed.");
            history.push((instrument.uid.clone(), candles));
        }

        let selected = strategy.recompute(history.iter().map(|(uid, candles)| (uid.as_str(), candles.as_slice())));
        tracing::info!(bot = NAME, ?selected, "Corridors recomputed.");
        Ok(selected)
    }

    async fn on_candle(
        &self,
        strategy: &IntervalStrategy,
        executor: &Executor,
        candle: &Candle,
    ) -> Result<(), EngineError> {
        let uid = candle.instrument_uid.as_str();
        executor.last_price_update(uid, candle.close).await;
        let in_stock = executor.in_stock(uid).await;

        // A held instrument that dropped out of the selection keeps its
        // stop-loss until the session ends.
        let signal = strategy
            .evaluate(candle, in_stock)
            .or_else(|| (in_stock && !strategy.is_selected(uid)).then(|| Signal::protect(uid)));
        if let Some(signal) = signal {
            tracing::debug!(bot = NAME, ?signal, close = %candle.close, "Signal.");
            signal.apply(executor).await?;
        }
        Ok(())
    }

    async fn trade(
        &self,
        context: &EngineContext,
        runtime: &mut BotRuntime,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<Exit, EngineError> {
        let instruments = self
            .params
            .instruments
            .iter()
            .map(InstrumentSpec::to_instrument)
            .collect::<Result<Vec<_>, _>>()?;
        let uids: Vec<String> = instruments.iter().map(|i| i.uid.clone()).collect();
        let mut strategy = IntervalStrategy::new(self.params.corridor.clone(), self.params.top_instruments_quantity)?;
        let executor_config = self.executor_config(&context.executor);

        let subscription = CandleParams {
            interval: CandleInterval::OneMinute,
            waiting_close: true,
        };
        let mut candles = runtime
            .stream
            .subscribe_candles(&uids, subscription)
            .await
            .ok_or(EngineError::Configuration("candle queue already taken".to_string()))?;
        let mut prices = runtime
            .stream
            .subscribe_last_prices(&uids)
            .await
            .ok_or(EngineError::Configuration("last price queue already taken".to_string()))?;
        tracing::info!(bot = NAME, instruments = uids.len(), "Subscribed.");

        let period = Duration::from_secs(self.params.interval_update_delay_secs.max(1));
        let mut recompute = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        recompute.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Exit::Cancelled),
                event = runtime.events.recv() => match event {
                    Some(SessionEvent::Start { .. }) => {
                        self.refresh(context, &instruments, &mut strategy).await?;
                        session.start(context, &instruments, &executor_config).await?;
                        recompute.reset();
                    }
                    Some(SessionEvent::Stop { .. }) => session.stop(self.params.sell_out).await?,
                    None => return Ok(Exit::TimerClosed),
                },
                _ = recompute.tick(), if session.is_open() => {
                    self.refresh(context, &instruments, &mut strategy).await?;
                }
                price = prices.recv() => match price {
                    Some(price) => context.prices.update(&price.instrument_uid, price.price).await,
                    None => return Ok(Exit::StreamClosed),
                },
                candle = candles.recv() => {
                    let Some(candle) = candle else {
                        return Ok(Exit::StreamClosed);
                    };
                    if let Some(executor) = session.active() {
                        self.on_candle(&strategy, executor, &candle).await?;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Bot for IntervalBot {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, context: Arc<EngineContext>, cancel: CancellationToken) -> Result<(), EngineError> {
        let mut runtime = BotRuntime::start(&context, &cancel);
        let mut session = Session::new(NAME);

        let exit = self.trade(&context, &mut runtime, &mut session, &cancel).await;
        if let Err(e) = &exit {
            tracing::error!(bot = NAME, error = %e, "Bot failed, cancelling its tasks.");
        }
        session.abandon(self.params.sell_out).await;
        runtime.shutdown(exit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_for, market, minute_candle, wait_for_holdings, TestExchange, now};
    use configuration::{AnalyseMode, CorridorConfig};
    use core_types::Quotation;
    use rust_decimal_macros::dec;

    fn instrument(uid: &str) -> InstrumentSpec {
        InstrumentSpec {
            uid: uid.to_string(),
            figi: format!("FIGI-{uid}"),
            ticker: uid.to_string(),
            exchange: "MOEX".to_string(),
            lot: 1,
            currency: "rub".to_string(),
            min_price_increment: dec!(0.01),
        }
    }

    fn params() -> IntervalParams {
        IntervalParams {
            instruments: vec![instrument("SBER")],
            corridor: CorridorConfig {
                analyse: AnalyseMode::BestWidth,
                low_percentile: dec!(10),
                high_percentile: dec!(90),
                min_profit_pct: dec!(0.5),
                stop_loss_pct: dec!(2),
                days_to_calculate_interval: 1,
                commission_pct: dec!(0),
            },
            top_instruments_quantity: 1,
            interval_update_delay_secs: 600,
            sell_out: true,
        }
    }

    /// The morning of the test day alternates between 100 and 100.5.
    fn morning() -> Vec<Candle> {
        (0..120)
            .map(|minute| {
                let close = if minute % 2 == 0 {
                    Quotation::from_units(100)
                } else {
                    Quotation::new(100, 500_000_000).unwrap()
                };
                minute_candle("SBER", now() - chrono::Duration::minutes(180 - minute), close)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_trades_the_stored_corridor() {
        let store = CandleStore::open(":memory:").await.unwrap();
        tokio::time::pause();
        let exchange = TestExchange::new(market(&[("SBER", 100)]).with_candles(morning())).await;
        let context = Arc::new(context_for(&exchange));
        let bot = IntervalBot::new(params(), store.clone(), chrono::Duration::days(3)).unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let context = context.clone();
            let cancel = cancel.clone();
            async move { bot.run(context, cancel).await }
        });

        let mut server = exchange.accept().await;
        server.ack_requests(2).await;

        // Bottom of the corridor.
        let bottom = minute_candle("SBER", now(), Quotation::from_units(100));
        assert!(wait_for_holdings(&exchange, || server.push_candle(bottom.clone()), true).await);
        assert_eq!(exchange.gateway.cash("rub").await, dec!(9000));
        assert!(store.watermark("SBER", CandleInterval::OneMinute).await.unwrap().is_some());

        // Above the top: 1% beats the 0.5% target.
        let top = minute_candle("SBER", now(), Quotation::from_units(101));
        assert!(wait_for_holdings(&exchange, || server.push_candle(top.clone()), false).await);
        assert_eq!(exchange.gateway.cash("rub").await, dec!(10010));

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_no_trades_without_history() {
        let store = CandleStore::open(":memory:").await.unwrap();
        tokio::time::pause();
        let exchange = TestExchange::new(market(&[("SBER", 100)])).await;
        let context = Arc::new(context_for(&exchange));
        let bot = IntervalBot::new(params(), store, chrono::Duration::days(3)).unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let context = context.clone();
            let cancel = cancel.clone();
            async move { bot.run(context, cancel).await }
        });

        let mut server = exchange.accept().await;
        server.ack_requests(2).await;
        let bottom = minute_candle("SBER", now(), Quotation::from_units(90));
        assert!(!wait_for_holdings(&exchange, || server.push_candle(bottom.clone()), true).await);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_rejects_invalid_corridor() {
        let mut params = params();
        params.top_instruments_quantity = 0;
        let store = CandleStore::open(":memory:").await.unwrap();
        let result = IntervalBot::new(params, store, chrono::Duration::days(3));
        assert!(matches!(result, Err(EngineError::Strategy(_))));
    }
}
