use crate::error::EngineError;
use crate::runtime::{BotRuntime, Exit, Session};
use crate::{Bot, EngineContext};
use api_client::stream::OrderBookParams as BookSubscription;
use async_trait::async_trait;
use configuration::OrderBookParams;
use core_types::Instrument;
use std::sync::Arc;
use strategies::OrderBookStrategy;
use timer::SessionEvent;
use tokio_util::sync::CancellationToken;

const NAME: &str = "order-book";

/// Trades the order-book imbalance of a fixed instrument list while the
/// exchange session is open.
pub struct OrderBookBot {
    params: OrderBookParams,
    strategy: OrderBookStrategy,
}

impl OrderBookBot {
    pub fn new(params: OrderBookParams) -> Result<Self, EngineError> {
        let strategy = OrderBookStrategy::new(&params)?;
        Ok(Self { params, strategy })
    }

    async fn trade(
        &self,
        context: &EngineContext,
        runtime: &mut BotRuntime,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<Exit, EngineError> {
        let uids = self.params.instruments.clone();
        let mut instruments: Vec<Instrument> = Vec::with_capacity(uids.len());
        for uid in &uids {
            instruments.push(context.market_data.instrument_by_uid(uid).await?);
        }

        let subscription = BookSubscription {
            depth: self.params.depth,
        };
        let mut books = runtime
            .stream
            .subscribe_order_books(&uids, subscription)
            .await
            .ok_or(EngineError::Configuration("order book queue already taken".to_string()))?;
        let mut prices = runtime
            .stream
            .subscribe_last_prices(&uids)
            .await
            .ok_or(EngineError::Configuration("last price queue already taken".to_string()))?;
        tracing::info!(bot = NAME, instruments = uids.len(), depth = self.params.depth, "Subscribed.");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Exit::Cancelled),
                event = runtime.events.recv() => match event {
                    Some(SessionEvent::Start { .. }) => {
                        session.start(context, &instruments, &context.executor).await?;
                    }
                    Some(SessionEvent::Stop { .. }) => session.stop(self.params.sell_out).await?,
                    None => return Ok(Exit::TimerClosed),
                },
                price = prices.recv() => match price {
                    Some(price) => context.prices.update(&price.instrument_uid, price.price).await,
                    None => return Ok(Exit::StreamClosed),
                },
                book = books.recv() => {
                    let Some(book) = book else {
                        return Ok(Exit::StreamClosed);
                    };
                    let Some(executor) = session.active() else {
                        continue;
                    };
                    if let Some(signal) = self.strategy.evaluate(&book) {
                        tracing::debug!(bot = NAME, ?signal, "Signal.");
                        signal.apply(executor).await?;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Bot for OrderBookBot {
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
    use crate::testing::{book, context_for, market, wait_for_holdings, TestExchange};
    use executor::OrderGateway;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn params(sell_out: bool) -> OrderBookParams {
        OrderBookParams {
            instruments: vec!["SBER".to_string()],
            depth: 10,
            buy_ratio: dec!(2),
            sell_ratio: dec!(2),
            sell_out,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_buys_on_empty_asks_and_flattens_at_stop() {
        let exchange = TestExchange::new(market(&[("SBER", 100)])).await;
        let context = Arc::new(context_for(&exchange));
        let bot = OrderBookBot::new(params(true)).unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let context = context.clone();
            let cancel = cancel.clone();
            async move { bot.run(context, cancel).await }
        });

        let mut server = exchange.accept().await;
        server.ack_requests(2).await;
        assert!(wait_for_holdings(&exchange, || server.push_book(book("SBER", 50, 0)), true).await);

        // 10 lots at 100 out of a 10 000 deposit.
        assert_eq!(exchange.gateway.cash("rub").await, dec!(9000));

        // The session of the test day stops five minutes before 15:40.
        assert!(wait_for_holdings(&exchange, || {}, false).await);
        assert_eq!(exchange.gateway.cash("rub").await, dec!(10000));

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_positions_kept_without_sell_out() {
        let exchange = TestExchange::new(market(&[("SBER", 100)])).await;
        let context = Arc::new(context_for(&exchange));
        let bot = OrderBookBot::new(params(false)).unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let context = context.clone();
            let cancel = cancel.clone();
            async move { bot.run(context, cancel).await }
        });

        let mut server = exchange.accept().await;
        server.ack_requests(2).await;
        assert!(wait_for_holdings(&exchange, || server.push_book(book("SBER", 50, 0)), true).await);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        let holdings = exchange.gateway.holdings().await.unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].balance, 10);
        assert!(exchange.gateway.cash("rub").await < Decimal::from(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_instrument_fails_the_bot() {
        let exchange = TestExchange::new(market(&[("GAZP", 150)])).await;
        let context = Arc::new(context_for(&exchange));
        let bot = OrderBookBot::new(params(true)).unwrap();

        let result = bot.run(context, CancellationToken::new()).await;

        assert!(matches!(result, Err(EngineError::ApiClient(_))));
    }
}
