use crate::error::StrategyError;
use crate::signal::Signal;
use configuration::OrderBookParams;
use core_types::OrderBook;
use rust_decimal::Decimal;

/// Trades the imbalance between resting bid and ask volume.
///
/// With `ratio = Σ bid lots / Σ ask lots`, a ratio above `buy_ratio` buys and
/// an inverse ratio above `sell_ratio` sells. An empty ask side counts as a
/// buy signal, an empty bid side as a sell signal.
#[derive(Debug, Clone)]
pub struct OrderBookStrategy {
    buy_ratio: Decimal,
    sell_ratio: Decimal,
}

impl OrderBookStrategy {
    pub fn new(params: &OrderBookParams) -> Result<Self, StrategyError> {
        if params.buy_ratio <= Decimal::ZERO || params.sell_ratio <= Decimal::ZERO {
            return Err(StrategyError::InvalidParameters(format!(
                "order book ratios must be positive, got buy {} / sell {}",
                params.buy_ratio, params.sell_ratio
            )));
        }
        Ok(Self {
            buy_ratio: params.buy_ratio,
            sell_ratio: params.sell_ratio,
        })
    }

    pub fn evaluate(&self, book: &OrderBook) -> Option<Signal> {
        if !book.is_consistent {
            tracing::debug!(instrument = %book.instrument_uid, "Dropping inconsistent order book.");
            return None;
        }

        let bid_count: i64 = book.bids.iter().map(|level| level.quantity).sum();
        let ask_count: i64 = book.asks.iter().map(|level| level.quantity).sum();

        match (bid_count, ask_count) {
            (0, 0) => None,
            (_, 0) => Some(Signal::buy(&book.instrument_uid)),
            (0, _) => Some(Signal::sell(&book.instrument_uid)),
            (bids, asks) => {
                let ratio = Decimal::from(bids) / Decimal::from(asks);
                if ratio > self.buy_ratio {
                    Some(Signal::buy(&book.instrument_uid))
                } else if Decimal::ONE / ratio > self.sell_ratio {
                    Some(Signal::sell(&book.instrument_uid))
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Action;
    use chrono::Utc;
    use core_types::{OrderBookLevel, Quotation};
    use rust_decimal_macros::dec;

    fn params() -> OrderBookParams {
        OrderBookParams {
            instruments: vec!["uid-1".to_string()],
            depth: 2,
            buy_ratio: dec!(2),
            sell_ratio: dec!(2),
            sell_out: true,
        }
    }

    fn book(bids: &[(i64, i64)], asks: &[(i64, i64)], is_consistent: bool) -> OrderBook {
        let levels = |side: &[(i64, i64)]| {
            side.iter()
                .map(|(price, quantity)| OrderBookLevel {
                    price: Quotation::from_units(*price),
                    quantity: *quantity,
                })
                .collect()
        };
        OrderBook {
            figi: "FIGI-1".to_string(),
            instrument_uid: "uid-1".to_string(),
            depth: 2,
            is_consistent,
            time: Utc::now(),
            limit_up: None,
            limit_down: None,
            bids: levels(bids),
            asks: levels(asks),
        }
    }

    #[test]
    fn test_bid_heavy_book_buys() {
        let strategy = OrderBookStrategy::new(&params()).unwrap();
        let signal = strategy.evaluate(&book(&[(100, 5), (99, 5)], &[(101, 1), (102, 1)], true));
        assert_eq!(signal.map(|s| s.action), Some(Action::Buy));
    }

    #[test]
    fn test_ask_heavy_book_sells() {
        let strategy = OrderBookStrategy::new(&params()).unwrap();
        let signal = strategy.evaluate(&book(&[(100, 1)], &[(101, 3)], true));
        assert_eq!(signal, Some(Signal::sell("uid-1")));
    }

    #[test]
    fn test_balanced_and_inconsistent_books_do_nothing() {
        let strategy = OrderBookStrategy::new(&params()).unwrap();
        assert_eq!(strategy.evaluate(&book(&[(100, 2)], &[(101, 1)], true)), None);
        assert_eq!(strategy.evaluate(&book(&[(100, 50)], &[(101, 1)], false)), None);
        assert_eq!(strategy.evaluate(&book(&[], &[], true)), None);
    }

    #[test]
    fn test_empty_side_is_a_signal() {
        let strategy = OrderBookStrategy::new(&params()).unwrap();
        assert_eq!(
            strategy.evaluate(&book(&[(100, 1)], &[], true)),
            Some(Signal::buy("uid-1"))
        );
        assert_eq!(
            strategy.evaluate(&book(&[], &[(101, 1)], true)),
            Some(Signal::sell("uid-1"))
        );
    }

    #[tokio::test]
    async fn test_imbalance_reaches_executor_buy() {
        use configuration::ExecutorConfig;
        use core_types::Instrument;
        use executor::{Executor, LastPriceTable, SimulatedGateway};
        use std::sync::Arc;

        let instrument = Instrument {
            uid: "uid-1".to_string(),
            figi: "FIGI-1".to_string(),
            ticker: "ONE".to_string(),
            exchange: "MOEX".to_string(),
            lot: 1,
            currency: "rub".to_string(),
            min_price_increment: Quotation::from_units(1),
            for_qualified_investor: false,
        };
        let prices = LastPriceTable::new();
        prices.update("uid-1", Quotation::from_units(100)).await;
        let gateway = Arc::new(SimulatedGateway::new([instrument.clone()], prices.clone(), Decimal::ZERO));
        gateway.deposit("rub", dec!(10000)).await;
        let config = ExecutorConfig {
            preferred_position_price: dec!(1000),
            max_position_price: dec!(5000),
            min_profit_pct: dec!(0.5),
            stop_loss_pct: dec!(2),
        };
        let executor = Executor::new(gateway, &[instrument], prices, &config).await;

        let strategy = OrderBookStrategy::new(&params()).unwrap();
        let signal = strategy
            .evaluate(&book(&[(100, 5), (99, 5)], &[(101, 1), (102, 1)], true))
            .unwrap();
        assert_eq!(signal.apply(&executor).await.unwrap(), None);

        assert!(executor.in_stock("uid-1").await);
        assert_eq!(executor.closed_trades().await, 0);
    }
}
