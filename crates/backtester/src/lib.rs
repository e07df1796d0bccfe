//! # Backtester Crate
//!
//! Deterministic replay of stored minute candles through the interval
//! strategy and the executor over a simulated gateway.
//!
//! ## Architectural Principles
//!
//! - **Same logic as live:** every day builds a fresh [`IntervalStrategy`] and
//!   [`Executor`] and feeds them candle by candle, exactly as the engine does
//!   with the stream.
//! - **Shared, immutable input:** [`HistoricalData`] is loaded once; runs
//!   only read it, so any number of them can execute in parallel.
//!
//! ## Public API
//!
//! - `Backtester`: `run` (date range) and `run_day`.
//! - `HistoricalData`, `BacktestReport`, `DayResult`.
//! - `BacktestError`: The specific error types that can be returned from this crate.

use crate::data::day_start;
use chrono::{Duration, NaiveDate};
use configuration::{CorridorConfig, ExecutorConfig};
use core_types::{Candle, Instrument};
use executor::{Executor, LastPriceTable, SimulatedGateway};
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use std::sync::Arc;
use strategies::IntervalStrategy;

pub mod data;
pub mod error;
pub mod report;

pub use data::HistoricalData;
pub use error::BacktestError;
pub use report::{BacktestReport, DayResult};

/// The main backtesting engine.
pub struct Backtester {
    data: Arc<HistoricalData>,
    /// Position sizing; profit target and stop-loss come from each run's
    /// corridor config.
    sizing: ExecutorConfig,
    top_instruments: usize,
    show_progress: bool,
}

impl Backtester {
    pub fn new(data: Arc<HistoricalData>, sizing: ExecutorConfig, top_instruments: usize) -> Self {
        Self {
            data,
            sizing,
            top_instruments,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Replays every day in `[start, end)` with `config`.
    pub async fn run(
        &self,
        config: &CorridorConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BacktestReport, BacktestError> {
        if start >= end {
            return Err(BacktestError::EmptyRange { start, end });
        }
        let days: Vec<NaiveDate> = start.iter_days().take_while(|d| *d < end).collect();

        let progress_bar = if self.show_progress {
            let bar = ProgressBar::new(days.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} days ({eta})")?
                    .progress_chars("=>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut results = Vec::with_capacity(days.len());
        for date in days {
            let day = self.run_day(config, date).await?;
            tracing::debug!(%date, profit = %day.profit, percent = %day.percent, trades = day.trades, "Backtest day finished.");
            results.push(day);
            progress_bar.inc(1);
        }
        progress_bar.finish_and_clear();

        let report = BacktestReport::from_days(config.clone(), results);
        tracing::info!(
            analyse = ?config.analyse,
            total_profit = %report.total_profit,
            average_day_percent = %report.average_day_percent,
            trading_days = report.trading_days,
            "Backtest finished."
        );
        Ok(report)
    }

    /// One trading day: corridors from the history before `date`, then the
    /// day's candles replayed in time order, then everything still held is
    /// sold out at the last price.
    pub async fn run_day(&self, config: &CorridorConfig, date: NaiveDate) -> Result<DayResult, BacktestError> {
        let open = day_start(date);
        let close = open + Duration::days(1);

        let mut strategy = IntervalStrategy::new(config.clone(), self.top_instruments)?;
        let selected = strategy.recompute(
            self.data
                .instruments()
                .iter()
                .map(|i| (i.uid.as_str(), self.data.before(&i.uid, open))),
        );

        let mut session: Vec<&Candle> = selected
            .iter()
            .flat_map(|uid| self.data.between(uid, open, close))
            .collect();
        if session.is_empty() {
            return Ok(DayResult::idle(date));
        }
        session.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.instrument_uid.cmp(&b.instrument_uid)));

        let instruments: Vec<Instrument> = selected
            .iter()
            .filter_map(|uid| self.data.instrument(uid).cloned())
            .collect();

        // Before the open the last known price is the previous close.
        let prices = LastPriceTable::new();
        for instrument in &instruments {
            let last = self
                .data
                .before(&instrument.uid, open)
                .last()
                .or_else(|| self.data.between(&instrument.uid, open, close).first())
                .map(|c| c.close);
            if let Some(last) = last {
                prices.update(&instrument.uid, last).await;
            }
        }

        let gateway = Arc::new(SimulatedGateway::new(
            instruments.clone(),
            prices.clone(),
            config.commission_pct,
        ));
        let budget = self.sizing.preferred_position_price.max(self.sizing.max_position_price)
            * Decimal::TWO
            * Decimal::from(instruments.len());
        let mut currencies: Vec<&str> = instruments.iter().map(|i| i.currency.as_str()).collect();
        currencies.sort();
        currencies.dedup();
        for currency in currencies {
            gateway.deposit(currency, budget).await;
        }

        let executor_config = ExecutorConfig {
            min_profit_pct: config.min_profit_pct,
            stop_loss_pct: config.stop_loss_pct,
            ..self.sizing.clone()
        };
        let executor = Executor::new(gateway.clone(), &instruments, prices.clone(), &executor_config).await;

        let mut capital = Decimal::ZERO;
        for uid in executor.instruments().await {
            if let (Some(position), Some(price)) = (executor.position(&uid).await, prices.get(&uid).await) {
                capital += price.to_decimal() * Decimal::from(position.pieces());
            }
        }

        for candle in session {
            executor.last_price_update(&candle.instrument_uid, candle.close).await;
            let in_stock = executor.in_stock(&candle.instrument_uid).await;
            if let Some(signal) = strategy.evaluate(candle, in_stock) {
                signal.apply(&executor).await?;
            }
        }
        executor.sell_out().await?;

        let profit = executor.realized_money().await - gateway.commission_paid().await;
        let percent = if capital.is_zero() {
            Decimal::ZERO
        } else {
            profit / capital * Decimal::ONE_HUNDRED
        };

        Ok(DayResult {
            date,
            selected,
            profit,
            percent,
            trades: executor.closed_trades().await,
        })
    }
}
