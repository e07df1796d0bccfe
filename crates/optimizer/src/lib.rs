//! # Optimizer Crate
//!
//! Sweeps a grid of corridor configurations through the backtester in
//! parallel and ranks the results.
//!
//! ## Architectural Principles
//!
//! - **Data parallelism:** one backtest per configuration on a rayon pool
//!   sized to the machine. Workers share only the read-only
//!   `HistoricalData`; every run builds its own strategy and executor.
//! - **Deterministic output:** evaluation order is free, the ranking is not.
//!   Results are sorted by `average_day_percent`, ties in grid order.
//! - **Cancellable:** the token passed to [`Optimizer::run`] stops pending
//!   evaluations and interrupts running ones.

use crate::error::OptimizerError;
use backtester::{BacktestReport, Backtester, HistoricalData};
use chrono::NaiveDate;
use configuration::{CorridorConfig, ExecutorConfig};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

pub mod error;
pub mod generator;
pub mod report;

pub use generator::generate_configs;
pub use report::{rank, write_json, RankedReport};

pub struct Optimizer {
    data: Arc<HistoricalData>,
    sizing: ExecutorConfig,
    top_instruments: usize,
    start: NaiveDate,
    end: NaiveDate,
    threads: usize,
    show_progress: bool,
}

impl Optimizer {
    pub fn new(
        data: Arc<HistoricalData>,
        sizing: ExecutorConfig,
        top_instruments: usize,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            data,
            sizing,
            top_instruments,
            start,
            end,
            threads: num_cpus::get(),
            show_progress: false,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Backtests every configuration and returns the ranking. Failed runs are
    /// logged and left out. Returns [`OptimizerError::Cancelled`] when
    /// `cancel` fires before all runs finished.
    pub async fn run(
        &self,
        configs: Vec<CorridorConfig>,
        cancel: CancellationToken,
    ) -> Result<Vec<RankedReport>, OptimizerError> {
        let total_runs = configs.len();
        tracing::info!(runs = total_runs, threads = self.threads, "Starting parameter sweep.");

        let progress_bar = if self.show_progress {
            let bar = ProgressBar::new(total_runs as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                    .progress_chars("=>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| OptimizerError::ThreadPool(e.to_string()))?;
        let backtester = Arc::new(Backtester::new(
            self.data.clone(),
            self.sizing.clone(),
            self.top_instruments,
        ));
        // Rayon workers drive the async backtests through the caller's runtime.
        let tokio_handle = Handle::current();
        let (start, end) = (self.start, self.end);
        let worker_cancel = cancel.clone();
        let bar = progress_bar.clone();

        let outcomes = tokio::task::spawn_blocking(move || {
            pool.install(|| {
                configs
                    .into_par_iter()
                    .enumerate()
                    .filter_map(|(index, config)| {
                        if worker_cancel.is_cancelled() {
                            return None;
                        }
                        let outcome = tokio_handle.block_on(async {
                            tokio::select! {
                                _ = worker_cancel.cancelled() => None,
                                report = backtester.run(&config, start, end) => Some(report),
                            }
                        })?;
                        bar.inc(1);
                        Some((index, outcome))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .await
        .map_err(|e| OptimizerError::JoinError(e.to_string()))?;
        progress_bar.finish_and_clear();

        if cancel.is_cancelled() {
            tracing::warn!(finished = outcomes.len(), runs = total_runs, "Parameter sweep cancelled.");
            return Err(OptimizerError::Cancelled);
        }

        let mut reports: Vec<(usize, BacktestReport)> = Vec::with_capacity(outcomes.len());
        for (index, outcome) in outcomes {
            match outcome {
                Ok(report) => reports.push((index, report)),
                Err(e) => tracing::error!(index, error = %e, "A backtest run failed."),
            }
        }
        tracing::info!(completed = reports.len(), runs = total_runs, "Parameter sweep complete.");
        Ok(rank(reports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use configuration::ParameterGrid;
    use core_types::{Candle, CandleInterval, Instrument, Quotation};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn instrument(uid: &str) -> Instrument {
        Instrument {
            uid: uid.to_string(),
            figi: format!("FIGI-{uid}"),
            ticker: uid.to_uppercase(),
            exchange: "MOEX".to_string(),
            lot: 1,
            currency: "rub".to_string(),
            min_price_increment: Quotation::new(0, 10_000_000).unwrap(),
            for_qualified_investor: false,
        }
    }

    /// Four sessions of a noisy saw-tooth per instrument.
    fn data() -> HistoricalData {
        let mut candles = Vec::new();
        for (uid, base, amplitude) in [("a", 100, 3), ("b", 250, 7)] {
            for day in 4..8 {
                let open = Utc.with_ymd_and_hms(2024, 3, day, 7, 0, 0).unwrap();
                for minute in 0..240i64 {
                    let wave = (minute * 7 + i64::from(day) * 3) % (amplitude * 20) - amplitude * 10;
                    let close = Quotation::try_from(
                        Decimal::from(base) + Decimal::from(wave) / dec!(10) * Decimal::from(amplitude) / dec!(10),
                    )
                    .unwrap();
                    candles.push(Candle {
                        instrument_uid: uid.to_string(),
                        interval: CandleInterval::OneMinute,
                        time: open + Duration::minutes(minute),
                        open: close,
                        close,
                        high: close,
                        low: close,
                        volume: 1,
                        is_complete: true,
                    });
                }
            }
        }
        HistoricalData::new(vec![instrument("a"), instrument("b")], candles)
    }

    fn optimizer() -> Optimizer {
        let sizing = ExecutorConfig {
            preferred_position_price: dec!(1000),
            max_position_price: dec!(5000),
            min_profit_pct: Decimal::ZERO,
            stop_loss_pct: Decimal::ZERO,
        };
        Optimizer::new(
            Arc::new(data()),
            sizing,
            1,
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
        )
        .with_threads(4)
    }

    fn grid() -> ParameterGrid {
        ParameterGrid {
            stop_loss_min: dec!(1.0),
            stop_loss_max: dec!(1.2),
            days_min: 1,
            days_max: 3,
            min_profit_min: dec!(0.3),
            min_profit_max: dec!(0.5),
            percentile_min: 5,
            percentile_max: 30,
            include_math_stat: false,
            commission_pct: dec!(0.05),
        }
    }

    fn summary(ranked: &[RankedReport]) -> Vec<(usize, Decimal, Decimal)> {
        let mut rows: Vec<_> = ranked
            .iter()
            .map(|r| (r.index, r.report.total_profit, r.report.average_day_percent))
            .collect();
        rows.sort_by_key(|(index, _, _)| *index);
        rows
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sweep_is_deterministic() {
        let configs = generate_configs(&grid()).unwrap();
        assert_eq!(configs.len(), 8);

        let first = optimizer().run(configs.clone(), CancellationToken::new()).await.unwrap();
        let second = optimizer().run(configs, CancellationToken::new()).await.unwrap();

        assert_eq!(first.len(), 8);
        assert_eq!(summary(&first), summary(&second));
        let order: Vec<usize> = first.iter().map(|r| r.index).collect();
        let again: Vec<usize> = second.iter().map(|r| r.index).collect();
        assert_eq!(order, again);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ranking_is_ascending() {
        let configs = generate_configs(&grid()).unwrap();
        let ranked = optimizer().run(configs, CancellationToken::new()).await.unwrap();

        for pair in ranked.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(a.report.average_day_percent <= b.report.average_day_percent);
            if a.report.average_day_percent == b.report.average_day_percent {
                assert!(a.index < b.index);
            }
        }
        assert_eq!(ranked.iter().map(|r| r.rank).collect::<Vec<_>>(), (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_sweep_reports_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = optimizer().run(generate_configs(&grid()).unwrap(), cancel).await;
        assert!(matches!(result, Err(OptimizerError::Cancelled)));
    }

    #[test]
    fn test_json_report_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranked.json");
        let report = BacktestReport::from_days(generate_configs(&grid()).unwrap().remove(0), Vec::new());
        write_json(&path, &rank(vec![(3, report)])).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"index\": 3"));
        assert!(written.contains("\"average_day_percent\""));
    }
}
