use crate::error::BacktestError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use core_types::{Candle, CandleInterval, Instrument};
use database::CandleStore;
use std::collections::HashMap;

/// Minute candles of every backtested instrument, loaded once and shared
/// read-only by all backtest runs.
#[derive(Debug, Clone, Default)]
pub struct HistoricalData {
    instruments: Vec<Instrument>,
    candles: HashMap<String, Vec<Candle>>,
}

impl HistoricalData {
    /// Builds the data set from candles in any order; each series is sorted
    /// by time and duplicates are dropped.
    pub fn new(instruments: Vec<Instrument>, candles: impl IntoIterator<Item = Candle>) -> Self {
        let mut series: HashMap<String, Vec<Candle>> = HashMap::new();
        for candle in candles {
            series
                .entry(candle.instrument_uid.clone())
                .or_default()
                .push(candle);
        }
        for candles in series.values_mut() {
            candles.sort_by_key(|c| c.time);
            candles.dedup_by_key(|c| c.time);
        }
        Self {
            instruments,
            candles: series,
        }
    }

    /// Loads `[start - lookback_days, end)` of one-minute candles per
    /// instrument from the store.
    pub async fn load(
        store: &CandleStore,
        instruments: Vec<Instrument>,
        start: NaiveDate,
        end: NaiveDate,
        lookback_days: u32,
    ) -> Result<Self, BacktestError> {
        let from = day_start(start) - Duration::days(i64::from(lookback_days));
        let to = day_start(end);
        let mut candles = Vec::new();
        for instrument in &instruments {
            let series = store
                .load(&instrument.uid, CandleInterval::OneMinute, from, to)
                .await?;
            tracing::info!(instrument = %instrument.uid, candles = series.len(), %from, %to, "Loaded historical candles.");
            candles.extend(series);
        }
        if candles.is_empty() {
            return Err(BacktestError::DataUnavailable);
        }
        Ok(Self::new(instruments, candles))
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn instrument(&self, uid: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.uid == uid)
    }

    pub fn series(&self, uid: &str) -> &[Candle] {
        self.candles.get(uid).map(Vec::as_slice).unwrap_or_default()
    }

    /// Candles of `uid` strictly before `time`.
    pub fn before(&self, uid: &str, time: DateTime<Utc>) -> &[Candle] {
        let series = self.series(uid);
        &series[..series.partition_point(|c| c.time < time)]
    }

    /// Candles of `uid` with time in `[from, to)`.
    pub fn between(&self, uid: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> &[Candle] {
        let series = self.before(uid, to);
        &series[series.partition_point(|c| c.time < from)..]
    }
}

pub(crate) fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
