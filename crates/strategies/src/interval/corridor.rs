use crate::interval::stats;
use chrono::{DateTime, Utc};
use core_types::Candle;
use rust_decimal::Decimal;
use serde::Serialize;

/// The price window an instrument is traded in: buy at or below `low`, sell
/// at or above `high`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Corridor {
    pub low: Decimal,
    pub high: Decimal,
    /// `(high - low) / low * 100`.
    pub width_pct: Decimal,
    /// Share of the observed closes inside `[low, high]`, from 0 to 1.
    pub coverage: Decimal,
    /// Completed swings from `low` up to `high` in the observed history.
    pub round_trips: usize,
    pub mean_close: Decimal,
}

impl Corridor {
    fn observe(low: Decimal, high: Decimal, candles: &[Candle], closes: &[Decimal]) -> Self {
        let inside = closes.iter().filter(|c| low <= **c && **c <= high).count();
        let mut round_trips = 0;
        let mut armed = false;
        for close in candles.iter().map(|c| c.close.to_decimal()) {
            if close <= low {
                armed = true;
            } else if armed && close >= high {
                round_trips += 1;
                armed = false;
            }
        }

        Self {
            low,
            high,
            width_pct: (high - low) / low * Decimal::ONE_HUNDRED,
            coverage: Decimal::from(inside) / Decimal::from(closes.len().max(1)),
            round_trips,
            mean_close: stats::mean(closes).unwrap_or_default(),
        }
    }

    /// Gross profit the corridor would have produced on the observed history,
    /// in percent of one position.
    pub fn profit_potential(&self) -> Decimal {
        self.width_pct * Decimal::from(self.round_trips)
    }
}

/// The slice of ascending `candles` covering the last `days` distinct dates.
pub fn recent_days(candles: &[Candle], days: u32) -> &[Candle] {
    let mut seen = 0;
    let mut current = None;
    for (index, candle) in candles.iter().enumerate().rev() {
        let date = candle.time.date_naive();
        if current != Some(date) {
            if seen == days {
                return &candles[index + 1..];
            }
            seen += 1;
            current = Some(date);
        }
    }
    candles
}

/// Among windows exactly `required_pct` wide, the one holding the most
/// closes. Ties go to the window a candle touched most recently, then to the
/// higher (wider) window.
pub fn best_width(candles: &[Candle], required_pct: Decimal) -> Option<Corridor> {
    let closes: Vec<Decimal> = candles.iter().map(|c| c.close.to_decimal()).collect();
    let mut all = closes.clone();
    all.sort();
    let mut lows = all.clone();
    lows.dedup();
    let factor = Decimal::ONE + required_pct / Decimal::ONE_HUNDRED;

    let mut best_count = 0;
    let mut candidates: Vec<(Decimal, Decimal)> = Vec::new();
    for low in lows.into_iter().filter(|low| *low > Decimal::ZERO) {
        let high = low * factor;
        let count = all.partition_point(|c| *c <= high) - all.partition_point(|c| *c < low);
        if count > best_count {
            best_count = count;
            candidates.clear();
        }
        if count == best_count {
            candidates.push((low, high));
        }
    }

    let last_touch = |low: Decimal, high: Decimal| -> Option<DateTime<Utc>> {
        candles
            .iter()
            .rev()
            .find(|c| c.low.to_decimal() <= high && c.high.to_decimal() >= low)
            .map(|c| c.time)
    };
    let (low, high) = candidates
        .into_iter()
        .max_by_key(|(low, high)| (last_touch(*low, *high), *low))?;

    Some(Corridor::observe(low, high, candles, &closes))
}

/// Corridor between two percentiles of the closes; `None` when it is
/// narrower than `required_pct`.
pub fn math_stat(
    candles: &[Candle],
    low_percentile: Decimal,
    high_percentile: Decimal,
    required_pct: Decimal,
) -> Option<Corridor> {
    let closes: Vec<Decimal> = candles.iter().map(|c| c.close.to_decimal()).collect();
    let mut sorted = closes.clone();
    sorted.sort();

    let low = stats::percentile(&sorted, low_percentile)?;
    let high = stats::percentile(&sorted, high_percentile)?;
    if low <= Decimal::ZERO {
        return None;
    }
    let corridor = Corridor::observe(low, high, candles, &closes);
    (corridor.width_pct >= required_pct).then_some(corridor)
}
