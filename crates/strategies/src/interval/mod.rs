//! Interval (range) trading: buy at the bottom of a price corridor learned
//! from recent minute candles, sell at its top.

pub mod corridor;
pub mod stats;

use crate::error::StrategyError;
use crate::signal::Signal;
use configuration::{AnalyseMode, CorridorConfig};
use core_types::Candle;
pub use corridor::{best_width, math_stat, recent_days, Corridor};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct IntervalStrategy {
    config: CorridorConfig,
    top_instruments: usize,
    corridors: HashMap<String, Corridor>,
}

impl IntervalStrategy {
    pub fn new(config: CorridorConfig, top_instruments: usize) -> Result<Self, StrategyError> {
        config.validate()?;
        if top_instruments == 0 {
            return Err(StrategyError::InvalidParameters(
                "top_instruments_quantity must be positive".to_string(),
            ));
        }
        Ok(Self {
            config,
            top_instruments,
            corridors: HashMap::new(),
        })
    }

    pub fn config(&self) -> &CorridorConfig {
        &self.config
    }

    /// Corridor over the last `days_to_calculate_interval` dates of complete
    /// `candles` (ascending), or `None` when no corridor is wide enough to pay
    /// for a round trip.
    pub fn compute_corridor(&self, candles: &[Candle]) -> Option<Corridor> {
        let complete: Vec<Candle> = recent_days(candles, self.config.days_to_calculate_interval)
            .iter()
            .filter(|c| c.is_complete)
            .cloned()
            .collect();
        if complete.is_empty() {
            return None;
        }
        let required = self.config.required_width_pct();
        match self.config.analyse {
            AnalyseMode::BestWidth => best_width(&complete, required),
            AnalyseMode::MathStat => math_stat(
                &complete,
                self.config.low_percentile,
                self.config.high_percentile,
                required,
            ),
        }
    }

    /// Recomputes every corridor and keeps the `top_instruments` instruments
    /// with the highest profit potential. Returns the selection, best first.
    pub fn recompute<'a>(
        &mut self,
        history: impl IntoIterator<Item = (&'a str, &'a [Candle])>,
    ) -> Vec<String> {
        let mut ranked: Vec<(String, Corridor)> = history
            .into_iter()
            .filter_map(|(uid, candles)| {
                let corridor = self.compute_corridor(candles);
                if corridor.is_none() {
                    tracing::debug!(instrument = %uid, "No corridor wide enough.");
                }
                corridor.map(|c| (uid.to_string(), c))
            })
            .collect();

        ranked.sort_by(|(a_uid, a), (b_uid, b)| {
            b.profit_potential()
                .cmp(&a.profit_potential())
                .then_with(|| b.width_pct.cmp(&a.width_pct))
                .then_with(|| a_uid.cmp(b_uid))
        });
        ranked.truncate(self.top_instruments);

        let selected: Vec<String> = ranked.iter().map(|(uid, _)| uid.clone()).collect();
        for (uid, corridor) in &ranked {
            tracing::info!(instrument = %uid, low = %corridor.low, high = %corridor.high, width_pct = %corridor.width_pct.round_dp(3), round_trips = corridor.round_trips, "Corridor selected.");
        }
        self.corridors = ranked.into_iter().collect();
        selected
    }

    pub fn corridor(&self, instrument_uid: &str) -> Option<&Corridor> {
        self.corridors.get(instrument_uid)
    }

    pub fn is_selected(&self, instrument_uid: &str) -> bool {
        self.corridors.contains_key(instrument_uid)
    }

    /// Decision on one candle. Incomplete candles and instruments outside
    /// the selection yield nothing. While in stock and inside the corridor
    /// the position is still protected by the stop-loss.
    pub fn evaluate(&self, candle: &Candle, in_stock: bool) -> Option<Signal> {
        if !candle.is_complete {
            return None;
        }
        let corridor = self.corridors.get(&candle.instrument_uid)?;
        let close = candle.close.to_decimal();
        match in_stock {
            false if close <= corridor.low => Some(Signal::buy(&candle.instrument_uid)),
            false => None,
            true if close >= corridor.high => Some(Signal::sell(&candle.instrument_uid)),
            true => Some(Signal::protect(&candle.instrument_uid)),
        }
    }
}
