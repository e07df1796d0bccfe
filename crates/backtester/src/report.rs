use chrono::NaiveDate;
use configuration::CorridorConfig;
use rust_decimal::Decimal;
use serde::Serialize;

/// Result of replaying one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayResult {
    pub date: NaiveDate,
    pub selected: Vec<String>,
    /// Net of commission, in the instruments' currency.
    pub profit: Decimal,
    /// `profit` in percent of the capital the day's positions required.
    pub percent: Decimal,
    pub trades: usize,
}

impl DayResult {
    pub(crate) fn idle(date: NaiveDate) -> Self {
        Self {
            date,
            selected: Vec::new(),
            profit: Decimal::ZERO,
            percent: Decimal::ZERO,
            trades: 0,
        }
    }
}

/// Result of one single-config backtest over a date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub config: CorridorConfig,
    pub total_profit: Decimal,
    pub total_percent: Decimal,
    /// Days whose profit is non-zero.
    pub trading_days: usize,
    /// `total_percent / trading_days`, zero without trading days.
    pub average_day_percent: Decimal,
    pub days: Vec<DayResult>,
}

impl BacktestReport {
    pub fn from_days(config: CorridorConfig, days: Vec<DayResult>) -> Self {
        let total_profit = days.iter().map(|d| d.profit).sum();
        let total_percent: Decimal = days.iter().map(|d| d.percent).sum();
        let trading_days = days.iter().filter(|d| !d.profit.is_zero()).count();
        let average_day_percent = if trading_days == 0 {
            Decimal::ZERO
        } else {
            total_percent / Decimal::from(trading_days)
        };
        Self {
            config,
            total_profit,
            total_percent,
            trading_days,
            average_day_percent,
            days,
        }
    }
}
