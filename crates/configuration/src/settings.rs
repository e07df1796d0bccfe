use crate::error::ConfigError;
use chrono::NaiveDate;
use core_types::{CoreError, Instrument, Quotation};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub timer: TimerConfig,
    pub order_book: Option<OrderBookParams>,
    pub interval: Option<IntervalParams>,
    pub backtest: Option<BacktestSettings>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.validate()?;
        self.executor.validate()?;
        if let Some(order_book) = &self.order_book {
            order_book.validate()?;
        }
        if let Some(interval) = &self.interval {
            interval.validate()?;
        }
        if let Some(backtest) = &self.backtest {
            backtest.validate()?;
        }
        Ok(())
    }
}

/// Connection settings consumed by the transport at construction.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub endpoint: String,
    pub token: String,
    pub app_name: String,
    pub account_id: String,
}

impl ApiConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::ValidationError("api.endpoint must be set".to_string()));
        }
        if self.account_id.is_empty() {
            return Err(ConfigError::ValidationError("api.account_id must be set".to_string()));
        }
        Ok(())
    }
}

/// Where the candle store lives and how much history a first update pulls.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: String,
    pub history_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "candles.db".to_string(),
            history_days: 30,
        }
    }
}

/// Position sizing and exit rules shared by every strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Target notional of one position in the instrument's currency.
    pub preferred_position_price: Decimal,
    /// Instruments whose single lot costs more than this are not traded.
    pub max_position_price: Decimal,
    pub min_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
}

impl ExecutorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.preferred_position_price <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "executor.preferred_position_price must be positive".to_string(),
            ));
        }
        if self.max_position_price < self.preferred_position_price {
            return Err(ConfigError::ValidationError(
                "executor.max_position_price must not be below preferred_position_price".to_string(),
            ));
        }
        if self.stop_loss_pct <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "executor.stop_loss_pct must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Session timer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TimerConfig {
    pub exchange: String,
    /// How long before the session end the STOP event fires.
    pub stop_lead_minutes: i64,
    /// Number of 7-day schedule windows to scan for the next trading day.
    pub max_lookahead_windows: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            exchange: "MOEX".to_string(),
            stop_lead_minutes: 5,
            max_lookahead_windows: 4,
        }
    }
}

/// Parameters for the order-book imbalance strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookParams {
    pub instruments: Vec<String>,
    pub depth: u32,
    pub buy_ratio: Decimal,
    pub sell_ratio: Decimal,
    #[serde(default = "default_true")]
    pub sell_out: bool,
}

impl OrderBookParams {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::ValidationError("order_book.instruments is empty".to_string()));
        }
        if self.depth == 0 {
            return Err(ConfigError::ValidationError("order_book.depth must be positive".to_string()));
        }
        if self.buy_ratio <= Decimal::ZERO || self.sell_ratio <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "order_book.buy_ratio and sell_ratio must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the interval strategy derives its price corridor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum AnalyseMode {
    BestWidth,
    MathStat,
}

/// The corridor parameters one backtest run or one live interval bot uses.
#[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
pub struct CorridorConfig {
    pub analyse: AnalyseMode,
    #[serde(default = "default_low_percentile")]
    pub low_percentile: Decimal,
    #[serde(default = "default_high_percentile")]
    pub high_percentile: Decimal,
    pub min_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub days_to_calculate_interval: u32,
    pub commission_pct: Decimal,
}

impl CorridorConfig {
    /// Minimal corridor width, in percent of its low, that still pays for a
    /// round trip's commission and the target profit.
    pub fn required_width_pct(&self) -> Decimal {
        self.min_profit_pct + dec!(2) * self.commission_pct
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.days_to_calculate_interval == 0 {
            return Err(ConfigError::ValidationError(
                "days_to_calculate_interval must be positive".to_string(),
            ));
        }
        if self.analyse == AnalyseMode::MathStat
            && !(Decimal::ZERO <= self.low_percentile
                && self.low_percentile < self.high_percentile
                && self.high_percentile <= dec!(100))
        {
            return Err(ConfigError::ValidationError(format!(
                "percentiles must satisfy 0 <= low < high <= 100, got {} / {}",
                self.low_percentile, self.high_percentile
            )));
        }
        if self.commission_pct < Decimal::ZERO {
            return Err(ConfigError::ValidationError("commission_pct must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Parameters for the interval (range) strategy when trading live.
#[derive(Debug, Clone, Deserialize)]
pub struct IntervalParams {
    pub instruments: Vec<InstrumentSpec>,
    pub corridor: CorridorConfig,
    pub top_instruments_quantity: usize,
    /// Seconds between corridor recomputations.
    pub interval_update_delay_secs: u64,
    #[serde(default = "default_true")]
    pub sell_out: bool,
}

impl IntervalParams {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::ValidationError("interval.instruments is empty".to_string()));
        }
        if self.top_instruments_quantity == 0 {
            return Err(ConfigError::ValidationError(
                "interval.top_instruments_quantity must be positive".to_string(),
            ));
        }
        self.corridor.validate()
    }
}

/// Settings of a historical replay over `[start_date, end_date)`.
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestSettings {
    pub instruments: Vec<InstrumentSpec>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub corridor: CorridorConfig,
    pub top_instruments_quantity: usize,
}

impl BacktestSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.start_date >= self.end_date {
            return Err(ConfigError::ValidationError(
                "backtest.start_date must precede end_date".to_string(),
            ));
        }
        if self.instruments.is_empty() {
            return Err(ConfigError::ValidationError("backtest.instruments is empty".to_string()));
        }
        self.corridor.validate()
    }
}

/// Static description of an instrument, used where reference data is not
/// fetched from the API (backtests, offline tools).
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentSpec {
    pub uid: String,
    #[serde(default)]
    pub figi: String,
    pub ticker: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    pub lot: i64,
    pub currency: String,
    pub min_price_increment: Decimal,
}

impl InstrumentSpec {
    pub fn to_instrument(&self) -> Result<Instrument, CoreError> {
        Ok(Instrument {
            uid: self.uid.clone(),
            figi: self.figi.clone(),
            ticker: self.ticker.clone(),
            exchange: self.exchange.clone(),
            lot: self.lot,
            currency: self.currency.clone(),
            min_price_increment: Quotation::try_from(self.min_price_increment)?,
            for_qualified_investor: false,
        })
    }
}

fn default_true() -> bool {
    true
}

fn default_exchange() -> String {
    "MOEX".to_string()
}

fn default_low_percentile() -> Decimal {
    dec!(10)
}

fn default_high_percentile() -> Decimal {
    dec!(90)
}
