use crate::error::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Defines a parameter sweep. This is deserialized from the `optimizer.toml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    pub grid: ParameterGrid,
    #[serde(default)] // Use default values if the [report] section is missing
    pub report: ReportConfig,
}

/// Half-open ranges swept by the optimizer. Stop-loss and min-profit advance
/// in steps of 0.1, days and percentiles in steps of 1.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterGrid {
    pub stop_loss_min: Decimal,
    pub stop_loss_max: Decimal,
    pub days_min: u32,
    pub days_max: u32,
    pub min_profit_min: Decimal,
    pub min_profit_max: Decimal,
    #[serde(default = "default_percentile_min")]
    pub percentile_min: u32,
    #[serde(default = "default_percentile_max")]
    pub percentile_max: u32,
    /// When false only best-width configurations are generated.
    #[serde(default = "default_true")]
    pub include_math_stat: bool,
    #[serde(default = "default_commission")]
    pub commission_pct: Decimal,
}

impl ParameterGrid {
    pub const DECIMAL_STEP: Decimal = dec!(0.1);

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stop_loss_min <= Decimal::ZERO || self.stop_loss_min >= self.stop_loss_max {
            return Err(ConfigError::ValidationError(format!(
                "stop-loss range [{}, {}) is empty or non-positive",
                self.stop_loss_min, self.stop_loss_max
            )));
        }
        if self.days_min == 0 || self.days_min >= self.days_max {
            return Err(ConfigError::ValidationError(format!(
                "days range [{}, {}) is empty or starts at zero",
                self.days_min, self.days_max
            )));
        }
        if self.min_profit_min < Decimal::ZERO || self.min_profit_min >= self.min_profit_max {
            return Err(ConfigError::ValidationError(format!(
                "min-profit range [{}, {}) is empty or negative",
                self.min_profit_min, self.min_profit_max
            )));
        }
        // low = p, high = 100 - p must stay a valid, non-empty corridor.
        if self.include_math_stat
            && (self.percentile_min >= self.percentile_max || self.percentile_max > 50)
        {
            return Err(ConfigError::ValidationError(format!(
                "percentile range [{}, {}) must be non-empty and end at most at 50",
                self.percentile_min, self.percentile_max
            )));
        }
        Ok(())
    }
}

/// How the ranked sweep results are reported.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Number of best rows rendered in the console table.
    pub top: usize,
    pub json_path: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top: 20,
            json_path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_percentile_min() -> u32 {
    5
}

fn default_percentile_max() -> u32 {
    30
}

fn default_commission() -> Decimal {
    dec!(0.05)
}
