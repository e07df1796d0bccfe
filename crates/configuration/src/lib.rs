//! # Configuration Crate
//!
//! Strongly-typed settings for every subsystem, loaded with the `config`
//! crate from TOML files and `APP__`-prefixed environment variables
//! (`APP__API__TOKEN` overrides `[api] token`). Every section validates
//! itself before it is handed to the rest of the workspace.

pub use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod optimizer_config;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use optimizer_config::{OptimizerConfig, ParameterGrid, ReportConfig};
pub use settings::{
    AnalyseMode, ApiConfig, BacktestSettings, Config, CorridorConfig, ExecutorConfig,
    InstrumentSpec, IntervalParams, OrderBookParams, StorageConfig, TimerConfig,
};

/// Loads the application configuration from `path` (extension optional).
///
/// Environment variables prefixed with `APP` and separated by `__` take
/// precedence over the file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;
    tracing::debug!(path = %path.as_ref().display(), "configuration loaded");

    Ok(config)
}

/// Loads a parameter sweep definition, usually `optimizer.toml`.
pub fn load_optimizer_config(path: impl AsRef<Path>) -> Result<OptimizerConfig, ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .build()?
        .try_deserialize::<OptimizerConfig>()?;
    config.grid.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const CONFIG: &str = r#"
[api]
endpoint = "invest-public-api.example.com:443"
token = "t.secret"
app_name = "investbot"
account_id = "2000123456"

[storage]
path = "data/candles.db"
history_days = 10

[executor]
preferred_position_price = 5000
max_position_price = 20000
min_profit_pct = 0.5
stop_loss_pct = 2

[order_book]
instruments = ["BBG004730N88"]
depth = 20
buy_ratio = 2
sell_ratio = 2

[backtest]
start_date = "2024-03-01"
end_date = "2024-03-15"
top_instruments_quantity = 3

[backtest.corridor]
analyse = "math-stat"
low_percentile = 10
high_percentile = 90
min_profit_pct = 0.4
stop_loss_pct = 1.5
days_to_calculate_interval = 3
commission_pct = 0.05

[[backtest.instruments]]
uid = "e6123145-9665-43e0-8413-cd61b8aa9b13"
ticker = "SBER"
lot = 10
currency = "rub"
min_price_increment = 0.01
"#;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_toml(CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.api.app_name, "investbot");
        assert_eq!(config.storage.history_days, 10);
        assert_eq!(config.executor.stop_loss_pct, dec!(2));
        assert_eq!(config.timer.stop_lead_minutes, 5);

        let order_book = config.order_book.unwrap();
        assert_eq!(order_book.depth, 20);
        assert!(order_book.sell_out);

        let backtest = config.backtest.unwrap();
        assert_eq!(backtest.corridor.analyse, AnalyseMode::MathStat);
        assert_eq!(backtest.corridor.required_width_pct(), dec!(0.5));
        let instrument = backtest.instruments[0].to_instrument().unwrap();
        assert_eq!(instrument.exchange, "MOEX");
        assert_eq!(instrument.min_price_increment.nano(), 10_000_000);
    }

    #[test]
    fn test_validation_rejects_inverted_dates() {
        let broken = CONFIG.replace("2024-03-15", "2024-02-15");
        let file = write_toml(&broken);
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_load_optimizer_config() {
        let file = write_toml(
            r#"
[grid]
stop_loss_min = 1.0
stop_loss_max = 1.2
days_min = 1
days_max = 3
min_profit_min = 0.3
min_profit_max = 0.5
include_math_stat = false
"#,
        );
        let config = load_optimizer_config(file.path()).unwrap();
        assert_eq!(config.grid.days_max, 3);
        assert!(!config.grid.include_math_stat);
        assert_eq!(config.grid.commission_pct, dec!(0.05));
        assert_eq!(config.report.top, 20);
    }

    #[test]
    fn test_empty_grid_range_is_rejected() {
        let file = write_toml(
            r#"
[grid]
stop_loss_min = 1.0
stop_loss_max = 1.0
days_min = 1
days_max = 3
min_profit_min = 0.3
min_profit_max = 0.5
"#,
        );
        assert!(load_optimizer_config(file.path()).is_err());
    }
}
