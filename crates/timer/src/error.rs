use api_client::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimerError {
    #[error("Failed to fetch the trading schedule: {0}")]
    Schedule(#[from] ApiError),

    #[error("No trading day on {exchange} within {days} days")]
    NoTradingDay { exchange: String, days: i64 },
}
