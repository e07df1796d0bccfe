use api_client::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to fetch candles from the source: {0}")]
    SourceError(#[from] ApiError),

    /// The source returned a candle that cannot be stored.
    #[error("Invalid candle from source: {0}")]
    InvalidCandle(String),

    /// A persisted row violates the candle invariants.
    #[error("Corrupt candle row for {instrument_uid} at {time}: {reason}")]
    StoreCorruption {
        instrument_uid: String,
        time: i64,
        reason: String,
    },
}
