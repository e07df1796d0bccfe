use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("nano component {0} is outside [-999999999, 999999999]")]
    NanoOutOfRange(i32),

    #[error("units {units} and nano {nano} carry different signs")]
    SignMismatch { units: i64, nano: i32 },

    #[error("Invalid price step: {0}")]
    InvalidStep(String),

    #[error("Price does not fit the (units, nano) representation: {0}")]
    Overflow(String),

    #[error("Candle violates its invariants: {0}")]
    InvalidCandle(String),

    #[error("Unknown candle interval: {0}")]
    InvalidInterval(String),
}
