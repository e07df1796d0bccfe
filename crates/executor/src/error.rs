use api_client::ApiError;
use core_types::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Price arithmetic failed: {0}")]
    Price(#[from] CoreError),

    #[error("Order notional overflows for {instrument_uid}: {lots} lots at {price}")]
    NotionalOverflow {
        instrument_uid: String,
        lots: i64,
        price: String,
    },
}

impl ExecutorError {
    /// Business rejections are logged and swallowed by the executor; every
    /// other error reaches the caller.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ExecutorError::Api(ApiError::Business { .. }))
    }
}
