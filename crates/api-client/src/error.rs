use crate::responses::ResponseMetadata;
use thiserror::Error;

/// Status codes reported by the RPC transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// Transient transport failure; the only kind the retry policy retries.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A well-formed call the broker refused (rejected order, rate limit,
    /// unknown instrument). Carries the response headers for diagnostics.
    #[error("The API request returned an error {code:?}: {message} (tracking id: {})", .metadata.tracking_id.as_deref().unwrap_or("-"))]
    Business {
        code: StatusCode,
        message: String,
        metadata: ResponseMetadata,
    },

    #[error("The call was cancelled")]
    Cancelled,

    #[error("Invalid data format from API: {0}")]
    InvalidData(String),
}

impl ApiError {
    /// Maps a transport status onto the error kinds the runtime distinguishes.
    pub fn from_status(code: StatusCode, message: impl Into<String>, metadata: ResponseMetadata) -> Self {
        let message = message.into();
        match code {
            StatusCode::Unavailable => ApiError::Unavailable(message),
            StatusCode::Unauthenticated => ApiError::Unauthenticated(message),
            StatusCode::PermissionDenied => ApiError::PermissionDenied(message),
            StatusCode::InvalidArgument => ApiError::InvalidArgument(message),
            StatusCode::Cancelled => ApiError::Cancelled,
            code => ApiError::Business {
                code,
                message,
                metadata,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Unavailable(_))
    }

    /// Errors that must terminate the affected stream or strategy at once.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthenticated(_) | ApiError::PermissionDenied(_) | ApiError::InvalidArgument(_)
        )
    }
}

impl From<core_types::CoreError> for ApiError {
    fn from(err: core_types::CoreError) -> Self {
        ApiError::InvalidData(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("The stream driver is already running or has finished")]
    AlreadyListening,
}
