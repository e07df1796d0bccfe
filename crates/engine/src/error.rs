use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API client error: {0}")]
    ApiClient(#[from] api_client::ApiError),

    #[error("Market data stream error: {0}")]
    Stream(#[from] api_client::StreamError),

    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Session timer error: {0}")]
    Timer(#[from] timer::TimerError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] strategies::StrategyError),

    #[error("Executor error: {0}")]
    Executor(#[from] executor::ExecutorError),

    #[error("Invalid instrument: {0}")]
    Instrument(#[from] core_types::CoreError),

    #[error("Bot task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("The {0} ended unexpectedly")]
    Closed(&'static str),
}
