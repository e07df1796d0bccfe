use configuration::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Strategy received invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Strategy configuration rejected: {0}")]
    Config(#[from] ConfigError),
}
