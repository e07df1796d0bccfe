use executor::{Executor, ExecutorError};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Buy,
    /// Sell if the profit target is exceeded or the stop-loss is hit.
    Sell,
    /// Sell only if the stop-loss is hit.
    Protect,
}

/// A strategy's decision for one instrument. Strategies only produce
/// signals; the runtime applies them to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub instrument_uid: String,
    pub action: Action,
}

impl Signal {
    pub fn buy(instrument_uid: &str) -> Self {
        Self {
            instrument_uid: instrument_uid.to_string(),
            action: Action::Buy,
        }
    }

    pub fn sell(instrument_uid: &str) -> Self {
        Self {
            instrument_uid: instrument_uid.to_string(),
            action: Action::Sell,
        }
    }

    pub fn protect(instrument_uid: &str) -> Self {
        Self {
            instrument_uid: instrument_uid.to_string(),
            action: Action::Protect,
        }
    }

    /// Hands the signal to the executor. Returns the realized result per
    /// unit when a sell filled.
    pub async fn apply(&self, executor: &Executor) -> Result<Option<Decimal>, ExecutorError> {
        match self.action {
            Action::Buy => {
                executor.buy(&self.instrument_uid).await?;
                Ok(None)
            }
            Action::Sell => executor.sell(&self.instrument_uid).await,
            Action::Protect => executor.stop_loss(&self.instrument_uid).await,
        }
    }
}
