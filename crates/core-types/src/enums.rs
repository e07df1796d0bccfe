use crate::error::CoreError;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side of the order
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Terminal and intermediate states an order report can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderExecutionStatus {
    Unspecified,
    Fill,
    PartiallyFill,
    Rejected,
    Cancelled,
    New,
}

impl OrderExecutionStatus {
    /// A partial fill counts as a fill for position state; the remainder is
    /// picked up on a later tick.
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Fill | Self::PartiallyFill)
    }
}

/// Candle widths supported by the history and streaming APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "1d")]
    Day,
}

impl CandleInterval {
    pub fn duration(&self) -> Duration {
        match self {
            Self::OneMinute => Duration::minutes(1),
            Self::FiveMinutes => Duration::minutes(5),
            Self::FifteenMinutes => Duration::minutes(15),
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::days(1),
        }
    }

    /// The widest time range the history RPC accepts in one request.
    pub fn max_request_span(&self) -> Duration {
        match self {
            Self::OneMinute | Self::FiveMinutes | Self::FifteenMinutes => Duration::days(1),
            Self::Hour => Duration::days(7),
            Self::Day => Duration::days(365),
        }
    }

    /// Floors `time` to the start of the candle containing it.
    pub fn align(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        time.duration_trunc(self.duration()).unwrap_or(time)
    }

    pub fn is_aligned(&self, time: DateTime<Utc>) -> bool {
        self.align(time) == time
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::Hour => "1h",
            Self::Day => "1d",
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::Hour),
            "1d" => Ok(Self::Day),
            other => Err(CoreError::InvalidInterval(other.to_string())),
        }
    }
}
