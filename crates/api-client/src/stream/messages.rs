use core_types::{Candle, CandleInterval, LastPrice, OrderBook, Trade, TradingStatus};
use serde::{Deserialize, Serialize};

/// The five market-data topics a stream can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Candles,
    OrderBooks,
    Trades,
    TradingStatuses,
    LastPrices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// Per-instrument candle subscription parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleParams {
    pub interval: CandleInterval,
    /// Deliver a candle only once its interval has closed.
    pub waiting_close: bool,
}

/// Per-instrument order-book subscription parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookParams {
    pub depth: u32,
}

/// Control messages sent to the server over the bidirectional stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketDataRequest {
    Candles {
        action: SubscriptionAction,
        instruments: Vec<(String, CandleParams)>,
    },
    OrderBooks {
        action: SubscriptionAction,
        instruments: Vec<(String, OrderBookParams)>,
    },
    Trades {
        action: SubscriptionAction,
        instrument_ids: Vec<String>,
    },
    TradingStatuses {
        action: SubscriptionAction,
        instrument_ids: Vec<String>,
    },
    LastPrices {
        action: SubscriptionAction,
        instrument_ids: Vec<String>,
    },
    Ping,
}

impl MarketDataRequest {
    pub fn topic(&self) -> Option<Topic> {
        match self {
            MarketDataRequest::Candles { .. } => Some(Topic::Candles),
            MarketDataRequest::OrderBooks { .. } => Some(Topic::OrderBooks),
            MarketDataRequest::Trades { .. } => Some(Topic::Trades),
            MarketDataRequest::TradingStatuses { .. } => Some(Topic::TradingStatuses),
            MarketDataRequest::LastPrices { .. } => Some(Topic::LastPrices),
            MarketDataRequest::Ping => None,
        }
    }

    pub fn action(&self) -> Option<SubscriptionAction> {
        match self {
            MarketDataRequest::Candles { action, .. }
            | MarketDataRequest::OrderBooks { action, .. }
            | MarketDataRequest::Trades { action, .. }
            | MarketDataRequest::TradingStatuses { action, .. }
            | MarketDataRequest::LastPrices { action, .. } => Some(*action),
            MarketDataRequest::Ping => None,
        }
    }

    /// Instrument ids the request refers to, in request order.
    pub fn instrument_ids(&self) -> Vec<String> {
        match self {
            MarketDataRequest::Candles { instruments, .. } => {
                instruments.iter().map(|(id, _)| id.clone()).collect()
            }
            MarketDataRequest::OrderBooks { instruments, .. } => {
                instruments.iter().map(|(id, _)| id.clone()).collect()
            }
            MarketDataRequest::Trades { instrument_ids, .. }
            | MarketDataRequest::TradingStatuses { instrument_ids, .. }
            | MarketDataRequest::LastPrices { instrument_ids, .. } => instrument_ids.clone(),
            MarketDataRequest::Ping => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Success,
    InstrumentNotFound,
    SubscriptionActionIsInvalid,
    DepthIsInvalid,
    IntervalIsInvalid,
    LimitIsExceeded,
    InternalError,
    TooManyRequests,
}

/// The server's answer to one SUBSCRIBE/UNSUBSCRIBE request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionAck {
    pub topic: Topic,
    pub tracking_id: String,
    pub results: Vec<(String, SubscriptionStatus)>,
}

/// Payloads received from the server, tagged by variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketDataResponse {
    SubscriptionAck(SubscriptionAck),
    Candle(Candle),
    OrderBook(OrderBook),
    Trade(Trade),
    TradingStatus(TradingStatus),
    LastPrice(LastPrice),
    Ping,
    /// A payload variant this client does not know.
    Unknown(String),
}
