//! In-process exchange used by the bot tests: a fixed market, a scripted
//! market-data stream and a simulated order gateway.

use crate::EngineContext;
use api_client::stream::{
    MarketDataRequest, MarketDataResponse, StreamConfig, StreamConnection, StreamTransport,
    SubscriptionAck, SubscriptionStatus,
};
use api_client::{ApiError, MarketDataApi, ResponseMetadata, StatusCode};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use configuration::{ExecutorConfig, TimerConfig};
use core_types::{
    Candle, CandleInterval, Instrument, LastPrice, OrderBook, OrderBookLevel, Quotation, TradingDay,
};
use executor::{LastPriceTable, OrderGateway, SimulatedGateway};
use futures::StreamExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use timer::AnchoredClock;
use tokio::sync::{mpsc, Mutex};

/// Monday noon, inside the 07:00-15:40 session.
pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
}

pub(crate) struct FakeMarket {
    instruments: Vec<Instrument>,
    prices: Vec<LastPrice>,
    candles: Vec<Candle>,
}

impl FakeMarket {
    pub fn with_candles(mut self, candles: Vec<Candle>) -> Self {
        self.candles = candles;
        self
    }
}

/// Lot-1 rouble shares priced at `units`.
pub(crate) fn market(prices: &[(&str, i64)]) -> FakeMarket {
    FakeMarket {
        instruments: prices
            .iter()
            .map(|(uid, _)| Instrument {
                uid: uid.to_string(),
                figi: format!("FIGI-{uid}"),
                ticker: uid.to_string(),
                exchange: "MOEX".to_string(),
                lot: 1,
                currency: "rub".to_string(),
                min_price_increment: Quotation::new(0, 10_000_000).unwrap(),
                for_qualified_investor: false,
            })
            .collect(),
        prices: prices
            .iter()
            .map(|(uid, units)| LastPrice {
                figi: format!("FIGI-{uid}"),
                instrument_uid: uid.to_string(),
                price: Quotation::from_units(*units),
                time: now(),
            })
            .collect(),
        candles: Vec::new(),
    }
}

#[async_trait]
impl MarketDataApi for FakeMarket {
    async fn instruments(&self) -> Result<Vec<Instrument>, ApiError> {
        Ok(self.instruments.clone())
    }

    async fn instrument_by_uid(&self, uid: &str) -> Result<Instrument, ApiError> {
        self.instruments
            .iter()
            .find(|i| i.uid == uid)
            .cloned()
            .ok_or_else(|| ApiError::Business {
                code: StatusCode::NotFound,
                message: format!("instrument {uid} not found"),
                metadata: ResponseMetadata::default(),
            })
    }

    async fn candles(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ApiError> {
        Ok(self
            .candles
            .iter()
            .filter(|c| c.instrument_uid == instrument_uid && c.interval == interval)
            .filter(|c| c.time >= from && c.time < to)
            .cloned()
            .collect())
    }

    async fn last_prices(&self, instrument_uids: &[String]) -> Result<Vec<LastPrice>, ApiError> {
        Ok(self
            .prices
            .iter()
            .filter(|p| instrument_uids.contains(&p.instrument_uid))
            .cloned()
            .collect())
    }

    async fn order_book(&self, _instrument_uid: &str, _depth: u32) -> Result<OrderBook, ApiError> {
        Err(ApiError::InvalidData("order book snapshots are not served".to_string()))
    }

    /// MOEX trades from Monday 4 to Friday 8 March 2024.
    async fn trading_schedules(
        &self,
        exchange: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradingDay>, ApiError> {
        if exchange != "MOEX" {
            return Ok(Vec::new());
        }
        Ok((4..=8)
            .map(|day| TradingDay {
                exchange: exchange.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                start_time: Some(Utc.with_ymd_and_hms(2024, 3, day, 7, 0, 0).unwrap()),
                end_time: Some(Utc.with_ymd_and_hms(2024, 3, day, 15, 40, 0).unwrap()),
                is_trading_day: true,
            })
            .filter(|d| d.date >= from.date_naive() && d.date <= to.date_naive())
            .collect())
    }
}

/// The server half of one stream connection.
pub(crate) struct ServerSide {
    requests: mpsc::Receiver<MarketDataRequest>,
    responses: mpsc::UnboundedSender<Result<MarketDataResponse, ApiError>>,
}

impl ServerSide {
    /// Receives `count` requests and acknowledges every instrument in them.
    pub async fn ack_requests(&mut self, count: usize) {
        for _ in 0..count {
            let request = self.requests.recv().await.unwrap();
            let Some(topic) = request.topic() else {
                continue;
            };
            let results = request
                .instrument_ids()
                .into_iter()
                .map(|id| (id, SubscriptionStatus::Success))
                .collect();
            self.push(MarketDataResponse::SubscriptionAck(SubscriptionAck {
                topic,
                tracking_id: "test".to_string(),
                results,
            }));
        }
    }

    pub fn push(&self, response: MarketDataResponse) {
        let _ = self.responses.send(Ok(response));
    }

    pub fn push_book(&self, book: OrderBook) {
        self.push(MarketDataResponse::OrderBook(book));
    }

    pub fn push_candle(&self, candle: Candle) {
        self.push(MarketDataResponse::Candle(candle));
    }
}

pub(crate) struct FakeTransport {
    servers: mpsc::UnboundedSender<ServerSide>,
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn connect(&self) -> Result<StreamConnection, ApiError> {
        let (req_tx, req_rx) = mpsc::channel(16);
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let _ = self.servers.send(ServerSide {
            requests: req_rx,
            responses: resp_tx,
        });
        let responses = futures::stream::unfold(resp_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        Ok(StreamConnection {
            requests: req_tx,
            responses,
        })
    }
}

pub(crate) struct TestExchange {
    pub market: Arc<FakeMarket>,
    pub transport: Arc<FakeTransport>,
    pub gateway: Arc<SimulatedGateway>,
    pub prices: LastPriceTable,
    servers: Mutex<mpsc::UnboundedReceiver<ServerSide>>,
}

impl TestExchange {
    /// Commission-free account holding 10 000 roubles.
    pub async fn new(market: FakeMarket) -> Self {
        let prices = LastPriceTable::new();
        let gateway = Arc::new(SimulatedGateway::new(
            market.instruments.clone(),
            prices.clone(),
            Decimal::ZERO,
        ));
        gateway.deposit("rub", dec!(10000)).await;
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            market: Arc::new(market),
            transport: Arc::new(FakeTransport { servers: servers_tx }),
            gateway,
            prices,
            servers: Mutex::new(servers_rx),
        }
    }

    /// The next stream connection opened by a bot.
    pub async fn accept(&self) -> ServerSide {
        self.servers.lock().await.recv().await.unwrap()
    }
}

pub(crate) fn context_for(exchange: &TestExchange) -> EngineContext {
    EngineContext {
        market_data: exchange.market.clone(),
        schedule: exchange.market.clone(),
        transport: exchange.transport.clone(),
        gateway: exchange.gateway.clone(),
        clock: Arc::new(AnchoredClock::new(now())),
        prices: exchange.prices.clone(),
        executor: ExecutorConfig {
            preferred_position_price: dec!(1000),
            max_position_price: dec!(5000),
            min_profit_pct: dec!(0.5),
            stop_loss_pct: dec!(2),
        },
        timer: TimerConfig {
            exchange: "MOEX".to_string(),
            stop_lead_minutes: 5,
            max_lookahead_windows: 2,
        },
        stream: StreamConfig::default(),
    }
}

/// Runs `action` once a minute until the account's holdings are non-empty
/// (`want == true`) or empty, for at most ten hours of paused time.
pub(crate) async fn wait_for_holdings(exchange: &TestExchange, mut action: impl FnMut(), want: bool) -> bool {
    for _ in 0..600 {
        action();
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        let holdings = exchange.gateway.holdings().await.unwrap();
        if holdings.is_empty() != want {
            return true;
        }
    }
    false
}

pub(crate) fn book(uid: &str, bids: i64, asks: i64) -> OrderBook {
    let level = |price: i64, quantity: i64| OrderBookLevel {
        price: Quotation::from_units(price),
        quantity,
    };
    OrderBook {
        figi: format!("FIGI-{uid}"),
        instrument_uid: uid.to_string(),
        depth: 10,
        is_consistent: true,
        time: now(),
        limit_up: None,
        limit_down: None,
        bids: if bids > 0 { vec![level(99, bids)] } else { Vec::new() },
        asks: if asks > 0 { vec![level(101, asks)] } else { Vec::new() },
    }
}

pub(crate) fn minute_candle(uid: &str, time: DateTime<Utc>, close: Quotation) -> Candle {
    Candle {
        instrument_uid: uid.to_string(),
        interval: CandleInterval::OneMinute,
        time: CandleInterval::OneMinute.align(time),
        open: close,
        close,
        high: close,
        low: close,
        volume: 1,
        is_complete: true,
    }
}
