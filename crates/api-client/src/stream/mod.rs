//! Market-data stream multiplexer.
//!
//! A single driver task (`listen`) owns the bidirectional stream and routes
//! every payload into one of five bounded, typed queues. Each queue has at
//! most one consumer, delivers in arrival order and is closed when the
//! driver exits.

pub mod messages;
pub mod subscriptions;

use crate::error::{ApiError, StreamError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use core_types::{Candle, LastPrice, OrderBook, Trade, TradingStatus};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub use messages::{
    CandleParams, MarketDataRequest, MarketDataResponse, OrderBookParams, SubscriptionAck,
    SubscriptionAction, SubscriptionStatus, Topic,
};
pub use subscriptions::{Entry, SubscriptionSet};

/// One established bidirectional stream.
pub struct StreamConnection {
    pub requests: mpsc::Sender<MarketDataRequest>,
    pub responses: BoxStream<'static, Result<MarketDataResponse, ApiError>>,
}

/// Opens market-data streams. Implemented by the RPC transport.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self) -> Result<StreamConnection, ApiError>;
}

#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Capacity of every topic queue. A full queue blocks the driver until the
    /// consumer catches up.
    pub queue_capacity: usize,
    /// Governs reconnects after `Unavailable`.
    pub retry: RetryPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            retry: RetryPolicy::default(),
        }
    }
}

struct Queues {
    candles: mpsc::Sender<Candle>,
    order_books: mpsc::Sender<OrderBook>,
    trades: mpsc::Sender<Trade>,
    trading_statuses: mpsc::Sender<TradingStatus>,
    last_prices: mpsc::Sender<LastPrice>,
}

#[derive(Default)]
struct Receivers {
    candles: Option<mpsc::Receiver<Candle>>,
    order_books: Option<mpsc::Receiver<OrderBook>>,
    trades: Option<mpsc::Receiver<Trade>>,
    trading_statuses: Option<mpsc::Receiver<TradingStatus>>,
    last_prices: Option<mpsc::Receiver<LastPrice>>,
}

pub struct MarketDataStream {
    transport: Arc<dyn StreamTransport>,
    config: StreamConfig,
    cancel: CancellationToken,
    subscriptions: Mutex<SubscriptionSet>,
    /// Request side of the live connection, if any.
    connection: Mutex<Option<mpsc::Sender<MarketDataRequest>>>,
    /// Producer halves, taken by the driver for its lifetime.
    queues: Mutex<Option<Queues>>,
    /// Consumer halves, each handed out once.
    receivers: Mutex<Receivers>,
}

impl MarketDataStream {
    /// `cancel` is usually a child of the bot's token; [`Self::stop`] cancels it.
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (candles, candles_rx) = mpsc::channel(capacity);
        let (order_books, order_books_rx) = mpsc::channel(capacity);
        let (trades, trades_rx) = mpsc::channel(capacity);
        let (trading_statuses, trading_statuses_rx) = mpsc::channel(capacity);
        let (last_prices, last_prices_rx) = mpsc::channel(capacity);

        Self {
            transport,
            config,
            cancel,
            subscriptions: Mutex::new(SubscriptionSet::default()),
            connection: Mutex::new(None),
            queues: Mutex::new(Some(Queues {
                candles,
                order_books,
                trades,
                trading_statuses,
                last_prices,
            })),
            receivers: Mutex::new(Receivers {
                candles: Some(candles_rx),
                order_books: Some(order_books_rx),
                trades: Some(trades_rx),
                trading_statuses: Some(trading_statuses_rx),
                last_prices: Some(last_prices_rx),
            }),
        }
    }

    /// Subscribes `ids` to candles. Returns the candle queue on the first
    /// candle subscription of this stream, `None` afterwards.
    pub async fn subscribe_candles(
        &self,
        ids: &[String],
        params: CandleParams,
    ) -> Option<mpsc::Receiver<Candle>> {
        let request = self.subscriptions.lock().await.add_candles(ids, params);
        self.send(request).await;
        self.receivers.lock().await.candles.take()
    }

    pub async fn subscribe_order_books(
        &self,
        ids: &[String],
        params: OrderBookParams,
    ) -> Option<mpsc::Receiver<OrderBook>> {
        let request = self.subscriptions.lock().await.add_order_books(ids, params);
        self.send(request).await;
        self.receivers.lock().await.order_books.take()
    }

    pub async fn subscribe_trades(&self, ids: &[String]) -> Option<mpsc::Receiver<Trade>> {
        let request = self.subscriptions.lock().await.add_trades(ids);
        self.send(request).await;
        self.receivers.lock().await.trades.take()
    }

    pub async fn subscribe_trading_statuses(
        &self,
        ids: &[String],
    ) -> Option<mpsc::Receiver<TradingStatus>> {
        let request = self.subscriptions.lock().await.add_trading_statuses(ids);
        self.send(request).await;
        self.receivers.lock().await.trading_statuses.take()
    }

    pub async fn subscribe_last_prices(&self, ids: &[String]) -> Option<mpsc::Receiver<LastPrice>> {
        let request = self.subscriptions.lock().await.add_last_prices(ids);
        self.send(request).await;
        self.receivers.lock().await.last_prices.take()
    }

    pub async fn unsubscribe(&self, topic: Topic, ids: &[String]) {
        let request = self.subscriptions.lock().await.remove(topic, ids);
        self.send(request).await;
    }

    pub async fn unsubscribe_all(&self) {
        let requests = self.subscriptions.lock().await.remove_all();
        for request in requests {
            self.send(Some(request)).await;
        }
    }

    /// A copy of the current subscription set.
    pub async fn subscriptions(&self) -> SubscriptionSet {
        self.subscriptions.lock().await.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Drives the stream until it is stopped or fails for good.
    ///
    /// Returns `Ok(())` when stopped or cancelled by the transport. Every
    /// topic queue is closed when this returns. A stream can be driven once.
    pub async fn listen(&self) -> Result<(), StreamError> {
        let queues = self
            .queues
            .lock()
            .await
            .take()
            .ok_or(StreamError::AlreadyListening)?;

        let result = self.run(&queues).await;

        *self.connection.lock().await = None;
        drop(queues);
        match &result {
            Ok(()) => tracing::info!("Market data stream stopped."),
            Err(e) => tracing::error!(error = %e, "Market data stream failed."),
        }
        result
    }

    async fn run(&self, queues: &Queues) -> Result<(), StreamError> {
        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                connected = self.transport.connect() => connected,
            };
            let err = match connected {
                Ok(connection) => {
                    attempt = 1;
                    match self.drive(connection, queues).await {
                        Ok(()) => return Ok(()),
                        Err(err) => err,
                    }
                }
                Err(err) => err,
            };

            if matches!(err, ApiError::Cancelled) {
                return Ok(());
            }
            if !err.is_retryable() || attempt >= policy.max_attempts {
                return Err(err.into());
            }
            tracing::warn!(attempt, error = %err, "Market data stream interrupted, reconnecting.");
            attempt += 1;
            *self.connection.lock().await = None;
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(policy.backoff) => {}
            }
        }
    }

    /// Pumps one connection. `Ok` means the stream was stopped.
    async fn drive(&self, connection: StreamConnection, queues: &Queues) -> Result<(), ApiError> {
        let StreamConnection {
            requests,
            mut responses,
        } = connection;

        // Publish the connection first so concurrent subscribe calls are not
        // lost; a duplicate SUBSCRIBE is harmless.
        *self.connection.lock().await = Some(requests.clone());
        let resubscribe = {
            let mut set = self.subscriptions.lock().await;
            set.reset_acknowledgements();
            set.subscribe_requests()
        };
        tracing::info!(requests = resubscribe.len(), "Market data stream connected.");
        for request in resubscribe {
            requests
                .send(request)
                .await
                .map_err(|_| ApiError::Unavailable("request channel closed".to_string()))?;
        }

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                message = responses.next() => message,
            };
            match message {
                None => return Err(ApiError::Unavailable("stream closed by server".to_string())),
                Some(Err(err)) => return Err(err),
                Some(Ok(response)) => {
                    if !self.dispatch(response, queues).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Routes one payload. Returns `false` if cancelled while delivering.
    async fn dispatch(&self, response: MarketDataResponse, queues: &Queues) -> bool {
        match response {
            MarketDataResponse::SubscriptionAck(ack) => {
                let rejected = self.subscriptions.lock().await.acknowledge(&ack);
                for (instrument_id, status) in rejected {
                    tracing::warn!(
                        topic = ?ack.topic,
                        %instrument_id,
                        ?status,
                        tracking_id = %ack.tracking_id,
                        "Subscription rejected by server."
                    );
                }
                true
            }
            MarketDataResponse::Candle(candle) => self.deliver(&queues.candles, candle).await,
            MarketDataResponse::OrderBook(book) => self.deliver(&queues.order_books, book).await,
            MarketDataResponse::Trade(trade) => self.deliver(&queues.trades, trade).await,
            MarketDataResponse::TradingStatus(status) => {
                self.deliver(&queues.trading_statuses, status).await
            }
            MarketDataResponse::LastPrice(price) => self.deliver(&queues.last_prices, price).await,
            MarketDataResponse::Ping => {
                tracing::trace!("Ping received.");
                true
            }
            MarketDataResponse::Unknown(kind) => {
                tracing::warn!(%kind, "Discarding unknown market data payload.");
                true
            }
        }
    }

    async fn deliver<T>(&self, queue: &mpsc::Sender<T>, item: T) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = queue.send(item) => {
                if sent.is_err() {
                    tracing::debug!("Consumer dropped its queue, payload discarded.");
                }
                true
            }
        }
    }

    async fn send(&self, request: Option<MarketDataRequest>) {
        let Some(request) = request else { return };
        let connection = self.connection.lock().await.clone();
        match connection {
            // Not connected: the driver sends the whole set on connect.
            None => tracing::debug!(?request, "Stream not connected, request deferred."),
            Some(sender) => {
                if sender.send(request).await.is_err() {
                    tracing::debug!("Connection closed, request deferred to reconnect.");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use core_types::{OrderBookLevel, Quotation};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// The server half of one mock connection.
    struct ServerSide {
        requests: mpsc::Receiver<MarketDataRequest>,
        responses: mpsc::UnboundedSender<Result<MarketDataResponse, ApiError>>,
    }

    impl ServerSide {
        /// Receives one request and acknowledges every instrument in it.
        async fn ack_next(&mut self) -> MarketDataRequest {
            let request = self.requests.recv().await.unwrap();
            let ack = SubscriptionAck {
                topic: request.topic().unwrap(),
                tracking_id: "track".to_string(),
                results: request
                    .instrument_ids()
                    .into_iter()
                    .map(|id| (id, SubscriptionStatus::Success))
                    .collect(),
            };
            self.push(MarketDataResponse::SubscriptionAck(ack));
            request
        }

        fn push(&self, response: MarketDataResponse) {
            self.responses.send(Ok(response)).unwrap();
        }
    }

    struct MockTransport {
        failures: AtomicU32,
        failure: ApiError,
        servers: mpsc::UnboundedSender<ServerSide>,
        connects: AtomicU32,
    }

    impl MockTransport {
        fn new(failures: u32, failure: ApiError) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
            let (servers, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                failures: AtomicU32::new(failures),
                failure,
                servers,
                connects: AtomicU32::new(0),
            });
            (transport, rx)
        }
    }

    #[async_trait]
    impl StreamTransport for MockTransport {
        async fn connect(&self) -> Result<StreamConnection, ApiError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(self.failure.clone());
            }
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

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn book(uid: &str, bid_quantity: i64) -> OrderBook {
        OrderBook {
            figi: format!("FIGI-{uid}"),
            instrument_uid: uid.to_string(),
            depth: 1,
            is_consistent: true,
            time: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            limit_up: None,
            limit_down: None,
            bids: vec![OrderBookLevel {
                price: Quotation::from_units(100),
                quantity: bid_quantity,
            }],
            asks: vec![],
        }
    }

    fn last_price(uid: &str, units: i64) -> LastPrice {
        LastPrice {
            figi: format!("FIGI-{uid}"),
            instrument_uid: uid.to_string(),
            price: Quotation::from_units(units),
            time: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    fn spawn_listen(stream: &Arc<MarketDataStream>) -> tokio::task::JoinHandle<Result<(), StreamError>> {
        let stream = stream.clone();
        tokio::spawn(async move { stream.listen().await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_payloads_per_topic_in_order() {
        let (transport, mut servers) = MockTransport::new(0, ApiError::Cancelled);
        let stream = Arc::new(MarketDataStream::new(
            transport,
            StreamConfig::default(),
            CancellationToken::new(),
        ));
        let mut books = stream
            .subscribe_order_books(&ids(&["A"]), OrderBookParams { depth: 1 })
            .await
            .unwrap();
        let mut prices = stream.subscribe_last_prices(&ids(&["A"])).await.unwrap();
        assert!(stream.subscribe_last_prices(&ids(&["B"])).await.is_none());

        let driver = spawn_listen(&stream);
        let mut server = servers.recv().await.unwrap();
        assert_eq!(server.ack_next().await.topic(), Some(Topic::OrderBooks));
        assert_eq!(server.ack_next().await.instrument_ids(), ids(&["A", "B"]));

        server.push(MarketDataResponse::OrderBook(book("A", 1)));
        server.push(MarketDataResponse::Unknown("open_interest".to_string()));
        server.push(MarketDataResponse::LastPrice(last_price("A", 101)));
        server.push(MarketDataResponse::OrderBook(book("A", 2)));

        assert_eq!(books.recv().await.unwrap().bids[0].quantity, 1);
        assert_eq!(prices.recv().await.unwrap().price, Quotation::from_units(101));
        assert_eq!(books.recv().await.unwrap().bids[0].quantity, 2);

        stream.stop();
        driver.await.unwrap().unwrap();

        assert!(books.recv().await.is_none());
        assert!(prices.recv().await.is_none());
        let subscriptions = stream.subscriptions().await;
        assert_eq!(subscriptions.len(), 3);
        assert!(subscriptions.all_acknowledged());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_while_connected_is_sent_immediately() {
        let (transport, mut servers) = MockTransport::new(0, ApiError::Cancelled);
        let stream = Arc::new(MarketDataStream::new(
            transport,
            StreamConfig::default(),
            CancellationToken::new(),
        ));
        let driver = spawn_listen(&stream);
        let mut server = servers.recv().await.unwrap();

        let _trades = stream.subscribe_trades(&ids(&["X"])).await.unwrap();
        let request = server.ack_next().await;
        assert_eq!(request.topic(), Some(Topic::Trades));

        stream.unsubscribe(Topic::Trades, &ids(&["X"])).await;
        let request = server.requests.recv().await.unwrap();
        assert_eq!(request.action(), Some(SubscriptionAction::Unsubscribe));

        stream.stop();
        driver.await.unwrap().unwrap();
        assert!(stream.subscriptions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resubscribes_whole_set() {
        let (transport, mut servers) = MockTransport::new(1, ApiError::Unavailable("dns".to_string()));
        let stream = Arc::new(MarketDataStream::new(
            transport.clone(),
            StreamConfig::default(),
            CancellationToken::new(),
        ));
        let mut prices = stream.subscribe_last_prices(&ids(&["A", "B"])).await.unwrap();
        let _candles = stream
            .subscribe_candles(
                &ids(&["A"]),
                CandleParams {
                    interval: core_types::CandleInterval::OneMinute,
                    waiting_close: true,
                },
            )
            .await
            .unwrap();
        let driver = spawn_listen(&stream);

        let mut first = servers.recv().await.unwrap();
        first.ack_next().await;
        first.ack_next().await;
        first
            .responses
            .send(Err(ApiError::Unavailable("connection reset".to_string())))
            .unwrap();

        let mut second = servers.recv().await.unwrap();
        assert_eq!(second.ack_next().await.topic(), Some(Topic::Candles));
        assert_eq!(second.ack_next().await.instrument_ids(), ids(&["A", "B"]));
        second.push(MarketDataResponse::LastPrice(last_price("B", 7)));
        assert_eq!(prices.recv().await.unwrap().instrument_uid, "B");

        stream.stop();
        driver.await.unwrap().unwrap();
        assert_eq!(transport.connects.load(Ordering::SeqCst), 3);
        assert!(stream.subscriptions().await.all_acknowledged());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_surfaces_and_closes_queues() {
        let (transport, mut servers) = MockTransport::new(0, ApiError::Cancelled);
        let stream = Arc::new(MarketDataStream::new(
            transport,
            StreamConfig::default(),
            CancellationToken::new(),
        ));
        let mut books = stream
            .subscribe_order_books(&ids(&["A"]), OrderBookParams { depth: 5 })
            .await
            .unwrap();
        let driver = spawn_listen(&stream);

        let server = servers.recv().await.unwrap();
        server
            .responses
            .send(Err(ApiError::Unauthenticated("token expired".to_string())))
            .unwrap();

        let result = driver.await.unwrap();
        assert!(matches!(result, Err(StreamError::Api(ApiError::Unauthenticated(_)))));
        assert!(books.recv().await.is_none());
        assert!(matches!(stream.listen().await, Err(StreamError::AlreadyListening)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_budget() {
        let (transport, _servers) = MockTransport::new(10, ApiError::Unavailable("down".to_string()));
        let stream = MarketDataStream::new(transport.clone(), StreamConfig::default(), CancellationToken::new());
        let started = tokio::time::Instant::now();

        let result = stream.listen().await;

        assert!(matches!(result, Err(StreamError::Api(ApiError::Unavailable(_)))));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_consumer_is_slow() {
        let (transport, mut servers) = MockTransport::new(0, ApiError::Cancelled);
        let cancel = CancellationToken::new();
        let stream = Arc::new(MarketDataStream::new(transport, StreamConfig::default(), cancel.child_token()));
        let _books = stream
            .subscribe_order_books(&ids(&["A"]), OrderBookParams { depth: 1 })
            .await
            .unwrap();
        let driver = spawn_listen(&stream);
        let mut server = servers.recv().await.unwrap();
        server.ack_next().await;
        // Capacity 1: the second snapshot blocks the driver.
        server.push(MarketDataResponse::OrderBook(book("A", 1)));
        server.push(MarketDataResponse::OrderBook(book("A", 2)));
        tokio::time::sleep(Duration::from_millis(10)).await;

        cancel.cancel();
        driver.await.unwrap().unwrap();
    }
}
