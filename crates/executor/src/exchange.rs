use crate::error::ExecutorError;
use crate::prices::LastPriceTable;
use api_client::{OperationsApi, OrdersApi};
use async_trait::async_trait;
use core_types::{
    Instrument, OrderExecutionStatus, OrderReport, OrderRequest, OrderSide, PortfolioSecurity,
    Quotation,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where the executor's orders go.
///
/// This trait allows the backtester and the live engine to share one
/// executor regardless of whether orders reach the broker or a simulation.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    fn account_id(&self) -> &str;

    /// Submits an order and returns the broker's report. A rejection may
    /// arrive either as a report with a non-filled status or as
    /// `ApiError::Business`.
    async fn submit(&self, request: &OrderRequest) -> Result<OrderReport, ExecutorError>;

    /// Free cash in `currency`.
    async fn available_cash(&self, currency: &str) -> Result<Quotation, ExecutorError>;

    /// Securities currently held on the account.
    async fn holdings(&self) -> Result<Vec<PortfolioSecurity>, ExecutorError>;
}

/// Sends orders to the broker.
pub struct LiveGateway {
    orders: Arc<dyn OrdersApi>,
    operations: Arc<dyn OperationsApi>,
    account_id: String,
}

impl LiveGateway {
    pub fn new(
        orders: Arc<dyn OrdersApi>,
        operations: Arc<dyn OperationsApi>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            operations,
            account_id: account_id.into(),
        }
    }
}

#[async_trait]
impl OrderGateway for LiveGateway {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderReport, ExecutorError> {
        tracing::debug!(order_id = %request.order_id, instrument = %request.instrument_uid, side = ?request.side, lots = request.quantity, "LiveGateway: posting order.");
        let report = self.orders.post_order(request).await?;
        tracing::debug!(order_id = %report.order_id, status = ?report.status, executed = report.lots_executed, "LiveGateway: order report.");
        Ok(report)
    }

    async fn available_cash(&self, currency: &str) -> Result<Quotation, ExecutorError> {
        Ok(self.operations.positions(&self.account_id).await?.available(currency))
    }

    async fn holdings(&self) -> Result<Vec<PortfolioSecurity>, ExecutorError> {
        Ok(self.operations.positions(&self.account_id).await?.securities)
    }
}

#[derive(Debug, Default)]
struct Account {
    cash: HashMap<String, Decimal>,
    /// Signed balance in pieces per instrument UID.
    holdings: HashMap<String, i64>,
    commission_paid: Decimal,
}

/// The "virtual exchange" for backtesting.
///
/// Market orders fill in full at the current entry of the shared last-price
/// table. Each fill is charged `commission_pct` of its notional. Orders the
/// account cannot pay for, or without a known price, are rejected.
pub struct SimulatedGateway {
    account_id: String,
    instruments: HashMap<String, Instrument>,
    prices: LastPriceTable,
    commission_pct: Decimal,
    account: Mutex<Account>,
}

impl SimulatedGateway {
    pub fn new(
        instruments: impl IntoIterator<Item = Instrument>,
        prices: LastPriceTable,
        commission_pct: Decimal,
    ) -> Self {
        Self {
            account_id: "simulated".to_string(),
            instruments: instruments
                .into_iter()
                .map(|i| (i.uid.clone(), i))
                .collect(),
            prices,
            commission_pct,
            account: Mutex::new(Account::default()),
        }
    }

    /// Deposits starting cash.
    pub async fn deposit(&self, currency: &str, amount: Decimal) {
        *self
            .account
            .lock()
            .await
            .cash
            .entry(currency.to_ascii_lowercase())
            .or_default() += amount;
    }

    pub async fn cash(&self, currency: &str) -> Decimal {
        self.account
            .lock()
            .await
            .cash
            .get(&currency.to_ascii_lowercase())
            .copied()
            .unwrap_or_default()
    }

    pub async fn commission_paid(&self) -> Decimal {
        self.account.lock().await.commission_paid
    }

    fn rejected(request: &OrderRequest, message: String) -> OrderReport {
        tracing::debug!(order_id = %request.order_id, %message, "SimulatedGateway: rejecting order.");
        OrderReport {
            order_id: request.order_id,
            instrument_uid: request.instrument_uid.clone(),
            side: request.side,
            status: OrderExecutionStatus::Rejected,
            lots_requested: request.quantity,
            lots_executed: 0,
            executed_price: None,
            message: Some(message),
        }
    }
}

#[async_trait]
impl OrderGateway for SimulatedGateway {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderReport, ExecutorError> {
        let Some(instrument) = self.instruments.get(&request.instrument_uid) else {
            return Ok(Self::rejected(request, "unknown instrument".to_string()));
        };
        let Some(price) = self.prices.get(&request.instrument_uid).await else {
            return Ok(Self::rejected(request, "no last price".to_string()));
        };

        let pieces = request
            .quantity
            .checked_mul(instrument.lot)
            .ok_or_else(|| ExecutorError::NotionalOverflow {
                instrument_uid: request.instrument_uid.clone(),
                lots: request.quantity,
                price: price.to_string(),
            })?;
        let notional = price.to_decimal() * Decimal::from(pieces);
        let commission = notional * self.commission_pct / Decimal::ONE_HUNDRED;

        let mut account = self.account.lock().await;
        let currency = instrument.currency.to_ascii_lowercase();
        let cash = account.cash.get(&currency).copied().unwrap_or_default();
        let cash_after = match request.side {
            OrderSide::Buy => cash - notional - commission,
            OrderSide::Sell => cash + notional - commission,
        };
        if cash_after < Decimal::ZERO {
            return Ok(Self::rejected(
                request,
                format!("insufficient funds: {cash} {currency}"),
            ));
        }

        account.cash.insert(currency, cash_after);
        account.commission_paid += commission;
        let holding = account
            .holdings
            .entry(request.instrument_uid.clone())
            .or_default();
        match request.side {
            OrderSide::Buy => *holding += pieces,
            OrderSide::Sell => *holding -= pieces,
        }

        Ok(OrderReport {
            order_id: request.order_id,
            instrument_uid: request.instrument_uid.clone(),
            side: request.side,
            status: OrderExecutionStatus::Fill,
            lots_requested: request.quantity,
            lots_executed: request.quantity,
            executed_price: Some(price),
            message: None,
        })
    }

    async fn available_cash(&self, currency: &str) -> Result<Quotation, ExecutorError> {
        Ok(Quotation::try_from(self.cash(currency).await)?)
    }

    async fn holdings(&self) -> Result<Vec<PortfolioSecurity>, ExecutorError> {
        let account = self.account.lock().await;
        let mut holdings: Vec<PortfolioSecurity> = account
            .holdings
            .iter()
            .filter(|(_, balance)| **balance != 0)
            .map(|(uid, balance)| PortfolioSecurity {
                figi: self
                    .instruments
                    .get(uid)
                    .map(|i| i.figi.clone())
                    .unwrap_or_default(),
                instrument_uid: uid.clone(),
                balance: *balance,
                blocked: 0,
            })
            .collect();
        holdings.sort_by(|a, b| a.instrument_uid.cmp(&b.instrument_uid));
        Ok(holdings)
    }
}
