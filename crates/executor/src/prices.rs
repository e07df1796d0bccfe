use core_types::Quotation;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The most recent trade price per instrument UID.
///
/// Written by the market-data consumer, read by the executor and the
/// simulated gateway. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct LastPriceTable {
    inner: Arc<Mutex<HashMap<String, Quotation>>>,
}

impl LastPriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, instrument_uid: &str, price: Quotation) {
        self.inner
            .lock()
            .await
            .insert(instrument_uid.to_string(), price);
    }

    pub async fn get(&self, instrument_uid: &str) -> Option<Quotation> {
        self.inner.lock().await.get(instrument_uid).copied()
    }

    pub async fn extend(&self, prices: impl IntoIterator<Item = (String, Quotation)>) {
        self.inner.lock().await.extend(prices);
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}
