use super::messages::{
    CandleParams, MarketDataRequest, OrderBookParams, SubscriptionAck, SubscriptionAction,
    SubscriptionStatus, Topic,
};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<P> {
    pub params: P,
    /// Set once the server confirmed the subscription on the current connection.
    pub acknowledged: bool,
}

/// The authoritative record of a stream's subscriptions, per topic.
///
/// Reconnects re-subscribe from this set, and `unsubscribe_all` iterates it,
/// so it never matters how the subscriptions were originally issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    candles: HashMap<String, Entry<CandleParams>>,
    order_books: HashMap<String, Entry<OrderBookParams>>,
    trades: HashMap<String, Entry<()>>,
    trading_statuses: HashMap<String, Entry<()>>,
    last_prices: HashMap<String, Entry<()>>,
}

/// Inserts `ids` with `params`; returns the ids that were absent or whose
/// parameters changed. Already subscribed ids are left untouched.
fn insert<P: Copy + PartialEq>(
    map: &mut HashMap<String, Entry<P>>,
    ids: &[String],
    params: P,
) -> Vec<String> {
    let mut added = Vec::new();
    for id in ids {
        match map.get(id) {
            Some(entry) if entry.params == params => {
                tracing::debug!(instrument_id = %id, "Already subscribed.");
            }
            _ => {
                map.insert(
                    id.clone(),
                    Entry {
                        params,
                        acknowledged: false,
                    },
                );
                added.push(id.clone());
            }
        }
    }
    added
}

fn remove<P>(map: &mut HashMap<String, Entry<P>>, ids: &[String]) -> Vec<(String, P)> {
    ids.iter()
        .filter_map(|id| map.remove(id).map(|entry| (id.clone(), entry.params)))
        .collect()
}

fn sorted_ids<P>(map: &HashMap<String, Entry<P>>) -> Vec<String> {
    let mut ids: Vec<String> = map.keys().cloned().collect();
    ids.sort();
    ids
}

fn sorted_with_params<P: Copy>(map: &HashMap<String, Entry<P>>) -> Vec<(String, P)> {
    let mut entries: Vec<(String, P)> = map.iter().map(|(id, e)| (id.clone(), e.params)).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

fn plain_request(topic: Topic, action: SubscriptionAction, instrument_ids: Vec<String>) -> MarketDataRequest {
    match topic {
        Topic::Trades => MarketDataRequest::Trades { action, instrument_ids },
        Topic::TradingStatuses => MarketDataRequest::TradingStatuses { action, instrument_ids },
        _ => MarketDataRequest::LastPrices { action, instrument_ids },
    }
}

impl SubscriptionSet {
    pub fn add_candles(&mut self, ids: &[String], params: CandleParams) -> Option<MarketDataRequest> {
        let added = insert(&mut self.candles, ids, params);
        (!added.is_empty()).then(|| MarketDataRequest::Candles {
            action: SubscriptionAction::Subscribe,
            instruments: added.into_iter().map(|id| (id, params)).collect(),
        })
    }

    pub fn add_order_books(&mut self, ids: &[String], params: OrderBookParams) -> Option<MarketDataRequest> {
        let added = insert(&mut self.order_books, ids, params);
        (!added.is_empty()).then(|| MarketDataRequest::OrderBooks {
            action: SubscriptionAction::Subscribe,
            instruments: added.into_iter().map(|id| (id, params)).collect(),
        })
    }

    pub fn add_trades(&mut self, ids: &[String]) -> Option<MarketDataRequest> {
        let added = insert(&mut self.trades, ids, ());
        (!added.is_empty()).then(|| plain_request(Topic::Trades, SubscriptionAction::Subscribe, added))
    }

    pub fn add_trading_statuses(&mut self, ids: &[String]) -> Option<MarketDataRequest> {
        let added = insert(&mut self.trading_statuses, ids, ());
        (!added.is_empty())
            .then(|| plain_request(Topic::TradingStatuses, SubscriptionAction::Subscribe, added))
    }

    pub fn add_last_prices(&mut self, ids: &[String]) -> Option<MarketDataRequest> {
        let added = insert(&mut self.last_prices, ids, ());
        (!added.is_empty()).then(|| plain_request(Topic::LastPrices, SubscriptionAction::Subscribe, added))
    }

    /// Removes `ids` from `topic`; ids that were not subscribed are ignored.
    pub fn remove(&mut self, topic: Topic, ids: &[String]) -> Option<MarketDataRequest> {
        let action = SubscriptionAction::Unsubscribe;
        let request = match topic {
            Topic::Candles => {
                let removed = remove(&mut self.candles, ids);
                (!removed.is_empty()).then(|| MarketDataRequest::Candles {
                    action,
                    instruments: removed,
                })
            }
            Topic::OrderBooks => {
                let removed = remove(&mut self.order_books, ids);
                (!removed.is_empty()).then(|| MarketDataRequest::OrderBooks {
                    action,
                    instruments: removed,
                })
            }
            Topic::Trades | Topic::TradingStatuses | Topic::LastPrices => {
                let map = self.plain_mut(topic);
                let removed: Vec<String> = remove(map, ids).into_iter().map(|(id, _)| id).collect();
                (!removed.is_empty()).then(|| plain_request(topic, action, removed))
            }
        };
        if request.is_none() {
            tracing::debug!(?topic, ?ids, "Not subscribed, nothing to remove.");
        }
        request
    }

    /// Empties the set and returns one UNSUBSCRIBE request per non-empty topic.
    pub fn remove_all(&mut self) -> Vec<MarketDataRequest> {
        let mut requests = self.requests(SubscriptionAction::Unsubscribe);
        requests.retain(|r| !r.instrument_ids().is_empty());
        *self = Self::default();
        requests
    }

    /// One SUBSCRIBE request per non-empty topic covering the whole set.
    pub fn subscribe_requests(&self) -> Vec<MarketDataRequest> {
        self.requests(SubscriptionAction::Subscribe)
    }

    fn requests(&self, action: SubscriptionAction) -> Vec<MarketDataRequest> {
        let mut requests = Vec::new();
        if !self.candles.is_empty() {
            requests.push(MarketDataRequest::Candles {
                action,
                instruments: sorted_with_params(&self.candles),
            });
        }
        if !self.order_books.is_empty() {
            requests.push(MarketDataRequest::OrderBooks {
                action,
                instruments: sorted_with_params(&self.order_books),
            });
        }
        for topic in [Topic::Trades, Topic::TradingStatuses, Topic::LastPrices] {
            let ids = sorted_ids(self.plain(topic));
            if !ids.is_empty() {
                requests.push(plain_request(topic, action, ids));
            }
        }
        requests
    }

    /// Applies a server acknowledgement. Successful entries are marked
    /// acknowledged; rejected ones are dropped from the set and returned.
    pub fn acknowledge(&mut self, ack: &SubscriptionAck) -> Vec<(String, SubscriptionStatus)> {
        let mut rejected = Vec::new();
        for (id, status) in &ack.results {
            // Acks for ids that were unsubscribed meanwhile are ignored.
            if !self.contains(ack.topic, id) {
                continue;
            }
            if *status == SubscriptionStatus::Success {
                match ack.topic {
                    Topic::Candles => self.candles.get_mut(id).map(|e| e.acknowledged = true),
                    Topic::OrderBooks => self.order_books.get_mut(id).map(|e| e.acknowledged = true),
                    topic => self.plain_mut(topic).get_mut(id).map(|e| e.acknowledged = true),
                };
            } else {
                self.drop_entry(ack.topic, id);
                rejected.push((id.clone(), *status));
            }
        }
        rejected
    }

    /// Clears every acknowledgement; called when a new connection is opened.
    pub fn reset_acknowledgements(&mut self) {
        self.candles.values_mut().for_each(|e| e.acknowledged = false);
        self.order_books.values_mut().for_each(|e| e.acknowledged = false);
        for topic in [Topic::Trades, Topic::TradingStatuses, Topic::LastPrices] {
            self.plain_mut(topic).values_mut().for_each(|e| e.acknowledged = false);
        }
    }

    pub fn all_acknowledged(&self) -> bool {
        self.candles.values().all(|e| e.acknowledged)
            && self.order_books.values().all(|e| e.acknowledged)
            && [Topic::Trades, Topic::TradingStatuses, Topic::LastPrices]
                .into_iter()
                .all(|topic| self.plain(topic).values().all(|e| e.acknowledged))
    }

    pub fn contains(&self, topic: Topic, id: &str) -> bool {
        match topic {
            Topic::Candles => self.candles.contains_key(id),
            Topic::OrderBooks => self.order_books.contains_key(id),
            topic => self.plain(topic).contains_key(id),
        }
    }

    pub fn candles(&self) -> &HashMap<String, Entry<CandleParams>> {
        &self.candles
    }

    pub fn order_books(&self) -> &HashMap<String, Entry<OrderBookParams>> {
        &self.order_books
    }

    pub fn len(&self) -> usize {
        self.candles.len()
            + self.order_books.len()
            + self.trades.len()
            + self.trading_statuses.len()
            + self.last_prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drop_entry(&mut self, topic: Topic, id: &str) {
        match topic {
            Topic::Candles => {
                self.candles.remove(id);
            }
            Topic::OrderBooks => {
                self.order_books.remove(id);
            }
            topic => {
                self.plain_mut(topic).remove(id);
            }
        }
    }

    fn plain(&self, topic: Topic) -> &HashMap<String, Entry<()>> {
        match topic {
            Topic::Trades => &self.trades,
            Topic::TradingStatuses => &self.trading_statuses,
            _ => &self.last_prices,
        }
    }

    fn plain_mut(&mut self, topic: Topic) -> &mut HashMap<String, Entry<()>> {
        match topic {
            Topic::Trades => &mut self.trades,
            Topic::TradingStatuses => &mut self.trading_statuses,
            _ => &mut self.last_prices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::CandleInterval;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_duplicate_subscribe_is_noop() {
        let mut set = SubscriptionSet::default();
        let params = OrderBookParams { depth: 10 };

        assert!(set.add_order_books(&ids(&["A", "B"]), params).is_some());
        let second = set.add_order_books(&ids(&["B", "C"]), params).unwrap();

        assert_eq!(second.instrument_ids(), ids(&["C"]));
        assert_eq!(set.len(), 3);
        assert!(set.add_order_books(&ids(&["A"]), params).is_none());
    }

    #[test]
    fn test_changed_params_resubscribe() {
        let mut set = SubscriptionSet::default();
        set.add_order_books(&ids(&["A"]), OrderBookParams { depth: 10 });

        let request = set.add_order_books(&ids(&["A"]), OrderBookParams { depth: 20 });

        assert!(request.is_some());
        assert_eq!(set.order_books()["A"].params.depth, 20);
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let mut set = SubscriptionSet::default();
        set.add_last_prices(&ids(&["A"]));

        assert!(set.remove(Topic::LastPrices, &ids(&["Z"])).is_none());
        let request = set.remove(Topic::LastPrices, &ids(&["A", "Z"])).unwrap();
        assert_eq!(request.instrument_ids(), ids(&["A"]));
        assert_eq!(request.action(), Some(SubscriptionAction::Unsubscribe));
        assert!(set.is_empty());
    }

    #[test]
    fn test_subscribe_requests_cover_whole_set() {
        let mut set = SubscriptionSet::default();
        let candle = CandleParams {
            interval: CandleInterval::OneMinute,
            waiting_close: true,
        };
        set.add_candles(&ids(&["B", "A"]), candle);
        set.add_trades(&ids(&["A"]));
        set.add_last_prices(&ids(&["C"]));

        let requests = set.subscribe_requests();

        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0],
            MarketDataRequest::Candles {
                action: SubscriptionAction::Subscribe,
                instruments: vec![("A".to_string(), candle), ("B".to_string(), candle)],
            }
        );
        assert_eq!(requests[1].topic(), Some(Topic::Trades));
        assert_eq!(requests[2].topic(), Some(Topic::LastPrices));
    }

    #[test]
    fn test_acknowledge_marks_and_drops_rejected() {
        let mut set = SubscriptionSet::default();
        set.add_trades(&ids(&["A", "B"]));
        assert!(!set.all_acknowledged());

        let rejected = set.acknowledge(&SubscriptionAck {
            topic: Topic::Trades,
            tracking_id: "t-1".to_string(),
            results: vec![
                ("A".to_string(), SubscriptionStatus::Success),
                ("B".to_string(), SubscriptionStatus::InstrumentNotFound),
            ],
        });

        assert_eq!(rejected, vec![("B".to_string(), SubscriptionStatus::InstrumentNotFound)]);
        assert!(set.contains(Topic::Trades, "A"));
        assert!(!set.contains(Topic::Trades, "B"));
        assert!(set.all_acknowledged());

        set.reset_acknowledgements();
        assert!(!set.all_acknowledged());
    }

    #[test]
    fn test_remove_all_empties_set() {
        let mut set = SubscriptionSet::default();
        set.add_order_books(&ids(&["A"]), OrderBookParams { depth: 1 });
        set.add_trading_statuses(&ids(&["A"]));

        let requests = set.remove_all();

        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|r| r.action() == Some(SubscriptionAction::Unsubscribe)));
        assert!(set.is_empty());
    }
}
