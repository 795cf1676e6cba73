//! In-flight entry orders.
//!
//! An entry is registered under a temporary `tmp-…` id just before
//! submission, re-keyed to the exchange id once acknowledged, and removed
//! on fill, cancel, position closure or after five minutes of silence.
//! Never authoritative for positions: it only blocks duplicate entries.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

use cascade_domain::{OrderSide, PendingOrder, Symbol};

/// Entries older than this are considered lost
pub const DEFAULT_PENDING_TTL_SECS: i64 = 300;

/// Registry of submitted-but-unconfirmed entry orders
#[derive(Debug)]
pub struct PendingOrderTracker {
    ttl: Duration,
    orders: RwLock<HashMap<String, PendingOrder>>,
}

impl PendingOrderTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            orders: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PendingOrder>> {
        self.orders.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PendingOrder>> {
        self.orders.write().unwrap_or_else(|p| p.into_inner())
    }

    fn is_fresh(&self, order: &PendingOrder, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(order.submitted_at) < self.ttl
    }

    /// Fresh local id for an order not yet acknowledged
    pub fn temporary_id() -> String {
        format!("tmp-{}", Uuid::now_v7())
    }

    /// Track an order
    pub fn register(&self, order: PendingOrder) {
        debug!(order_id = %order.order_id, symbol = %order.symbol, side = %order.side, "Pending entry registered");
        self.write().insert(order.order_id.clone(), order);
    }

    /// Re-key an entry from its temporary id to the exchange id.
    ///
    /// Returns false if the temporary entry was already gone.
    pub fn replace(&self, temp_id: &str, exchange_id: &str) -> bool {
        let mut orders = self.write();
        match orders.remove(temp_id) {
            Some(mut order) => {
                order.order_id = exchange_id.to_string();
                orders.insert(order.order_id.clone(), order);
                true
            }
            None => false,
        }
    }

    /// Forget one order
    pub fn remove(&self, order_id: &str) -> Option<PendingOrder> {
        self.write().remove(order_id)
    }

    /// Forget every entry for a symbol, optionally only one side
    pub fn remove_for(&self, symbol: &Symbol, side: Option<OrderSide>) -> usize {
        let mut orders = self.write();
        let before = orders.len();
        orders.retain(|_, o| !(o.symbol == *symbol && side.map_or(true, |s| s == o.side)));
        before - orders.len()
    }

    /// A fresh entry exists for the symbol
    pub fn has_pending(&self, symbol: &Symbol) -> bool {
        let now = Utc::now();
        self.read().values().any(|o| o.symbol == *symbol && self.is_fresh(o, now))
    }

    /// Symbols with a fresh entry, one per entry
    pub fn pending_symbols(&self) -> Vec<Symbol> {
        let now = Utc::now();
        self.read()
            .values()
            .filter(|o| self.is_fresh(o, now))
            .map(|o| o.symbol.clone())
            .collect()
    }

    /// Snapshot of all entries
    pub fn list(&self) -> Vec<PendingOrder> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop entries older than the TTL; returns how many were dropped
    pub fn prune_stale(&self) -> usize {
        let now = Utc::now();
        let mut orders = self.write();
        let before = orders.len();
        orders.retain(|_, o| self.is_fresh(o, now));
        let pruned = before - orders.len();
        if pruned > 0 {
            info!(pruned, "Pruned stale pending entries");
        }
        pruned
    }
}

impl Default for PendingOrderTracker {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_PENDING_TTL_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: &str, symbol: &str, side: OrderSide, age_secs: i64) -> PendingOrder {
        PendingOrder {
            order_id: id.to_string(),
            symbol: Symbol::new(symbol).unwrap(),
            side,
            submitted_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_register_and_replace() {
        let tracker = PendingOrderTracker::default();
        let temp = PendingOrderTracker::temporary_id();
        assert!(temp.starts_with("tmp-"));

        tracker.register(pending(&temp, "BTCUSDT", OrderSide::Buy, 0));
        assert!(tracker.has_pending(&Symbol::new("BTCUSDT").unwrap()));

        assert!(tracker.replace(&temp, "12345"));
        assert!(tracker.remove(&temp).is_none());
        assert_eq!(tracker.remove("12345").unwrap().symbol.as_str(), "BTCUSDT");
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_replace_missing_is_noop() {
        let tracker = PendingOrderTracker::default();
        assert!(!tracker.replace("tmp-gone", "1"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_remove_for_side() {
        let tracker = PendingOrderTracker::default();
        tracker.register(pending("1", "BTCUSDT", OrderSide::Buy, 0));
        tracker.register(pending("2", "BTCUSDT", OrderSide::Sell, 0));
        tracker.register(pending("3", "ETHUSDT", OrderSide::Buy, 0));

        let btc = Symbol::new("BTCUSDT").unwrap();
        assert_eq!(tracker.remove_for(&btc, Some(OrderSide::Buy)), 1);
        assert!(tracker.has_pending(&btc));
        assert_eq!(tracker.remove_for(&btc, None), 1);
        assert!(!tracker.has_pending(&btc));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_stale_entries_expire() {
        let tracker = PendingOrderTracker::default();
        tracker.register(pending("old", "BTCUSDT", OrderSide::Buy, 301));
        tracker.register(pending("new", "ETHUSDT", OrderSide::Buy, 10));

        assert!(!tracker.has_pending(&Symbol::new("BTCUSDT").unwrap()));
        assert_eq!(tracker.pending_symbols(), vec![Symbol::new("ETHUSDT").unwrap()]);

        assert_eq!(tracker.prune_stale(), 1);
        assert_eq!(tracker.len(), 1);
    }
}
