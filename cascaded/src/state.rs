//! Local mirror of exchange positions and their protective orders.
//!
//! Two maps keyed by [`PositionKey`]: the last reported position and the
//! recorded stop-loss / take-profit order ids. The exchange is the source of
//! truth; this store is a cache. Trade-driven reports replace a symbol
//! wholesale, anything else only upserts the keys it lists.
//!
//! Only the [`crate::Reconciler`] mutates it.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use cascade_domain::{OrderId, Position, PositionKey, ProtectiveLeg, ProtectiveOrderSet, Symbol};

/// Result of folding a position report into the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionDiff {
    /// Keys that disappeared, with their last position and protection
    pub closed: Vec<ClosedPosition>,
    /// Keys reported for the first time
    pub opened: Vec<PositionKey>,
    /// Keys whose absolute size moved beyond tolerance
    pub resized: Vec<Resized>,
    /// Keys present before and after with the same size
    pub unchanged: Vec<PositionKey>,
}

impl PositionDiff {
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.opened.is_empty() && self.resized.is_empty()
    }

    fn sort(&mut self) {
        self.closed.sort_by(|a, b| a.key.cmp(&b.key));
        self.opened.sort();
        self.resized.sort_by(|a, b| a.key.cmp(&b.key));
        self.unchanged.sort();
    }
}

/// A key removed by a report
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub key: PositionKey,
    pub position: Position,
    pub protection: ProtectiveOrderSet,
}

/// A key whose size changed
#[derive(Debug, Clone, PartialEq)]
pub struct Resized {
    pub key: PositionKey,
    pub previous_quantity: Decimal,
    pub quantity: Decimal,
}

/// One row of the store, for status output
#[derive(Debug, Clone, Serialize)]
pub struct PositionEntry {
    pub key: PositionKey,
    pub position: Position,
    pub protection: ProtectiveOrderSet,
}

/// Position and protection maps.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PositionStateStore {
    positions: HashMap<PositionKey, Position>,
    protection: HashMap<PositionKey, ProtectiveOrderSet>,
}

impl PositionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn get(&self, key: &PositionKey) -> Option<&Position> {
        self.positions.get(key)
    }

    pub fn contains(&self, key: &PositionKey) -> bool {
        self.positions.contains_key(key)
    }

    /// Recorded protection for a key (empty when none)
    pub fn protection(&self, key: &PositionKey) -> ProtectiveOrderSet {
        self.protection.get(key).copied().unwrap_or_default()
    }

    /// Sorted keys of every live position
    pub fn keys(&self) -> Vec<PositionKey> {
        let mut keys: Vec<PositionKey> = self.positions.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn active_keys(&self) -> HashSet<PositionKey> {
        self.positions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// One symbol per live position entry (both legs of a hedge count twice)
    pub fn position_symbols(&self) -> Vec<Symbol> {
        self.positions.values().map(|p| p.symbol.clone()).collect()
    }

    /// Margin committed to all positions of a symbol
    pub fn symbol_margin(&self, symbol: &Symbol) -> Decimal {
        self.positions
            .values()
            .filter(|p| &p.symbol == symbol)
            .map(Position::margin)
            .sum()
    }

    /// Key and leg an order id is recorded under
    pub fn leg_of_order(&self, order_id: OrderId) -> Option<(PositionKey, ProtectiveLeg)> {
        self.protection
            .iter()
            .find_map(|(key, set)| set.leg_of(order_id).map(|leg| (key.clone(), leg)))
    }

    /// Every row, sorted by key
    pub fn entries(&self) -> Vec<PositionEntry> {
        self.keys()
            .into_iter()
            .filter_map(|key| {
                let position = self.positions.get(&key)?.clone();
                let protection = self.protection(&key);
                Some(PositionEntry {
                    key,
                    position,
                    protection,
                })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Replace every key of the mentioned symbols with the reported positions.
    ///
    /// Keys of a mentioned symbol that are not reported (or reported flat)
    /// are closed and lose their protection entry. Other symbols are
    /// untouched. Mark price and leverage must already be filled in.
    pub fn replace_symbols(&mut self, symbols: &HashSet<Symbol>, positions: Vec<Position>) -> PositionDiff {
        let incoming = keyed(positions);
        let mut diff = PositionDiff::default();

        let stale: Vec<PositionKey> = self
            .positions
            .keys()
            .filter(|k| symbols.contains(k.symbol()) && !incoming.contains_key(*k))
            .cloned()
            .collect();
        for key in stale {
            if let Some(position) = self.positions.remove(&key) {
                let protection = self.protection.remove(&key).unwrap_or_default();
                diff.closed.push(ClosedPosition {
                    key,
                    position,
                    protection,
                });
            }
        }

        self.upsert(incoming, &mut diff);
        diff.sort();
        diff
    }

    /// Upsert the reported keys without closing anything.
    ///
    /// Flat entries carry no key and are ignored. Used for reports that are
    /// not authoritative for the whole symbol.
    pub fn merge_positions(&mut self, positions: Vec<Position>) -> PositionDiff {
        let mut diff = PositionDiff::default();
        self.upsert(keyed(positions), &mut diff);
        diff.sort();
        diff
    }

    fn upsert(&mut self, incoming: HashMap<PositionKey, Position>, diff: &mut PositionDiff) {
        for (key, position) in incoming {
            match self.positions.get(&key) {
                None => diff.opened.push(key.clone()),
                Some(previous) if previous.size_differs(&position) => diff.resized.push(Resized {
                    key: key.clone(),
                    previous_quantity: previous.abs_quantity(),
                    quantity: position.abs_quantity(),
                }),
                Some(_) => diff.unchanged.push(key.clone()),
            }
            self.positions.insert(key, position);
        }
    }

    /// Replace the whole position map with a full snapshot.
    pub fn replace_all(&mut self, positions: Vec<Position>) -> PositionDiff {
        let mut symbols: HashSet<Symbol> = self.positions.keys().map(|k| k.symbol().clone()).collect();
        symbols.extend(positions.iter().map(|p| p.symbol.clone()));
        self.replace_symbols(&symbols, positions)
    }

    /// Discard everything and load a fresh snapshot with its protection.
    pub fn rebuild(&mut self, positions: Vec<Position>, protection: HashMap<PositionKey, ProtectiveOrderSet>) {
        self.positions = positions
            .into_iter()
            .filter_map(|p| p.key().map(|k| (k, p)))
            .collect();
        self.protection = protection
            .into_iter()
            .filter(|(key, set)| self.positions.contains_key(key) && !set.is_empty())
            .collect();
    }

    /// Record a protective order id; ignored when the key has no position
    pub fn set_leg(&mut self, key: &PositionKey, leg: ProtectiveLeg, order_id: OrderId) -> bool {
        if !self.positions.contains_key(key) {
            return false;
        }
        self.protection.entry(key.clone()).or_default().set(leg, order_id);
        true
    }

    /// Overwrite a key's protection
    pub fn set_protection(&mut self, key: &PositionKey, set: ProtectiveOrderSet) {
        if set.is_empty() {
            self.protection.remove(key);
        } else if self.positions.contains_key(key) {
            self.protection.insert(key.clone(), set);
        }
    }

    /// Forget a leg if it still records `order_id`
    pub fn clear_leg_if(&mut self, key: &PositionKey, leg: ProtectiveLeg, order_id: OrderId) -> bool {
        let Some(set) = self.protection.get_mut(key) else {
            return false;
        };
        if set.get(leg) != Some(order_id) {
            return false;
        }
        set.clear(leg);
        if set.is_empty() {
            self.protection.remove(key);
        }
        true
    }

    /// Drop a key and its protection
    pub fn remove(&mut self, key: &PositionKey) -> Option<ClosedPosition> {
        let position = self.positions.remove(key)?;
        let protection = self.protection.remove(key).unwrap_or_default();
        Some(ClosedPosition {
            key: key.clone(),
            position,
            protection,
        })
    }
}

fn keyed(positions: Vec<Position>) -> HashMap<PositionKey, Position> {
    positions
        .into_iter()
        .filter_map(|p| p.key().map(|k| (k, p)))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_domain::{MarginType, PositionSide, Side};
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn position(symbol: &str, amount: Decimal, position_side: PositionSide) -> Position {
        Position {
            symbol: sym(symbol),
            amount,
            entry_price: dec!(100),
            mark_price: dec!(100),
            leverage: 10,
            margin_type: MarginType::Cross,
            isolated_margin: dec!(0),
            position_side,
            unrealized_pnl: dec!(0),
        }
    }

    fn key(symbol: &str, side: Side) -> PositionKey {
        PositionKey::new(sym(symbol), side)
    }

    fn symbols(names: &[&str]) -> HashSet<Symbol> {
        names.iter().map(|s| sym(s)).collect()
    }

    #[test]
    fn test_first_report_opens_keys() {
        let mut store = PositionStateStore::new();
        let diff = store.replace_all(vec![
            position("BTCUSDT", dec!(0.005), PositionSide::Both),
            position("ETHUSDT", dec!(-1), PositionSide::Both),
        ]);

        assert_eq!(diff.opened, vec![key("BTCUSDT", Side::Long), key("ETHUSDT", Side::Short)]);
        assert!(diff.closed.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_resize_and_unchanged() {
        let mut store = PositionStateStore::new();
        store.replace_all(vec![
            position("BTCUSDT", dec!(0.005), PositionSide::Both),
            position("ETHUSDT", dec!(1), PositionSide::Both),
        ]);

        let diff = store.replace_all(vec![
            position("BTCUSDT", dec!(0.008), PositionSide::Both),
            position("ETHUSDT", dec!(1), PositionSide::Both),
        ]);

        assert_eq!(diff.resized.len(), 1);
        assert_eq!(diff.resized[0].previous_quantity, dec!(0.005));
        assert_eq!(diff.resized[0].quantity, dec!(0.008));
        assert_eq!(diff.unchanged, vec![key("ETHUSDT", Side::Long)]);
    }

    #[test]
    fn test_flat_report_closes_key_and_drops_protection() {
        let mut store = PositionStateStore::new();
        store.replace_all(vec![position("BTCUSDT", dec!(0.005), PositionSide::Both)]);
        let k = key("BTCUSDT", Side::Long);
        store.set_leg(&k, ProtectiveLeg::StopLoss, 11);
        store.set_leg(&k, ProtectiveLeg::TakeProfit, 12);

        let diff = store.replace_symbols(
            &symbols(&["BTCUSDT"]),
            vec![position("BTCUSDT", dec!(0), PositionSide::Both)],
        );

        assert_eq!(diff.closed.len(), 1);
        assert_eq!(diff.closed[0].protection.ids(), vec![11, 12]);
        assert!(!store.contains(&k));
        assert!(store.protection(&k).is_empty());
    }

    #[test]
    fn test_unmentioned_symbols_survive_partial_update() {
        let mut store = PositionStateStore::new();
        store.replace_all(vec![
            position("BTCUSDT", dec!(1), PositionSide::Both),
            position("ETHUSDT", dec!(1), PositionSide::Both),
        ]);

        let diff = store.replace_symbols(&symbols(&["ETHUSDT"]), vec![]);

        assert_eq!(diff.closed.len(), 1);
        assert_eq!(diff.closed[0].key, key("ETHUSDT", Side::Long));
        assert!(store.contains(&key("BTCUSDT", Side::Long)));
    }

    #[test]
    fn test_merge_keeps_unlisted_hedge_leg() {
        let mut store = PositionStateStore::new();
        store.replace_all(vec![
            position("BTCUSDT", dec!(1), PositionSide::Long),
            position("BTCUSDT", dec!(-2), PositionSide::Short),
        ]);
        store.set_leg(&key("BTCUSDT", Side::Short), ProtectiveLeg::StopLoss, 21);

        let diff = store.merge_positions(vec![
            position("BTCUSDT", dec!(1), PositionSide::Long),
            position("ETHUSDT", dec!(0), PositionSide::Both),
        ]);

        assert!(diff.closed.is_empty());
        assert_eq!(diff.unchanged, vec![key("BTCUSDT", Side::Long)]);
        assert!(store.contains(&key("BTCUSDT", Side::Short)));
        assert_eq!(store.protection(&key("BTCUSDT", Side::Short)).ids(), vec![21]);
    }

    #[test]
    fn test_merge_opens_and_resizes_listed_keys() {
        let mut store = PositionStateStore::new();
        store.replace_all(vec![position("BTCUSDT", dec!(1), PositionSide::Both)]);

        let diff = store.merge_positions(vec![
            position("BTCUSDT", dec!(2), PositionSide::Both),
            position("ETHUSDT", dec!(-1), PositionSide::Both),
        ]);

        assert_eq!(diff.opened, vec![key("ETHUSDT", Side::Short)]);
        assert_eq!(diff.resized.len(), 1);
        assert_eq!(diff.resized[0].quantity, dec!(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_one_way_flip_closes_old_direction() {
        let mut store = PositionStateStore::new();
        store.replace_all(vec![position("BTCUSDT", dec!(1), PositionSide::Both)]);

        let diff = store.replace_all(vec![position("BTCUSDT", dec!(-1), PositionSide::Both)]);

        assert_eq!(diff.closed[0].key, key("BTCUSDT", Side::Long));
        assert_eq!(diff.opened, vec![key("BTCUSDT", Side::Short)]);
    }

    #[test]
    fn test_hedge_legs_tracked_separately() {
        let mut store = PositionStateStore::new();
        store.replace_all(vec![
            position("BTCUSDT", dec!(1), PositionSide::Long),
            position("BTCUSDT", dec!(-2), PositionSide::Short),
        ]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.position_symbols().len(), 2);
        assert_eq!(store.symbol_margin(&sym("BTCUSDT")), dec!(30));
    }

    #[test]
    fn test_set_leg_requires_position() {
        let mut store = PositionStateStore::new();
        assert!(!store.set_leg(&key("BTCUSDT", Side::Long), ProtectiveLeg::StopLoss, 1));

        store.replace_all(vec![position("BTCUSDT", dec!(1), PositionSide::Both)]);
        assert!(store.set_leg(&key("BTCUSDT", Side::Long), ProtectiveLeg::StopLoss, 1));
        assert_eq!(
            store.leg_of_order(1),
            Some((key("BTCUSDT", Side::Long), ProtectiveLeg::StopLoss))
        );
    }

    #[test]
    fn test_clear_leg_only_when_id_matches() {
        let mut store = PositionStateStore::new();
        store.replace_all(vec![position("BTCUSDT", dec!(1), PositionSide::Both)]);
        let k = key("BTCUSDT", Side::Long);
        store.set_leg(&k, ProtectiveLeg::StopLoss, 5);

        assert!(!store.clear_leg_if(&k, ProtectiveLeg::StopLoss, 6));
        assert!(store.clear_leg_if(&k, ProtectiveLeg::StopLoss, 5));
        assert!(store.protection(&k).is_empty());
    }

    #[test]
    fn test_rebuild_discards_previous_state() {
        let mut store = PositionStateStore::new();
        store.replace_all(vec![position("ETHUSDT", dec!(1), PositionSide::Both)]);
        store.set_leg(&key("ETHUSDT", Side::Long), ProtectiveLeg::StopLoss, 9);

        let k = key("BTCUSDT", Side::Long);
        let mut protection = HashMap::new();
        protection.insert(
            k.clone(),
            ProtectiveOrderSet {
                stop_loss: Some(1),
                take_profit: None,
            },
        );
        protection.insert(key("XRPUSDT", Side::Long), ProtectiveOrderSet::default());

        store.rebuild(vec![position("BTCUSDT", dec!(1), PositionSide::Both)], protection);

        assert_eq!(store.keys(), vec![k.clone()]);
        assert_eq!(store.protection(&k).stop_loss, Some(1));
        assert_eq!(store.leg_of_order(9), None);
    }
}
