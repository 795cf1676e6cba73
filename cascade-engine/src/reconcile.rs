//! Protective-order planning and sweep classification.
//!
//! Given a fresh snapshot of open orders, decide what to keep, cancel and
//! place. These functions never touch the network; the daemon applies the
//! plan while holding the position's lock.
//!
//! Duplicate rule: among orders serving the same leg of the same position,
//! the earliest (by placement time, then order id) is kept.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use cascade_domain::{OpenOrder, OrderId, OrderType, PositionKey, ProtectiveLeg, ProtectiveOrderSet};

// =============================================================================
// Protection plan
// =============================================================================

/// What to do for one position's protective orders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtectionPlan {
    /// Orders that already protect the position correctly
    pub keep: ProtectiveOrderSet,
    /// Duplicates and wrongly-sized orders
    pub cancel: Vec<OrderId>,
    /// Legs to (re)place after cancellations settle
    pub place: Vec<ProtectiveLeg>,
    /// Legs whose existing order had the wrong quantity
    pub resized: Vec<ProtectiveLeg>,
}

impl ProtectionPlan {
    /// Nothing to do
    pub fn is_noop(&self) -> bool {
        self.cancel.is_empty() && self.place.is_empty()
    }
}

/// Open protective orders serving `key`
pub fn orders_for_key<'a>(orders: &'a [OpenOrder], key: &PositionKey) -> Vec<&'a OpenOrder> {
    orders
        .iter()
        .filter(|o| o.status.is_open() && o.protective_leg().is_some() && o.protected_key() == *key)
        .collect()
}

fn earliest_first(a: &&OpenOrder, b: &&OpenOrder) -> std::cmp::Ordering {
    a.time.cmp(&b.time).then(a.order_id.cmp(&b.order_id))
}

/// Plan protection for a position of `target` contracts.
///
/// `orders` must already be narrowed to the position (see [`orders_for_key`]).
/// Per leg: none found → place; extras → cancel; keeper with the wrong
/// quantity → cancel and place.
pub fn plan_protection(orders: &[&OpenOrder], target: Decimal) -> ProtectionPlan {
    let mut plan = ProtectionPlan::default();

    for leg in ProtectiveLeg::ALL {
        let mut candidates: Vec<&OpenOrder> = orders
            .iter()
            .copied()
            .filter(|o| o.protective_leg() == Some(leg))
            .collect();
        candidates.sort_by(earliest_first);

        let Some((keeper, duplicates)) = candidates.split_first() else {
            plan.place.push(leg);
            continue;
        };

        for dup in duplicates {
            debug!(order_id = dup.order_id, kept = keeper.order_id, %leg, "Duplicate protective order");
            plan.cancel.push(dup.order_id);
        }

        if keeper.quantity_matches(target) {
            plan.keep.set(leg, keeper.order_id);
        } else {
            plan.cancel.push(keeper.order_id);
            plan.place.push(leg);
            plan.resized.push(leg);
        }
    }

    plan
}

// =============================================================================
// Sweep classification
// =============================================================================

/// Timing rules for the periodic sweep
#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    /// Orders younger than this are never touched
    pub grace: Duration,
    /// Unfilled entry LIMIT orders older than this are stuck
    pub stuck_after: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::seconds(30),
            stuck_after: Duration::minutes(5),
        }
    }
}

/// Orders the sweep should cancel, by category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepClassification {
    /// Closing orders whose position no longer exists
    pub orphaned: Vec<OpenOrder>,
    /// Extra protective orders for a leg that is already covered
    pub duplicates: Vec<OpenOrder>,
    /// Entry LIMIT orders that never filled
    pub stuck: Vec<OpenOrder>,
}

impl SweepClassification {
    pub fn is_empty(&self) -> bool {
        self.orphaned.is_empty() && self.duplicates.is_empty() && self.stuck.is_empty()
    }

    pub fn total(&self) -> usize {
        self.orphaned.len() + self.duplicates.len() + self.stuck.len()
    }

    /// Every order to cancel, orphans first
    pub fn all(&self) -> impl Iterator<Item = &OpenOrder> {
        self.orphaned.iter().chain(&self.duplicates).chain(&self.stuck)
    }
}

/// Classify open orders against the set of live position keys.
pub fn classify_sweep(
    orders: &[OpenOrder],
    active: &HashSet<PositionKey>,
    now: DateTime<Utc>,
    policy: &SweepPolicy,
) -> SweepClassification {
    let mut result = SweepClassification::default();
    let settled = |o: &OpenOrder| o.age_ms(now) >= policy.grace.num_milliseconds();

    let mut legs: HashMap<(PositionKey, ProtectiveLeg), Vec<&OpenOrder>> = HashMap::new();

    for order in orders.iter().filter(|o| o.status.is_open()) {
        if order.is_closing() {
            let key = order.protected_key();
            if !active.contains(&key) {
                if settled(order) {
                    result.orphaned.push(order.clone());
                }
                continue;
            }
            if let Some(leg) = order.protective_leg() {
                legs.entry((key, leg)).or_default().push(order);
            }
        } else if order.order_type == OrderType::Limit
            && order.age_ms(now) > policy.stuck_after.num_milliseconds()
            && !active.contains(&order.entry_key())
        {
            result.stuck.push(order.clone());
        }
    }

    for (_, mut group) in legs {
        group.sort_by(earliest_first);
        result
            .duplicates
            .extend(group.into_iter().skip(1).filter(|o| settled(o)).cloned());
    }
    result.duplicates.sort_by_key(|o| o.order_id);

    result
}
