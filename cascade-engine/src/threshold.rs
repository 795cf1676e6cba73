//! Rolling liquidation-volume window and per-direction cooldowns.
//!
//! Volumes are tracked per symbol in "opportunity" terms: SELL liquidations
//! (longs being wiped out) add to the long volume, BUY liquidations to the
//! short volume.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use cascade_domain::{LiquidationEvent, OrderSide, Side, Symbol};

/// Length of the cumulative window
pub const DEFAULT_WINDOW_SECS: i64 = 60;

/// Minimum gap between accepted trades in one direction
pub const DEFAULT_COOLDOWN_SECS: i64 = 30;

// =============================================================================
// Thresholds
// =============================================================================

/// USDT volume thresholds with optional per-direction overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VolumeThresholds {
    pub default: Decimal,
    pub long: Option<Decimal>,
    pub short: Option<Decimal>,
}

impl VolumeThresholds {
    /// Same threshold for both directions
    pub fn uniform(value: Decimal) -> Self {
        Self {
            default: value,
            long: None,
            short: None,
        }
    }

    /// Threshold for a direction, falling back to the shared default
    pub fn for_side(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.long.unwrap_or(self.default),
            Side::Short => self.short.unwrap_or(self.default),
        }
    }
}

/// Window totals after folding in one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThresholdSnapshot {
    pub recent_long_volume: Decimal,
    pub recent_short_volume: Decimal,
    pub long_threshold: Decimal,
    pub short_threshold: Decimal,
}

impl ThresholdSnapshot {
    /// Window volume in the candidate direction
    pub fn volume_for(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.recent_long_volume,
            Side::Short => self.recent_short_volume,
        }
    }

    /// Threshold in the candidate direction
    pub fn threshold_for(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.long_threshold,
            Side::Short => self.short_threshold,
        }
    }
}

// =============================================================================
// ThresholdMonitor
// =============================================================================

#[derive(Debug)]
struct Entry {
    at: DateTime<Utc>,
    notional: Decimal,
    opportunity: Side,
}

/// Per-symbol sliding window of liquidation notional.
#[derive(Debug)]
pub struct ThresholdMonitor {
    window: Duration,
    entries: HashMap<Symbol, VecDeque<Entry>>,
}

impl ThresholdMonitor {
    /// Create a monitor with the given window length
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Fold one liquidation into its symbol's window and report totals.
    ///
    /// Entries older than the window (relative to this event) are evicted
    /// first. Out-of-order events are accepted as-is.
    pub fn process(&mut self, event: &LiquidationEvent, thresholds: &VolumeThresholds) -> ThresholdSnapshot {
        let queue = self.entries.entry(event.symbol.clone()).or_default();
        let cutoff = event.event_time - self.window;
        while queue.front().is_some_and(|e| e.at < cutoff) {
            queue.pop_front();
        }

        queue.push_back(Entry {
            at: event.event_time,
            notional: event.notional(),
            opportunity: Side::opened_by(event.candidate_side()),
        });

        let (mut long, mut short) = (Decimal::ZERO, Decimal::ZERO);
        for entry in queue.iter().filter(|e| e.at >= cutoff) {
            match entry.opportunity {
                Side::Long => long += entry.notional,
                Side::Short => short += entry.notional,
            }
        }

        ThresholdSnapshot {
            recent_long_volume: long,
            recent_short_volume: short,
            long_threshold: thresholds.for_side(Side::Long),
            short_threshold: thresholds.for_side(Side::Short),
        }
    }

    /// Drop a symbol's history
    pub fn reset(&mut self, symbol: &Symbol) {
        self.entries.remove(symbol);
    }
}

impl Default for ThresholdMonitor {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_WINDOW_SECS))
    }
}

// =============================================================================
// CooldownTracker
// =============================================================================

/// Last accepted trade time per (symbol, direction)
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_trade: HashMap<(Symbol, OrderSide), DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no trade in this direction happened within `cooldown`
    pub fn is_ready(&self, symbol: &Symbol, side: OrderSide, cooldown: Duration, now: DateTime<Utc>) -> bool {
        match self.last_trade.get(&(symbol.clone(), side)) {
            Some(at) => now.signed_duration_since(*at) >= cooldown,
            None => true,
        }
    }

    /// Remaining cooldown, zero when ready
    pub fn remaining(&self, symbol: &Symbol, side: OrderSide, cooldown: Duration, now: DateTime<Utc>) -> Duration {
        self.last_trade
            .get(&(symbol.clone(), side))
            .map(|at| cooldown - now.signed_duration_since(*at))
            .filter(|d| *d > Duration::zero())
            .unwrap_or_else(Duration::zero)
    }

    /// Record an accepted trade
    pub fn record(&mut self, symbol: &Symbol, side: OrderSide, now: DateTime<Utc>) {
        self.last_trade.insert((symbol.clone(), side), now);
    }
}
