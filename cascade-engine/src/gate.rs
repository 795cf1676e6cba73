//! Signal gate rules.
//!
//! Pure go/no-go checks applied to a liquidation event before any order is
//! sent. Every check short-circuits to [`Decision::Skip`] with a reason and
//! the level it should be logged at; nothing here returns an error.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;

use cascade_domain::{OrderSide, Side, Symbol};

use crate::threshold::{ThresholdSnapshot, VolumeThresholds};

/// Log level attached to a skip reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateLevel {
    Debug,
    Info,
    Warn,
}

/// Why a signal was not traded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipReason {
    pub reason: String,
    pub level: GateLevel,
}

impl SkipReason {
    pub fn debug(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            level: GateLevel::Debug,
        }
    }

    pub fn info(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            level: GateLevel::Info,
        }
    }

    pub fn warn(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            level: GateLevel::Warn,
        }
    }
}

/// Gate outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Decision {
    /// Trade in `side`; `warning` is set when a check failed open
    Trade { side: OrderSide, warning: Option<String> },
    Skip(SkipReason),
}

impl Decision {
    pub fn trade(side: OrderSide) -> Self {
        Decision::Trade { side, warning: None }
    }

    pub fn is_trade(&self) -> bool {
        matches!(self, Decision::Trade { .. })
    }
}

/// Side to trade in response to a liquidation of `liquidation_side`
pub fn directional_candidate(liquidation_side: OrderSide) -> OrderSide {
    liquidation_side.opposite()
}

/// Per-event volume rule
pub fn instant_volume_decision(notional: Decimal, candidate: OrderSide, thresholds: &VolumeThresholds) -> Decision {
    let threshold = thresholds.for_side(Side::opened_by(candidate));
    if notional < threshold {
        return Decision::Skip(SkipReason::debug(format!(
            "liquidation {} below {} threshold {}",
            notional.round_dp(2),
            candidate,
            threshold
        )));
    }
    Decision::trade(candidate)
}

/// Rolling-window volume rule plus cooldown.
///
/// `cooldown_remaining_secs` is zero when the direction is ready.
pub fn cumulative_volume_decision(
    snapshot: &ThresholdSnapshot,
    candidate: OrderSide,
    cooldown_remaining_secs: i64,
) -> Decision {
    let direction = Side::opened_by(candidate);
    let volume = snapshot.volume_for(direction);
    let threshold = snapshot.threshold_for(direction);

    if volume < threshold {
        return Decision::Skip(SkipReason::debug(format!(
            "60s {} volume {} below threshold {}",
            direction,
            volume.round_dp(2),
            threshold
        )));
    }
    if cooldown_remaining_secs > 0 {
        return Decision::Skip(SkipReason::info(format!(
            "{} cooldown active, {}s remaining",
            candidate, cooldown_remaining_secs
        )));
    }
    Decision::trade(candidate)
}

/// VWAP directional rule: no buying above VWAP, no selling below it
pub fn vwap_allows(candidate: OrderSide, price: Decimal, vwap: Decimal) -> bool {
    match candidate {
        OrderSide::Buy => price <= vwap,
        OrderSide::Sell => price >= vwap,
    }
}

// =============================================================================
// Capacity
// =============================================================================

/// Account exposure at the moment of a capacity check
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapacitySnapshot {
    pub hedge_mode: bool,
    /// One symbol per confirmed non-flat position entry
    pub position_symbols: Vec<Symbol>,
    /// Symbols with an entry in flight
    pub pending_symbols: Vec<Symbol>,
    /// Margin already committed to the symbol under test
    pub symbol_margin: Decimal,
}

impl CapacitySnapshot {
    /// Confirmed + pending count under the account's counting rule.
    ///
    /// Hedge mode counts a symbol once even with both legs open; one-way
    /// mode counts raw entries.
    pub fn open_count(&self) -> usize {
        let confirmed = if self.hedge_mode {
            self.position_symbols.iter().collect::<HashSet<_>>().len()
        } else {
            self.position_symbols.len()
        };
        confirmed + self.pending_symbols.len()
    }
}

/// Capacity limits for one trade
#[derive(Debug, Clone, Copy)]
pub struct CapacityLimits {
    pub max_open_positions: usize,
    pub new_trade_margin: Decimal,
    pub max_symbol_margin: Option<Decimal>,
}

/// Pending, position-count and margin checks, in that order
pub fn capacity_decision(symbol: &Symbol, snapshot: &CapacitySnapshot, limits: &CapacityLimits) -> Result<(), SkipReason> {
    if snapshot.pending_symbols.contains(symbol) {
        return Err(SkipReason::info(format!("{} already has an entry in flight", symbol)));
    }

    let open = snapshot.open_count();
    if open >= limits.max_open_positions {
        return Err(SkipReason::warn(format!(
            "max open positions reached ({}/{})",
            open, limits.max_open_positions
        )));
    }

    if let Some(cap) = limits.max_symbol_margin {
        let projected = snapshot.symbol_margin + limits.new_trade_margin;
        if projected > cap {
            return Err(SkipReason::warn(format!(
                "{} margin {} would exceed cap {}",
                symbol,
                projected.round_dp(2),
                cap
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[test]
    fn test_candidate_is_opposite() {
        assert_eq!(directional_candidate(OrderSide::Sell), OrderSide::Buy);
        assert_eq!(directional_candidate(OrderSide::Buy), OrderSide::Sell);
    }

    #[test]
    fn test_instant_threshold_uses_directional_override() {
        let thresholds = VolumeThresholds {
            default: dec!(10000),
            long: None,
            short: Some(dec!(2000)),
        };
        assert!(!instant_volume_decision(dec!(5000), OrderSide::Buy, &thresholds).is_trade());
        assert!(instant_volume_decision(dec!(5000), OrderSide::Sell, &thresholds).is_trade());
        assert!(instant_volume_decision(dec!(10000), OrderSide::Buy, &thresholds).is_trade());
    }

    #[test]
    fn test_cumulative_requires_volume_then_cooldown() {
        let snapshot = ThresholdSnapshot {
            recent_long_volume: dec!(12000),
            recent_short_volume: dec!(500),
            long_threshold: dec!(10000),
            short_threshold: dec!(10000),
        };
        assert!(cumulative_volume_decision(&snapshot, OrderSide::Buy, 0).is_trade());
        assert!(!cumulative_volume_decision(&snapshot, OrderSide::Sell, 0).is_trade());

        match cumulative_volume_decision(&snapshot, OrderSide::Buy, 12) {
            Decision::Skip(reason) => {
                assert_eq!(reason.level, GateLevel::Info);
                assert!(reason.reason.contains("cooldown"));
            }
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[test]
    fn test_vwap_rule() {
        assert!(vwap_allows(OrderSide::Buy, dec!(99), dec!(100)));
        assert!(!vwap_allows(OrderSide::Buy, dec!(101), dec!(100)));
        assert!(vwap_allows(OrderSide::Sell, dec!(101), dec!(100)));
        assert!(!vwap_allows(OrderSide::Sell, dec!(99), dec!(100)));
    }

    #[test]
    fn test_open_count_hedge_vs_one_way() {
        let mut snapshot = CapacitySnapshot {
            hedge_mode: true,
            position_symbols: vec![sym("BTCUSDT"), sym("BTCUSDT"), sym("ETHUSDT")],
            pending_symbols: vec![sym("SOLUSDT")],
            symbol_margin: dec!(0),
        };
        assert_eq!(snapshot.open_count(), 3);
        snapshot.hedge_mode = false;
        assert_eq!(snapshot.open_count(), 4);
    }

    #[test]
    fn test_capacity_checks() {
        let limits = CapacityLimits {
            max_open_positions: 2,
            new_trade_margin: dec!(50),
            max_symbol_margin: Some(dec!(120)),
        };
        let btc = sym("BTCUSDT");

        let pending = CapacitySnapshot {
            pending_symbols: vec![btc.clone()],
            ..Default::default()
        };
        assert!(capacity_decision(&btc, &pending, &limits).is_err());

        let full = CapacitySnapshot {
            position_symbols: vec![sym("ETHUSDT"), sym("SOLUSDT")],
            ..Default::default()
        };
        assert_eq!(capacity_decision(&btc, &full, &limits).unwrap_err().level, GateLevel::Warn);

        let margin = CapacitySnapshot {
            position_symbols: vec![btc.clone()],
            symbol_margin: dec!(80),
            ..Default::default()
        };
        assert!(capacity_decision(&btc, &margin, &limits).is_err());

        let ok = CapacitySnapshot {
            position_symbols: vec![btc.clone()],
            symbol_margin: dec!(60),
            ..Default::default()
        };
        assert!(capacity_decision(&btc, &ok, &limits).is_ok());
    }
}
