//! Periodic risk assessment.
//!
//! Flags exposure the trading rules should have prevented or the
//! reconciler has not yet repaired:
//! - positions without both protective orders
//! - symbols whose committed margin exceeds `maxPositionMargin`
//! - confirmed plus pending positions above the account limit

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use cascade_domain::{Notification, Symbol};
use cascade_engine::CapacitySnapshot;

use crate::config::SymbolBook;
use crate::state::PositionEntry;

/// What a finding is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskKind {
    IncompleteProtection,
    MarginCap,
    PositionLimit,
}

/// One risk warning
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskFinding {
    pub kind: RiskKind,
    pub symbol: Option<Symbol>,
    pub message: String,
}

impl RiskFinding {
    pub fn to_notification(&self) -> Notification {
        Notification::RiskWarning {
            symbol: self.symbol.clone(),
            message: self.message.clone(),
        }
    }
}

/// Evaluate the current store contents.
///
/// `capacity` supplies the hedge flag plus confirmed and pending symbols;
/// its `symbol_margin` is ignored.
pub fn assess(
    entries: &[PositionEntry],
    capacity: &CapacitySnapshot,
    symbols: &SymbolBook,
    max_open_positions: usize,
) -> Vec<RiskFinding> {
    let mut findings = Vec::new();

    for entry in entries {
        if !entry.protection.is_complete() {
            let missing: Vec<&str> = [
                ("stop-loss", entry.protection.stop_loss.is_none()),
                ("take-profit", entry.protection.take_profit.is_none()),
            ]
            .into_iter()
            .filter_map(|(leg, missing)| missing.then_some(leg))
            .collect();
            findings.push(RiskFinding {
                kind: RiskKind::IncompleteProtection,
                symbol: Some(entry.key.symbol().clone()),
                message: format!("{} has no {} order", entry.key, missing.join(" or ")),
            });
        }
    }

    let mut margins: BTreeMap<&Symbol, Decimal> = BTreeMap::new();
    for entry in entries {
        *margins.entry(entry.key.symbol()).or_default() += entry.position.margin();
    }
    for (symbol, margin) in margins {
        let Some(cap) = symbols.get(symbol).and_then(|c| c.max_position_margin) else {
            continue;
        };
        if margin > cap {
            findings.push(RiskFinding {
                kind: RiskKind::MarginCap,
                symbol: Some(symbol.clone()),
                message: format!("{} margin {} exceeds cap {}", symbol, margin.round_dp(2), cap),
            });
        }
    }

    let open = capacity.open_count();
    if open > max_open_positions {
        findings.push(RiskFinding {
            kind: RiskKind::PositionLimit,
            symbol: None,
            message: format!("{} open positions exceed the limit of {}", open, max_open_positions),
        });
    }

    findings
}
