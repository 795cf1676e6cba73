//! Cascade Engine
//!
//! Deterministic decision logic with no I/O:
//!
//! - **threshold**: rolling 60s liquidation volume per symbol, per-direction cooldowns
//! - **gate**: go/no-go rules for a liquidation signal (volume, VWAP, capacity)
//! - **sizing**: quantity, price rounding, slippage and SL/TP trigger math
//! - **reconcile**: protective-order plans and sweep classification
//!
//! Callers pass `now` explicitly so every rule is testable without a clock.

#![warn(clippy::all)]

pub mod error;
pub mod gate;
pub mod reconcile;
pub mod sizing;
pub mod threshold;

pub use error::{EngineError, EngineResult};
pub use gate::{
    capacity_decision, cumulative_volume_decision, directional_candidate, instant_volume_decision,
    vwap_allows, CapacityLimits, CapacitySnapshot, Decision, GateLevel, SkipReason,
};
pub use reconcile::{
    classify_sweep, orders_for_key, plan_protection, ProtectionPlan, SweepClassification, SweepPolicy,
};
pub use threshold::{CooldownTracker, ThresholdMonitor, ThresholdSnapshot, VolumeThresholds};
