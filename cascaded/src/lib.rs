//! Cascade Daemon Library
//!
//! Runtime orchestrator for the liquidation-cascade trading engine.
//!
//! # Architecture
//!
//! ```text
//! Liquidation Stream → Trader → SignalGate → OrderPlacer → Exchange
//!                                                ↓
//!                                       PendingOrderTracker
//!
//! User Data Stream → Reconciler → PositionStateStore
//!                        ↓
//!               protective SL/TP orders → Exchange
//!                        ↑
//!        Timers (sweep, orphan cleanup, risk check, mode resync)
//!
//! Every component → Event Bus → Metrics / subscribers
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Trader**: Liquidation event to entry order
//! - **SignalGate**: Thresholds, cooldowns, VWAP filter, position limits
//! - **Reconciler**: Position mirror and protective orders
//! - **StreamSupervisor**: Liquidation and user-data WebSocket feeds
//! - **Event Bus**: Outbound notifications
//! - **API**: HTTP endpoints (health, status, metrics, manual close)
//! - **Config**: Environment and symbols-file configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use cascaded::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::live(config).expect("Failed to build daemon");
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod reconciler;
pub mod risk;
pub mod signal_gate;
pub mod state;
pub mod supervisor;
pub mod trader;

// Re-exports for convenience
pub use config::{ApiConfig, Config, Environment, SymbolBook, SymbolConfig, TimingConfig, TradingConfig};
pub use daemon::{Daemon, Ports};
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{EventBus, EventReceiver};
pub use metrics::Metrics;
pub use reconciler::{
    FollowUp, ProtectOutcome, Reconciler, ReconcilerSettings, ReconcilerSnapshot, SweepReport, SyncReport,
};
pub use risk::{RiskFinding, RiskKind};
pub use signal_gate::SignalGate;
pub use state::{PositionEntry, PositionStateStore};
pub use supervisor::{Flow, StreamSupervisor};
pub use trader::{TradeOutcome, Trader};
