//! Cascade Execution Layer
//!
//! Everything that talks to the exchange on behalf of the engine.
//!
//! # Architecture
//!
//! ```text
//! Signal → OrderPlacer → ExchangePort
//!                ↓
//!        PendingOrderTracker
//!
//! Reconciler → LockTable → protection::{cancel_with_retry, place_protective_leg} → ExchangePort
//! ```
//!
//! # Components
//!
//! - **Ports**: traits for the exchange, market metadata, VWAP, user stream and notifications
//! - **OrderPlacer**: entry orders with slippage downgrade, mode correction and MARKET fallback
//! - **PendingOrderTracker**: in-flight entries, de-duplicates signals
//! - **LockTable**: non-blocking per-key locks
//! - **protection**: cancel-with-retry and protective leg placement
//! - **classify**: closed error taxonomy with fingerprints
//! - **Stub**: in-memory implementations for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_exec::{OrderPlacer, PendingOrderTracker, PositionModeCache, StubExchange, StubMarket, NullNotifier};
//! use std::sync::Arc;
//!
//! let placer = OrderPlacer::new(
//!     Arc::new(StubExchange::new()),
//!     Arc::new(StubMarket::new()),
//!     Arc::new(NullNotifier),
//!     Arc::new(PendingOrderTracker::default()),
//!     Arc::new(PositionModeCache::new(false)),
//!     false,
//! );
//! let outcome = placer.place_entry(&symbol, OrderSide::Buy, &params, dec!(50000)).await;
//! ```

#![warn(clippy::all)]

pub mod classify;
pub mod error;
pub mod locks;
pub mod pending;
pub mod placer;
pub mod ports;
pub mod protection;
pub mod stub;

// Re-exports for convenience
pub use classify::{ClassifiedError, ErrorContext, ErrorDeduper, ErrorKind};
pub use error::{ExecError, ExecResult};
pub use locks::{KeyLock, LockTable};
pub use pending::{PendingOrderTracker, DEFAULT_PENDING_TTL_SECS};
pub use placer::{EntryOrderType, EntryParams, OrderPlacer, PlacementOutcome, PositionModeCache};
pub use ports::{
    DepthAnalysis, ExchangePort, MarketPort, Notifier, NullNotifier, OrderAck, OrderRequest, OrderValidation,
    TimeInForce, UserStreamPort, VwapCheck, VwapPort, VwapSnapshot,
};
pub use protection::{
    cancel_all, cancel_with_retry, place_protective_leg, CancelOutcome, PlacedLeg, ProtectionParams, RetryPolicy,
};
pub use stub::{RecordingNotifier, StubExchange, StubMarket, StubVwap};
