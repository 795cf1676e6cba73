//! Execution layer port definitions.
//!
//! Ports are the seams to everything outside the core: the exchange's
//! signed REST API, market metadata and pricing, the VWAP source, the
//! user-data session, and the notification broadcaster.
//!
//! Implementations:
//! - `stub::*` for tests (in-memory, scriptable)
//! - `cascade_connectors::BinanceFuturesClient` for USDⓈ-M futures

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cascade_domain::{
    AssetBalance, Notification, OpenOrder, OrderId, OrderSide, OrderStatus, OrderType, Position,
    PositionSide, Symbol, SymbolFilters,
};

use crate::error::ExecResult;

// =============================================================================
// Exchange Port
// =============================================================================

/// Port for account and order operations.
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Submit one order. No retries happen below this call.
    async fn place_order(&self, request: &OrderRequest) -> ExecResult<OrderAck>;

    /// Cancel a resting order.
    ///
    /// An order that is already gone surfaces as an error for which
    /// [`crate::ExecError::is_order_gone`] is true.
    async fn cancel_order(&self, symbol: &Symbol, order_id: OrderId) -> ExecResult<()>;

    /// Set the symbol's leverage.
    async fn set_leverage(&self, symbol: &Symbol, leverage: u32) -> ExecResult<()>;

    /// Every non-flat position on the account.
    async fn get_positions(&self) -> ExecResult<Vec<Position>>;

    /// Resting orders, optionally narrowed to one symbol.
    async fn get_open_orders(&self, symbol: Option<&Symbol>) -> ExecResult<Vec<OpenOrder>>;

    /// `true` when the account is in hedge (dual-side) mode.
    async fn get_position_mode(&self) -> ExecResult<bool>;

    /// Wallet balances.
    async fn get_balance(&self) -> ExecResult<Vec<AssetBalance>>;
}

/// Time-in-force for LIMIT orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancel
    Gtc,
    /// Post-only (rejected if it would take liquidity)
    Gtx,
    /// Immediate or cancel
    Ioc,
}

impl TimeInForce {
    /// Exchange wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Gtx => "GTX",
            TimeInForce::Ioc => "IOC",
        }
    }
}

/// One order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price (LIMIT orders only)
    pub price: Option<Decimal>,
    /// Trigger price (stop and take-profit orders)
    pub stop_price: Option<Decimal>,
    pub position_side: PositionSide,
    /// Sent only when true; never valid in hedge mode
    pub reduce_only: bool,
    pub time_in_force: Option<TimeInForce>,
    /// Trigger on mark price instead of last price
    pub use_mark_price: bool,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// Plain MARKET order
    pub fn market(symbol: Symbol, side: OrderSide, quantity: Decimal, position_side: PositionSide) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            position_side,
            reduce_only: false,
            time_in_force: None,
            use_mark_price: false,
            client_order_id: None,
        }
    }

    /// GTC (or post-only) LIMIT order
    pub fn limit(
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        position_side: PositionSide,
        post_only: bool,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            time_in_force: Some(if post_only { TimeInForce::Gtx } else { TimeInForce::Gtc }),
            ..Self::market(symbol, side, quantity, position_side)
        }
    }

    /// Reference price for notional and logging
    pub fn effective_price(&self) -> Decimal {
        self.price.or(self.stop_price).unwrap_or_default()
    }
}

/// Exchange acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub avg_price: Decimal,
}

// =============================================================================
// Market Port
// =============================================================================

/// Port for contract metadata and pricing helpers.
#[async_trait]
pub trait MarketPort: Send + Sync {
    /// Tick size, step size and minimums for a contract.
    async fn symbol_filters(&self, symbol: &Symbol) -> ExecResult<SymbolFilters>;

    /// Round a price to the contract's tick size.
    async fn format_price(&self, symbol: &Symbol, price: Decimal) -> ExecResult<Decimal>;

    /// Round a quantity down to the contract's step size.
    async fn format_quantity(&self, symbol: &Symbol, quantity: Decimal) -> ExecResult<Decimal>;

    /// Best bid/ask shifted by `offset_bps`; post-only keeps it on the passive side.
    async fn optimal_price(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        offset_bps: Decimal,
        post_only: bool,
    ) -> ExecResult<Decimal>;

    /// Whether the book can absorb `target_notional` on the taking side.
    async fn analyze_depth(&self, symbol: &Symbol, side: OrderSide, target_notional: Decimal) -> ExecResult<DepthAnalysis>;

    /// Final filter pass over a LIMIT order.
    async fn validate_order_params(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> ExecResult<OrderValidation>;
}

/// Order-book depth check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthAnalysis {
    pub liquidity_ok: bool,
    /// Notional available within the inspected levels
    pub available_notional: Decimal,
    /// Volume-weighted fill price for the target notional, if reachable
    pub projected_price: Option<Decimal>,
}

/// Result of the final LIMIT validation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderValidation {
    pub valid: bool,
    pub adjusted_price: Option<Decimal>,
    pub adjusted_quantity: Option<Decimal>,
    pub error: Option<String>,
}

impl OrderValidation {
    /// Passed unchanged
    pub fn ok() -> Self {
        Self {
            valid: true,
            adjusted_price: None,
            adjusted_quantity: None,
            error: None,
        }
    }

    /// Failed with a reason
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            adjusted_price: None,
            adjusted_quantity: None,
            error: Some(reason.into()),
        }
    }
}

// =============================================================================
// VWAP Port
// =============================================================================

/// Port for the VWAP directional filter.
#[async_trait]
pub trait VwapPort: Send + Sync {
    /// Compute VWAP over `lookback` candles of `timeframe` and apply the
    /// directional rule for `side` at `price`.
    async fn check_vwap_filter(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        price: Decimal,
        timeframe: &str,
        lookback: u32,
    ) -> ExecResult<VwapCheck>;

    /// Last known VWAP for a symbol (streamed or cached), if any.
    fn current_vwap(&self, symbol: &Symbol) -> Option<VwapSnapshot>;
}

/// Outcome of a VWAP check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VwapCheck {
    pub allowed: bool,
    pub vwap: Decimal,
    pub reason: String,
}

/// A VWAP value with its observation time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VwapSnapshot {
    pub vwap: Decimal,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// User stream session
// =============================================================================

/// Port for the private user-data stream session (listen key).
#[async_trait]
pub trait UserStreamPort: Send + Sync {
    /// Open (or fetch the current) session and return its listen key.
    async fn create_listen_key(&self) -> ExecResult<String>;

    /// Extend the session's lifetime.
    async fn keepalive_listen_key(&self, listen_key: &str) -> ExecResult<()>;

    /// Close the session.
    async fn close_listen_key(&self, listen_key: &str) -> ExecResult<()>;
}

// =============================================================================
// Notifier
// =============================================================================

/// Fire-and-forget broadcaster for [`Notification`]s.
///
/// Implementations must not block; delivery failures are swallowed.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: Notification) {}
}
