//! Inbound stream events.
//!
//! Every message the engine consumes is parsed into one of the closed
//! [`StreamEvent`] variants at the connector boundary. Anything that does
//! not fit a known shape is rejected there, never forwarded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::{AssetBalance, OrderId, OrderStatus, OrderType, ProtectiveLeg};
use crate::value_objects::{MarginType, OrderSide, PositionSide, Symbol};

// =============================================================================
// Liquidation feed
// =============================================================================

/// A forced liquidation printed by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub symbol: Symbol,
    /// Side of the liquidation order (SELL = a long was liquidated)
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub order_status: OrderStatus,
    pub event_time: DateTime<Utc>,
}

impl LiquidationEvent {
    /// USDT value of the liquidation
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    /// Side we would trade in response.
    ///
    /// Liquidated longs (SELL) are a long opportunity, liquidated shorts
    /// (BUY) a short opportunity.
    pub fn candidate_side(&self) -> OrderSide {
        self.side.opposite()
    }
}

// =============================================================================
// Account stream
// =============================================================================

/// Why the exchange pushed an account update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateReason {
    Order,
    FundingFee,
    Deposit,
    Withdraw,
    MarginTransfer,
    Other(String),
}

impl UpdateReason {
    /// Parse the exchange `m` field
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "ORDER" => UpdateReason::Order,
            "FUNDING_FEE" => UpdateReason::FundingFee,
            "DEPOSIT" => UpdateReason::Deposit,
            "WITHDRAW" => UpdateReason::Withdraw,
            "MARGIN_TRANSFER" => UpdateReason::MarginTransfer,
            other => UpdateReason::Other(other.to_string()),
        }
    }

    /// Update caused by a trade (as opposed to funding or transfers)
    pub fn is_trade_driven(&self) -> bool {
        matches!(self, UpdateReason::Order)
    }
}

/// One position entry in an account update.
///
/// The stream omits mark price and leverage; those are carried over from
/// the previous snapshot when the entry is folded into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPosition {
    pub symbol: Symbol,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub leverage: Option<u32>,
    pub margin_type: MarginType,
    pub isolated_margin: Decimal,
    pub position_side: PositionSide,
    pub unrealized_pnl: Decimal,
}

/// Account snapshot delta (positions and balances touched by one event)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub reason: UpdateReason,
    pub event_time: DateTime<Utc>,
    pub positions: Vec<AccountPosition>,
    pub balances: Vec<AssetBalance>,
}

/// Order lifecycle update from the account stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub symbol: Symbol,
    pub order_id: OrderId,
    pub client_order_id: String,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_price: Decimal,
    pub stop_price: Decimal,
    pub reduce_only: bool,
    pub close_position: bool,
    pub realized_profit: Decimal,
    pub position_side: PositionSide,
    pub event_time: DateTime<Utc>,
}

impl OrderUpdate {
    /// Same closing rule as [`crate::OpenOrder::is_closing`]
    pub fn is_closing(&self) -> bool {
        if self.reduce_only || self.close_position {
            return true;
        }
        match self.position_side {
            PositionSide::Long => self.side == OrderSide::Sell,
            PositionSide::Short => self.side == OrderSide::Buy,
            PositionSide::Both => false,
        }
    }

    /// Protective leg this update refers to, if any
    pub fn protective_leg(&self) -> Option<ProtectiveLeg> {
        if !self.is_closing() {
            return None;
        }
        if self.order_type.is_stop() {
            Some(ProtectiveLeg::StopLoss)
        } else if self.order_type.is_take_profit() || self.order_type == OrderType::Limit {
            Some(ProtectiveLeg::TakeProfit)
        } else {
            None
        }
    }
}

// =============================================================================
// Stream event union
// =============================================================================

/// Everything the two streams can deliver
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Liquidation(LiquidationEvent),
    Account(AccountUpdate),
    Order(OrderUpdate),
    /// The user-data session expired; the stream must be rebuilt
    ListenKeyExpired,
}
