//! Outbound notifications.
//!
//! Fire-and-forget messages for the external broadcaster (dashboard,
//! chat bot, metrics). Trading logic never waits on their delivery.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::entities::{AssetBalance, OrderId, OrderType, PositionKey, ProtectiveLeg};
use crate::value_objects::{OrderSide, Symbol};

/// Why a position went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    /// Closed through the API
    Manual,
    /// Reported flat by the account stream or a sweep
    External,
}

impl From<ProtectiveLeg> for CloseReason {
    fn from(leg: ProtectiveLeg) -> Self {
        match leg {
            ProtectiveLeg::StopLoss => CloseReason::StopLoss,
            ProtectiveLeg::TakeProfit => CloseReason::TakeProfit,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "Stop Loss"),
            CloseReason::TakeProfit => write!(f, "Take Profit"),
            CloseReason::Manual => write!(f, "Manual Close"),
            CloseReason::External => write!(f, "Closed"),
        }
    }
}

/// Error categories surfaced to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Trading,
    Api,
    Config,
    Websocket,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Trading => write!(f, "trading"),
            ErrorCategory::Api => write!(f, "api"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Websocket => write!(f, "websocket"),
        }
    }
}

/// Everything the engine reports outward
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    PositionOpened {
        symbol: Symbol,
        side: OrderSide,
        order_id: Option<OrderId>,
        quantity: Decimal,
        price: Decimal,
        leverage: u32,
        order_type: OrderType,
        paper: bool,
    },
    PositionUpdated {
        key: PositionKey,
        previous_quantity: Decimal,
        quantity: Decimal,
        entry_price: Decimal,
    },
    PositionClosed {
        key: PositionKey,
        realized_pnl: Option<Decimal>,
        reason: CloseReason,
    },
    OrderPlaced {
        symbol: Symbol,
        side: OrderSide,
        order_id: OrderId,
        order_type: OrderType,
        quantity: Decimal,
        price: Decimal,
    },
    OrderFilled {
        symbol: Symbol,
        side: OrderSide,
        order_id: OrderId,
        order_type: OrderType,
        quantity: Decimal,
        avg_price: Decimal,
    },
    OrderFailed {
        symbol: Symbol,
        kind: String,
        code: Option<i64>,
        message: String,
    },
    StopLossPlaced {
        key: PositionKey,
        order_id: OrderId,
        stop_price: Decimal,
        quantity: Decimal,
    },
    TakeProfitPlaced {
        key: PositionKey,
        order_id: OrderId,
        stop_price: Decimal,
        quantity: Decimal,
    },
    BalanceUpdated {
        balances: Vec<AssetBalance>,
    },
    RiskWarning {
        /// `None` for account-wide warnings
        symbol: Option<Symbol>,
        message: String,
    },
    Error {
        category: ErrorCategory,
        symbol: Option<Symbol>,
        message: String,
        at: DateTime<Utc>,
    },
}

impl Notification {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::PositionOpened { .. } => "position_opened",
            Notification::PositionUpdated { .. } => "position_updated",
            Notification::PositionClosed { .. } => "position_closed",
            Notification::OrderPlaced { .. } => "order_placed",
            Notification::OrderFilled { .. } => "order_filled",
            Notification::OrderFailed { .. } => "order_failed",
            Notification::StopLossPlaced { .. } => "stop_loss_placed",
            Notification::TakeProfitPlaced { .. } => "take_profit_placed",
            Notification::BalanceUpdated { .. } => "balance_updated",
            Notification::RiskWarning { .. } => "risk_warning",
            Notification::Error { .. } => "error",
        }
    }

    /// Convenience constructor for categorized errors
    pub fn error(category: ErrorCategory, symbol: Option<Symbol>, message: impl Into<String>) -> Self {
        Notification::Error {
            category,
            symbol,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Leg-specific "protection placed" notification
    pub fn protection_placed(
        leg: ProtectiveLeg,
        key: PositionKey,
        order_id: OrderId,
        stop_price: Decimal,
        quantity: Decimal,
    ) -> Self {
        match leg {
            ProtectiveLeg::StopLoss => Notification::StopLossPlaced {
                key,
                order_id,
                stop_price,
                quantity,
            },
            ProtectiveLeg::TakeProfit => Notification::TakeProfitPlaced {
                key,
                order_id,
                stop_price,
                quantity,
            },
        }
    }
}
