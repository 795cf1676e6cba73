//! Domain Entities for Cascade
//!
//! Positions and orders as mirrored from the exchange, plus the
//! [`PositionKey`] that joins them.
//!
//! # PositionKey
//!
//! Every piece of per-position bookkeeping (protective order ids, locks,
//! pending entries) is keyed by `{symbol}_{LONG|SHORT}`. The key must come
//! out identical whether it is derived from a position snapshot, a
//! protective order, or an entry order, in one-way and hedge mode alike:
//!
//! ```text
//! position  (BOTH, +0.5)          → BTCUSDT_LONG
//! position  (SHORT, -0.5)         → BTCUSDT_SHORT
//! SL order  (BOTH, SELL)          → BTCUSDT_LONG   (a sell closes a long)
//! SL order  (LONG, SELL)          → BTCUSDT_LONG
//! entry     (BUY)                 → BTCUSDT_LONG
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::value_objects::{DomainError, MarginType, OrderSide, PositionSide, Side, Symbol};

/// Quantities closer than this are the same size.
pub const QUANTITY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

/// Exchange-assigned order id
pub type OrderId = u64;

// =============================================================================
// PositionKey
// =============================================================================

/// Stable identity of one economic position: symbol plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    symbol: Symbol,
    side: Side,
}

impl PositionKey {
    /// Key for an explicit symbol and direction
    pub fn new(symbol: Symbol, side: Side) -> Self {
        Self { symbol, side }
    }

    /// Key for a position snapshot.
    ///
    /// Hedge-mode tags win; in one-way mode the sign of the amount decides.
    /// Returns `None` for a flat one-way position, which has no direction.
    pub fn for_position(symbol: &Symbol, position_side: PositionSide, amount: Decimal) -> Option<Self> {
        let side = match position_side {
            PositionSide::Long => Side::Long,
            PositionSide::Short => Side::Short,
            PositionSide::Both if amount > Decimal::ZERO => Side::Long,
            PositionSide::Both if amount < Decimal::ZERO => Side::Short,
            PositionSide::Both => return None,
        };
        Some(Self::new(symbol.clone(), side))
    }

    /// Key of the position a closing order protects.
    ///
    /// In one-way mode the order side is the exit side, so the protected
    /// direction is its opposite.
    pub fn for_protective_order(symbol: &Symbol, position_side: PositionSide, order_side: OrderSide) -> Self {
        let side = match position_side {
            PositionSide::Long => Side::Long,
            PositionSide::Short => Side::Short,
            PositionSide::Both => Side::closed_by(order_side),
        };
        Self::new(symbol.clone(), side)
    }

    /// Key of the position an entry order would open
    pub fn for_entry(symbol: &Symbol, order_side: OrderSide) -> Self {
        Self::new(symbol.clone(), Side::opened_by(order_side))
    }

    /// Symbol part of the key
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Direction part of the key
    pub fn side(&self) -> Side {
        self.side
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.symbol, self.side)
    }
}

impl FromStr for PositionKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (symbol, side) = s.rsplit_once('_').ok_or_else(|| DomainError::UnknownTag {
            kind: "position key",
            value: s.to_string(),
        })?;
        Ok(Self::new(Symbol::new(symbol)?, side.parse()?))
    }
}

impl Serialize for PositionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PositionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Position
// =============================================================================

/// A futures position as reported by the exchange.
///
/// `amount` is signed: positive long, negative short (hedge-mode shorts are
/// negative too).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: u32,
    pub margin_type: MarginType,
    pub isolated_margin: Decimal,
    pub position_side: PositionSide,
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// Direction, or `None` for a flat one-way position
    pub fn direction(&self) -> Option<Side> {
        self.key().map(|k| k.side())
    }

    /// Key joining this position to its orders and locks
    pub fn key(&self) -> Option<PositionKey> {
        if self.is_flat() {
            return None;
        }
        PositionKey::for_position(&self.symbol, self.position_side, self.amount)
    }

    /// Size regardless of direction
    pub fn abs_quantity(&self) -> Decimal {
        self.amount.abs()
    }

    /// True when no contracts are held
    pub fn is_flat(&self) -> bool {
        self.amount.abs() < QUANTITY_TOLERANCE
    }

    /// Notional at entry
    pub fn notional(&self) -> Decimal {
        self.abs_quantity() * self.entry_price
    }

    /// Margin committed to this position.
    ///
    /// Isolated positions report it directly; cross positions derive it
    /// from notional and leverage.
    pub fn margin(&self) -> Decimal {
        if self.margin_type == MarginType::Isolated && self.isolated_margin > Decimal::ZERO {
            return self.isolated_margin;
        }
        if self.leverage == 0 {
            return self.notional();
        }
        self.notional() / Decimal::from(self.leverage)
    }

    /// True when `other` differs in size beyond tolerance
    pub fn size_differs(&self, other: &Position) -> bool {
        (self.abs_quantity() - other.abs_quantity()).abs() > QUANTITY_TOLERANCE
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Closed set of futures order types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
    /// Exchange-initiated liquidation order (only seen on streams)
    Liquidation,
}

impl OrderType {
    /// Exchange wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Stop => "STOP",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::TrailingStopMarket => "TRAILING_STOP_MARKET",
            OrderType::Liquidation => "LIQUIDATION",
        }
    }

    /// Stop-loss order shapes
    pub fn is_stop(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopMarket)
    }

    /// Take-profit order shapes (a closing LIMIT also counts, see [`OpenOrder::protective_leg`])
    pub fn is_take_profit(&self) -> bool {
        matches!(self, OrderType::TakeProfit | OrderType::TakeProfitMarket)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "LIMIT" => OrderType::Limit,
            "MARKET" => OrderType::Market,
            "STOP" => OrderType::Stop,
            "STOP_MARKET" => OrderType::StopMarket,
            "TAKE_PROFIT" => OrderType::TakeProfit,
            "TAKE_PROFIT_MARKET" => OrderType::TakeProfitMarket,
            "TRAILING_STOP_MARKET" => OrderType::TrailingStopMarket,
            "LIQUIDATION" => OrderType::Liquidation,
            other => {
                return Err(DomainError::UnknownTag {
                    kind: "order type",
                    value: other.to_string(),
                })
            }
        })
    }
}

/// Closed set of order states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    ExpiredInMatch,
}

impl OrderStatus {
    /// Still resting on the book
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }

    /// Removed from the book without (fully) filling
    pub fn is_terminal_unfilled(&self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected | OrderStatus::ExpiredInMatch
        )
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "EXPIRED" => OrderStatus::Expired,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED_IN_MATCH" => OrderStatus::ExpiredInMatch,
            other => {
                return Err(DomainError::UnknownTag {
                    kind: "order status",
                    value: other.to_string(),
                })
            }
        })
    }
}

/// Which protective leg an order fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectiveLeg {
    StopLoss,
    TakeProfit,
}

impl ProtectiveLeg {
    /// Both legs, stop first
    pub const ALL: [ProtectiveLeg; 2] = [ProtectiveLeg::StopLoss, ProtectiveLeg::TakeProfit];

    /// Order type used when placing this leg
    pub fn order_type(&self) -> OrderType {
        match self {
            ProtectiveLeg::StopLoss => OrderType::StopMarket,
            ProtectiveLeg::TakeProfit => OrderType::TakeProfitMarket,
        }
    }

    /// The other leg
    pub fn sibling(&self) -> Self {
        match self {
            ProtectiveLeg::StopLoss => ProtectiveLeg::TakeProfit,
            ProtectiveLeg::TakeProfit => ProtectiveLeg::StopLoss,
        }
    }
}

impl fmt::Display for ProtectiveLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectiveLeg::StopLoss => write!(f, "Stop Loss"),
            ProtectiveLeg::TakeProfit => write!(f, "Take Profit"),
        }
    }
}

/// An order resting on the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Decimal,
    pub stop_price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub reduce_only: bool,
    pub close_position: bool,
    pub position_side: PositionSide,
    pub time: DateTime<Utc>,
}

impl OpenOrder {
    /// True for orders that can only shrink a position.
    ///
    /// Hedge-mode orders never carry `reduceOnly`; there a SELL on the LONG
    /// side (or BUY on SHORT) is closing by construction.
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

    /// Protective leg this order serves, if any
    pub fn protective_leg(&self) -> Option<ProtectiveLeg> {
        if !self.is_closing() {
            return None;
        }
        match self.order_type {
            t if t.is_stop() => Some(ProtectiveLeg::StopLoss),
            t if t.is_take_profit() => Some(ProtectiveLeg::TakeProfit),
            OrderType::Limit => Some(ProtectiveLeg::TakeProfit),
            _ => None,
        }
    }

    /// Key of the position this order would close
    pub fn protected_key(&self) -> PositionKey {
        PositionKey::for_protective_order(&self.symbol, self.position_side, self.side)
    }

    /// Key of the position this order would open (for entry orders)
    pub fn entry_key(&self) -> PositionKey {
        PositionKey::for_entry(&self.symbol, self.side)
    }

    /// True when this order covers `target` contracts.
    ///
    /// Close-position orders always cover the whole position.
    pub fn quantity_matches(&self, target: Decimal) -> bool {
        self.close_position || (self.orig_qty - target).abs() <= QUANTITY_TOLERANCE
    }

    /// Milliseconds since placement
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.time).num_milliseconds()
    }
}

// =============================================================================
// Protective order set
// =============================================================================

/// Recorded protective order ids for one [`PositionKey`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectiveOrderSet {
    pub stop_loss: Option<OrderId>,
    pub take_profit: Option<OrderId>,
}

impl ProtectiveOrderSet {
    /// Id recorded for a leg
    pub fn get(&self, leg: ProtectiveLeg) -> Option<OrderId> {
        match leg {
            ProtectiveLeg::StopLoss => self.stop_loss,
            ProtectiveLeg::TakeProfit => self.take_profit,
        }
    }

    /// Record an id for a leg, replacing any previous one
    pub fn set(&mut self, leg: ProtectiveLeg, order_id: OrderId) {
        match leg {
            ProtectiveLeg::StopLoss => self.stop_loss = Some(order_id),
            ProtectiveLeg::TakeProfit => self.take_profit = Some(order_id),
        }
    }

    /// Forget a leg
    pub fn clear(&mut self, leg: ProtectiveLeg) {
        match leg {
            ProtectiveLeg::StopLoss => self.stop_loss = None,
            ProtectiveLeg::TakeProfit => self.take_profit = None,
        }
    }

    /// Which leg (if any) an order id is recorded under
    pub fn leg_of(&self, order_id: OrderId) -> Option<ProtectiveLeg> {
        ProtectiveLeg::ALL.into_iter().find(|leg| self.get(*leg) == Some(order_id))
    }

    /// Both legs recorded
    pub fn is_complete(&self) -> bool {
        self.stop_loss.is_some() && self.take_profit.is_some()
    }

    /// Nothing recorded
    pub fn is_empty(&self) -> bool {
        self.stop_loss.is_none() && self.take_profit.is_none()
    }

    /// All recorded ids
    pub fn ids(&self) -> Vec<OrderId> {
        self.stop_loss.into_iter().chain(self.take_profit).collect()
    }
}

// =============================================================================
// Pending entry
// =============================================================================

/// An entry order submitted but not yet confirmed by the account stream.
///
/// `order_id` is a local `tmp-…` id until the exchange acknowledges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub submitted_at: DateTime<Utc>,
}

// =============================================================================
// Market metadata
// =============================================================================

/// Trading rules for one contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

/// Wallet balance of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
}

// =============================================================================
// Tests
// =============================================================================
