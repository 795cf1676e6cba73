//! Value Objects for the Cascade domain
//!
//! Immutable, validated primitives shared by every layer.
//! Constructors enforce invariants; exchange string forms are parsed here once.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Price must be positive
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Quantity must be positive
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Symbol must be a non-empty uppercase contract name
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Leverage outside the exchange range
    #[error("Invalid leverage: {0}")]
    InvalidLeverage(String),

    /// Unknown enum tag coming from the exchange or configuration
    #[error("Unknown {kind}: {value}")]
    UnknownTag {
        /// Which enum failed to parse (e.g. "order type")
        kind: &'static str,
        /// The offending raw value
        value: String,
    },
}

impl DomainError {
    fn unknown(kind: &'static str, value: &str) -> Self {
        Self::UnknownTag {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Price
// =============================================================================

/// Price represents a positive decimal price
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    /// Create a new Price with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice(format!("{} is not positive", value)));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Quantity represents a positive contract quantity
///
/// Signed position amounts stay as raw `Decimal` on [`crate::Position`];
/// this type is for order sizes, which are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Create a new Quantity with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuantity` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidQuantity(format!("{} is not positive", value)));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Symbol
// =============================================================================

/// Futures contract symbol (e.g. `BTCUSDT`, `1000PEPEUSDT`).
///
/// Stored uppercase. Contract names are opaque to the engine, so no
/// base/quote split is attempted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Create a Symbol, normalizing to uppercase.
    ///
    /// # Examples
    /// ```
    /// # use cascade_domain::Symbol;
    /// let symbol = Symbol::new("btcusdt").unwrap();
    /// assert_eq!(symbol.as_str(), "BTCUSDT");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSymbol` for empty or non-alphanumeric input
    pub fn new(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidSymbol("empty symbol".to_string()));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::InvalidSymbol(format!("unexpected characters in {}", raw)));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Contract name as sent to the exchange
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

// =============================================================================
// Side
// =============================================================================

/// Side represents the position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Long position (profits when price rises)
    Long,
    /// Short position (profits when price falls)
    Short,
}

impl Side {
    /// Order side that opens this direction
    ///
    /// Long → Buy, Short → Sell
    pub fn entry_action(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes this direction
    ///
    /// Long → Sell, Short → Buy
    pub fn exit_action(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    /// Direction opened by an order side
    pub fn opened_by(order_side: OrderSide) -> Self {
        match order_side {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        }
    }

    /// Direction closed by an order side
    pub fn closed_by(order_side: OrderSide) -> Self {
        match order_side {
            OrderSide::Buy => Side::Short,
            OrderSide::Sell => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for Side {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" => Ok(Side::Long),
            "SHORT" => Ok(Side::Short),
            _ => Err(DomainError::unknown("position direction", s)),
        }
    }
}

/// OrderSide represents the order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl OrderSide {
    /// The other side of the book
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Exchange wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => Err(DomainError::unknown("order side", s)),
        }
    }
}

// =============================================================================
// Position side (account position mode tag)
// =============================================================================

/// Exchange position-side tag carried on positions and orders.
///
/// One-way accounts always use `Both`; hedge accounts tag each order and
/// position with `Long` or `Short`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    /// One-way mode
    Both,
    /// Hedge mode, long leg
    Long,
    /// Hedge mode, short leg
    Short,
}

impl PositionSide {
    /// Position side for a new entry order.
    ///
    /// ```
    /// # use cascade_domain::{OrderSide, PositionSide};
    /// assert_eq!(PositionSide::for_entry(false, OrderSide::Sell), PositionSide::Both);
    /// assert_eq!(PositionSide::for_entry(true, OrderSide::Sell), PositionSide::Short);
    /// ```
    pub fn for_entry(hedge_mode: bool, side: OrderSide) -> Self {
        if !hedge_mode {
            return PositionSide::Both;
        }
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }

    /// Position side tag for a given direction in the given account mode
    pub fn for_direction(hedge_mode: bool, side: Side) -> Self {
        Self::for_entry(hedge_mode, side.entry_action())
    }

    /// Exchange wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Both => "BOTH",
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionSide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOTH" => Ok(PositionSide::Both),
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            _ => Err(DomainError::unknown("position side", s)),
        }
    }
}

// =============================================================================
// Margin type
// =============================================================================

/// Margin mode of a futures position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginType {
    /// Shared cross margin
    Cross,
    /// Per-position isolated margin
    Isolated,
}

impl FromStr for MarginType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cross" | "crossed" => Ok(MarginType::Cross),
            "isolated" => Ok(MarginType::Isolated),
            _ => Err(DomainError::unknown("margin type", s)),
        }
    }
}

impl fmt::Display for MarginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarginType::Cross => write!(f, "cross"),
            MarginType::Isolated => write!(f, "isolated"),
        }
    }
}

// =============================================================================
// Leverage
// =============================================================================

/// Leverage multiplier accepted by USDⓈ-M futures (1..=125)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Leverage(u32);

impl Leverage {
    /// Highest leverage any contract allows
    pub const MAX: u32 = 125;

    /// Create a validated leverage
    ///
    /// # Errors
    /// Returns `DomainError::InvalidLeverage` outside 1..=125
    pub fn new(value: u32) -> Result<Self, DomainError> {
        if value == 0 || value > Self::MAX {
            return Err(DomainError::InvalidLeverage(format!(
                "{} is outside 1..={}",
                value,
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    /// Raw multiplier
    pub fn get(&self) -> u32 {
        self.0
    }

    /// Multiplier as a decimal for margin math
    pub fn as_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }
}

impl TryFrom<u32> for Leverage {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Leverage> for u32 {
    fn from(leverage: Leverage) -> Self {
        leverage.0
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_rejects_non_positive() {
        assert!(Price::new(dec!(0)).is_err());
        assert!(Price::new(dec!(-1)).is_err());
        assert_eq!(Price::new(dec!(50000)).unwrap().as_decimal(), dec!(50000));
    }

    #[test]
    fn test_quantity_rejects_non_positive() {
        assert!(Quantity::new(dec!(0)).is_err());
        assert!(Quantity::new(dec!(0.005)).is_ok());
    }

    #[test]
    fn test_symbol_normalizes_case() {
        let symbol = Symbol::new(" ethusdt ").unwrap();
        assert_eq!(symbol.as_str(), "ETHUSDT");
        assert_eq!(symbol.to_string(), "ETHUSDT");
    }

    #[test]
    fn test_symbol_rejects_garbage() {
        assert!(Symbol::new("").is_err());
        assert!(Symbol::new("BTC/USDT").is_err());
        assert!(Symbol::new("1000PEPEUSDT").is_ok());
    }

    #[test]
    fn test_symbol_serde_as_string() {
        let symbol = Symbol::new("BTCUSDT").unwrap();
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"BTCUSDT\"");

        let parsed: Symbol = serde_json::from_str("\"solusdt\"").unwrap();
        assert_eq!(parsed.as_str(), "SOLUSDT");
    }

    #[test]
    fn test_side_actions() {
        assert_eq!(Side::Long.entry_action(), OrderSide::Buy);
        assert_eq!(Side::Long.exit_action(), OrderSide::Sell);
        assert_eq!(Side::Short.entry_action(), OrderSide::Sell);
        assert_eq!(Side::Short.exit_action(), OrderSide::Buy);
        assert_eq!(Side::closed_by(OrderSide::Sell), Side::Long);
        assert_eq!(Side::opened_by(OrderSide::Sell), Side::Short);
    }

    #[test]
    fn test_position_side_for_entry() {
        assert_eq!(PositionSide::for_entry(false, OrderSide::Buy), PositionSide::Both);
        assert_eq!(PositionSide::for_entry(true, OrderSide::Buy), PositionSide::Long);
        assert_eq!(PositionSide::for_entry(true, OrderSide::Sell), PositionSide::Short);
        assert_eq!(PositionSide::for_direction(true, Side::Short), PositionSide::Short);
    }

    #[test]
    fn test_wire_tags_parse() {
        assert_eq!("SELL".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert_eq!("BOTH".parse::<PositionSide>().unwrap(), PositionSide::Both);
        assert_eq!("isolated".parse::<MarginType>().unwrap(), MarginType::Isolated);
        assert_eq!("cross".parse::<MarginType>().unwrap(), MarginType::Cross);
        assert!("sideways".parse::<OrderSide>().is_err());
    }

    #[test]
    fn test_leverage_bounds() {
        assert!(Leverage::new(0).is_err());
        assert!(Leverage::new(126).is_err());
        assert_eq!(Leverage::new(20).unwrap().as_decimal(), dec!(20));
        assert_eq!(Leverage::new(10).unwrap().to_string(), "10x");
    }
}
