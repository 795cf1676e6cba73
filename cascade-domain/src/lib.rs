//! Cascade Domain Layer
//!
//! Pure domain types with zero I/O dependencies: value objects, the
//! position/order mirror entities, inbound stream events and outbound
//! notifications.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod credentials;
#[allow(missing_docs)]
pub mod entities;
#[allow(missing_docs)]
pub mod events;
#[allow(missing_docs)]
pub mod notifications;
pub mod value_objects;

// Re-export commonly used types
pub use credentials::ApiCredentials;
pub use entities::{
    AssetBalance, OpenOrder, OrderId, OrderStatus, OrderType, PendingOrder, Position, PositionKey,
    ProtectiveLeg, ProtectiveOrderSet, SymbolFilters, QUANTITY_TOLERANCE,
};
pub use events::{
    AccountPosition, AccountUpdate, LiquidationEvent, OrderUpdate, StreamEvent, UpdateReason,
};
pub use notifications::{CloseReason, ErrorCategory, Notification};
pub use value_objects::{
    DomainError, Leverage, MarginType, OrderSide, PositionSide, Price, Quantity, Side, Symbol,
};
