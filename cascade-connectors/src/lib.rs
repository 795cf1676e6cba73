//! Cascade Exchange Connectors
//!
//! Adapters for the Binance USDⓈ-M futures APIs (REST + WebSocket).
//! Normalizes exchange-specific types to domain types and implements the
//! execution-layer ports.

#![warn(clippy::all)]

// Public modules
pub mod binance_rest;
pub mod binance_ws;

// Re-exports
pub use binance_rest::{order_params, BinanceFuturesClient, BinanceRestError, MAINNET_URL, TESTNET_URL};
pub use binance_ws::{
    liquidation_url, parse_message, user_stream_url, BinanceStreamClient, BinanceWsError, StreamFrame,
    FUTURES_WS_URL, LIQUIDATION_STREAM, TESTNET_WS_URL,
};
