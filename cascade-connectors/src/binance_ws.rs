//! Binance Futures WebSocket Client
//!
//! Connects to the USDⓈ-M futures streams:
//! - the public all-market liquidation feed (`!forceOrder@arr`)
//! - the private user-data stream (`/ws/<listenKey>`)
//!
//! Messages are normalized to [`StreamEvent`] at this boundary and
//! forwarded on an mpsc channel. Reconnection is the caller's job: [`BinanceStreamClient::run`]
//! returns as soon as the connection is unusable.

use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WebSocketMessage, WebSocketStream};
use tracing::{debug, error, info, warn};

use cascade_domain::{
    AccountPosition, AccountUpdate, AssetBalance, LiquidationEvent, MarginType, OrderSide, OrderStatus, OrderType,
    OrderUpdate, PositionSide, StreamEvent, Symbol, UpdateReason,
};

/// Type alias for the WebSocket stream (with auto TLS).
type WsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Futures WebSocket base URL (mainnet).
pub const FUTURES_WS_URL: &str = "wss://fstream.binance.com/ws";

/// Futures WebSocket base URL (testnet).
pub const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com/ws";

/// All-market liquidation stream name.
pub const LIQUIDATION_STREAM: &str = "!forceOrder@arr";

/// WebSocket read timeout (in seconds).
///
/// The liquidation feed can be silent for minutes in calm markets and the
/// exchange pings every 3 minutes, so the window is generous.
const READ_TIMEOUT_SECS: u64 = 600;

/// What the client forwards for each text frame it understood (or not)
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(StreamEvent),
    /// A known event kind that failed to parse
    Malformed(String),
}

/// Errors that can occur in the Binance WebSocket client.
#[derive(Debug, Error)]
pub enum BinanceWsError {
    /// Failed to connect to WebSocket.
    #[error("Failed to connect to WebSocket: {0}")]
    ConnectionFailed(String),

    /// Failed to receive message.
    #[error("Failed to receive message: {0}")]
    ReceiveError(String),

    /// Invalid message format.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Connection closed by the peer, or the consumer went away.
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    /// Timed out waiting for message.
    #[error("Timed out waiting for message")]
    Timeout,
}

/// URL of the liquidation feed
pub fn liquidation_url(base: &str) -> String {
    format!("{}/{}", base, LIQUIDATION_STREAM)
}

/// URL of a user-data stream session
pub fn user_stream_url(base: &str, listen_key: &str) -> String {
    format!("{}/{}", base, listen_key)
}

// =============================================================================
// Stream client
// =============================================================================

/// One WebSocket connection forwarding parsed events.
pub struct BinanceStreamClient {
    /// Label for logs ("liquidations", "user")
    label: &'static str,
    /// WebSocket stream (with TLS wrapper).
    ws_stream: WsStream,
    /// Consumer of parsed frames.
    event_sender: mpsc::Sender<StreamFrame>,
    /// Whether the client is connected.
    connected: bool,
}

impl BinanceStreamClient {
    /// Connect to `url`.
    pub async fn connect(
        label: &'static str,
        url: &str,
        event_sender: mpsc::Sender<StreamFrame>,
    ) -> Result<Self, BinanceWsError> {
        info!(stream = label, "Connecting to Binance WebSocket");

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| BinanceWsError::ConnectionFailed(e.to_string()))?;

        info!(stream = label, "Connected to Binance WebSocket");

        Ok(Self {
            label,
            ws_stream,
            event_sender,
            connected: true,
        })
    }

    /// Run the message loop until the connection closes or fails.
    ///
    /// Malformed messages are logged and skipped; they never end the loop.
    pub async fn run(&mut self) -> Result<(), BinanceWsError> {
        while self.connected {
            match timeout(Duration::from_secs(READ_TIMEOUT_SECS), self.ws_stream.next()).await {
                Ok(Some(Ok(msg))) => self.handle_message(msg).await?,
                Ok(Some(Err(e))) => {
                    error!(stream = self.label, error = %e, "Error reading from WebSocket");
                    self.connected = false;
                    return Err(BinanceWsError::ReceiveError(e.to_string()));
                },
                Ok(None) => {
                    warn!(stream = self.label, "WebSocket stream ended");
                    self.connected = false;
                    return Err(BinanceWsError::ChannelClosed);
                },
                Err(_) => {
                    error!(stream = self.label, "Timeout waiting for message");
                    self.connected = false;
                    return Err(BinanceWsError::Timeout);
                },
            }
        }

        Ok(())
    }

    /// Close the connection politely.
    pub async fn close(&mut self) {
        if let Err(e) = self.ws_stream.close(None).await {
            debug!(stream = self.label, error = %e, "Close handshake failed");
        }
        self.connected = false;
    }

    /// Handle a single WebSocket message.
    async fn handle_message(&mut self, msg: WebSocketMessage) -> Result<(), BinanceWsError> {
        match msg {
            WebSocketMessage::Text(text) => {
                let frame = match parse_message(&text) {
                    Ok(Some(event)) => StreamFrame::Event(event),
                    Ok(None) => return Ok(()),
                    Err(e) => {
                        warn!(stream = self.label, error = %e, "Dropping malformed message");
                        StreamFrame::Malformed(e.to_string())
                    },
                };
                self.event_sender
                    .send(frame)
                    .await
                    .map_err(|_| BinanceWsError::ChannelClosed)?;
            },
            WebSocketMessage::Ping(_) => {
                // tungstenite queues the pong automatically
                debug!(stream = self.label, "Received ping from Binance");
            },
            WebSocketMessage::Pong(_) => {},
            WebSocketMessage::Close(_) => {
                self.connected = false;
                warn!(stream = self.label, "WebSocket connection closed");
                return Err(BinanceWsError::ChannelClosed);
            },
            _ => {},
        }

        Ok(())
    }

    /// Check if the client is still connected.
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse one text frame.
///
/// Returns `Ok(None)` for event kinds the engine does not consume.
/// Combined-stream frames (`{"stream": .., "data": ..}`) are unwrapped.
pub fn parse_message(text: &str) -> Result<Option<StreamEvent>, BinanceWsError> {
    let mut json: Value = serde_json::from_str(text).map_err(|e| BinanceWsError::InvalidMessage(e.to_string()))?;
    if let Some(data) = json.get_mut("data").map(Value::take) {
        json = data;
    }

    let Some(event_type) = json.get("e").and_then(|v| v.as_str()).map(str::to_string) else {
        debug!("Ignoring frame without event type");
        return Ok(None);
    };

    let event = match event_type.as_str() {
        "forceOrder" => StreamEvent::Liquidation(from_value::<WireForceOrder>(json)?.into_event()?),
        "ACCOUNT_UPDATE" => StreamEvent::Account(from_value::<WireAccountUpdate>(json)?.into_event()?),
        "ORDER_TRADE_UPDATE" => StreamEvent::Order(from_value::<WireOrderTradeUpdate>(json)?.into_event()?),
        "listenKeyExpired" => StreamEvent::ListenKeyExpired,
        other => {
            debug!(event_type = other, "Ignoring stream event");
            return Ok(None);
        },
    };
    Ok(Some(event))
}

fn from_value<T: serde::de::DeserializeOwned>(json: Value) -> Result<T, BinanceWsError> {
    serde_json::from_value(json).map_err(|e| BinanceWsError::InvalidMessage(e.to_string()))
}

fn field<T: FromStr>(raw: &str) -> Result<T, BinanceWsError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| BinanceWsError::InvalidMessage(e.to_string()))
}

fn millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

// =============================================================================
// Binance-Specific Types (internal to connector)
// =============================================================================

/// `forceOrder` event.
#[derive(Debug, Clone, Deserialize)]
struct WireForceOrder {
    #[serde(rename = "o")]
    order: WireLiquidationOrder,
}

#[derive(Debug, Clone, Deserialize)]
struct WireLiquidationOrder {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    /// Original quantity
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "p")]
    price: Decimal,
    /// Average fill price
    #[serde(rename = "ap", default)]
    avg_price: Decimal,
    #[serde(rename = "X")]
    status: String,
    /// Trade time
    #[serde(rename = "T")]
    trade_time: i64,
}

impl WireForceOrder {
    fn into_event(self) -> Result<LiquidationEvent, BinanceWsError> {
        let o = self.order;
        let price = if o.avg_price > Decimal::ZERO { o.avg_price } else { o.price };
        Ok(LiquidationEvent {
            symbol: field::<Symbol>(&o.symbol)?,
            side: field::<OrderSide>(&o.side)?,
            quantity: o.quantity,
            price,
            order_status: field::<OrderStatus>(&o.status)?,
            event_time: millis(o.trade_time),
        })
    }
}

/// `ACCOUNT_UPDATE` event.
#[derive(Debug, Clone, Deserialize)]
struct WireAccountUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "a")]
    account: WireAccountData,
}

#[derive(Debug, Clone, Deserialize)]
struct WireAccountData {
    /// Reason type
    #[serde(rename = "m")]
    reason: String,
    #[serde(rename = "B", default)]
    balances: Vec<WireAccountBalance>,
    #[serde(rename = "P", default)]
    positions: Vec<WireAccountPosition>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireAccountBalance {
    #[serde(rename = "a")]
    asset: String,
    /// Wallet balance
    #[serde(rename = "wb")]
    wallet_balance: Decimal,
    /// Cross wallet balance
    #[serde(rename = "cw")]
    cross_wallet: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct WireAccountPosition {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "pa")]
    amount: Decimal,
    #[serde(rename = "ep")]
    entry_price: Decimal,
    #[serde(rename = "up", default)]
    unrealized_pnl: Decimal,
    #[serde(rename = "mt")]
    margin_type: String,
    #[serde(rename = "iw", default)]
    isolated_wallet: Decimal,
    #[serde(rename = "ps")]
    position_side: String,
}

impl WireAccountUpdate {
    fn into_event(self) -> Result<AccountUpdate, BinanceWsError> {
        let positions = self
            .account
            .positions
            .into_iter()
            .map(|p| {
                Ok(AccountPosition {
                    symbol: field::<Symbol>(&p.symbol)?,
                    amount: p.amount,
                    entry_price: p.entry_price,
                    mark_price: None,
                    leverage: None,
                    margin_type: field::<MarginType>(&p.margin_type)?,
                    isolated_margin: p.isolated_wallet,
                    position_side: field::<PositionSide>(&p.position_side)?,
                    unrealized_pnl: p.unrealized_pnl,
                })
            })
            .collect::<Result<Vec<_>, BinanceWsError>>()?;

        let balances = self
            .account
            .balances
            .into_iter()
            .map(|b| AssetBalance {
                asset: b.asset,
                wallet_balance: b.wallet_balance,
                available_balance: b.cross_wallet,
            })
            .collect();

        Ok(AccountUpdate {
            reason: UpdateReason::from_wire(&self.account.reason),
            event_time: millis(self.event_time),
            positions,
            balances,
        })
    }
}

/// `ORDER_TRADE_UPDATE` event.
#[derive(Debug, Clone, Deserialize)]
struct WireOrderTradeUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "o")]
    order: WireOrder,
}

#[derive(Debug, Clone, Deserialize)]
struct WireOrder {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c", default)]
    client_order_id: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "o")]
    order_type: String,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "ap", default)]
    avg_price: Decimal,
    #[serde(rename = "sp", default)]
    stop_price: Decimal,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "i")]
    order_id: u64,
    /// Cumulative filled quantity
    #[serde(rename = "z", default)]
    filled_quantity: Decimal,
    #[serde(rename = "R", default)]
    reduce_only: bool,
    #[serde(rename = "cp", default)]
    close_position: bool,
    #[serde(rename = "ps")]
    position_side: String,
    #[serde(rename = "rp", default)]
    realized_profit: Decimal,
}

impl WireOrderTradeUpdate {
    fn into_event(self) -> Result<OrderUpdate, BinanceWsError> {
        let o = self.order;
        Ok(OrderUpdate {
            symbol: field::<Symbol>(&o.symbol)?,
            order_id: o.order_id,
            client_order_id: o.client_order_id,
            order_type: field::<OrderType>(&o.order_type)?,
            status: field::<OrderStatus>(&o.status)?,
            side: field::<OrderSide>(&o.side)?,
            quantity: o.quantity,
            filled_quantity: o.filled_quantity,
            avg_price: o.avg_price,
            stop_price: o.stop_price,
            reduce_only: o.reduce_only,
            close_position: o.close_position,
            realized_profit: o.realized_profit,
            position_side: field::<PositionSide>(&o.position_side)?,
            event_time: millis(self.event_time),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
