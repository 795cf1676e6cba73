//! Binance USDⓈ-M Futures REST Client
//!
//! Provides REST API integration for:
//! - Placing and cancelling futures orders (entries and protective legs)
//! - Position, open-order, balance and position-mode snapshots
//! - Contract filters, top of book, depth and klines (VWAP)
//! - The user-data stream session (listen key)
//!
//! # Authentication
//!
//! Binance uses API key + secret with HMAC SHA256 signatures.
//! All signed requests require:
//! - `X-MBX-APIKEY` header
//! - `signature` query parameter (HMAC SHA256 of query string)
//! - `timestamp` query parameter
//!
//! Listen-key endpoints only need the `X-MBX-APIKEY` header.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};

use cascade_domain::{
    ApiCredentials, AssetBalance, MarginType, OpenOrder, OrderId, OrderSide, OrderStatus, OrderType, Position,
    PositionSide, Symbol, SymbolFilters,
};
use cascade_engine::{sizing, vwap_allows};
use cascade_exec::{
    DepthAnalysis, ExchangePort, ExecError, ExecResult, MarketPort, OrderAck, OrderRequest, OrderValidation,
    UserStreamPort, VwapCheck, VwapPort, VwapSnapshot,
};

// =============================================================================
// Constants
// =============================================================================

/// Futures REST base URL (mainnet)
pub const MAINNET_URL: &str = "https://fapi.binance.com";

/// Futures REST base URL (testnet)
pub const TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Signed request validity window
const RECV_WINDOW_MS: u64 = 5000;

/// Book levels inspected by the depth check
const DEPTH_LIMIT: u32 = 20;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the Binance REST client.
#[derive(Debug, Clone, Error)]
pub enum BinanceRestError {
    /// Failed to build request signature
    #[error("Failed to build signature: {0}")]
    SignatureError(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// API returned error
    #[error("Binance API error: {code} - {msg}")]
    ApiError { code: i64, msg: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<BinanceRestError> for ExecError {
    fn from(e: BinanceRestError) -> Self {
        match e {
            BinanceRestError::ApiError { code, msg } => ExecError::Api { code, msg },
            BinanceRestError::RequestFailed(msg) => ExecError::Transport(msg),
            BinanceRestError::Timeout => ExecError::Timeout(format!("no answer within {}s", REQUEST_TIMEOUT_SECS)),
            BinanceRestError::ParseError(msg) => ExecError::Parse(msg),
            BinanceRestError::SignatureError(msg) | BinanceRestError::InvalidParameter(msg) => {
                ExecError::InvalidParams(msg)
            }
        }
    }
}

type RestResult<T> = Result<T, BinanceRestError>;

/// How a request authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Public,
    ApiKey,
    Signed,
}

// =============================================================================
// Binance Futures Client
// =============================================================================

/// Binance USDⓈ-M futures REST client.
///
/// Contract filters are loaded once from `exchangeInfo` and cached; the
/// last VWAP computed per symbol is kept for [`VwapPort::current_vwap`].
pub struct BinanceFuturesClient {
    client: Client,
    credentials: ApiCredentials,
    base_url: String,
    filters: RwLock<HashMap<Symbol, SymbolFilters>>,
    vwaps: RwLock<HashMap<Symbol, VwapSnapshot>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

impl BinanceFuturesClient {
    /// Client for mainnet
    pub fn new(credentials: ApiCredentials) -> Self {
        Self::with_base_url(credentials, MAINNET_URL)
    }

    /// Client for the futures testnet
    pub fn testnet(credentials: ApiCredentials) -> Self {
        Self::with_base_url(credentials, TESTNET_URL)
    }

    /// Client for an arbitrary base URL
    pub fn with_base_url(credentials: ApiCredentials, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            credentials,
            base_url: base_url.into(),
            filters: RwLock::new(HashMap::new()),
            vwaps: RwLock::new(HashMap::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build query string with signature for signed requests.
    ///
    /// Binance requires:
    /// 1. All parameters in query string
    /// 2. HMAC SHA256 signature of query string
    /// 3. signature and timestamp as query parameters
    fn build_signed_query(&self, mut params: Vec<(&str, String)>) -> RestResult<String> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        // Sort parameters (required by Binance)
        params.sort_by(|a, b| a.0.cmp(b.0));

        let query_string = plain_query(&params);

        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .map_err(|e| BinanceRestError::SignatureError(format!("HMAC error: {}", e)))?;

        mac.update(query_string.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}&signature={}", query_string, signature))
    }

    /// Send one request and return the body of a successful answer.
    async fn send(&self, method: Method, endpoint: &str, params: Vec<(&str, String)>, auth: Auth) -> RestResult<String> {
        let query = match auth {
            Auth::Signed => self.build_signed_query(params)?,
            Auth::Public | Auth::ApiKey => plain_query(&params),
        };
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, query)
        };

        let mut request = self.client.request(method.clone(), &url);
        if auth != Auth::Public {
            request = request.header("X-MBX-APIKEY", &self.credentials.api_key);
        }

        let response = timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), request.send())
            .await
            .map_err(|_| BinanceRestError::Timeout)?
            .map_err(|e| BinanceRestError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| BinanceRestError::ParseError(e.to_string()))?;

        if !status.is_success() {
            // Try to parse Binance error response
            if let Ok(err) = serde_json::from_str::<BinanceErrorResponse>(&body) {
                debug!(%method, endpoint, code = err.code, msg = %err.msg, "Binance rejected request");
                return Err(BinanceRestError::ApiError {
                    code: err.code,
                    msg: err.msg,
                });
            }
            return Err(BinanceRestError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        Ok(body)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, params: Vec<(&str, String)>, auth: Auth) -> RestResult<T> {
        let body = self.send(Method::GET, endpoint, params, auth).await?;
        parse(&body)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Load every contract's filters into the cache.
    ///
    /// # Endpoint
    ///
    /// `GET /fapi/v1/exchangeInfo`
    pub async fn load_exchange_info(&self) -> RestResult<usize> {
        let info: ExchangeInfo = self.get("/fapi/v1/exchangeInfo", vec![], Auth::Public).await?;
        let mut loaded = HashMap::new();
        for entry in info.symbols {
            let Ok(symbol) = Symbol::new(&entry.symbol) else {
                continue;
            };
            loaded.insert(symbol, entry.to_filters());
        }
        let count = loaded.len();
        *write(&self.filters) = loaded;
        info!(symbols = count, "Loaded contract filters");
        Ok(count)
    }

    async fn filters(&self, symbol: &Symbol) -> RestResult<SymbolFilters> {
        if let Some(filters) = read(&self.filters).get(symbol) {
            return Ok(*filters);
        }
        self.load_exchange_info().await?;
        read(&self.filters)
            .get(symbol)
            .copied()
            .ok_or_else(|| BinanceRestError::InvalidParameter(format!("unknown contract {}", symbol)))
    }

    /// Best bid and ask.
    ///
    /// # Endpoint
    ///
    /// `GET /fapi/v1/ticker/bookTicker`
    pub async fn book_ticker(&self, symbol: &Symbol) -> RestResult<(Decimal, Decimal)> {
        let ticker: BookTicker = self
            .get("/fapi/v1/ticker/bookTicker", vec![("symbol", symbol.to_string())], Auth::Public)
            .await?;
        Ok((ticker.bid_price, ticker.ask_price))
    }

    /// Ping the API.
    pub async fn ping(&self) -> RestResult<()> {
        self.send(Method::GET, "/fapi/v1/ping", vec![], Auth::Public).await?;
        Ok(())
    }
}

/// `k=v&k=v` in the given order
fn plain_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse<T: DeserializeOwned>(body: &str) -> RestResult<T> {
    serde_json::from_str(body).map_err(|e| BinanceRestError::ParseError(e.to_string()))
}

fn parse_tag<T: FromStr>(raw: &str) -> RestResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| BinanceRestError::ParseError(e.to_string()))
}

fn millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn wire_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Query parameters for `POST /fapi/v1/order`.
///
/// `reduceOnly` is only sent when true (the exchange rejects it in hedge
/// mode even as `false`).
pub fn order_params(request: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", request.symbol.to_string()),
        ("side", request.side.as_str().to_string()),
        ("type", request.order_type.as_str().to_string()),
        ("quantity", wire_decimal(request.quantity)),
        ("positionSide", request.position_side.as_str().to_string()),
        ("newOrderRespType", "RESULT".to_string()),
    ];
    if let Some(price) = request.price {
        params.push(("price", wire_decimal(price)));
    }
    if let Some(tif) = request.time_in_force {
        params.push(("timeInForce", tif.as_str().to_string()));
    }
    if let Some(stop) = request.stop_price {
        params.push(("stopPrice", wire_decimal(stop)));
    }
    if request.reduce_only {
        params.push(("reduceOnly", "true".to_string()));
    }
    if request.use_mark_price {
        params.push(("workingType", "MARK_PRICE".to_string()));
    }
    if let Some(client_id) = &request.client_order_id {
        params.push(("newClientOrderId", client_id.clone()));
    }
    params
}

// =============================================================================
// Port implementations
// =============================================================================

#[async_trait]
impl ExchangePort for BinanceFuturesClient {
    async fn place_order(&self, request: &OrderRequest) -> ExecResult<OrderAck> {
        let body = self
            .send(Method::POST, "/fapi/v1/order", order_params(request), Auth::Signed)
            .await?;
        let response: OrderResponse = parse(&body)?;
        Ok(response.to_ack()?)
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: OrderId) -> ExecResult<()> {
        let params = vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())];
        self.send(Method::DELETE, "/fapi/v1/order", params, Auth::Signed).await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: u32) -> ExecResult<()> {
        let params = vec![("symbol", symbol.to_string()), ("leverage", leverage.to_string())];
        self.send(Method::POST, "/fapi/v1/leverage", params, Auth::Signed).await?;
        Ok(())
    }

    async fn get_positions(&self) -> ExecResult<Vec<Position>> {
        let risks: Vec<PositionRisk> = self.get("/fapi/v2/positionRisk", vec![], Auth::Signed).await?;
        let mut positions = Vec::new();
        for risk in risks {
            let position = risk.to_position()?;
            if !position.is_flat() {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    async fn get_open_orders(&self, symbol: Option<&Symbol>) -> ExecResult<Vec<OpenOrder>> {
        let params = symbol.map(|s| vec![("symbol", s.to_string())]).unwrap_or_default();
        let orders: Vec<WireOpenOrder> = self.get("/fapi/v1/openOrders", params, Auth::Signed).await?;
        Ok(orders
            .into_iter()
            .map(WireOpenOrder::to_open_order)
            .collect::<RestResult<Vec<_>>>()?)
    }

    async fn get_position_mode(&self) -> ExecResult<bool> {
        let mode: PositionMode = self.get("/fapi/v1/positionSide/dual", vec![], Auth::Signed).await?;
        Ok(mode.dual_side_position)
    }

    async fn get_balance(&self) -> ExecResult<Vec<AssetBalance>> {
        let balances: Vec<WireBalance> = self.get("/fapi/v2/balance", vec![], Auth::Signed).await?;
        Ok(balances
            .into_iter()
            .filter(|b| b.balance != Decimal::ZERO)
            .map(|b| AssetBalance {
                asset: b.asset,
                wallet_balance: b.balance,
                available_balance: b.available_balance,
            })
            .collect())
    }
}

#[async_trait]
impl MarketPort for BinanceFuturesClient {
    async fn symbol_filters(&self, symbol: &Symbol) -> ExecResult<SymbolFilters> {
        Ok(self.filters(symbol).await?)
    }

    async fn format_price(&self, symbol: &Symbol, price: Decimal) -> ExecResult<Decimal> {
        Ok(sizing::round_to_tick(price, self.filters(symbol).await?.tick_size))
    }

    async fn format_quantity(&self, symbol: &Symbol, quantity: Decimal) -> ExecResult<Decimal> {
        Ok(sizing::round_to_step(quantity, self.filters(symbol).await?.step_size))
    }

    async fn optimal_price(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        offset_bps: Decimal,
        post_only: bool,
    ) -> ExecResult<Decimal> {
        let tick = self.filters(symbol).await?.tick_size;
        let (bid, ask) = self.book_ticker(symbol).await?;
        Ok(sizing::quote_price(side, bid, ask, offset_bps, post_only, tick))
    }

    async fn analyze_depth(&self, symbol: &Symbol, side: OrderSide, target_notional: Decimal) -> ExecResult<DepthAnalysis> {
        let params = vec![("symbol", symbol.to_string()), ("limit", DEPTH_LIMIT.to_string())];
        let book: DepthSnapshot = self.get("/fapi/v1/depth", params, Auth::Public).await?;
        let levels: Vec<(Decimal, Decimal)> = match side {
            OrderSide::Buy => book.asks,
            OrderSide::Sell => book.bids,
        }
        .into_iter()
        .map(|[price, qty]| (price, qty))
        .collect();

        let (available_notional, projected_price) = sizing::walk_book(&levels, target_notional);
        Ok(DepthAnalysis {
            liquidity_ok: projected_price.is_some(),
            available_notional,
            projected_price,
        })
    }

    async fn validate_order_params(
        &self,
        symbol: &Symbol,
        _side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> ExecResult<OrderValidation> {
        let filters = self.filters(symbol).await?;
        Ok(match sizing::validate_limit_order(price, quantity, &filters) {
            Ok((p, q)) if p == price && q == quantity => OrderValidation::ok(),
            Ok((p, q)) => OrderValidation {
                valid: true,
                adjusted_price: Some(p),
                adjusted_quantity: Some(q),
                error: None,
            },
            Err(reason) => OrderValidation::invalid(reason),
        })
    }
}

#[async_trait]
impl VwapPort for BinanceFuturesClient {
    async fn check_vwap_filter(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        price: Decimal,
        timeframe: &str,
        lookback: u32,
    ) -> ExecResult<VwapCheck> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("interval", timeframe.to_string()),
            ("limit", lookback.to_string()),
        ];
        let klines: Vec<Vec<serde_json::Value>> = self.get("/fapi/v1/klines", params, Auth::Public).await?;
        let samples = kline_samples(&klines)?;
        let vwap = sizing::vwap(&samples)
            .ok_or_else(|| ExecError::InvalidParams(format!("no traded volume for {}", symbol)))?;

        write(&self.vwaps).insert(
            symbol.clone(),
            VwapSnapshot {
                vwap,
                timestamp: Utc::now(),
            },
        );

        let allowed = vwap_allows(side, price, vwap);
        let reason = if allowed {
            format!("{} at {} on the right side of VWAP {}", side, price, vwap)
        } else {
            format!("{} at {} blocked by VWAP {}", side, price, vwap)
        };
        Ok(VwapCheck { allowed, vwap, reason })
    }

    fn current_vwap(&self, symbol: &Symbol) -> Option<VwapSnapshot> {
        read(&self.vwaps).get(symbol).copied()
    }
}

#[async_trait]
impl UserStreamPort for BinanceFuturesClient {
    async fn create_listen_key(&self) -> ExecResult<String> {
        let body = self.send(Method::POST, "/fapi/v1/listenKey", vec![], Auth::ApiKey).await?;
        let key: ListenKey = parse(&body)?;
        Ok(key.listen_key)
    }

    async fn keepalive_listen_key(&self, _listen_key: &str) -> ExecResult<()> {
        self.send(Method::PUT, "/fapi/v1/listenKey", vec![], Auth::ApiKey).await?;
        Ok(())
    }

    async fn close_listen_key(&self, _listen_key: &str) -> ExecResult<()> {
        self.send(Method::DELETE, "/fapi/v1/listenKey", vec![], Auth::ApiKey).await?;
        Ok(())
    }
}

/// `(typical price, volume)` per kline: `[openTime, open, high, low, close, volume, ...]`
fn kline_samples(klines: &[Vec<serde_json::Value>]) -> RestResult<Vec<(Decimal, Decimal)>> {
    let field = |row: &[serde_json::Value], index: usize| -> RestResult<Decimal> {
        let raw = row
            .get(index)
            .and_then(|v| v.as_str())
            .ok_or_else(|| BinanceRestError::ParseError(format!("kline field {} missing", index)))?;
        parse_tag::<Decimal>(raw)
    };

    klines
        .iter()
        .map(|row| {
            let high = field(row, 2)?;
            let low = field(row, 3)?;
            let close = field(row, 4)?;
            let volume = field(row, 5)?;
            Ok(((high + low + close) / Decimal::from(3), volume))
        })
        .collect()
}

// =============================================================================
// Binance Types (from API responses)
// =============================================================================

/// Binance error response.
#[derive(Debug, Deserialize)]
struct BinanceErrorResponse {
    code: i64,
    msg: String,
}

/// Answer to `POST /fapi/v1/order`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    status: String,
    #[serde(default)]
    executed_qty: Decimal,
    #[serde(default)]
    avg_price: Decimal,
}

impl OrderResponse {
    fn to_ack(&self) -> RestResult<OrderAck> {
        Ok(OrderAck {
            order_id: self.order_id,
            status: parse_tag::<OrderStatus>(&self.status)?,
            executed_qty: self.executed_qty,
            avg_price: self.avg_price,
        })
    }
}

/// Entry of `GET /fapi/v2/positionRisk`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: Decimal,
    entry_price: Decimal,
    mark_price: Decimal,
    un_realized_profit: Decimal,
    leverage: String,
    margin_type: String,
    #[serde(default)]
    isolated_margin: Decimal,
    position_side: String,
}

impl PositionRisk {
    fn to_position(&self) -> RestResult<Position> {
        Ok(Position {
            symbol: Symbol::new(&self.symbol).map_err(|e| BinanceRestError::ParseError(e.to_string()))?,
            amount: self.position_amt,
            entry_price: self.entry_price,
            mark_price: self.mark_price,
            leverage: parse_tag::<u32>(&self.leverage)?,
            margin_type: parse_tag::<MarginType>(&self.margin_type)?,
            isolated_margin: self.isolated_margin,
            position_side: parse_tag::<PositionSide>(&self.position_side)?,
            unrealized_pnl: self.un_realized_profit,
        })
    }
}

/// Entry of `GET /fapi/v1/openOrders`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOpenOrder {
    order_id: u64,
    symbol: String,
    status: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    price: Decimal,
    #[serde(default)]
    stop_price: Decimal,
    orig_qty: Decimal,
    executed_qty: Decimal,
    #[serde(default)]
    reduce_only: bool,
    #[serde(default)]
    close_position: bool,
    position_side: String,
    time: i64,
}

impl WireOpenOrder {
    fn to_open_order(self) -> RestResult<OpenOrder> {
        Ok(OpenOrder {
            order_id: self.order_id,
            symbol: Symbol::new(&self.symbol).map_err(|e| BinanceRestError::ParseError(e.to_string()))?,
            side: parse_tag::<OrderSide>(&self.side)?,
            order_type: parse_tag::<OrderType>(&self.order_type)?,
            status: parse_tag::<OrderStatus>(&self.status)?,
            price: self.price,
            stop_price: self.stop_price,
            orig_qty: self.orig_qty,
            executed_qty: self.executed_qty,
            reduce_only: self.reduce_only,
            close_position: self.close_position,
            position_side: parse_tag::<PositionSide>(&self.position_side)?,
            time: millis(self.time),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionMode {
    dual_side_position: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBalance {
    asset: String,
    balance: Decimal,
    available_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
struct ExchangeSymbol {
    symbol: String,
    filters: Vec<WireFilter>,
}

impl ExchangeSymbol {
    fn to_filters(&self) -> SymbolFilters {
        let mut filters = SymbolFilters {
            tick_size: Decimal::ZERO,
            step_size: Decimal::ZERO,
            min_qty: Decimal::ZERO,
            min_notional: Decimal::ZERO,
        };
        for filter in &self.filters {
            match filter {
                WireFilter::Price { tick_size } => filters.tick_size = *tick_size,
                WireFilter::LotSize { step_size, min_qty } => {
                    filters.step_size = *step_size;
                    filters.min_qty = *min_qty;
                }
                WireFilter::MinNotional { notional } => filters.min_notional = *notional,
                WireFilter::Other => {}
            }
        }
        filters
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum WireFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: Decimal },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: Decimal, min_qty: Decimal },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: Decimal },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: Decimal,
    ask_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct DepthSnapshot {
    bids: Vec<[Decimal; 2]>,
    asks: Vec<[Decimal; 2]>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKey {
    listen_key: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_exec::TimeInForce;
    use rust_decimal_macros::dec;

    fn client() -> BinanceFuturesClient {
        BinanceFuturesClient::new(ApiCredentials::new("test_key", "test_secret"))
    }

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT").unwrap()
    }

    #[test]
    fn test_build_signed_query() {
        let query = client().build_signed_query(vec![("symbol", "BTCUSDT".to_string())]).unwrap();

        assert!(query.contains("timestamp="));
        assert!(query.contains("recvWindow=5000"));
        assert!(query.contains("symbol=BTCUSDT"));
        let signature = query.rsplit("signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_build_signed_query_sorts_params() {
        let params = vec![("symbol", "BTCUSDT".to_string()), ("side", "SELL".to_string())];
        let query = client().build_signed_query(params).unwrap();

        let side_idx = query.find("side=").unwrap();
        let symbol_idx = query.find("symbol=").unwrap();
        assert!(side_idx < symbol_idx);
    }

    #[test]
    fn test_protective_order_params() {
        let request = OrderRequest {
            symbol: btc(),
            side: OrderSide::Sell,
            order_type: OrderType::StopMarket,
            quantity: dec!(0.0050),
            price: None,
            stop_price: Some(dec!(49000.0)),
            position_side: PositionSide::Both,
            reduce_only: true,
            time_in_force: None,
            use_mark_price: true,
            client_order_id: None,
        };
        let params: HashMap<_, _> = order_params(&request).into_iter().collect();

        assert_eq!(params["type"], "STOP_MARKET");
        assert_eq!(params["quantity"], "0.005");
        assert_eq!(params["stopPrice"], "49000");
        assert_eq!(params["reduceOnly"], "true");
        assert_eq!(params["workingType"], "MARK_PRICE");
        assert!(!params.contains_key("price"));
    }

    #[test]
    fn test_hedge_limit_params_omit_reduce_only() {
        let request = OrderRequest::limit(btc(), OrderSide::Buy, dec!(0.01), dec!(50000), PositionSide::Long, true);
        let params: HashMap<_, _> = order_params(&request).into_iter().collect();

        assert_eq!(params["positionSide"], "LONG");
        assert_eq!(params["timeInForce"], TimeInForce::Gtx.as_str());
        assert_eq!(params["price"], "50000");
        assert!(!params.contains_key("reduceOnly"));
    }

    #[test]
    fn test_position_risk_parse() {
        let json = r#"[{
            "symbol": "BTCUSDT", "positionAmt": "-0.010", "entryPrice": "50000.0",
            "markPrice": "49800.5", "unRealizedProfit": "1.99", "liquidationPrice": "0",
            "leverage": "10", "maxNotionalValue": "1000000", "marginType": "isolated",
            "isolatedMargin": "50.12", "isAutoAddMargin": "false", "positionSide": "SHORT",
            "notional": "-498.0", "isolatedWallet": "50", "updateTime": 1700000000000
        }]"#;
        let risks: Vec<PositionRisk> = parse(json).unwrap();
        let position = risks[0].to_position().unwrap();

        assert_eq!(position.amount, dec!(-0.010));
        assert_eq!(position.leverage, 10);
        assert_eq!(position.margin_type, MarginType::Isolated);
        assert_eq!(position.position_side, PositionSide::Short);
        assert_eq!(position.key().unwrap().to_string(), "BTCUSDT_SHORT");
    }

    #[test]
    fn test_open_order_parse() {
        let json = r#"{
            "orderId": 8389765, "symbol": "BTCUSDT", "status": "NEW", "clientOrderId": "abc",
            "price": "0", "avgPrice": "0", "origQty": "0.005", "executedQty": "0",
            "type": "TAKE_PROFIT_MARKET", "side": "SELL", "stopPrice": "51500",
            "reduceOnly": true, "closePosition": false, "positionSide": "BOTH",
            "workingType": "MARK_PRICE", "time": 1700000000000, "updateTime": 1700000000000
        }"#;
        let order = parse::<WireOpenOrder>(json).unwrap().to_open_order().unwrap();

        assert_eq!(order.order_type, OrderType::TakeProfitMarket);
        assert_eq!(order.orig_qty, dec!(0.005));
        assert!(order.is_closing());
        assert_eq!(order.protected_key().to_string(), "BTCUSDT_LONG");
    }

    #[test]
    fn test_exchange_info_filters() {
        let json = r#"{"symbols": [{
            "symbol": "BTCUSDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.10", "minPrice": "556.80", "maxPrice": "4529764"},
                {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001", "maxQty": "1000"},
                {"filterType": "MARKET_LOT_SIZE", "stepSize": "0.001", "minQty": "0.001", "maxQty": "120"},
                {"filterType": "MIN_NOTIONAL", "notional": "100"}
            ]
        }]}"#;
        let info: ExchangeInfo = parse(json).unwrap();
        let filters = info.symbols[0].to_filters();

        assert_eq!(filters.tick_size, dec!(0.1));
        assert_eq!(filters.step_size, dec!(0.001));
        assert_eq!(filters.min_notional, dec!(100));
    }

    #[test]
    fn test_kline_samples() {
        let json = r#"[
            [1700000000000, "100", "110", "90", "100", "2", 1700000059999, "200", 10, "1", "100", "0"],
            [1700000060000, "100", "130", "110", "120", "2", 1700000119999, "240", 10, "1", "120", "0"]
        ]"#;
        let klines: Vec<Vec<serde_json::Value>> = parse(json).unwrap();
        let samples = kline_samples(&klines).unwrap();

        assert_eq!(samples[0], (dec!(100), dec!(2)));
        assert_eq!(sizing::vwap(&samples), Some(dec!(110)));
    }

    #[test]
    fn test_error_conversion() {
        let api: ExecError = BinanceRestError::ApiError {
            code: -2011,
            msg: "Unknown order sent.".to_string(),
        }
        .into();
        assert!(api.is_order_gone());

        let timeout: ExecError = BinanceRestError::Timeout.into();
        assert!(timeout.is_transient());
    }

    #[test]
    fn test_order_response_ack() {
        let json = r#"{"orderId": 42, "symbol": "BTCUSDT", "status": "FILLED", "executedQty": "0.005", "avgPrice": "50010.2"}"#;
        let ack = parse::<OrderResponse>(json).unwrap().to_ack().unwrap();
        assert_eq!(ack.order_id, 42);
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.avg_price, dec!(50010.2));
    }
}
