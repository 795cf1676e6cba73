//! Stub implementations for testing.
//!
//! These implementations simulate exchange, market metadata and VWAP
//! behavior in memory, without making real API calls.
//!
//! `StubExchange` behaves like a small futures account:
//! - MARKET orders fill immediately and move positions
//! - every other order type rests in the open-order book
//! - the position-side parameter is checked against the account mode
//!   (`-4061`), and `reduceOnly` is refused in hedge mode (`-1106`)
//! - cancelling an unknown order answers `-2011`

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use cascade_domain::{
    AssetBalance, MarginType, Notification, OpenOrder, OrderId, OrderSide, OrderStatus, OrderType, Position, PositionSide,
    Symbol, SymbolFilters, QUANTITY_TOLERANCE,
};
use cascade_engine::sizing;

use crate::error::{ExecError, ExecResult, CODE_POSITION_SIDE_MISMATCH, CODE_UNKNOWN_ORDER};
use crate::ports::{
    DepthAnalysis, ExchangePort, MarketPort, Notifier, OrderAck, OrderRequest, OrderValidation, UserStreamPort,
    VwapCheck, VwapPort, VwapSnapshot,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

// =============================================================================
// Stub Exchange
// =============================================================================

#[derive(Debug, Default)]
struct ExchangeState {
    positions: Vec<Position>,
    open_orders: Vec<OpenOrder>,
    placed: Vec<OrderRequest>,
    cancelled: Vec<OrderId>,
    place_attempts: usize,
    cancel_attempts: usize,
    leverage_calls: Vec<(Symbol, u32)>,
    place_failures: VecDeque<ExecError>,
    cancel_failures: VecDeque<ExecError>,
    leverage_failures: VecDeque<ExecError>,
    position_fetches: usize,
    hedge_mode: bool,
    next_id: OrderId,
    prices: HashMap<Symbol, Decimal>,
    balances: Vec<AssetBalance>,
    listen_keys: Vec<String>,
    closed_listen_keys: Vec<String>,
    keepalives: usize,
}

/// In-memory futures account for tests.
#[derive(Debug)]
pub struct StubExchange {
    state: Mutex<ExchangeState>,
}

impl StubExchange {
    /// Empty one-way account
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExchangeState {
                next_id: 1000,
                balances: vec![AssetBalance {
                    asset: "USDT".to_string(),
                    wallet_balance: Decimal::from(1000),
                    available_balance: Decimal::from(1000),
                }],
                ..ExchangeState::default()
            }),
        }
    }

    /// Switch the account's position mode
    pub fn set_hedge_mode(&self, hedge: bool) {
        guard(&self.state).hedge_mode = hedge;
    }

    /// Fill price for MARKET orders on a symbol
    pub fn set_price(&self, symbol: &Symbol, price: Decimal) {
        guard(&self.state).prices.insert(symbol.clone(), price);
    }

    /// Replace every position
    pub fn set_positions(&self, positions: Vec<Position>) {
        guard(&self.state).positions = positions;
    }

    /// Insert or replace one position (matched by symbol and position side)
    pub fn upsert_position(&self, position: Position) {
        let mut state = guard(&self.state);
        state
            .positions
            .retain(|p| !(p.symbol == position.symbol && p.position_side == position.position_side));
        if !position.is_flat() {
            state.positions.push(position);
        }
    }

    /// Current positions
    pub fn positions_snapshot(&self) -> Vec<Position> {
        guard(&self.state).positions.clone()
    }

    /// Put an order straight into the book; returns its id
    pub fn add_open_order(&self, mut order: OpenOrder) -> OrderId {
        let mut state = guard(&self.state);
        if order.order_id == 0 {
            state.next_id += 1;
            order.order_id = state.next_id;
        }
        let id = order.order_id;
        state.open_orders.push(order);
        id
    }

    /// Seed a one-way order placed `age_secs` ago; returns its id
    pub fn seed_order(
        &self,
        symbol: Symbol,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        reduce_only: bool,
        age_secs: i64,
    ) -> OrderId {
        self.add_open_order(OpenOrder {
            order_id: 0,
            symbol,
            side,
            order_type,
            status: OrderStatus::New,
            price: Decimal::ZERO,
            stop_price: Decimal::ZERO,
            orig_qty: quantity,
            executed_qty: Decimal::ZERO,
            reduce_only,
            close_position: false,
            position_side: PositionSide::Both,
            time: Utc::now() - Duration::seconds(age_secs),
        })
    }

    /// Drop an order from the book as if it filled or expired elsewhere
    pub fn remove_open_order(&self, order_id: OrderId) -> Option<OpenOrder> {
        let mut state = guard(&self.state);
        let index = state.open_orders.iter().position(|o| o.order_id == order_id)?;
        Some(state.open_orders.remove(index))
    }

    /// Resting orders
    pub fn open_orders_snapshot(&self) -> Vec<OpenOrder> {
        guard(&self.state).open_orders.clone()
    }

    /// Every accepted submission, in order
    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        guard(&self.state).placed.clone()
    }

    /// Ids cancelled successfully
    pub fn cancelled_orders(&self) -> Vec<OrderId> {
        guard(&self.state).cancelled.clone()
    }

    /// Place calls including failed ones
    pub fn place_attempts(&self) -> usize {
        guard(&self.state).place_attempts
    }

    /// Cancel calls including failed ones
    pub fn cancel_attempts(&self) -> usize {
        guard(&self.state).cancel_attempts
    }

    /// `(symbol, leverage)` per successful leverage call
    pub fn leverage_calls(&self) -> Vec<(Symbol, u32)> {
        guard(&self.state).leverage_calls.clone()
    }

    /// Number of position snapshot requests served
    pub fn position_fetches(&self) -> usize {
        guard(&self.state).position_fetches
    }

    /// Queue errors for the next placements (before mode checks)
    pub fn fail_next_places(&self, errors: Vec<ExecError>) {
        guard(&self.state).place_failures.extend(errors);
    }

    /// Queue errors for the next cancellations
    pub fn fail_next_cancels(&self, errors: Vec<ExecError>) {
        guard(&self.state).cancel_failures.extend(errors);
    }

    /// Queue errors for the next leverage calls
    pub fn fail_next_leverage(&self, errors: Vec<ExecError>) {
        guard(&self.state).leverage_failures.extend(errors);
    }

    /// Listen keys created so far
    pub fn listen_keys(&self) -> Vec<String> {
        guard(&self.state).listen_keys.clone()
    }

    /// Listen keys closed so far
    pub fn closed_listen_keys(&self) -> Vec<String> {
        guard(&self.state).closed_listen_keys.clone()
    }

    /// Keepalive calls served
    pub fn keepalives(&self) -> usize {
        guard(&self.state).keepalives
    }
}

impl Default for StubExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeState {
    fn check_position_side(&self, request: &OrderRequest) -> ExecResult<()> {
        let matches_mode = match request.position_side {
            PositionSide::Both => !self.hedge_mode,
            PositionSide::Long | PositionSide::Short => self.hedge_mode,
        };
        if !matches_mode {
            return Err(ExecError::Api {
                code: CODE_POSITION_SIDE_MISMATCH,
                msg: "Order's position side does not match user's setting.".to_string(),
            });
        }
        if self.hedge_mode && request.reduce_only {
            return Err(ExecError::Api {
                code: -1106,
                msg: "Parameter 'reduceonly' sent when not required.".to_string(),
            });
        }
        Ok(())
    }

    fn fill_price(&self, request: &OrderRequest) -> Decimal {
        self.prices
            .get(&request.symbol)
            .copied()
            .or(request.price)
            .unwrap_or_default()
    }

    fn leverage_for(&self, symbol: &Symbol) -> u32 {
        self.leverage_calls
            .iter()
            .rev()
            .find(|(s, _)| s == symbol)
            .map(|(_, l)| *l)
            .unwrap_or(1)
    }

    /// Apply an immediate fill to the matching position
    fn apply_fill(&mut self, request: &OrderRequest, price: Decimal) {
        let signed = match request.side {
            OrderSide::Buy => request.quantity,
            OrderSide::Sell => -request.quantity,
        };
        let leverage = self.leverage_for(&request.symbol);

        let existing = self
            .positions
            .iter()
            .position(|p| p.symbol == request.symbol && p.position_side == request.position_side);

        match existing {
            Some(index) => {
                let position = &mut self.positions[index];
                let new_amount = position.amount + signed;
                if new_amount.abs() < QUANTITY_TOLERANCE {
                    self.positions.remove(index);
                    return;
                }
                let growing = new_amount.abs() > position.amount.abs() && new_amount.is_sign_negative() == position.amount.is_sign_negative();
                if growing {
                    let cost = position.amount.abs() * position.entry_price + request.quantity * price;
                    position.entry_price = cost / new_amount.abs();
                }
                position.amount = new_amount;
                position.mark_price = price;
            }
            None if !request.reduce_only => self.positions.push(Position {
                symbol: request.symbol.clone(),
                amount: signed,
                entry_price: price,
                mark_price: price,
                leverage,
                margin_type: MarginType::Cross,
                isolated_margin: Decimal::ZERO,
                position_side: request.position_side,
                unrealized_pnl: Decimal::ZERO,
            }),
            None => {}
        }
    }
}

#[async_trait]
impl ExchangePort for StubExchange {
    async fn place_order(&self, request: &OrderRequest) -> ExecResult<OrderAck> {
        let mut state = guard(&self.state);
        state.place_attempts += 1;
        if let Some(error) = state.place_failures.pop_front() {
            return Err(error);
        }
        state.check_position_side(request)?;

        state.next_id += 1;
        let order_id = state.next_id;
        state.placed.push(request.clone());

        if request.order_type == OrderType::Market {
            let price = state.fill_price(request);
            state.apply_fill(request, price);
            tracing::debug!(order_id, symbol = %request.symbol, "Stub: market order filled");
            return Ok(OrderAck {
                order_id,
                status: OrderStatus::Filled,
                executed_qty: request.quantity,
                avg_price: price,
            });
        }

        state.open_orders.push(OpenOrder {
            order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: OrderStatus::New,
            price: request.price.unwrap_or_default(),
            stop_price: request.stop_price.unwrap_or_default(),
            orig_qty: request.quantity,
            executed_qty: Decimal::ZERO,
            reduce_only: request.reduce_only,
            close_position: false,
            position_side: request.position_side,
            time: Utc::now(),
        });

        Ok(OrderAck {
            order_id,
            status: OrderStatus::New,
            executed_qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
        })
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: OrderId) -> ExecResult<()> {
        let mut state = guard(&self.state);
        state.cancel_attempts += 1;
        if let Some(error) = state.cancel_failures.pop_front() {
            return Err(error);
        }

        let index = state
            .open_orders
            .iter()
            .position(|o| o.order_id == order_id && o.symbol == *symbol)
            .ok_or_else(|| ExecError::Api {
                code: CODE_UNKNOWN_ORDER,
                msg: "Unknown order sent.".to_string(),
            })?;
        state.open_orders.remove(index);
        state.cancelled.push(order_id);
        tracing::debug!(order_id, "Stub: order cancelled");
        Ok(())
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: u32) -> ExecResult<()> {
        let mut state = guard(&self.state);
        if let Some(error) = state.leverage_failures.pop_front() {
            return Err(error);
        }
        state.leverage_calls.push((symbol.clone(), leverage));
        Ok(())
    }

    async fn get_positions(&self) -> ExecResult<Vec<Position>> {
        let mut state = guard(&self.state);
        state.position_fetches += 1;
        Ok(state.positions.iter().filter(|p| !p.is_flat()).cloned().collect())
    }

    async fn get_open_orders(&self, symbol: Option<&Symbol>) -> ExecResult<Vec<OpenOrder>> {
        let state = guard(&self.state);
        Ok(state
            .open_orders
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == *s))
            .cloned()
            .collect())
    }

    async fn get_position_mode(&self) -> ExecResult<bool> {
        Ok(guard(&self.state).hedge_mode)
    }

    async fn get_balance(&self) -> ExecResult<Vec<AssetBalance>> {
        Ok(guard(&self.state).balances.clone())
    }
}

#[async_trait]
impl UserStreamPort for StubExchange {
    async fn create_listen_key(&self) -> ExecResult<String> {
        let mut state = guard(&self.state);
        let key = format!("stub-listen-key-{}", state.listen_keys.len() + 1);
        state.listen_keys.push(key.clone());
        Ok(key)
    }

    async fn keepalive_listen_key(&self, _listen_key: &str) -> ExecResult<()> {
        guard(&self.state).keepalives += 1;
        Ok(())
    }

    async fn close_listen_key(&self, listen_key: &str) -> ExecResult<()> {
        guard(&self.state).closed_listen_keys.push(listen_key.to_string());
        Ok(())
    }
}

// =============================================================================
// Stub Market
// =============================================================================

#[derive(Debug)]
struct MarketState {
    default_filters: SymbolFilters,
    filters: HashMap<Symbol, SymbolFilters>,
    default_book: (Decimal, Decimal),
    books: HashMap<Symbol, (Decimal, Decimal)>,
    liquidity: HashMap<Symbol, Decimal>,
    quote_failures: VecDeque<ExecError>,
    invalid: HashMap<Symbol, String>,
    yield_on_quote: bool,
}

/// Market metadata and pricing for tests.
///
/// Defaults: tick 0.1, step 0.001, min qty 0.001, min notional 5, top of
/// book 50000 / 50000.1, unlimited depth.
#[derive(Debug)]
pub struct StubMarket {
    state: Mutex<MarketState>,
}

impl StubMarket {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MarketState {
                default_filters: SymbolFilters {
                    tick_size: Decimal::new(1, 1),
                    step_size: Decimal::new(1, 3),
                    min_qty: Decimal::new(1, 3),
                    min_notional: Decimal::from(5),
                },
                filters: HashMap::new(),
                default_book: (Decimal::from(50000), Decimal::new(500001, 1)),
                books: HashMap::new(),
                liquidity: HashMap::new(),
                quote_failures: VecDeque::new(),
                invalid: HashMap::new(),
                yield_on_quote: false,
            }),
        }
    }

    /// Filters for one symbol
    pub fn set_filters(&self, symbol: &Symbol, filters: SymbolFilters) {
        guard(&self.state).filters.insert(symbol.clone(), filters);
    }

    /// Suspend once inside every price quote, like a real REST round trip
    pub fn set_yield_on_quote(&self, enabled: bool) {
        guard(&self.state).yield_on_quote = enabled;
    }

    /// Best bid and ask for one symbol
    pub fn set_book(&self, symbol: &Symbol, bid: Decimal, ask: Decimal) {
        guard(&self.state).books.insert(symbol.clone(), (bid, ask));
    }

    /// Cap the notional the book can absorb
    pub fn set_liquidity(&self, symbol: &Symbol, available_notional: Decimal) {
        guard(&self.state).liquidity.insert(symbol.clone(), available_notional);
    }

    /// Make the next price quotes fail
    pub fn fail_next_quotes(&self, errors: Vec<ExecError>) {
        guard(&self.state).quote_failures.extend(errors);
    }

    /// Force LIMIT validation to fail for a symbol
    pub fn reject_validation(&self, symbol: &Symbol, reason: &str) {
        guard(&self.state).invalid.insert(symbol.clone(), reason.to_string());
    }

    fn filters_for(&self, symbol: &Symbol) -> SymbolFilters {
        let state = guard(&self.state);
        state.filters.get(symbol).copied().unwrap_or(state.default_filters)
    }
}

impl Default for StubMarket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketPort for StubMarket {
    async fn symbol_filters(&self, symbol: &Symbol) -> ExecResult<SymbolFilters> {
        Ok(self.filters_for(symbol))
    }

    async fn format_price(&self, symbol: &Symbol, price: Decimal) -> ExecResult<Decimal> {
        Ok(sizing::round_to_tick(price, self.filters_for(symbol).tick_size))
    }

    async fn format_quantity(&self, symbol: &Symbol, quantity: Decimal) -> ExecResult<Decimal> {
        Ok(sizing::round_to_step(quantity, self.filters_for(symbol).step_size))
    }

    async fn optimal_price(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        offset_bps: Decimal,
        post_only: bool,
    ) -> ExecResult<Decimal> {
        let suspend = guard(&self.state).yield_on_quote;
        if suspend {
            tokio::task::yield_now().await;
        }
        let tick = self.filters_for(symbol).tick_size;
        let mut state = guard(&self.state);
        if let Some(error) = state.quote_failures.pop_front() {
            return Err(error);
        }
        let (bid, ask) = state.books.get(symbol).copied().unwrap_or(state.default_book);
        Ok(sizing::quote_price(side, bid, ask, offset_bps, post_only, tick))
    }

    async fn analyze_depth(&self, symbol: &Symbol, side: OrderSide, target_notional: Decimal) -> ExecResult<DepthAnalysis> {
        let state = guard(&self.state);
        let (bid, ask) = state.books.get(symbol).copied().unwrap_or(state.default_book);
        let touch = match side {
            OrderSide::Buy => ask,
            OrderSide::Sell => bid,
        };
        Ok(match state.liquidity.get(symbol) {
            Some(available) => DepthAnalysis {
                liquidity_ok: *available >= target_notional,
                available_notional: *available,
                projected_price: (*available >= target_notional).then_some(touch),
            },
            None => DepthAnalysis {
                liquidity_ok: true,
                available_notional: target_notional,
                projected_price: Some(touch),
            },
        })
    }

    async fn validate_order_params(
        &self,
        symbol: &Symbol,
        _side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> ExecResult<OrderValidation> {
        if let Some(reason) = guard(&self.state).invalid.get(symbol) {
            return Ok(OrderValidation::invalid(reason.clone()));
        }
        Ok(match sizing::validate_limit_order(price, quantity, &self.filters_for(symbol)) {
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

// =============================================================================
// Stub VWAP
// =============================================================================

/// VWAP source with fixed per-symbol values.
#[derive(Debug, Default)]
pub struct StubVwap {
    values: Mutex<HashMap<Symbol, VwapSnapshot>>,
    fail: Mutex<bool>,
    fetches: Mutex<usize>,
}

impl StubVwap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a VWAP observed at `timestamp`
    pub fn set_vwap(&self, symbol: &Symbol, vwap: Decimal, timestamp: DateTime<Utc>) {
        guard(&self.values).insert(symbol.clone(), VwapSnapshot { vwap, timestamp });
    }

    /// Make synchronous checks fail
    pub fn set_failing(&self, fail: bool) {
        *guard(&self.fail) = fail;
    }

    /// Synchronous checks served
    pub fn fetches(&self) -> usize {
        *guard(&self.fetches)
    }
}

#[async_trait]
impl VwapPort for StubVwap {
    async fn check_vwap_filter(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        price: Decimal,
        _timeframe: &str,
        _lookback: u32,
    ) -> ExecResult<VwapCheck> {
        *guard(&self.fetches) += 1;
        if *guard(&self.fail) {
            return Err(ExecError::Transport("vwap source unavailable".to_string()));
        }
        let vwap = guard(&self.values)
            .get(symbol)
            .map(|s| s.vwap)
            .ok_or_else(|| ExecError::InvalidParams(format!("no VWAP for {}", symbol)))?;
        let allowed = cascade_engine::vwap_allows(side, price, vwap);
        Ok(VwapCheck {
            allowed,
            vwap,
            reason: format!("price {} vs VWAP {}", price, vwap),
        })
    }

    fn current_vwap(&self, symbol: &Symbol) -> Option<VwapSnapshot> {
        guard(&self.values).get(symbol).copied()
    }
}

// =============================================================================
// Recording notifier
// =============================================================================

/// Notifier that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything notified so far
    pub fn notifications(&self) -> Vec<Notification> {
        guard(&self.seen).clone()
    }

    /// `Notification::kind` of everything notified so far
    pub fn kinds(&self) -> Vec<&'static str> {
        guard(&self.seen).iter().map(|n| n.kind()).collect()
    }

    /// How many notifications of one kind were seen
    pub fn count(&self, kind: &str) -> usize {
        guard(&self.seen).iter().filter(|n| n.kind() == kind).count()
    }

    pub fn clear(&self) {
        guard(&self.seen).clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        guard(&self.seen).push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT").unwrap()
    }

    #[tokio::test]
    async fn test_market_order_opens_and_closes_position() {
        let exchange = StubExchange::new();
        exchange.set_price(&btc(), dec!(50000));

        exchange
            .place_order(&OrderRequest::market(btc(), OrderSide::Buy, dec!(0.005), PositionSide::Both))
            .await
            .unwrap();
        let positions = exchange.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].amount, dec!(0.005));

        let mut close = OrderRequest::market(btc(), OrderSide::Sell, dec!(0.005), PositionSide::Both);
        close.reduce_only = true;
        exchange.place_order(&close).await.unwrap();
        assert!(exchange.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_adding_averages_entry_and_reducing_keeps_it() {
        let exchange = StubExchange::new();
        exchange.set_price(&btc(), dec!(50000));
        let buy = OrderRequest::market(btc(), OrderSide::Buy, dec!(0.005), PositionSide::Both);
        exchange.place_order(&buy).await.unwrap();

        exchange.set_price(&btc(), dec!(51000));
        exchange.place_order(&buy).await.unwrap();
        let positions = exchange.get_positions().await.unwrap();
        assert_eq!(positions[0].amount, dec!(0.01));
        assert_eq!(positions[0].entry_price, dec!(50500));

        let mut reduce = OrderRequest::market(btc(), OrderSide::Sell, dec!(0.004), PositionSide::Both);
        reduce.reduce_only = true;
        exchange.place_order(&reduce).await.unwrap();
        let positions = exchange.get_positions().await.unwrap();
        assert_eq!(positions[0].amount, dec!(0.006));
        assert_eq!(positions[0].entry_price, dec!(50500));
    }

    #[tokio::test]
    async fn test_position_side_must_match_mode() {
        let exchange = StubExchange::new();
        exchange.set_hedge_mode(true);

        let err = exchange
            .place_order(&OrderRequest::market(btc(), OrderSide::Buy, dec!(0.005), PositionSide::Both))
            .await
            .unwrap_err();
        assert!(err.is_position_mode_mismatch());

        let ok = exchange
            .place_order(&OrderRequest::market(btc(), OrderSide::Buy, dec!(0.005), PositionSide::Long))
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_limit_orders_rest() {
        let exchange = StubExchange::new();
        let ack = exchange
            .place_order(&OrderRequest::limit(btc(), OrderSide::Buy, dec!(0.005), dec!(49900), PositionSide::Both, false))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::New);

        let open = exchange.get_open_orders(Some(&btc())).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].price, dec!(49900));
        assert!(exchange.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_market_defaults() {
        let market = StubMarket::new();
        assert_eq!(market.format_quantity(&btc(), dec!(0.0059)).await.unwrap(), dec!(0.005));
        let price = market.optimal_price(&btc(), OrderSide::Buy, dec!(0), true).await.unwrap();
        assert_eq!(price, dec!(50000));
        assert!(market.analyze_depth(&btc(), OrderSide::Buy, dec!(1000)).await.unwrap().liquidity_ok);
    }

    #[tokio::test]
    async fn test_vwap_rule() {
        let vwap = StubVwap::new();
        vwap.set_vwap(&btc(), dec!(50000), Utc::now());
        let check = vwap
            .check_vwap_filter(&btc(), OrderSide::Buy, dec!(50100), "1m", 60)
            .await
            .unwrap();
        assert!(!check.allowed);
        assert_eq!(vwap.fetches(), 1);
    }
}
