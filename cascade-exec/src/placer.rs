//! OrderPlacer: turns a go decision into at most three exchange submissions.
//!
//! # Flow
//!
//! ```text
//! paper? ──► simulated "position opened"
//!   │
//!   ▼
//! register tmp pending (before the first await)
//!   │
//!   ▼
//! LIMIT: optimal price → depth check → slippage > bound? ──► MARKET @ reference
//!   │
//!   ▼
//! filters → quantity → precision → (LIMIT) validation
//!   │
//!   ▼
//! set leverage → submit → re-key pending
//!   │
//!   ├─ -4061 + modes differ ──► refresh cache, retry once with corrected side
//!   ├─ -4061 + modes match  ──► skip (position/limit conflict)
//!   └─ other failure        ──► classify, broadcast, one MARKET fallback
//! ```
//!
//! Exactly one submission, plus at most one mode-correction retry or one
//! fallback. Nothing here loops.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use cascade_domain::{Notification, OrderId, OrderSide, OrderType, PendingOrder, PositionSide, Symbol};
use cascade_engine::sizing;

use crate::classify::{ClassifiedError, ErrorContext, ErrorDeduper};
use crate::error::{ExecError, ExecResult};
use crate::pending::PendingOrderTracker;
use crate::ports::{ExchangePort, MarketPort, Notifier, OrderAck, OrderRequest};

// =============================================================================
// Position mode cache
// =============================================================================

/// Locally cached hedge/one-way flag of the account.
#[derive(Debug, Default)]
pub struct PositionModeCache {
    hedge: AtomicBool,
}

impl PositionModeCache {
    pub fn new(hedge: bool) -> Self {
        Self {
            hedge: AtomicBool::new(hedge),
        }
    }

    pub fn is_hedge(&self) -> bool {
        self.hedge.load(Ordering::SeqCst)
    }

    /// Store a new value; returns true if it changed
    pub fn set(&self, hedge: bool) -> bool {
        self.hedge.swap(hedge, Ordering::SeqCst) != hedge
    }
}

// =============================================================================
// Parameters and outcome
// =============================================================================

/// Preferred entry order type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryOrderType {
    #[default]
    Limit,
    Market,
}

impl EntryOrderType {
    fn order_type(self) -> OrderType {
        match self {
            EntryOrderType::Limit => OrderType::Limit,
            EntryOrderType::Market => OrderType::Market,
        }
    }
}

/// Per-trigger entry settings, resolved from the symbol's configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EntryParams {
    pub leverage: u32,
    /// Trade size in margin (USDT) for this side
    pub margin: Decimal,
    pub order_type: EntryOrderType,
    pub price_offset_bps: Decimal,
    pub max_slippage_bps: Decimal,
    pub post_only: bool,
}

/// What happened to one entry trigger
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    /// The exchange accepted an order
    Placed {
        order_id: OrderId,
        order_type: OrderType,
        quantity: Decimal,
        price: Decimal,
        /// Accepted on the MARKET fallback
        fallback: bool,
    },
    /// Paper mode: nothing was sent
    Simulated { quantity: Decimal, price: Decimal },
    /// Deliberately not placed (validation, mode conflict)
    Skipped(String),
    /// Every permitted attempt failed
    Rejected(ClassifiedError),
}

impl PlacementOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, PlacementOutcome::Placed { .. } | PlacementOutcome::Simulated { .. })
    }
}

enum Prepared {
    Ready { request: OrderRequest, price: Decimal },
    Invalid(String),
}

// =============================================================================
// Order Placer
// =============================================================================

/// Places entry orders for accepted signals.
pub struct OrderPlacer {
    exchange: Arc<dyn ExchangePort>,
    market: Arc<dyn MarketPort>,
    notifier: Arc<dyn Notifier>,
    pending: Arc<PendingOrderTracker>,
    mode: Arc<PositionModeCache>,
    deduper: ErrorDeduper,
    paper: bool,
}

impl OrderPlacer {
    pub fn new(
        exchange: Arc<dyn ExchangePort>,
        market: Arc<dyn MarketPort>,
        notifier: Arc<dyn Notifier>,
        pending: Arc<PendingOrderTracker>,
        mode: Arc<PositionModeCache>,
        paper: bool,
    ) -> Self {
        Self {
            exchange,
            market,
            notifier,
            pending,
            mode,
            deduper: ErrorDeduper::default(),
            paper,
        }
    }

    pub fn is_paper(&self) -> bool {
        self.paper
    }

    pub fn mode_cache(&self) -> &Arc<PositionModeCache> {
        &self.mode
    }

    pub fn pending(&self) -> &Arc<PendingOrderTracker> {
        &self.pending
    }

    /// Place one entry for an accepted signal.
    ///
    /// Never returns an error: every failure is classified, broadcast and
    /// reported through the outcome.
    pub async fn place_entry(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        params: &EntryParams,
        reference_price: Decimal,
    ) -> PlacementOutcome {
        if self.paper {
            return self.simulate(symbol, side, params, reference_price);
        }

        // Registered synchronously so a capacity check made just before this
        // call cannot be passed by a concurrent trigger.
        let reservation = PendingOrderTracker::temporary_id();
        self.pending.register(PendingOrder {
            order_id: reservation.clone(),
            symbol: symbol.clone(),
            side,
            submitted_at: Utc::now(),
        });

        let outcome = self.attempt(symbol, side, params, reference_price).await;
        match &outcome {
            PlacementOutcome::Placed { order_id, .. } => {
                self.pending.replace(&reservation, &order_id.to_string());
            }
            _ => {
                self.pending.remove(&reservation);
            }
        }
        outcome
    }

    /// Price, prepare and submit, with the mode retry or MARKET fallback
    async fn attempt(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        params: &EntryParams,
        reference_price: Decimal,
    ) -> PlacementOutcome {
        let (order_type, price) = self.resolve_price(symbol, side, params, reference_price).await;

        let prepared = match self.prepare(symbol, side, order_type, price, params).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let ctx = ErrorContext {
                    price: Some(price),
                    quantity: None,
                    leverage: Some(params.leverage),
                };
                return PlacementOutcome::Rejected(self.report(&e, symbol, ctx));
            }
        };
        let (request, price) = match prepared {
            Prepared::Ready { request, price } => (request, price),
            Prepared::Invalid(reason) => {
                info!(%symbol, %side, %reason, "Order validation failed, not trading");
                return PlacementOutcome::Skipped(reason);
            }
        };

        if let Err(e) = self.exchange.set_leverage(symbol, params.leverage).await {
            warn!(%symbol, leverage = params.leverage, error = %e, "Failed to set leverage, submitting anyway");
        }

        match self.submit(&request).await {
            Ok(ack) => self.on_placed(&request, &ack, price, params, false),
            Err(e) if e.is_position_mode_mismatch() => self.correct_mode(request, price, params, e).await,
            Err(e) => {
                let classified = self.report(&e, symbol, context_of(&request, price, params));
                if params.order_type == EntryOrderType::Market {
                    return PlacementOutcome::Rejected(classified);
                }
                self.fallback(symbol, side, params, reference_price).await
            }
        }
    }

    /// Query the account mode and update the cache.
    pub async fn refresh_position_mode(&self) -> ExecResult<bool> {
        let hedge = self.exchange.get_position_mode().await?;
        if self.mode.set(hedge) {
            info!(hedge_mode = hedge, "Position mode changed on exchange");
        } else {
            debug!(hedge_mode = hedge, "Position mode unchanged");
        }
        Ok(hedge)
    }

    // -------------------------------------------------------------------------
    // Steps
    // -------------------------------------------------------------------------

    fn simulate(&self, symbol: &Symbol, side: OrderSide, params: &EntryParams, price: Decimal) -> PlacementOutcome {
        let quantity = if price > Decimal::ZERO {
            params.margin * Decimal::from(params.leverage) / price
        } else {
            Decimal::ZERO
        };
        info!(%symbol, %side, %quantity, %price, "Paper trade");
        self.notifier.notify(Notification::PositionOpened {
            symbol: symbol.clone(),
            side,
            order_id: None,
            quantity,
            price,
            leverage: params.leverage,
            order_type: params.order_type.order_type(),
            paper: true,
        });
        PlacementOutcome::Simulated { quantity, price }
    }

    /// Pick order type and price; any pricing failure degrades to MARKET
    async fn resolve_price(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        params: &EntryParams,
        reference_price: Decimal,
    ) -> (OrderType, Decimal) {
        if params.order_type == EntryOrderType::Market {
            return (OrderType::Market, reference_price);
        }

        let optimal = match self
            .market
            .optimal_price(symbol, side, params.price_offset_bps, params.post_only)
            .await
        {
            Ok(price) => price,
            Err(e) => {
                warn!(%symbol, error = %e, "Optimal price unavailable, using MARKET");
                return (OrderType::Market, reference_price);
            }
        };

        let target_notional = params.margin * Decimal::from(params.leverage);
        match self.market.analyze_depth(symbol, side, target_notional).await {
            Ok(depth) if !depth.liquidity_ok => {
                warn!(%symbol, %target_notional, available = %depth.available_notional, "Thin order book");
            }
            Ok(_) => {}
            Err(e) => warn!(%symbol, error = %e, "Depth check failed"),
        }

        let slippage = sizing::slippage_bps(optimal, reference_price);
        if slippage > params.max_slippage_bps {
            info!(
                %symbol,
                %optimal,
                reference = %reference_price,
                slippage_bps = %slippage,
                max_bps = %params.max_slippage_bps,
                "Slippage too high, switching to MARKET"
            );
            return (OrderType::Market, reference_price);
        }

        (OrderType::Limit, optimal)
    }

    /// Size, round and validate the order
    async fn prepare(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        order_type: OrderType,
        price: Decimal,
        params: &EntryParams,
    ) -> ExecResult<Prepared> {
        let filters = self.market.symbol_filters(symbol).await?;
        let raw_quantity = sizing::entry_quantity(params.margin, params.leverage, price, &filters)?;
        let mut quantity = self.market.format_quantity(symbol, raw_quantity).await?;
        let mut price = self.market.format_price(symbol, price).await?;

        if quantity <= Decimal::ZERO {
            return Err(ExecError::InvalidParams(format!("quantity for {} rounds to zero", symbol)));
        }

        let position_side = PositionSide::for_entry(self.mode.is_hedge(), side);

        let request = if order_type == OrderType::Limit {
            let validation = self.market.validate_order_params(symbol, side, price, quantity).await?;
            if !validation.valid {
                return Ok(Prepared::Invalid(
                    validation.error.unwrap_or_else(|| "order parameters rejected".to_string()),
                ));
            }
            price = validation.adjusted_price.unwrap_or(price);
            quantity = validation.adjusted_quantity.unwrap_or(quantity);
            OrderRequest::limit(symbol.clone(), side, quantity, price, position_side, params.post_only)
        } else {
            OrderRequest::market(symbol.clone(), side, quantity, position_side)
        };

        Ok(Prepared::Ready { request, price })
    }

    async fn submit(&self, request: &OrderRequest) -> ExecResult<OrderAck> {
        self.exchange.place_order(request).await
    }

    /// One retry after a position-side rejection, only if the cached mode was wrong
    async fn correct_mode(
        &self,
        request: OrderRequest,
        price: Decimal,
        params: &EntryParams,
        original: ExecError,
    ) -> PlacementOutcome {
        let cached = self.mode.is_hedge();
        let actual = match self.exchange.get_position_mode().await {
            Ok(actual) => actual,
            Err(e) => {
                warn!(symbol = %request.symbol, error = %e, "Position mode query failed");
                return PlacementOutcome::Rejected(self.report(&original, &request.symbol, context_of(&request, price, params)));
            }
        };

        if actual == cached {
            info!(
                symbol = %request.symbol,
                hedge_mode = actual,
                "Position side conflict with matching modes, not retrying"
            );
            return PlacementOutcome::Skipped("position side conflict".to_string());
        }

        self.mode.set(actual);
        let corrected = OrderRequest {
            position_side: PositionSide::for_entry(actual, request.side),
            ..request
        };
        info!(
            symbol = %corrected.symbol,
            hedge_mode = actual,
            position_side = %corrected.position_side.as_str(),
            "Position mode corrected, retrying once"
        );

        match self.submit(&corrected).await {
            Ok(ack) => self.on_placed(&corrected, &ack, price, params, false),
            Err(e) => PlacementOutcome::Rejected(self.report(&e, &corrected.symbol, context_of(&corrected, price, params))),
        }
    }

    /// The single MARKET fallback; its failure is terminal
    async fn fallback(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        params: &EntryParams,
        reference_price: Decimal,
    ) -> PlacementOutcome {
        info!(%symbol, %side, "Falling back to MARKET");

        let (request, price) = match self.prepare(symbol, side, OrderType::Market, reference_price, params).await {
            Ok(Prepared::Ready { request, price }) => (request, price),
            Ok(Prepared::Invalid(reason)) => return PlacementOutcome::Skipped(reason),
            Err(e) => {
                let ctx = ErrorContext {
                    price: Some(reference_price),
                    quantity: None,
                    leverage: Some(params.leverage),
                };
                return PlacementOutcome::Rejected(self.report(&e, symbol, ctx));
            }
        };

        match self.submit(&request).await {
            Ok(ack) => self.on_placed(&request, &ack, price, params, true),
            Err(e) => PlacementOutcome::Rejected(self.report(&e, symbol, context_of(&request, price, params))),
        }
    }

    fn on_placed(
        &self,
        request: &OrderRequest,
        ack: &OrderAck,
        price: Decimal,
        params: &EntryParams,
        fallback: bool,
    ) -> PlacementOutcome {
        let price = if ack.avg_price > Decimal::ZERO { ack.avg_price } else { price };

        info!(
            symbol = %request.symbol,
            side = %request.side,
            order_id = ack.order_id,
            order_type = %request.order_type.as_str(),
            quantity = %request.quantity,
            %price,
            fallback,
            "Entry order placed"
        );

        self.notifier.notify(Notification::OrderPlaced {
            symbol: request.symbol.clone(),
            side: request.side,
            order_id: ack.order_id,
            order_type: request.order_type,
            quantity: request.quantity,
            price,
        });
        self.notifier.notify(Notification::PositionOpened {
            symbol: request.symbol.clone(),
            side: request.side,
            order_id: Some(ack.order_id),
            quantity: request.quantity,
            price,
            leverage: params.leverage,
            order_type: request.order_type,
            paper: false,
        });

        PlacementOutcome::Placed {
            order_id: ack.order_id,
            order_type: request.order_type,
            quantity: request.quantity,
            price,
            fallback,
        }
    }

    /// Classify, log once per fingerprint window, broadcast every time
    fn report(&self, e: &ExecError, symbol: &Symbol, context: ErrorContext) -> ClassifiedError {
        let classified = ClassifiedError::classify(e, symbol, context);
        let fingerprint = classified.fingerprint();
        if self.deduper.should_alert(&fingerprint, Utc::now()) {
            error!(%symbol, %fingerprint, message = %classified.message, "Order placement failed");
        } else {
            debug!(%symbol, %fingerprint, "Order placement failed again");
        }
        self.notifier.notify(classified.to_notification());
        classified
    }
}

fn context_of(request: &OrderRequest, price: Decimal, params: &EntryParams) -> ErrorContext {
    ErrorContext {
        price: Some(price),
        quantity: Some(request.quantity),
        leverage: Some(params.leverage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{RecordingNotifier, StubExchange, StubMarket};
    use rust_decimal_macros::dec;

    struct Harness {
        exchange: Arc<StubExchange>,
        market: Arc<StubMarket>,
        notifier: Arc<RecordingNotifier>,
        pending: Arc<PendingOrderTracker>,
        placer: OrderPlacer,
    }

    fn harness(paper: bool, cached_hedge: bool) -> Harness {
        let exchange = Arc::new(StubExchange::new());
        let market = Arc::new(StubMarket::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let pending = Arc::new(PendingOrderTracker::default());
        let placer = OrderPlacer::new(
            exchange.clone(),
            market.clone(),
            notifier.clone(),
            pending.clone(),
            Arc::new(PositionModeCache::new(cached_hedge)),
            paper,
        );
        Harness {
            exchange,
            market,
            notifier,
            pending,
            placer,
        }
    }

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT").unwrap()
    }

    fn params(order_type: EntryOrderType) -> EntryParams {
        EntryParams {
            leverage: 10,
            margin: dec!(25),
            order_type,
            price_offset_bps: dec!(0),
            max_slippage_bps: dec!(50),
            post_only: false,
        }
    }

    fn api(code: i64) -> ExecError {
        ExecError::Api {
            code,
            msg: "rejected".to_string(),
        }
    }

    #[tokio::test]
    async fn test_paper_mode_sends_nothing() {
        let h = harness(true, false);
        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        assert_eq!(
            outcome,
            PlacementOutcome::Simulated {
                quantity: dec!(0.005),
                price: dec!(50000)
            }
        );
        assert_eq!(h.exchange.place_attempts(), 0);
        assert_eq!(h.notifier.kinds(), vec!["position_opened"]);
    }

    #[tokio::test]
    async fn test_limit_entry_placed_and_tracked() {
        let h = harness(false, false);
        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        let order_id = match outcome {
            PlacementOutcome::Placed {
                order_id,
                order_type,
                quantity,
                price,
                fallback,
            } => {
                assert_eq!(order_type, OrderType::Limit);
                assert_eq!(quantity, dec!(0.005));
                assert_eq!(price, dec!(50000));
                assert!(!fallback);
                order_id
            }
            other => panic!("unexpected {:?}", other),
        };

        let placed = h.exchange.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].position_side, PositionSide::Both);
        assert_eq!(h.exchange.leverage_calls(), vec![(btc(), 10)]);
        assert!(h.pending.remove(&order_id.to_string()).is_some());
        assert_eq!(h.notifier.kinds(), vec!["order_placed", "position_opened"]);
    }

    #[tokio::test]
    async fn test_pending_reserved_before_price_quote() {
        let h = harness(false, false);
        h.market.set_yield_on_quote(true);

        let symbol = btc();
        let entry_params = params(EntryOrderType::Limit);
        let (outcome, reserved_while_quoting) = tokio::join!(
            h.placer.place_entry(&symbol, OrderSide::Buy, &entry_params, dec!(50000)),
            async {
                tokio::task::yield_now().await;
                h.pending.has_pending(&btc())
            }
        );

        assert!(outcome.is_placed());
        assert!(reserved_while_quoting);
        assert_eq!(h.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_entry_releases_reservation() {
        let h = harness(false, false);
        h.exchange.fail_next_places(vec![api(-4061)]);

        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        assert!(matches!(outcome, PlacementOutcome::Skipped(_)));
        assert!(h.pending.is_empty());
    }

    #[tokio::test]
    async fn test_excess_slippage_switches_to_market() {
        let h = harness(false, false);
        h.market.set_book(&btc(), dec!(50500), dec!(50500.1));

        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        assert!(outcome.is_placed());
        let placed = h.exchange.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].order_type, OrderType::Market);
    }

    #[tokio::test]
    async fn test_thin_book_only_warns() {
        let h = harness(false, false);
        h.market.set_liquidity(&btc(), dec!(10));

        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        assert!(outcome.is_placed());
        assert_eq!(h.exchange.placed_orders()[0].order_type, OrderType::Limit);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_market_once() {
        let h = harness(false, false);
        h.exchange.fail_next_places(vec![api(-2010)]);

        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        match outcome {
            PlacementOutcome::Placed { order_type, fallback, .. } => {
                assert_eq!(order_type, OrderType::Market);
                assert!(fallback);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.exchange.place_attempts(), 2);
        assert_eq!(h.notifier.count("order_failed"), 1);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_terminal() {
        let h = harness(false, false);
        h.exchange.fail_next_places(vec![api(-2010), api(-2019), api(-2019)]);

        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        match outcome {
            PlacementOutcome::Rejected(classified) => assert_eq!(classified.code, Some(-2019)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.exchange.place_attempts(), 2);
        assert!(h.pending.is_empty());
    }

    #[tokio::test]
    async fn test_market_only_symbol_has_no_fallback() {
        let h = harness(false, false);
        h.exchange.fail_next_places(vec![api(-2019)]);

        let outcome = h.placer.place_entry(&btc(), OrderSide::Sell, &params(EntryOrderType::Market), dec!(50000)).await;

        assert!(matches!(outcome, PlacementOutcome::Rejected(_)));
        assert_eq!(h.exchange.place_attempts(), 1);
    }

    #[tokio::test]
    async fn test_mode_mismatch_retries_with_corrected_side() {
        let h = harness(false, false);
        h.exchange.set_hedge_mode(true);

        let outcome = h.placer.place_entry(&btc(), OrderSide::Sell, &params(EntryOrderType::Limit), dec!(50000)).await;

        assert!(outcome.is_placed());
        assert_eq!(h.exchange.place_attempts(), 2);
        assert_eq!(h.exchange.placed_orders()[0].position_side, PositionSide::Short);
        assert!(h.placer.mode_cache().is_hedge());
    }

    #[tokio::test]
    async fn test_mode_retry_failure_stops() {
        let h = harness(false, false);
        h.exchange.set_hedge_mode(true);
        h.exchange.fail_next_places(vec![api(-4061), api(-2019)]);

        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        assert!(matches!(outcome, PlacementOutcome::Rejected(_)));
        assert_eq!(h.exchange.place_attempts(), 2);
    }

    #[tokio::test]
    async fn test_mode_mismatch_with_matching_modes_is_skipped() {
        let h = harness(false, false);
        h.exchange.fail_next_places(vec![api(-4061)]);

        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        assert!(matches!(outcome, PlacementOutcome::Skipped(_)));
        assert_eq!(h.exchange.place_attempts(), 1);
        assert!(!h.placer.mode_cache().is_hedge());
        assert_eq!(h.notifier.count("order_failed"), 0);
    }

    #[tokio::test]
    async fn test_invalid_limit_is_skipped() {
        let h = harness(false, false);
        h.market.reject_validation(&btc(), "price outside band");

        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        assert_eq!(outcome, PlacementOutcome::Skipped("price outside band".to_string()));
        assert_eq!(h.exchange.place_attempts(), 0);
    }

    #[tokio::test]
    async fn test_leverage_failure_only_warns() {
        let h = harness(false, false);
        h.exchange.fail_next_leverage(vec![api(-4028)]);

        let outcome = h.placer.place_entry(&btc(), OrderSide::Buy, &params(EntryOrderType::Limit), dec!(50000)).await;

        assert!(outcome.is_placed());
    }

    #[tokio::test]
    async fn test_refresh_position_mode() {
        let h = harness(false, false);
        h.exchange.set_hedge_mode(true);
        assert!(h.placer.refresh_position_mode().await.unwrap());
        assert!(h.placer.mode_cache().is_hedge());
    }
}
