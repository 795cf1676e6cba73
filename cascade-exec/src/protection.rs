//! Protective order primitives.
//!
//! - [`cancel_with_retry`]: bounded exponential backoff, "already gone"
//!   counts as success
//! - [`place_protective_leg`]: one STOP_MARKET / TAKE_PROFIT_MARKET order
//!   sized to the whole position
//!
//! Callers must hold the position's lock.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info, warn};

use cascade_domain::{OrderId, Position, PositionSide, ProtectiveLeg, Symbol};
use cascade_engine::sizing;

use crate::error::{ExecError, ExecResult};
use crate::ports::{ExchangePort, MarketPort, OrderRequest};

// =============================================================================
// Cancellation
// =============================================================================

/// Backoff schedule for cancellations: `base × 2^(n-1)` before retry `n`
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based); zero for the first
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay * (1u32 << (attempt - 2).min(16))
    }

    /// No waiting, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    /// 1s, 2s, 4s between four attempts
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// How a cancellation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Filled, cancelled elsewhere or unknown to the exchange
    AlreadyGone,
    Failed(String),
}

impl CancelOutcome {
    /// The order is no longer resting
    pub fn is_settled(&self) -> bool {
        !matches!(self, CancelOutcome::Failed(_))
    }
}

/// Cancel one order, retrying with backoff.
pub async fn cancel_with_retry(
    exchange: &dyn ExchangePort,
    symbol: &Symbol,
    order_id: OrderId,
    policy: &RetryPolicy,
) -> CancelOutcome {
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts.max(1) {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match exchange.cancel_order(symbol, order_id).await {
            Ok(()) => {
                debug!(%symbol, order_id, attempt, "Order cancelled");
                return CancelOutcome::Cancelled;
            }
            Err(e) if e.is_order_gone() => {
                debug!(%symbol, order_id, "Order already gone");
                return CancelOutcome::AlreadyGone;
            }
            Err(e) => {
                warn!(%symbol, order_id, attempt, max_attempts = policy.max_attempts, error = %e, "Cancel failed");
                last_error = e.to_string();
            }
        }
    }

    CancelOutcome::Failed(last_error)
}

/// Cancel several orders concurrently; outcomes in input order
pub async fn cancel_all(
    exchange: &dyn ExchangePort,
    symbol: &Symbol,
    order_ids: &[OrderId],
    policy: &RetryPolicy,
) -> Vec<(OrderId, CancelOutcome)> {
    let outcomes = join_all(
        order_ids
            .iter()
            .map(|id| cancel_with_retry(exchange, symbol, *id, policy)),
    )
    .await;
    order_ids.iter().copied().zip(outcomes).collect()
}

// =============================================================================
// Placement
// =============================================================================

/// Stop-loss / take-profit distances in percent of entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectionParams {
    pub stop_loss_percent: Decimal,
    pub take_profit_percent: Decimal,
}

/// A protective order that was accepted
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLeg {
    pub leg: ProtectiveLeg,
    pub order_id: OrderId,
    pub stop_price: Decimal,
    pub quantity: Decimal,
}

/// Build the request for one protective leg.
///
/// Reduce-only is set only in one-way mode; hedge-mode orders are closing
/// through their LONG/SHORT position side.
pub async fn protective_request(
    market: &dyn MarketPort,
    position: &Position,
    leg: ProtectiveLeg,
    params: &ProtectionParams,
) -> ExecResult<OrderRequest> {
    let direction = position
        .direction()
        .ok_or_else(|| ExecError::InvalidParams(format!("{} position is flat", position.symbol)))?;

    let raw_trigger = match leg {
        ProtectiveLeg::StopLoss => sizing::stop_loss_price(direction, position.entry_price, params.stop_loss_percent),
        ProtectiveLeg::TakeProfit => {
            sizing::take_profit_price(direction, position.entry_price, params.take_profit_percent)
        }
    };
    let stop_price = market.format_price(&position.symbol, raw_trigger).await?;
    let quantity = market.format_quantity(&position.symbol, position.abs_quantity()).await?;
    if quantity <= Decimal::ZERO {
        return Err(ExecError::InvalidParams(format!(
            "{} rounds to zero for {}",
            position.abs_quantity(),
            position.symbol
        )));
    }

    Ok(OrderRequest {
        symbol: position.symbol.clone(),
        side: direction.exit_action(),
        order_type: leg.order_type(),
        quantity,
        price: None,
        stop_price: Some(stop_price),
        position_side: position.position_side,
        reduce_only: position.position_side == PositionSide::Both,
        time_in_force: None,
        use_mark_price: true,
        client_order_id: None,
    })
}

/// Place one protective leg for the full position size
pub async fn place_protective_leg(
    exchange: &dyn ExchangePort,
    market: &dyn MarketPort,
    position: &Position,
    leg: ProtectiveLeg,
    params: &ProtectionParams,
) -> ExecResult<PlacedLeg> {
    let request = protective_request(market, position, leg, params).await?;
    let ack = exchange.place_order(&request).await?;

    info!(
        symbol = %position.symbol,
        %leg,
        order_id = ack.order_id,
        stop_price = %request.effective_price(),
        quantity = %request.quantity,
        "Protective order placed"
    );

    Ok(PlacedLeg {
        leg,
        order_id: ack.order_id,
        stop_price: request.effective_price(),
        quantity: request.quantity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{StubExchange, StubMarket};
    use cascade_domain::{MarginType, OrderSide, OrderType};
    use rust_decimal_macros::dec;

    fn params() -> ProtectionParams {
        ProtectionParams {
            stop_loss_percent: dec!(2),
            take_profit_percent: dec!(3),
        }
    }

    fn position(amount: Decimal, position_side: PositionSide) -> Position {
        Position {
            symbol: Symbol::new("BTCUSDT").unwrap(),
            amount,
            entry_price: dec!(50000),
            mark_price: dec!(50000),
            leverage: 10,
            margin_type: MarginType::Cross,
            isolated_margin: dec!(0),
            position_side,
            unrealized_pnl: dec!(0),
        }
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_secs(1));
        assert_eq!(policy.delay_before(3), Duration::from_secs(2));
        assert_eq!(policy.delay_before(4), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cancel_unknown_order_is_already_gone() {
        let exchange = StubExchange::new();
        let outcome = cancel_with_retry(&exchange, &Symbol::new("BTCUSDT").unwrap(), 999, &RetryPolicy::immediate(3)).await;
        assert_eq!(outcome, CancelOutcome::AlreadyGone);
        assert!(outcome.is_settled());
    }

    #[tokio::test]
    async fn test_cancel_retries_then_succeeds() {
        let exchange = StubExchange::new();
        let symbol = Symbol::new("BTCUSDT").unwrap();
        let id = exchange.seed_order(symbol.clone(), OrderSide::Sell, OrderType::StopMarket, dec!(0.005), true, 60);
        exchange.fail_next_cancels(vec![ExecError::Transport("reset".into()), ExecError::Timeout("slow".into())]);

        let outcome = cancel_with_retry(&exchange, &symbol, id, &RetryPolicy::immediate(4)).await;
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(exchange.cancel_attempts(), 3);
    }

    #[tokio::test]
    async fn test_cancel_gives_up_after_max_attempts() {
        let exchange = StubExchange::new();
        let symbol = Symbol::new("BTCUSDT").unwrap();
        let id = exchange.seed_order(symbol.clone(), OrderSide::Sell, OrderType::StopMarket, dec!(0.005), true, 60);
        exchange.fail_next_cancels(vec![ExecError::Transport("reset".into()); 5]);

        let outcome = cancel_with_retry(&exchange, &symbol, id, &RetryPolicy::immediate(3)).await;
        assert!(matches!(outcome, CancelOutcome::Failed(_)));
        assert_eq!(exchange.cancel_attempts(), 3);
        assert_eq!(exchange.open_orders_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_one_way_stop_is_reduce_only() {
        let market = StubMarket::new();
        let request = protective_request(&market, &position(dec!(0.005), PositionSide::Both), ProtectiveLeg::StopLoss, &params())
            .await
            .unwrap();

        assert_eq!(request.order_type, OrderType::StopMarket);
        assert_eq!(request.side, OrderSide::Sell);
        assert_eq!(request.quantity, dec!(0.005));
        assert_eq!(request.stop_price, Some(dec!(49000)));
        assert!(request.reduce_only);
        assert!(request.use_mark_price);
    }

    #[tokio::test]
    async fn test_hedge_take_profit_omits_reduce_only() {
        let market = StubMarket::new();
        let request =
            protective_request(&market, &position(dec!(-0.01), PositionSide::Short), ProtectiveLeg::TakeProfit, &params())
                .await
                .unwrap();

        assert_eq!(request.order_type, OrderType::TakeProfitMarket);
        assert_eq!(request.side, OrderSide::Buy);
        assert_eq!(request.position_side, PositionSide::Short);
        assert_eq!(request.stop_price, Some(dec!(48500)));
        assert!(!request.reduce_only);
    }

    #[tokio::test]
    async fn test_place_leg_records_open_order() {
        let exchange = StubExchange::new();
        let market = StubMarket::new();
        let placed = place_protective_leg(
            &exchange,
            &market,
            &position(dec!(0.005), PositionSide::Both),
            ProtectiveLeg::TakeProfit,
            &params(),
        )
        .await
        .unwrap();

        assert_eq!(placed.quantity, dec!(0.005));
        let open = exchange.open_orders_snapshot();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, placed.order_id);
        assert_eq!(open[0].protective_leg(), Some(ProtectiveLeg::TakeProfit));
    }
}
