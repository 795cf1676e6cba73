//! Order sizing and price math.
//!
//! ```text
//! quantity = margin × leverage / price
//! if quantity × price < minNotional:
//!     quantity = ceil_step(minNotional × 1.01 / price)
//! ```
//!
//! Quantities round down to the step size except when bumped to the
//! notional floor, which rounds up so the bump survives rounding.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use cascade_domain::{OrderSide, Side, SymbolFilters};

use crate::error::{EngineError, EngineResult};

/// Headroom applied when bumping to the minimum notional
pub const MIN_NOTIONAL_BUFFER: Decimal = dec!(1.01);

const BPS: Decimal = dec!(10000);
const PERCENT: Decimal = dec!(100);

/// Round down to a multiple of `step`
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// Round up to a multiple of `step`
pub fn ceil_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).ceil() * step).normalize()
}

/// Round to the nearest multiple of `tick`
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    ((price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * tick).normalize()
}

/// Entry quantity for a margin-denominated trade size.
///
/// # Errors
/// `EngineError::InvalidInput` for a non-positive price, margin or leverage.
pub fn entry_quantity(margin: Decimal, leverage: u32, price: Decimal, filters: &SymbolFilters) -> EngineResult<Decimal> {
    if price <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(format!("price {} is not positive", price)));
    }
    if margin <= Decimal::ZERO || leverage == 0 {
        return Err(EngineError::InvalidInput(format!(
            "trade size {} at {}x cannot open a position",
            margin, leverage
        )));
    }

    let raw = margin * Decimal::from(leverage) / price;
    let mut quantity = round_to_step(raw, filters.step_size);

    if quantity * price < filters.min_notional {
        quantity = ceil_to_step(filters.min_notional * MIN_NOTIONAL_BUFFER / price, filters.step_size);
    }
    if quantity < filters.min_qty {
        quantity = ceil_to_step(filters.min_qty, filters.step_size);
    }

    Ok(quantity)
}

/// Distance between two prices in basis points of `reference`
pub fn slippage_bps(price: Decimal, reference: Decimal) -> Decimal {
    if reference <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (price - reference).abs() / reference * BPS
}

/// Shift `price` by `bps` basis points (positive = up)
pub fn offset_by_bps(price: Decimal, bps: Decimal) -> Decimal {
    price * (Decimal::ONE + bps / BPS)
}

/// Stop-loss trigger for a position opened at `entry`
pub fn stop_loss_price(side: Side, entry: Decimal, percent: Decimal) -> Decimal {
    let distance = percent / PERCENT;
    match side {
        Side::Long => entry * (Decimal::ONE - distance),
        Side::Short => entry * (Decimal::ONE + distance),
    }
}

/// Take-profit trigger for a position opened at `entry`
pub fn take_profit_price(side: Side, entry: Decimal, percent: Decimal) -> Decimal {
    let distance = percent / PERCENT;
    match side {
        Side::Long => entry * (Decimal::ONE + distance),
        Side::Short => entry * (Decimal::ONE - distance),
    }
}

/// Margin consumed by `quantity` at `price`
pub fn margin_for(quantity: Decimal, price: Decimal, leverage: u32) -> Decimal {
    if leverage == 0 {
        return quantity * price;
    }
    quantity * price / Decimal::from(leverage)
}

// =============================================================================
// Book helpers
// =============================================================================

/// Entry price from the top of book.
///
/// BUY starts at the bid and SELL at the ask, shifted toward the spread by
/// `offset_bps`. Post-only prices never cross: they stay one tick inside
/// the passive side.
pub fn quote_price(
    side: OrderSide,
    bid: Decimal,
    ask: Decimal,
    offset_bps: Decimal,
    post_only: bool,
    tick: Decimal,
) -> Decimal {
    let price = match side {
        OrderSide::Buy => {
            let shifted = offset_by_bps(bid, offset_bps);
            if post_only && shifted >= ask {
                ask - tick
            } else {
                shifted
            }
        }
        OrderSide::Sell => {
            let shifted = offset_by_bps(ask, -offset_bps);
            if post_only && shifted <= bid {
                bid + tick
            } else {
                shifted
            }
        }
    };
    round_to_tick(price, tick)
}

/// Walk book levels `(price, quantity)` best-first until `target_notional`
/// is filled.
///
/// Returns the notional available across all levels and the
/// volume-weighted fill price if the target was reachable.
pub fn walk_book(levels: &[(Decimal, Decimal)], target_notional: Decimal) -> (Decimal, Option<Decimal>) {
    let available: Decimal = levels.iter().map(|(p, q)| p * q).sum();

    let mut remaining = target_notional;
    let mut filled_qty = Decimal::ZERO;
    let mut filled_notional = Decimal::ZERO;
    for (price, qty) in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        let level_notional = price * qty;
        let take = level_notional.min(remaining);
        filled_notional += take;
        filled_qty += take / price;
        remaining -= take;
    }

    let projected = if remaining <= Decimal::ZERO && filled_qty > Decimal::ZERO {
        Some(filled_notional / filled_qty)
    } else {
        None
    };
    (available, projected)
}

/// Round a LIMIT order to the contract filters and check its minimums.
///
/// # Errors
/// A human-readable reason when the rounded order is below `min_qty` or
/// `min_notional`.
pub fn validate_limit_order(
    price: Decimal,
    quantity: Decimal,
    filters: &SymbolFilters,
) -> Result<(Decimal, Decimal), String> {
    let price = round_to_tick(price, filters.tick_size);
    let quantity = round_to_step(quantity, filters.step_size);

    if price <= Decimal::ZERO {
        return Err(format!("price {} rounds to zero", price));
    }
    if quantity < filters.min_qty {
        return Err(format!("quantity {} below minimum {}", quantity, filters.min_qty));
    }
    if quantity * price < filters.min_notional {
        return Err(format!(
            "notional {} below minimum {}",
            quantity * price,
            filters.min_notional
        ));
    }
    Ok((price, quantity))
}

/// Volume-weighted average of `(typical_price, volume)` samples
pub fn vwap(samples: &[(Decimal, Decimal)]) -> Option<Decimal> {
    let volume: Decimal = samples.iter().map(|(_, v)| *v).sum();
    if volume <= Decimal::ZERO {
        return None;
    }
    let weighted: Decimal = samples.iter().map(|(p, v)| p * v).sum();
    Some(weighted / volume)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            tick_size: dec!(0.1),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(100),
        }
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round_to_step(dec!(0.0059), dec!(0.001)), dec!(0.005));
        assert_eq!(ceil_to_step(dec!(0.0051), dec!(0.001)), dec!(0.006));
        assert_eq!(round_to_tick(dec!(50000.06), dec!(0.1)), dec!(50000.1));
        assert_eq!(round_to_tick(dec!(50000.04), dec!(0.1)), dec!(50000));
    }

    #[test]
    fn test_entry_quantity_from_margin() {
        // 25 USDT × 10x / 50000 = 0.005
        let qty = entry_quantity(dec!(25), 10, dec!(50000), &filters()).unwrap();
        assert_eq!(qty, dec!(0.005));
    }

    #[test]
    fn test_entry_quantity_bumps_to_min_notional() {
        // 5 × 10 / 50000 = 0.001 → 50 USDT < 100 → ceil(101 / 50000) = 0.003
        let qty = entry_quantity(dec!(5), 10, dec!(50000), &filters()).unwrap();
        assert_eq!(qty, dec!(0.003));
        assert!(qty * dec!(50000) >= dec!(100));
    }

    #[test]
    fn test_entry_quantity_rejects_bad_input() {
        assert!(entry_quantity(dec!(25), 10, dec!(0), &filters()).is_err());
        assert!(entry_quantity(dec!(0), 10, dec!(50000), &filters()).is_err());
        assert!(entry_quantity(dec!(25), 0, dec!(50000), &filters()).is_err());
    }

    #[test]
    fn test_slippage_bps() {
        assert_eq!(slippage_bps(dec!(100.5), dec!(100)), dec!(50));
        assert_eq!(slippage_bps(dec!(99.5), dec!(100)), dec!(50));
        assert_eq!(offset_by_bps(dec!(100), dec!(-10)), dec!(99.9));
    }

    #[test]
    fn test_protective_prices() {
        assert_eq!(stop_loss_price(Side::Long, dec!(50000), dec!(2)), dec!(49000));
        assert_eq!(take_profit_price(Side::Long, dec!(50000), dec!(3)), dec!(51500));
        assert_eq!(stop_loss_price(Side::Short, dec!(50000), dec!(2)), dec!(51000));
        assert_eq!(take_profit_price(Side::Short, dec!(50000), dec!(3)), dec!(48500));
    }

    #[test]
    fn test_margin_for() {
        assert_eq!(margin_for(dec!(0.005), dec!(50000), 10), dec!(25));
    }
    #[test]
    fn test_quote_price_post_only_stays_passive() {
        let buy = quote_price(OrderSide::Buy, dec!(50000), dec!(50000.1), dec!(5), true, dec!(0.1));
        assert_eq!(buy, dec!(50000));
        let buy_taker = quote_price(OrderSide::Buy, dec!(50000), dec!(50000.1), dec!(5), false, dec!(0.1));
        assert_eq!(buy_taker, dec!(50025));
        let sell = quote_price(OrderSide::Sell, dec!(50000), dec!(50000.1), dec!(0), true, dec!(0.1));
        assert_eq!(sell, dec!(50000.1));
    }

    #[test]
    fn test_walk_book() {
        let levels = [(dec!(100), dec!(1)), (dec!(101), dec!(1))];
        let (available, projected) = walk_book(&levels, dec!(150));
        assert_eq!(available, dec!(201));
        let projected = projected.unwrap();
        assert!(projected > dec!(100) && projected < dec!(101));

        let (_, unreachable) = walk_book(&levels, dec!(500));
        assert!(unreachable.is_none());
    }

    #[test]
    fn test_validate_limit_order() {
        let (price, qty) = validate_limit_order(dec!(50000.04), dec!(0.0051), &filters()).unwrap();
        assert_eq!(price, dec!(50000));
        assert_eq!(qty, dec!(0.005));
        assert!(validate_limit_order(dec!(50000), dec!(0.001), &filters()).is_err());
    }

    #[test]
    fn test_vwap() {
        assert_eq!(vwap(&[(dec!(100), dec!(1)), (dec!(110), dec!(3))]), Some(dec!(107.5)));
        assert_eq!(vwap(&[]), None);
    }
}
