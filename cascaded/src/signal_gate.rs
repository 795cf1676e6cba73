//! Signal gate: go/no-go for one liquidation event.
//!
//! Wraps the pure rules of `cascade_engine::gate` with the state they need
//! (rolling volume windows, cooldowns) and the VWAP source. No check here
//! returns an error; every failure becomes [`Decision::Skip`] with the level
//! it should be logged at.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use cascade_domain::{LiquidationEvent, OrderSide, Symbol};
use cascade_engine::{
    capacity_decision, cumulative_volume_decision, directional_candidate, instant_volume_decision, vwap_allows,
    CapacityLimits, CapacitySnapshot, CooldownTracker, Decision, SkipReason, ThresholdMonitor,
};
use cascade_exec::VwapPort;

use crate::config::SymbolConfig;

/// Stateful entry gate shared by every liquidation trigger.
pub struct SignalGate {
    vwap: Arc<dyn VwapPort>,
    vwap_max_age: chrono::Duration,
    max_open_positions: usize,
    windows: Mutex<ThresholdMonitor>,
    cooldowns: Mutex<CooldownTracker>,
}

impl SignalGate {
    pub fn new(vwap: Arc<dyn VwapPort>, vwap_max_age: std::time::Duration, max_open_positions: usize) -> Self {
        Self {
            vwap,
            vwap_max_age: chrono::Duration::from_std(vwap_max_age).unwrap_or_else(|_| chrono::Duration::seconds(5)),
            max_open_positions,
            windows: Mutex::new(ThresholdMonitor::default()),
            cooldowns: Mutex::new(CooldownTracker::new()),
        }
    }

    fn windows(&self) -> MutexGuard<'_, ThresholdMonitor> {
        self.windows.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn cooldowns(&self) -> MutexGuard<'_, CooldownTracker> {
        self.cooldowns.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Volume rule, then the optional VWAP rule.
    pub async fn evaluate(&self, event: &LiquidationEvent, config: &SymbolConfig) -> Decision {
        self.evaluate_at(event, config, Utc::now()).await
    }

    /// [`Self::evaluate`] with an explicit clock for the cooldown
    pub async fn evaluate_at(&self, event: &LiquidationEvent, config: &SymbolConfig, now: DateTime<Utc>) -> Decision {
        let candidate = directional_candidate(event.side);

        let decision = if config.use_threshold {
            let snapshot = self.windows().process(event, &config.cumulative_thresholds());
            let remaining = self
                .cooldowns()
                .remaining(&event.symbol, candidate, config.cooldown(), now)
                .num_seconds();
            cumulative_volume_decision(&snapshot, candidate, remaining)
        } else {
            instant_volume_decision(event.notional(), candidate, &config.instant_thresholds())
        };

        if !decision.is_trade() || !config.vwap_protection {
            return decision;
        }
        self.vwap_decision(event, candidate, config, now).await
    }

    async fn vwap_decision(
        &self,
        event: &LiquidationEvent,
        candidate: OrderSide,
        config: &SymbolConfig,
        now: DateTime<Utc>,
    ) -> Decision {
        let symbol = &event.symbol;

        if let Some(snapshot) = self.vwap.current_vwap(symbol) {
            if now.signed_duration_since(snapshot.timestamp) < self.vwap_max_age {
                return vwap_verdict(symbol, candidate, event.price, snapshot.vwap);
            }
        }

        match self
            .vwap
            .check_vwap_filter(symbol, candidate, event.price, &config.vwap_timeframe, config.vwap_lookback)
            .await
        {
            Ok(check) if check.allowed => Decision::trade(candidate),
            Ok(check) => Decision::Skip(SkipReason::info(format!("VWAP filter: {}", check.reason))),
            Err(e) => {
                warn!(%symbol, error = %e, "VWAP unavailable, allowing trade");
                Decision::Trade {
                    side: candidate,
                    warning: Some(format!("VWAP check failed: {}", e)),
                }
            },
        }
    }

    /// Pending, position-count and margin checks for a trade in `side`.
    pub fn check_capacity(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        config: &SymbolConfig,
        snapshot: &CapacitySnapshot,
    ) -> Result<(), SkipReason> {
        let limits = CapacityLimits {
            max_open_positions: self.max_open_positions,
            new_trade_margin: config.trade_size_for(side),
            max_symbol_margin: config.max_position_margin,
        };
        capacity_decision(symbol, snapshot, &limits)
    }

    /// Start the direction's cooldown
    pub fn record_trade(&self, symbol: &Symbol, side: OrderSide) {
        self.record_trade_at(symbol, side, Utc::now());
    }

    pub fn record_trade_at(&self, symbol: &Symbol, side: OrderSide, now: DateTime<Utc>) {
        debug!(%symbol, %side, "Cooldown started");
        self.cooldowns().record(symbol, side, now);
    }
}

fn vwap_verdict(symbol: &Symbol, candidate: OrderSide, price: rust_decimal::Decimal, vwap: rust_decimal::Decimal) -> Decision {
    if vwap_allows(candidate, price, vwap) {
        Decision::trade(candidate)
    } else {
        let relation = match candidate {
            OrderSide::Buy => "above",
            OrderSide::Sell => "below",
        };
        Decision::Skip(SkipReason::info(format!(
            "VWAP filter: {} {} price {} {} VWAP {}",
            symbol, candidate, price, relation, vwap
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_domain::OrderStatus;
    use cascade_engine::GateLevel;
    use cascade_exec::StubVwap;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT").unwrap()
    }

    fn liquidation(side: OrderSide, quantity: Decimal, price: Decimal) -> LiquidationEvent {
        LiquidationEvent {
            symbol: btc(),
            side,
            quantity,
            price,
            order_status: OrderStatus::Filled,
            event_time: Utc::now(),
        }
    }

    fn gate() -> (SignalGate, Arc<StubVwap>) {
        let vwap = Arc::new(StubVwap::new());
        (SignalGate::new(vwap.clone(), Duration::from_secs(5), 3), vwap)
    }

    #[tokio::test]
    async fn test_sell_liquidation_is_long_opportunity() {
        let (gate, _) = gate();
        // 0.5 × 50000 = 25000 ≥ 10000
        let decision = gate
            .evaluate(&liquidation(OrderSide::Sell, dec!(0.5), dec!(50000)), &SymbolConfig::default())
            .await;
        assert_eq!(decision, Decision::trade(OrderSide::Buy));
    }

    #[tokio::test]
    async fn test_small_liquidation_is_skipped() {
        let (gate, _) = gate();
        let decision = gate
            .evaluate(&liquidation(OrderSide::Buy, dec!(0.1), dec!(50000)), &SymbolConfig::default())
            .await;
        assert!(matches!(decision, Decision::Skip(SkipReason { level: GateLevel::Debug, .. })));
    }

    #[tokio::test]
    async fn test_directional_threshold_override() {
        let (gate, _) = gate();
        let config = SymbolConfig {
            short_volume_threshold: Some(dec!(100000)),
            ..SymbolConfig::default()
        };
        let long = gate.evaluate(&liquidation(OrderSide::Sell, dec!(0.5), dec!(50000)), &config).await;
        let short = gate.evaluate(&liquidation(OrderSide::Buy, dec!(0.5), dec!(50000)), &config).await;

        assert!(long.is_trade());
        assert!(!short.is_trade());
    }

    #[tokio::test]
    async fn test_cumulative_window_and_cooldown() {
        let (gate, _) = gate();
        let config = SymbolConfig {
            use_threshold: true,
            cumulative_threshold: dec!(30000),
            cooldown_secs: 30,
            ..SymbolConfig::default()
        };
        let now = Utc::now();
        let event = liquidation(OrderSide::Sell, dec!(0.4), dec!(50000));

        assert!(!gate.evaluate_at(&event, &config, now).await.is_trade());
        assert!(gate.evaluate_at(&event, &config, now).await.is_trade());

        gate.record_trade_at(&btc(), OrderSide::Buy, now);
        let cooling = gate.evaluate_at(&event, &config, now + chrono::Duration::seconds(10)).await;
        assert!(matches!(cooling, Decision::Skip(SkipReason { level: GateLevel::Info, .. })));

        let ready = gate.evaluate_at(&event, &config, now + chrono::Duration::seconds(31)).await;
        assert!(ready.is_trade());
    }

    #[tokio::test]
    async fn test_cooldown_ignored_on_instant_path() {
        let (gate, _) = gate();
        gate.record_trade(&btc(), OrderSide::Buy);
        let decision = gate
            .evaluate(&liquidation(OrderSide::Sell, dec!(1), dec!(50000)), &SymbolConfig::default())
            .await;
        assert!(decision.is_trade());
    }

    #[tokio::test]
    async fn test_fresh_streamed_vwap_blocks_buy_above() {
        let (gate, vwap) = gate();
        vwap.set_vwap(&btc(), dec!(49000), Utc::now());
        let config = SymbolConfig {
            vwap_protection: true,
            ..SymbolConfig::default()
        };

        let decision = gate.evaluate(&liquidation(OrderSide::Sell, dec!(1), dec!(50000)), &config).await;

        assert!(!decision.is_trade());
        assert_eq!(vwap.fetches(), 0);
    }

    #[tokio::test]
    async fn test_stale_vwap_is_fetched() {
        let (gate, vwap) = gate();
        vwap.set_vwap(&btc(), dec!(49000), Utc::now() - chrono::Duration::seconds(60));
        let config = SymbolConfig {
            vwap_protection: true,
            ..SymbolConfig::default()
        };

        // SELL at 50000 is above VWAP 49000: allowed
        let decision = gate.evaluate(&liquidation(OrderSide::Buy, dec!(1), dec!(50000)), &config).await;

        assert_eq!(decision, Decision::trade(OrderSide::Sell));
        assert_eq!(vwap.fetches(), 1);
    }

    #[tokio::test]
    async fn test_vwap_failure_fails_open_with_warning() {
        let (gate, vwap) = gate();
        vwap.set_failing(true);
        let config = SymbolConfig {
            vwap_protection: true,
            ..SymbolConfig::default()
        };

        let decision = gate.evaluate(&liquidation(OrderSide::Sell, dec!(1), dec!(50000)), &config).await;

        match decision {
            Decision::Trade { side, warning } => {
                assert_eq!(side, OrderSide::Buy);
                assert!(warning.is_some());
            },
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_capacity_uses_symbol_cap_and_limit() {
        let (gate, _) = gate();
        let config = SymbolConfig {
            trade_size: dec!(100),
            max_position_margin: Some(dec!(250)),
            ..SymbolConfig::default()
        };
        let snapshot = CapacitySnapshot {
            hedge_mode: false,
            position_symbols: vec![btc()],
            pending_symbols: vec![],
            symbol_margin: dec!(200),
        };

        let result = gate.check_capacity(&btc(), OrderSide::Buy, &config, &snapshot);
        assert!(matches!(result, Err(SkipReason { level: GateLevel::Warn, .. })));

        let roomy = CapacitySnapshot {
            symbol_margin: dec!(100),
            ..snapshot
        };
        assert!(gate.check_capacity(&btc(), OrderSide::Buy, &config, &roomy).is_ok());
    }
}
