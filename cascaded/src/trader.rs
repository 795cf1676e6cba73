//! Trader: liquidation event → gate → capacity → entry order.
//!
//! ```text
//! LiquidationEvent
//!   ├─ unconfigured symbol ──────────────► Unconfigured
//!   ├─ entry lock busy ──────────────────► Busy
//!   ├─ SignalGate::evaluate ── skip ─────► Skipped
//!   ├─ SignalGate::check_capacity ─ skip ► Skipped
//!   └─ OrderPlacer::place_entry ─────────► Attempted(outcome)
//! ```
//!
//! The per-symbol entry lock keeps a trigger for either direction out while
//! the gate awaits its VWAP. Across symbols, the placer registers its pending
//! entry before its first await, so the capacity check and the registration
//! happen in one poll.

use std::sync::Arc;
use tracing::{debug, info, warn};

use cascade_domain::{LiquidationEvent, Symbol};
use cascade_engine::{Decision, GateLevel, SkipReason};
use cascade_exec::{LockTable, OrderPlacer, PlacementOutcome};

use crate::config::SymbolBook;
use crate::reconciler::Reconciler;
use crate::signal_gate::SignalGate;

/// What one trigger led to
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    Unconfigured,
    /// Another trigger for the same symbol is in flight
    Busy,
    Skipped(SkipReason),
    Attempted(PlacementOutcome),
}

pub struct Trader {
    symbols: Arc<SymbolBook>,
    gate: SignalGate,
    placer: OrderPlacer,
    reconciler: Arc<Reconciler>,
    entry_locks: LockTable<Symbol>,
}

impl Trader {
    pub fn new(symbols: Arc<SymbolBook>, gate: SignalGate, placer: OrderPlacer, reconciler: Arc<Reconciler>) -> Self {
        Self {
            symbols,
            gate,
            placer,
            reconciler,
            entry_locks: LockTable::new(),
        }
    }

    pub fn placer(&self) -> &OrderPlacer {
        &self.placer
    }

    pub fn is_paper(&self) -> bool {
        self.placer.is_paper()
    }

    /// Run one liquidation through the pipeline.
    pub async fn handle_liquidation(&self, event: &LiquidationEvent) -> TradeOutcome {
        let symbol = &event.symbol;
        let Some(config) = self.symbols.get(symbol) else {
            return TradeOutcome::Unconfigured;
        };

        let Some(_entry) = self.entry_locks.try_acquire(symbol) else {
            debug!(%symbol, candidate = %event.candidate_side(), "Entry already in progress, ignoring trigger");
            return TradeOutcome::Busy;
        };

        let (side, warning) = match self.gate.evaluate(event, config).await {
            Decision::Trade { side, warning } => (side, warning),
            Decision::Skip(reason) => {
                log_skip(event, &reason);
                return TradeOutcome::Skipped(reason);
            },
        };
        if let Some(warning) = warning {
            warn!(%symbol, %side, %warning, "Trading with degraded gate");
        }

        let snapshot = self.reconciler.capacity_snapshot(symbol);
        if let Err(reason) = self.gate.check_capacity(symbol, side, config, &snapshot) {
            log_skip(event, &reason);
            return TradeOutcome::Skipped(reason);
        }

        info!(
            %symbol,
            %side,
            liquidation_side = %event.side,
            notional = %event.notional().round_dp(2),
            price = %event.price,
            "Liquidation signal accepted"
        );

        let outcome = self
            .placer
            .place_entry(symbol, side, &config.entry_params(side), event.price)
            .await;
        if outcome.is_placed() {
            self.gate.record_trade(symbol, side);
        }
        TradeOutcome::Attempted(outcome)
    }
}

fn log_skip(event: &LiquidationEvent, skip: &SkipReason) {
    let symbol = &event.symbol;
    let reason = &skip.reason;
    match skip.level {
        GateLevel::Debug => debug!(%symbol, %reason, "Signal skipped"),
        GateLevel::Info => info!(%symbol, %reason, "Signal skipped"),
        GateLevel::Warn => warn!(%symbol, %reason, "Signal skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolConfig;
    use crate::reconciler::ReconcilerSettings;
    use cascade_domain::{OrderSide, OrderStatus, OrderType, PendingOrder, Symbol};
    use cascade_exec::{
        PendingOrderTracker, PositionModeCache, RecordingNotifier, StubExchange, StubMarket, StubVwap,
    };
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        exchange: Arc<StubExchange>,
        market: Arc<StubMarket>,
        pending: Arc<PendingOrderTracker>,
        trader: Trader,
    }

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT").unwrap()
    }

    fn eth() -> Symbol {
        Symbol::new("ETHUSDT").unwrap()
    }

    fn harness(config: SymbolConfig, max_open: usize, paper: bool) -> Harness {
        harness_with(SymbolBook::default().with_symbol(btc(), config), max_open, paper)
    }

    fn harness_with(book: SymbolBook, max_open: usize, paper: bool) -> Harness {
        let exchange = Arc::new(StubExchange::new());
        let market = Arc::new(StubMarket::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let pending = Arc::new(PendingOrderTracker::default());
        let mode = Arc::new(PositionModeCache::new(false));
        let symbols = Arc::new(book);

        let reconciler = Arc::new(Reconciler::new(
            exchange.clone(),
            market.clone(),
            notifier.clone(),
            pending.clone(),
            mode.clone(),
            symbols.clone(),
            ReconcilerSettings::default(),
        ));
        let placer = OrderPlacer::new(exchange.clone(), market.clone(), notifier, pending.clone(), mode, paper);
        let gate = SignalGate::new(Arc::new(StubVwap::new()), Duration::from_secs(5), max_open);

        Harness {
            exchange,
            market,
            pending,
            trader: Trader::new(symbols, gate, placer, reconciler),
        }
    }

    fn liquidation(symbol: Symbol, quantity: Decimal) -> LiquidationEvent {
        liquidation_of(symbol, OrderSide::Sell, quantity)
    }

    fn liquidation_of(symbol: Symbol, side: OrderSide, quantity: Decimal) -> LiquidationEvent {
        LiquidationEvent {
            symbol,
            side,
            quantity,
            price: dec!(50000),
            order_status: OrderStatus::Filled,
            event_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_symbol_is_ignored() {
        let h = harness(SymbolConfig::default(), 5, false);
        let outcome = h
            .trader
            .handle_liquidation(&liquidation(Symbol::new("DOGEUSDT").unwrap(), dec!(1000)))
            .await;
        assert_eq!(outcome, TradeOutcome::Unconfigured);
        assert_eq!(h.exchange.place_attempts(), 0);
    }

    #[tokio::test]
    async fn test_accepted_signal_places_limit_buy() {
        let h = harness(SymbolConfig::default(), 5, false);

        let outcome = h.trader.handle_liquidation(&liquidation(btc(), dec!(1))).await;

        assert!(matches!(outcome, TradeOutcome::Attempted(PlacementOutcome::Placed { .. })));
        let placed = h.exchange.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].side, OrderSide::Buy);
        assert_eq!(placed[0].order_type, OrderType::Limit);
        assert!(h.pending.has_pending(&btc()));
    }

    #[tokio::test]
    async fn test_pending_entry_blocks_second_trigger() {
        let h = harness(SymbolConfig::default(), 5, false);
        h.pending.register(PendingOrder {
            order_id: "tmp-1".to_string(),
            symbol: btc(),
            side: OrderSide::Buy,
            submitted_at: Utc::now(),
        });

        let outcome = h.trader.handle_liquidation(&liquidation(btc(), dec!(1))).await;

        assert!(matches!(outcome, TradeOutcome::Skipped(_)));
        assert_eq!(h.exchange.place_attempts(), 0);
    }

    #[tokio::test]
    async fn test_position_limit_blocks_entry() {
        let h = harness(SymbolConfig::default(), 1, false);
        h.pending.register(PendingOrder {
            order_id: "tmp-2".to_string(),
            symbol: Symbol::new("ETHUSDT").unwrap(),
            side: OrderSide::Sell,
            submitted_at: Utc::now(),
        });

        let outcome = h.trader.handle_liquidation(&liquidation(btc(), dec!(1))).await;

        match outcome {
            TradeOutcome::Skipped(reason) => assert_eq!(reason.level, GateLevel::Warn),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_paper_mode_records_cooldown_without_orders() {
        let config = SymbolConfig {
            use_threshold: true,
            cumulative_threshold: dec!(10000),
            ..SymbolConfig::default()
        };
        let h = harness(config, 5, true);

        let first = h.trader.handle_liquidation(&liquidation(btc(), dec!(1))).await;
        let second = h.trader.handle_liquidation(&liquidation(btc(), dec!(1))).await;

        assert!(matches!(first, TradeOutcome::Attempted(PlacementOutcome::Simulated { .. })));
        assert!(matches!(second, TradeOutcome::Skipped(_)));
        assert_eq!(h.exchange.place_attempts(), 0);
    }

    #[tokio::test]
    async fn test_busy_entry_lock() {
        let h = harness(SymbolConfig::default(), 5, false);
        let _held = h.trader.entry_locks.try_acquire(&btc()).unwrap();

        let long = h.trader.handle_liquidation(&liquidation_of(btc(), OrderSide::Sell, dec!(1))).await;
        let short = h.trader.handle_liquidation(&liquidation_of(btc(), OrderSide::Buy, dec!(1))).await;

        assert_eq!(long, TradeOutcome::Busy);
        assert_eq!(short, TradeOutcome::Busy);
    }

    #[tokio::test]
    async fn test_opposite_triggers_on_one_symbol_place_once() {
        let h = harness(SymbolConfig::default(), 5, false);
        h.market.set_yield_on_quote(true);

        let sell_liq = liquidation_of(btc(), OrderSide::Sell, dec!(1));
        let buy_liq = liquidation_of(btc(), OrderSide::Buy, dec!(1));
        let (long, short) = tokio::join!(
            h.trader.handle_liquidation(&sell_liq),
            h.trader.handle_liquidation(&buy_liq),
        );

        let outcomes = [long, short];
        let placed = outcomes
            .iter()
            .filter(|o| matches!(o, TradeOutcome::Attempted(PlacementOutcome::Placed { .. })))
            .count();
        let held_off = outcomes
            .iter()
            .filter(|o| matches!(o, TradeOutcome::Busy | TradeOutcome::Skipped(_)))
            .count();
        assert_eq!((placed, held_off), (1, 1));
        assert_eq!(h.exchange.place_attempts(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_symbols_respect_position_limit() {
        let book = SymbolBook::default()
            .with_symbol(btc(), SymbolConfig::default())
            .with_symbol(eth(), SymbolConfig::default());
        let h = harness_with(book, 1, false);
        h.market.set_yield_on_quote(true);

        let btc_liq = liquidation(btc(), dec!(1));
        let eth_liq = liquidation(eth(), dec!(1));
        let (first, second) = tokio::join!(
            h.trader.handle_liquidation(&btc_liq),
            h.trader.handle_liquidation(&eth_liq),
        );

        let limited = [&first, &second]
            .into_iter()
            .filter(|o| matches!(o, TradeOutcome::Skipped(reason) if reason.level == GateLevel::Warn))
            .count();
        assert_eq!(limited, 1);
        assert_eq!(h.exchange.place_attempts(), 1);
        assert_eq!(h.pending.len(), 1);
    }
}
