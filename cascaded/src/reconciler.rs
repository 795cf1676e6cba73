//! Reconciler: the single owner of the position/protection mirror.
//!
//! Converges local state and protective orders to the exchange:
//!
//! ```text
//! startup / reconnect ──► full_sync ──► protect(key) per unprotected key
//!
//! ACCOUNT_UPDATE ──► apply_account_update ──┬─ closed  ──► CleanupClosed
//!                                           ├─ opened  ──► Protect
//!                                           ├─ resized ──► Protect
//!                                           └─ same    ──► EnsureProtected (debounced)
//!
//! ORDER_TRADE_UPDATE ──► apply_order_update ──┬─ SL/TP NEW    ──► record id
//!                                             ├─ SL/TP FILLED ──► close, CleanupClosed(sibling)
//!                                             └─ SL/TP gone   ──► EnsureProtected
//!
//! every 30s ──► sweep: orphans, duplicates, stuck entries, then protect
//! ```
//!
//! Stream handlers mutate the store synchronously and return [`FollowUp`]
//! work; the caller runs it (the supervisor spawns it, tests await it).
//! Every inspect → cancel → place sequence runs under the key's lock. A busy
//! key is skipped: the next sweep or account event re-evaluates it, so the
//! periodic sweep is part of the correctness argument.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use cascade_domain::{
    AccountPosition, AccountUpdate, CloseReason, Notification, OpenOrder, OrderId, OrderStatus, OrderUpdate,
    PendingOrder, Position, PositionKey, PositionSide, ProtectiveOrderSet, Side, Symbol,
};
use cascade_engine::{classify_sweep, orders_for_key, plan_protection, CapacitySnapshot, SweepPolicy};
use cascade_exec::{
    cancel_all, place_protective_leg, CancelOutcome, ClassifiedError, ErrorContext, ErrorDeduper, ExchangePort,
    LockTable, MarketPort, Notifier, OrderRequest, PendingOrderTracker, PositionModeCache, RetryPolicy,
};

use crate::config::{Config, SymbolBook};
use crate::error::{DaemonError, DaemonResult};
use crate::risk::{self, RiskFinding};
use crate::state::{ClosedPosition, PositionEntry, PositionStateStore};

// =============================================================================
// Settings and reports
// =============================================================================

/// Reconciler tuning
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub retry: RetryPolicy,
    pub sweep_policy: SweepPolicy,
    /// Delay before an "ensure protected" check
    pub debounce: Duration,
    pub max_open_positions: usize,
}

impl ReconcilerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.timing.cancel_attempts,
                base_delay: config.timing.cancel_backoff_base,
            },
            sweep_policy: SweepPolicy::default(),
            debounce: config.timing.ensure_protected_debounce,
            max_open_positions: config.trading.max_open_positions,
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            sweep_policy: SweepPolicy::default(),
            debounce: Duration::from_millis(100),
            max_open_positions: 5,
        }
    }
}

/// Deferred work produced by the synchronous stream handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Place or fix protection now
    Protect(PositionKey),
    /// Re-check protection after the debounce delay
    EnsureProtected(PositionKey),
    /// Cancel what is left of a closed position's protection, refresh balances
    CleanupClosed { key: PositionKey, order_ids: Vec<OrderId> },
}

/// Result of one protect pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectOutcome {
    /// Another flow holds the key
    Busy,
    /// No position for the key
    Absent,
    /// Both legs present with the right size
    AlreadyProtected,
    /// Orders were cancelled and/or placed
    Adjusted { cancelled: usize, placed: usize, failed: usize },
    /// Open orders could not be fetched
    Unavailable(String),
}

/// Result of a full sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub positions: usize,
    pub already_protected: usize,
    pub adjusted: usize,
    pub skipped: usize,
}

/// Result of a sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub closed: usize,
    pub orphaned: usize,
    pub duplicates: usize,
    pub stuck: usize,
    pub cancel_failures: usize,
    pub adjusted: usize,
}

/// Read-only view for the status API
#[derive(Debug, Clone, Serialize)]
pub struct ReconcilerSnapshot {
    pub hedge_mode: bool,
    pub positions: Vec<PositionEntry>,
    pub pending: Vec<PendingOrder>,
    pub locked: Vec<PositionKey>,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Owns [`PositionStateStore`] and the protective-order lifecycle.
pub struct Reconciler {
    exchange: Arc<dyn ExchangePort>,
    market: Arc<dyn MarketPort>,
    notifier: Arc<dyn Notifier>,
    pending: Arc<PendingOrderTracker>,
    mode: Arc<PositionModeCache>,
    symbols: Arc<SymbolBook>,
    locks: LockTable<PositionKey>,
    store: RwLock<PositionStateStore>,
    deduper: ErrorDeduper,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        exchange: Arc<dyn ExchangePort>,
        market: Arc<dyn MarketPort>,
        notifier: Arc<dyn Notifier>,
        pending: Arc<PendingOrderTracker>,
        mode: Arc<PositionModeCache>,
        symbols: Arc<SymbolBook>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            exchange,
            market,
            notifier,
            pending,
            mode,
            symbols,
            locks: LockTable::new(),
            store: RwLock::new(PositionStateStore::new()),
            deduper: ErrorDeduper::default(),
            settings,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PositionStateStore> {
        self.store.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PositionStateStore> {
        self.store.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Per-position locks (shared with nothing else; exposed for inspection)
    pub fn locks(&self) -> &LockTable<PositionKey> {
        &self.locks
    }

    /// Copy of the current store
    pub fn store_snapshot(&self) -> PositionStateStore {
        self.read().clone()
    }

    pub fn position(&self, key: &PositionKey) -> Option<Position> {
        self.read().get(key).cloned()
    }

    pub fn protection(&self, key: &PositionKey) -> ProtectiveOrderSet {
        self.read().protection(key)
    }

    // -------------------------------------------------------------------------
    // Full sync
    // -------------------------------------------------------------------------

    /// Rebuild the store from exchange snapshots, then protect every key
    /// whose orders are missing, duplicated or wrongly sized.
    pub async fn full_sync(&self) -> DaemonResult<SyncReport> {
        let positions: Vec<Position> = self
            .exchange
            .get_positions()
            .await?
            .into_iter()
            .filter(|p| !p.is_flat())
            .collect();
        let orders = self.exchange.get_open_orders(None).await?;

        let mut protection = HashMap::new();
        let mut needs_work = Vec::new();
        for position in &positions {
            let Some(key) = position.key() else {
                continue;
            };
            let plan = plan_protection(&orders_for_key(&orders, &key), position.abs_quantity());
            if !plan.resized.is_empty() {
                info!(%key, legs = ?plan.resized, quantity = %position.abs_quantity(), "Protective quantity mismatch");
            }
            if !plan.is_noop() {
                needs_work.push(key.clone());
            }
            protection.insert(key, plan.keep);
        }

        let mut report = SyncReport {
            positions: positions.len(),
            already_protected: protection.len() - needs_work.len(),
            ..SyncReport::default()
        };
        self.write().rebuild(positions, protection);

        for key in needs_work {
            match self.protect(&key).await {
                ProtectOutcome::Adjusted { .. } => report.adjusted += 1,
                ProtectOutcome::AlreadyProtected => report.already_protected += 1,
                _ => report.skipped += 1,
            }
        }

        info!(
            positions = report.positions,
            protected = report.already_protected,
            adjusted = report.adjusted,
            skipped = report.skipped,
            "Full sync complete"
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Stream updates
    // -------------------------------------------------------------------------

    /// Fold an account update into the store.
    ///
    /// A trade-driven update is authoritative for every symbol it mentions:
    /// keys it leaves out are closed. Funding fees, transfers and the like
    /// list only some positions, so they just upsert the keys they carry.
    pub fn apply_account_update(&self, update: &AccountUpdate) -> Vec<FollowUp> {
        let mentioned: HashSet<Symbol> = update.positions.iter().map(|p| p.symbol.clone()).collect();
        let authoritative = update.reason.is_trade_driven();

        let diff = {
            let mut store = self.write();
            let positions = update
                .positions
                .iter()
                .map(|p| self.hydrate(&store, p))
                .collect();
            if authoritative {
                store.replace_symbols(&mentioned, positions)
            } else {
                store.merge_positions(positions)
            }
        };

        debug!(
            reason = ?update.reason,
            authoritative,
            symbols = mentioned.len(),
            opened = diff.opened.len(),
            closed = diff.closed.len(),
            resized = diff.resized.len(),
            "Account update applied"
        );

        let mut follow_ups = Vec::new();

        for closed in diff.closed {
            follow_ups.push(self.on_closed(closed, CloseReason::External, None));
        }

        for key in diff.opened {
            let confirmed = self.pending.remove_for(key.symbol(), Some(key.side().entry_action()));
            info!(%key, pending_cleared = confirmed, "Position opened");
            follow_ups.push(FollowUp::Protect(key));
        }

        for resized in diff.resized {
            info!(
                key = %resized.key,
                previous = %resized.previous_quantity,
                quantity = %resized.quantity,
                "Position size changed"
            );
            let entry_price = self.read().get(&resized.key).map(|p| p.entry_price).unwrap_or_default();
            self.notifier.notify(Notification::PositionUpdated {
                key: resized.key.clone(),
                previous_quantity: resized.previous_quantity,
                quantity: resized.quantity,
                entry_price,
            });
            follow_ups.push(FollowUp::Protect(resized.key));
        }

        follow_ups.extend(diff.unchanged.into_iter().map(FollowUp::EnsureProtected));

        if !update.balances.is_empty() {
            self.notifier.notify(Notification::BalanceUpdated {
                balances: update.balances.clone(),
            });
        }

        follow_ups
    }

    /// Fold an order update into the store.
    pub fn apply_order_update(&self, update: &OrderUpdate) -> Vec<FollowUp> {
        let Some(leg) = update.protective_leg() else {
            self.on_other_order(update);
            return Vec::new();
        };
        let key = PositionKey::for_protective_order(&update.symbol, update.position_side, update.side);

        match update.status {
            OrderStatus::New => {
                let mut store = self.write();
                match store.protection(&key).get(leg) {
                    None => {
                        if store.set_leg(&key, leg, update.order_id) {
                            debug!(%key, %leg, order_id = update.order_id, "Protective order recorded");
                        }
                    },
                    Some(existing) if existing != update.order_id => {
                        debug!(%key, %leg, order_id = update.order_id, existing, "Extra protective order, left to the sweep");
                    },
                    Some(_) => {},
                }
                Vec::new()
            },
            OrderStatus::Filled => {
                self.notify_filled(update);
                let closed = self.write().remove(&key);
                match closed {
                    Some(closed) => {
                        let follow_up = self.on_closed(closed, leg.into(), Some(update.realized_profit));
                        match follow_up {
                            FollowUp::CleanupClosed { key, order_ids } => vec![FollowUp::CleanupClosed {
                                key,
                                order_ids: order_ids.into_iter().filter(|id| *id != update.order_id).collect(),
                            }],
                            other => vec![other],
                        }
                    },
                    None => {
                        info!(%key, %leg, pnl = %update.realized_profit, "Protective fill for a position already closed");
                        self.notifier.notify(Notification::PositionClosed {
                            key: key.clone(),
                            realized_pnl: Some(update.realized_profit),
                            reason: leg.into(),
                        });
                        vec![FollowUp::CleanupClosed {
                            key,
                            order_ids: Vec::new(),
                        }]
                    },
                }
            },
            OrderStatus::PartiallyFilled => {
                debug!(%key, %leg, filled = %update.filled_quantity, "Protective order partially filled");
                Vec::new()
            },
            OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected | OrderStatus::ExpiredInMatch => {
                let (cleared, present) = {
                    let mut store = self.write();
                    (store.clear_leg_if(&key, leg, update.order_id), store.contains(&key))
                };
                if cleared {
                    info!(%key, %leg, order_id = update.order_id, status = ?update.status, "Protective order gone");
                }
                if present {
                    vec![FollowUp::EnsureProtected(key)]
                } else {
                    Vec::new()
                }
            },
        }
    }

    /// Run deferred work in order.
    pub async fn run_follow_ups(&self, follow_ups: Vec<FollowUp>) {
        for follow_up in follow_ups {
            match follow_up {
                FollowUp::Protect(key) => {
                    self.protect(&key).await;
                },
                FollowUp::EnsureProtected(key) => {
                    if !self.settings.debounce.is_zero() {
                        tokio::time::sleep(self.settings.debounce).await;
                    }
                    self.protect(&key).await;
                },
                FollowUp::CleanupClosed { key, order_ids } => self.cleanup_closed(&key, &order_ids).await,
            }
        }
    }

    // -------------------------------------------------------------------------
    // Protection
    // -------------------------------------------------------------------------

    /// Make the key's protection exactly one correctly sized SL and TP.
    pub async fn protect(&self, key: &PositionKey) -> ProtectOutcome {
        let Some(_guard) = self.locks.try_acquire(key) else {
            debug!(%key, "Protection already in progress, skipping");
            return ProtectOutcome::Busy;
        };
        if !self.read().contains(key) {
            return ProtectOutcome::Absent;
        }

        let orders = match self.exchange.get_open_orders(Some(key.symbol())).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(%key, error = %e, "Cannot fetch open orders, protection deferred");
                return ProtectOutcome::Unavailable(e.to_string());
            },
        };

        // Re-read after the fetch: the account stream may have moved the position
        let Some(position) = self.position(key) else {
            return ProtectOutcome::Absent;
        };
        let plan = plan_protection(&orders_for_key(&orders, key), position.abs_quantity());
        if plan.is_noop() {
            self.write().set_protection(key, plan.keep);
            return ProtectOutcome::AlreadyProtected;
        }
        if !plan.resized.is_empty() {
            info!(%key, legs = ?plan.resized, quantity = %position.abs_quantity(), "Resizing protective orders");
        }

        let outcomes = cancel_all(&*self.exchange, key.symbol(), &plan.cancel, &self.settings.retry).await;
        let cancelled = outcomes.iter().filter(|(_, o)| o.is_settled()).count();
        log_failed_cancels(key.symbol(), &outcomes);

        self.write().set_protection(key, plan.keep);

        let Some(position) = self.position(key) else {
            info!(%key, "Position closed during adjustment");
            return ProtectOutcome::Adjusted {
                cancelled,
                placed: 0,
                failed: 0,
            };
        };

        let params = self.symbols.get_or_default(key.symbol()).protection_params();
        let (mut placed, mut failed) = (0, 0);
        for leg in plan.place {
            match place_protective_leg(&*self.exchange, &*self.market, &position, leg, &params).await {
                Ok(leg_order) => {
                    placed += 1;
                    self.write().set_leg(key, leg, leg_order.order_id);
                    self.notifier.notify(Notification::protection_placed(
                        leg,
                        key.clone(),
                        leg_order.order_id,
                        leg_order.stop_price,
                        leg_order.quantity,
                    ));
                },
                Err(e) => {
                    failed += 1;
                    let context = ErrorContext {
                        price: Some(position.entry_price),
                        quantity: Some(position.abs_quantity()),
                        leverage: Some(position.leverage),
                    };
                    let classified = ClassifiedError::classify(&e, key.symbol(), context);
                    if self.deduper.should_alert(&classified.fingerprint(), Utc::now()) {
                        error!(%key, %leg, error = %classified, "Protective order failed");
                    } else {
                        debug!(%key, %leg, error = %classified, "Protective order failed again");
                    }
                    self.notifier.notify(classified.to_notification());
                },
            }
        }

        ProtectOutcome::Adjusted {
            cancelled,
            placed,
            failed,
        }
    }

    // -------------------------------------------------------------------------
    // Periodic maintenance
    // -------------------------------------------------------------------------

    /// Compare against fresh snapshots and cancel orphaned, duplicate and
    /// stuck orders, then fix protection of every live key.
    pub async fn sweep(&self) -> DaemonResult<SweepReport> {
        let positions = self.exchange.get_positions().await?;
        let orders = self.exchange.get_open_orders(None).await?;
        let mut report = SweepReport::default();

        let diff = self.write().replace_all(positions);
        report.closed = diff.closed.len();
        for closed in diff.closed {
            let follow_up = self.on_closed(closed, CloseReason::External, None);
            self.run_follow_ups(vec![follow_up]).await;
        }
        for resized in &diff.resized {
            info!(key = %resized.key, previous = %resized.previous_quantity, quantity = %resized.quantity, "Sweep found resized position");
        }

        let active = self.read().active_keys();
        let classification = classify_sweep(&orders, &active, Utc::now(), &self.settings.sweep_policy);
        report.orphaned = classification.orphaned.len();
        report.duplicates = classification.duplicates.len();
        report.stuck = classification.stuck.len();

        let mut gone: HashSet<OrderId> = HashSet::new();

        report.cancel_failures += self.cancel_orders(&classification.orphaned, "orphaned", &mut gone).await;
        report.cancel_failures += self.cancel_orders(&classification.stuck, "stuck", &mut gone).await;
        for order in &classification.stuck {
            if gone.contains(&order.order_id) {
                self.pending.remove(&order.order_id.to_string());
            }
        }

        // Duplicates belong to live keys: only touch keys no one else holds
        let mut duplicates: HashMap<PositionKey, Vec<OpenOrder>> = HashMap::new();
        for order in classification.duplicates {
            duplicates.entry(order.protected_key()).or_default().push(order);
        }
        for (key, orders) in duplicates {
            let Some(_guard) = self.locks.try_acquire(&key) else {
                debug!(%key, "Key busy, duplicates left for the next sweep");
                continue;
            };
            report.cancel_failures += self.cancel_orders(&orders, "duplicate", &mut gone).await;
        }

        {
            let mut store = self.write();
            for id in &gone {
                if let Some((key, leg)) = store.leg_of_order(*id) {
                    store.clear_leg_if(&key, leg, *id);
                }
            }
        }

        let remaining: Vec<OpenOrder> = orders.into_iter().filter(|o| !gone.contains(&o.order_id)).collect();
        let mut keys: Vec<PositionKey> = active.into_iter().collect();
        keys.sort();
        for key in keys {
            let Some(position) = self.position(&key) else {
                continue;
            };
            let plan = plan_protection(&orders_for_key(&remaining, &key), position.abs_quantity());
            if plan.is_noop() {
                self.write().set_protection(&key, plan.keep);
                continue;
            }
            if let ProtectOutcome::Adjusted { .. } = self.protect(&key).await {
                report.adjusted += 1;
            }
        }

        if report != SweepReport::default() {
            info!(
                closed = report.closed,
                orphaned = report.orphaned,
                duplicates = report.duplicates,
                stuck = report.stuck,
                cancel_failures = report.cancel_failures,
                adjusted = report.adjusted,
                "Sweep complete"
            );
        } else {
            debug!("Sweep found nothing to do");
        }
        Ok(report)
    }

    /// Cancel closing orders whose position no longer exists.
    ///
    /// Uses fresh snapshots only; the store is not touched.
    pub async fn cleanup_orphans(&self) -> DaemonResult<usize> {
        let positions = self.exchange.get_positions().await?;
        let orders = self.exchange.get_open_orders(None).await?;
        let active: HashSet<PositionKey> = positions.iter().filter_map(Position::key).collect();

        let classification = classify_sweep(&orders, &active, Utc::now(), &self.settings.sweep_policy);
        if classification.orphaned.is_empty() {
            return Ok(0);
        }

        let mut gone = HashSet::new();
        self.cancel_orders(&classification.orphaned, "orphaned", &mut gone).await;
        info!(cancelled = gone.len(), found = classification.orphaned.len(), "Orphan cleanup complete");
        Ok(gone.len())
    }

    /// Check the store against risk limits and broadcast every finding.
    pub fn risk_check(&self) -> Vec<RiskFinding> {
        let entries = self.read().entries();
        let capacity = self.capacity_snapshot_for(None);
        let findings = risk::assess(&entries, &capacity, &self.symbols, self.settings.max_open_positions);

        for finding in &findings {
            warn!(symbol = ?finding.symbol, kind = ?finding.kind, message = %finding.message, "Risk warning");
            self.notifier.notify(finding.to_notification());
        }
        findings
    }

    // -------------------------------------------------------------------------
    // Explicit close
    // -------------------------------------------------------------------------

    /// Close a position with a reduce-only MARKET order for its full size.
    pub async fn close_position(&self, symbol: &Symbol, side: Side) -> DaemonResult<OrderId> {
        let key = PositionKey::new(symbol.clone(), side);
        let guard = self.locks.try_acquire(&key).ok_or_else(|| DaemonError::Busy(key.clone()))?;
        let position = self.position(&key).ok_or_else(|| DaemonError::NotFound(key.clone()))?;

        let mut request = OrderRequest::market(
            symbol.clone(),
            side.exit_action(),
            position.abs_quantity(),
            position.position_side,
        );
        request.reduce_only = position.position_side == PositionSide::Both;

        let ack = match self.exchange.place_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                let context = ErrorContext {
                    price: Some(position.mark_price),
                    quantity: Some(position.abs_quantity()),
                    leverage: Some(position.leverage),
                };
                let classified = ClassifiedError::classify(&e, symbol, context);
                error!(%key, error = %classified, "Close order failed");
                self.notifier.notify(classified.to_notification());
                return Err(e.into());
            },
        };
        info!(%key, order_id = ack.order_id, quantity = %request.quantity, "Close order placed");

        let closed = self.write().remove(&key);
        drop(guard);
        if let Some(closed) = closed {
            let follow_up = self.on_closed(closed, CloseReason::Manual, None);
            self.run_follow_ups(vec![follow_up]).await;
        }
        Ok(ack.order_id)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Exposure for a capacity check on `symbol`
    pub fn capacity_snapshot(&self, symbol: &Symbol) -> CapacitySnapshot {
        self.capacity_snapshot_for(Some(symbol))
    }

    fn capacity_snapshot_for(&self, symbol: Option<&Symbol>) -> CapacitySnapshot {
        let store = self.read();
        CapacitySnapshot {
            hedge_mode: self.mode.is_hedge(),
            position_symbols: store.position_symbols(),
            pending_symbols: self.pending.pending_symbols(),
            symbol_margin: symbol.map(|s| store.symbol_margin(s)).unwrap_or_default(),
        }
    }

    /// Everything the status API shows
    pub fn snapshot(&self) -> ReconcilerSnapshot {
        let mut locked = self.locks.held();
        locked.sort();
        ReconcilerSnapshot {
            hedge_mode: self.mode.is_hedge(),
            positions: self.read().entries(),
            pending: self.pending.list(),
            locked,
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Fill the fields the account stream omits from the previous snapshot
    fn hydrate(&self, store: &PositionStateStore, reported: &AccountPosition) -> Position {
        let previous = PositionKey::for_position(&reported.symbol, reported.position_side, reported.amount)
            .and_then(|key| store.get(&key));
        let leverage = reported
            .leverage
            .or_else(|| previous.map(|p| p.leverage))
            .unwrap_or_else(|| self.symbols.get(&reported.symbol).map(|c| c.leverage).unwrap_or(1));
        let mark_price = reported
            .mark_price
            .or_else(|| previous.map(|p| p.mark_price))
            .unwrap_or(reported.entry_price);

        Position {
            symbol: reported.symbol.clone(),
            amount: reported.amount,
            entry_price: reported.entry_price,
            mark_price,
            leverage,
            margin_type: reported.margin_type,
            isolated_margin: reported.isolated_margin,
            position_side: reported.position_side,
            unrealized_pnl: reported.unrealized_pnl,
        }
    }

    /// Synchronous part of a closure: bookkeeping and broadcast
    fn on_closed(&self, closed: ClosedPosition, reason: CloseReason, realized_pnl: Option<Decimal>) -> FollowUp {
        let key = closed.key;
        let pending_cleared = self.pending.remove_for(key.symbol(), Some(key.side().entry_action()));
        self.locks.release(&key);

        info!(
            %key,
            %reason,
            quantity = %closed.position.abs_quantity(),
            pnl = ?realized_pnl,
            pending_cleared,
            "Position closed"
        );
        self.notifier.notify(Notification::PositionClosed {
            key: key.clone(),
            realized_pnl,
            reason,
        });

        FollowUp::CleanupClosed {
            key,
            order_ids: closed.protection.ids(),
        }
    }

    /// Cancel leftover protection of a closed key and refresh balances
    async fn cleanup_closed(&self, key: &PositionKey, order_ids: &[OrderId]) {
        let _guard = self.locks.try_acquire(key);
        let mut ids: Vec<OrderId> = order_ids.to_vec();

        if self.read().contains(key) {
            debug!(%key, "Position reopened, cancelling recorded orders only");
        } else {
            match self.exchange.get_open_orders(Some(key.symbol())).await {
                Ok(orders) => ids.extend(orders_for_key(&orders, key).iter().map(|o| o.order_id)),
                Err(e) => warn!(%key, error = %e, "Cannot fetch open orders for closed position"),
            }
        }
        ids.sort_unstable();
        ids.dedup();

        if !ids.is_empty() {
            let outcomes = cancel_all(&*self.exchange, key.symbol(), &ids, &self.settings.retry).await;
            log_failed_cancels(key.symbol(), &outcomes);
            debug!(%key, cancelled = outcomes.iter().filter(|(_, o)| o.is_settled()).count(), "Closed position cleaned up");
        }

        match self.exchange.get_balance().await {
            Ok(balances) => self.notifier.notify(Notification::BalanceUpdated { balances }),
            Err(e) => warn!(error = %e, "Balance refresh failed"),
        }
    }

    /// Cancel a batch of orders grouped by symbol; returns the failure count
    async fn cancel_orders(&self, orders: &[OpenOrder], category: &str, gone: &mut HashSet<OrderId>) -> usize {
        let mut by_symbol: HashMap<&Symbol, Vec<OrderId>> = HashMap::new();
        for order in orders {
            by_symbol.entry(&order.symbol).or_default().push(order.order_id);
        }

        let mut failures = 0;
        for (symbol, ids) in by_symbol {
            for (order_id, outcome) in cancel_all(&*self.exchange, symbol, &ids, &self.settings.retry).await {
                match outcome {
                    CancelOutcome::Cancelled => {
                        info!(%symbol, order_id, category, "Order cancelled");
                        gone.insert(order_id);
                    },
                    CancelOutcome::AlreadyGone => {
                        debug!(%symbol, order_id, category, "Order already gone");
                        gone.insert(order_id);
                    },
                    CancelOutcome::Failed(reason) => {
                        warn!(%symbol, order_id, category, %reason, "Cancel failed, retrying next tick");
                        failures += 1;
                    },
                }
            }
        }
        failures
    }

    fn notify_filled(&self, update: &OrderUpdate) {
        self.notifier.notify(Notification::OrderFilled {
            symbol: update.symbol.clone(),
            side: update.side,
            order_id: update.order_id,
            order_type: update.order_type,
            quantity: update.filled_quantity,
            avg_price: update.avg_price,
        });
    }

    /// Entry orders and non-protective closing orders
    fn on_other_order(&self, update: &OrderUpdate) {
        let terminal = matches!(
            update.status,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Rejected
                | OrderStatus::ExpiredInMatch
        );
        if terminal && !update.is_closing() {
            if self.pending.remove(&update.order_id.to_string()).is_some() {
                debug!(symbol = %update.symbol, order_id = update.order_id, status = ?update.status, "Pending entry settled");
            }
        }
        if update.status == OrderStatus::Filled {
            info!(
                symbol = %update.symbol,
                order_id = update.order_id,
                side = %update.side,
                quantity = %update.filled_quantity,
                price = %update.avg_price,
                "Order filled"
            );
            self.notify_filled(update);
        }
    }
}

fn log_failed_cancels(symbol: &Symbol, outcomes: &[(OrderId, CancelOutcome)]) {
    for (order_id, outcome) in outcomes {
        if let CancelOutcome::Failed(reason) = outcome {
            warn!(%symbol, order_id, %reason, "Cancel failed after retries, proceeding");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
