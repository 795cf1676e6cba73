//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Trader (liquidation → entry order)
//! - Reconciler (position mirror, protective orders)
//! - Stream Supervisor (liquidation and user-data feeds)
//! - Event Bus + Metrics (outbound notifications)
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Refresh position mode and sync positions from the exchange
//! 4. Start API server, streams and timers
//! 5. Wait for SIGINT or a shutdown request
//! 6. Cancel every task, close the listen key

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cascade_connectors::BinanceFuturesClient;
use cascade_domain::ApiCredentials;
use cascade_exec::{
    ExchangePort, MarketPort, OrderPlacer, PendingOrderTracker, PositionModeCache, StubExchange, StubMarket,
    StubVwap, UserStreamPort, VwapPort,
};

use crate::api::{create_router, ApiState};
use crate::config::{Config, Environment};
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::EventBus;
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::signal_gate::SignalGate;
use crate::supervisor::StreamSupervisor;
use crate::trader::Trader;

/// How long shutdown waits for each task
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// Ports
// =============================================================================

/// Exchange-facing collaborators.
pub struct Ports {
    pub exchange: Arc<dyn ExchangePort>,
    pub market: Arc<dyn MarketPort>,
    pub vwap: Arc<dyn VwapPort>,
    /// `None` disables the user-data stream
    pub user_stream: Option<Arc<dyn UserStreamPort>>,
    /// Signed endpoints usable: enables live orders, sync and the timers
    pub signed: bool,
}

// =============================================================================
// Daemon
// =============================================================================

/// The main cascade daemon.
pub struct Daemon {
    config: Config,
    event_bus: Arc<EventBus>,
    metrics: Arc<Metrics>,
    reconciler: Arc<Reconciler>,
    trader: Arc<Trader>,
    supervisor: Arc<StreamSupervisor>,
    pending: Arc<PendingOrderTracker>,
    signed: bool,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Create a new daemon with stub components (for testing/development).
    ///
    /// Streams are not started in the test environment.
    pub fn new_stub(config: Config) -> DaemonResult<Self> {
        let exchange = Arc::new(StubExchange::new());
        let ports = Ports {
            exchange,
            market: Arc::new(StubMarket::new()),
            vwap: Arc::new(StubVwap::new()),
            user_stream: None,
            signed: true,
        };
        Self::new(config, ports)
    }

    /// Create a daemon talking to Binance.
    ///
    /// Without credentials only the public liquidation feed runs and every
    /// entry is simulated.
    pub fn live(config: Config) -> DaemonResult<Self> {
        let signed = config.has_credentials();
        let credentials = config.credentials.clone().unwrap_or_else(|| ApiCredentials::new("", ""));
        let client = Arc::new(BinanceFuturesClient::with_base_url(credentials, config.environment.rest_url()));

        if !signed {
            warn!("No API credentials: paper mode, no user stream, no reconciliation");
        }

        let ports = Ports {
            exchange: client.clone(),
            market: client.clone(),
            vwap: client.clone(),
            user_stream: signed.then(|| client as Arc<dyn UserStreamPort>),
            signed,
        };
        Self::new(config, ports)
    }

    /// Create a new daemon with provided components.
    pub fn new(config: Config, ports: Ports) -> DaemonResult<Self> {
        for symbol in config.symbols.symbols() {
            config.symbols.get_or_default(&symbol).validate(&symbol)?;
        }

        let paper = config.trading.paper_mode || !ports.signed;
        let event_bus = Arc::new(EventBus::default());
        let metrics = Arc::new(Metrics::new()?);
        let pending = Arc::new(PendingOrderTracker::default());
        let mode = Arc::new(PositionModeCache::new(config.trading.hedge_mode));
        let symbols = Arc::new(config.symbols.clone());
        let shutdown = CancellationToken::new();

        let reconciler = Arc::new(Reconciler::new(
            ports.exchange.clone(),
            ports.market.clone(),
            event_bus.clone(),
            pending.clone(),
            mode.clone(),
            symbols.clone(),
            ReconcilerSettings::from_config(&config),
        ));

        let placer = OrderPlacer::new(
            ports.exchange.clone(),
            ports.market.clone(),
            event_bus.clone(),
            pending.clone(),
            mode,
            paper,
        );
        let gate = SignalGate::new(ports.vwap, config.timing.vwap_max_age, config.trading.max_open_positions);
        let trader = Arc::new(Trader::new(symbols, gate, placer, reconciler.clone()));

        let supervisor = Arc::new(StreamSupervisor::new(
            config.environment.ws_url(),
            trader.clone(),
            reconciler.clone(),
            ports.user_stream,
            event_bus.clone(),
            config.timing.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            event_bus,
            metrics,
            reconciler,
            trader,
            supervisor,
            pending,
            signed: ports.signed,
            shutdown,
        })
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Token that stops [`Daemon::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_paper(&self) -> bool {
        self.trader.is_paper()
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT or the
    /// shutdown token).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            paper_mode = self.is_paper(),
            symbols = self.config.symbols.len(),
            max_open_positions = self.config.trading.max_open_positions,
            "Starting cascade daemon"
        );

        // 1. Position mode and initial state
        if self.signed {
            if let Err(e) = self.trader.placer().refresh_position_mode().await {
                warn!(error = %e, "Could not read position mode, keeping configured value");
            }
            match self.reconciler.full_sync().await {
                Ok(report) => info!(positions = report.positions, "Initial sync complete"),
                Err(e) => warn!(error = %e, "Initial sync failed, relying on the sweep"),
            }
        }

        // 2. API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Background tasks
        let mut tasks = vec![self
            .metrics
            .clone()
            .spawn_collector(self.event_bus.subscribe(), self.shutdown.clone())];
        tasks.extend(self.spawn_streams());
        tasks.extend(self.spawn_timers());

        // 4. Wait for shutdown
        info!("Entering main loop");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
            _ = self.shutdown.cancelled() => info!("Shutdown requested"),
        }

        // 5. Graceful shutdown
        self.shutdown(tasks).await
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            reconciler: self.reconciler.clone(),
            metrics: self.metrics.clone(),
            paper_mode: self.is_paper(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = server.await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    fn spawn_streams(&self) -> Vec<JoinHandle<()>> {
        if self.config.environment == Environment::Test {
            debug!("Test environment, streams not started");
            return Vec::new();
        }

        let mut tasks = Vec::new();
        let supervisor = self.supervisor.clone();
        tasks.push(tokio::spawn(async move { supervisor.run_liquidation_stream().await }));

        if self.supervisor.has_user_stream() {
            let supervisor = self.supervisor.clone();
            tasks.push(tokio::spawn(async move { supervisor.run_user_stream().await }));
        }
        tasks
    }

    fn spawn_timers(&self) -> Vec<JoinHandle<()>> {
        let timing = &self.config.timing;
        let mut tasks = Vec::new();

        let pending = self.pending.clone();
        tasks.push(self.spawn_periodic("pending-prune", timing.pending_prune_interval, move || {
            let pending = pending.clone();
            async move {
                let pruned = pending.prune_stale();
                if pruned > 0 {
                    info!(pruned, "Dropped stale pending entries");
                }
            }
        }));

        let reconciler = self.reconciler.clone();
        tasks.push(self.spawn_periodic("risk-check", timing.risk_check_interval, move || {
            let reconciler = reconciler.clone();
            async move {
                reconciler.risk_check();
            }
        }));

        if !self.signed {
            return tasks;
        }

        let reconciler = self.reconciler.clone();
        tasks.push(self.spawn_periodic("sweep", timing.sweep_interval, move || {
            let reconciler = reconciler.clone();
            async move {
                if let Err(e) = reconciler.sweep().await {
                    warn!(error = %e, "Sweep failed");
                }
            }
        }));

        let reconciler = self.reconciler.clone();
        tasks.push(self.spawn_periodic("orphan-cleanup", timing.orphan_cleanup_interval, move || {
            let reconciler = reconciler.clone();
            async move {
                if let Err(e) = reconciler.cleanup_orphans().await {
                    warn!(error = %e, "Orphan cleanup failed");
                }
            }
        }));

        let trader = self.trader.clone();
        tasks.push(self.spawn_periodic("mode-resync", timing.mode_resync_interval, move || {
            let trader = trader.clone();
            async move {
                if let Err(e) = trader.placer().refresh_position_mode().await {
                    warn!(error = %e, "Position mode resync failed");
                }
            }
        }));

        tasks
    }

    /// Run `task` every `period` (first run after one period) until shutdown.
    ///
    /// Runs never overlap: a slow run delays the next tick.
    fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, task: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => task().await,
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!(timer = name, "Timer stopped");
        })
    }

    /// Graceful shutdown.
    async fn shutdown(&self, tasks: Vec<JoinHandle<()>>) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");
        self.shutdown.cancel();

        for task in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(error = %e, "Task ended abnormally"),
                Err(_) => warn!("Task did not stop in time"),
            }
        }

        let snapshot = self.reconciler.snapshot();
        info!(
            open_positions = snapshot.positions.len(),
            pending_entries = snapshot.pending.len(),
            "Shutdown complete"
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SymbolBook, SymbolConfig};
    use cascade_domain::{MarginType, OrderSide, OrderType, Position, PositionSide, Symbol};
    use rust_decimal_macros::dec;

    fn stub_ports(exchange: Arc<StubExchange>) -> Ports {
        Ports {
            exchange,
            market: Arc::new(StubMarket::new()),
            vwap: Arc::new(StubVwap::new()),
            user_stream: None,
            signed: true,
        }
    }

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();

        assert!(!daemon.is_paper());
        assert!(daemon.reconciler().snapshot().positions.is_empty());
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();

        let addr = daemon.start_api_server().await.unwrap();

        assert!(addr.port() > 0);
        daemon.shutdown_token().cancel();
    }

    #[test]
    fn test_invalid_symbol_config_is_rejected() {
        let mut config = Config::test();
        config.symbols = SymbolBook::default().with_symbol(
            Symbol::new("BTCUSDT").unwrap(),
            SymbolConfig {
                leverage: 0,
                ..SymbolConfig::default()
            },
        );

        assert!(matches!(Daemon::new_stub(config), Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_unsigned_ports_force_paper_mode() {
        let mut ports = stub_ports(Arc::new(StubExchange::new()));
        ports.signed = false;

        let daemon = Daemon::new(Config::test(), ports).unwrap();

        assert!(daemon.is_paper());
    }

    #[tokio::test]
    async fn test_run_syncs_sweeps_and_stops() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_positions(vec![Position {
            symbol: Symbol::new("BTCUSDT").unwrap(),
            amount: dec!(0.01),
            entry_price: dec!(50000),
            mark_price: dec!(50000),
            leverage: 10,
            margin_type: MarginType::Cross,
            isolated_margin: dec!(0),
            position_side: PositionSide::Both,
            unrealized_pnl: dec!(0),
        }]);
        let orphan = exchange.seed_order(
            Symbol::new("ETHUSDT").unwrap(),
            OrderSide::Buy,
            OrderType::StopMarket,
            dec!(1),
            true,
            120,
        );

        let daemon = Daemon::new(Config::test(), stub_ports(exchange.clone())).unwrap();
        let token = daemon.shutdown_token();
        let handle = tokio::spawn(daemon.run());

        // Sweep interval is 200ms in the test timing
        tokio::time::sleep(Duration::from_millis(600)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let resting = exchange.open_orders_snapshot();
        assert_eq!(resting.len(), 2);
        assert!(resting.iter().all(|o| o.symbol.as_str() == "BTCUSDT"));
        assert!(exchange.cancelled_orders().contains(&orphan));
    }
}
