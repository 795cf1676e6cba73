//! Stream supervisor: keeps both WebSocket feeds alive and routes frames.
//!
//! ```text
//! liquidation feed ──► dispatch ──► Trader::handle_liquidation (spawned)
//! user-data feed   ──► dispatch ──► Reconciler::apply_* ──► follow-ups (spawned)
//! ```
//!
//! Each feed reconnects after `reconnect_delay` whenever it drops. The
//! user-data feed creates a fresh listen key per connection, runs a full
//! sync once connected, renews the key on a timer and closes it on
//! shutdown. An expired listen key forces a reconnect.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cascade_connectors::{liquidation_url, user_stream_url, BinanceStreamClient, BinanceWsError, StreamFrame};
use cascade_domain::{ErrorCategory, Notification, StreamEvent};
use cascade_exec::{Notifier, UserStreamPort};

use crate::config::TimingConfig;
use crate::reconciler::Reconciler;
use crate::trader::Trader;

/// Frames buffered between a socket and its dispatcher
const FRAME_BUFFER: usize = 1024;

/// What the reader should do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Reconnect,
}

enum Ended {
    Closed(Result<(), BinanceWsError>),
    Reconnect,
    Shutdown,
}

pub struct StreamSupervisor {
    ws_base: String,
    trader: Arc<Trader>,
    reconciler: Arc<Reconciler>,
    user_stream: Option<Arc<dyn UserStreamPort>>,
    notifier: Arc<dyn Notifier>,
    timing: TimingConfig,
    shutdown: CancellationToken,
}

impl StreamSupervisor {
    pub fn new(
        ws_base: impl Into<String>,
        trader: Arc<Trader>,
        reconciler: Arc<Reconciler>,
        user_stream: Option<Arc<dyn UserStreamPort>>,
        notifier: Arc<dyn Notifier>,
        timing: TimingConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ws_base: ws_base.into(),
            trader,
            reconciler,
            user_stream,
            notifier,
            timing,
            shutdown,
        }
    }

    pub fn has_user_stream(&self) -> bool {
        self.user_stream.is_some()
    }

    // =========================================================================
    // Feeds
    // =========================================================================

    /// Public liquidation feed, reconnecting until shutdown.
    pub async fn run_liquidation_stream(&self) {
        let url = liquidation_url(&self.ws_base);

        while !self.shutdown.is_cancelled() {
            let (tx, mut rx) = mpsc::channel(FRAME_BUFFER);
            match BinanceStreamClient::connect("liquidations", &url, tx).await {
                Ok(mut client) => {
                    let ended = tokio::select! {
                        result = client.run() => Ended::Closed(result),
                        flow = self.pump(&mut rx) => flow_end(flow),
                        _ = self.shutdown.cancelled() => Ended::Shutdown,
                    };
                    client.close().await;
                    if self.report_end("liquidations", ended) {
                        break;
                    }
                },
                Err(e) => self.report_connect_failure("liquidations", &e),
            }
            self.pause().await;
        }
        info!("Liquidation stream stopped");
    }

    /// Private user-data feed, reconnecting until shutdown.
    pub async fn run_user_stream(&self) {
        let Some(session) = self.user_stream.clone() else {
            info!("No credentials, user stream disabled");
            return;
        };

        while !self.shutdown.is_cancelled() {
            let listen_key = match session.create_listen_key().await {
                Ok(key) => key,
                Err(e) => {
                    error!(error = %e, "Failed to create listen key");
                    self.notifier.notify(Notification::error(
                        ErrorCategory::Websocket,
                        None,
                        format!("listen key: {}", e),
                    ));
                    self.pause().await;
                    continue;
                },
            };

            let (tx, mut rx) = mpsc::channel(FRAME_BUFFER);
            let url = user_stream_url(&self.ws_base, &listen_key);
            match BinanceStreamClient::connect("user", &url, tx).await {
                Ok(mut client) => {
                    // Connected first so nothing between snapshot and stream is lost
                    if let Err(e) = self.reconciler.full_sync().await {
                        warn!(error = %e, "Full sync failed, relying on the next sweep");
                    }

                    let period = self.timing.listen_key_keepalive;
                    let keepalive = async {
                        let mut ticker = interval_at(Instant::now() + period, period);
                        loop {
                            ticker.tick().await;
                            match session.keepalive_listen_key(&listen_key).await {
                                Ok(()) => debug!("Listen key renewed"),
                                Err(e) => warn!(error = %e, "Listen key keepalive failed"),
                            }
                        }
                    };

                    let ended = tokio::select! {
                        result = client.run() => Ended::Closed(result),
                        flow = self.pump(&mut rx) => flow_end(flow),
                        _ = keepalive => Ended::Reconnect,
                        _ = self.shutdown.cancelled() => Ended::Shutdown,
                    };
                    client.close().await;

                    let stopping = self.report_end("user", ended);
                    if let Err(e) = session.close_listen_key(&listen_key).await {
                        debug!(error = %e, "Listen key close failed");
                    }
                    if stopping {
                        break;
                    }
                },
                Err(e) => self.report_connect_failure("user", &e),
            }
            self.pause().await;
        }
        info!("User stream stopped");
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Route one frame. Handlers run on spawned tasks; store updates from
    /// the user stream are applied before this returns.
    pub fn dispatch(&self, frame: StreamFrame) -> Flow {
        let event = match frame {
            StreamFrame::Event(event) => event,
            StreamFrame::Malformed(reason) => {
                self.notifier
                    .notify(Notification::error(ErrorCategory::Websocket, None, reason));
                return Flow::Continue;
            },
        };

        match event {
            StreamEvent::Liquidation(liquidation) => {
                let trader = self.trader.clone();
                tokio::spawn(async move {
                    trader.handle_liquidation(&liquidation).await;
                });
            },
            StreamEvent::Account(update) => {
                let follow_ups = self.reconciler.apply_account_update(&update);
                self.spawn_follow_ups(follow_ups);
            },
            StreamEvent::Order(update) => {
                let follow_ups = self.reconciler.apply_order_update(&update);
                self.spawn_follow_ups(follow_ups);
            },
            StreamEvent::ListenKeyExpired => {
                warn!("Listen key expired, reconnecting user stream");
                return Flow::Reconnect;
            },
        }
        Flow::Continue
    }

    fn spawn_follow_ups(&self, follow_ups: Vec<crate::reconciler::FollowUp>) {
        if follow_ups.is_empty() {
            return;
        }
        let reconciler = self.reconciler.clone();
        tokio::spawn(async move {
            reconciler.run_follow_ups(follow_ups).await;
        });
    }

    async fn pump(&self, rx: &mut mpsc::Receiver<StreamFrame>) -> Flow {
        while let Some(frame) = rx.recv().await {
            if self.dispatch(frame) == Flow::Reconnect {
                return Flow::Reconnect;
            }
        }
        Flow::Continue
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Log why a connection ended; true when the feed should stop
    fn report_end(&self, stream: &'static str, ended: Ended) -> bool {
        match ended {
            Ended::Shutdown => true,
            Ended::Reconnect => {
                info!(stream, "Reconnecting");
                false
            },
            Ended::Closed(Ok(())) => {
                info!(stream, "Stream closed");
                false
            },
            Ended::Closed(Err(e)) => {
                warn!(stream, error = %e, "Stream dropped");
                self.notifier.notify(Notification::error(
                    ErrorCategory::Websocket,
                    None,
                    format!("{} stream: {}", stream, e),
                ));
                false
            },
        }
    }

    fn report_connect_failure(&self, stream: &'static str, e: &BinanceWsError) {
        error!(stream, error = %e, "Connection failed");
        self.notifier.notify(Notification::error(
            ErrorCategory::Websocket,
            None,
            format!("{} stream: {}", stream, e),
        ));
    }

    /// Wait out the reconnect delay, returning early on shutdown
    async fn pause(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.timing.reconnect_delay) => {},
            _ = self.shutdown.cancelled() => {},
        }
    }
}

fn flow_end(flow: Flow) -> Ended {
    match flow {
        Flow::Reconnect => Ended::Reconnect,
        // Sender gone: the socket task ended first
        Flow::Continue => Ended::Closed(Ok(())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SymbolBook, TimingConfig};
    use crate::reconciler::ReconcilerSettings;
    use crate::signal_gate::SignalGate;
    use cascade_domain::{
        AccountPosition, AccountUpdate, MarginType, PositionKey, PositionSide, Side, Symbol, UpdateReason,
    };
    use cascade_exec::{
        OrderPlacer, PendingOrderTracker, PositionModeCache, RecordingNotifier, StubExchange, StubMarket, StubVwap,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn supervisor() -> (StreamSupervisor, Arc<Reconciler>, Arc<RecordingNotifier>) {
        let exchange = Arc::new(StubExchange::new());
        let market = Arc::new(StubMarket::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let pending = Arc::new(PendingOrderTracker::default());
        let mode = Arc::new(PositionModeCache::new(false));
        let symbols = Arc::new(SymbolBook::default());

        let reconciler = Arc::new(Reconciler::new(
            exchange.clone(),
            market.clone(),
            notifier.clone(),
            pending.clone(),
            mode.clone(),
            symbols.clone(),
            ReconcilerSettings::default(),
        ));
        let placer = OrderPlacer::new(exchange.clone(), market, notifier.clone(), pending, mode, true);
        let gate = SignalGate::new(Arc::new(StubVwap::new()), Duration::from_secs(5), 5);
        let trader = Arc::new(Trader::new(symbols, gate, placer, reconciler.clone()));

        let supervisor = StreamSupervisor::new(
            "ws://127.0.0.1:9",
            trader,
            reconciler.clone(),
            Some(exchange as Arc<dyn UserStreamPort>),
            notifier.clone(),
            TimingConfig::test(),
            CancellationToken::new(),
        );
        (supervisor, reconciler, notifier)
    }

    #[tokio::test]
    async fn test_expired_listen_key_requests_reconnect() {
        let (supervisor, _, _) = supervisor();
        let flow = supervisor.dispatch(StreamFrame::Event(StreamEvent::ListenKeyExpired));
        assert_eq!(flow, Flow::Reconnect);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_broadcast() {
        let (supervisor, _, notifier) = supervisor();

        let flow = supervisor.dispatch(StreamFrame::Malformed("missing field `o`".to_string()));

        assert_eq!(flow, Flow::Continue);
        assert_eq!(notifier.kinds(), vec!["error"]);
    }

    #[tokio::test]
    async fn test_account_update_applied_before_return() {
        let (supervisor, reconciler, _) = supervisor();
        let symbol = Symbol::new("ETHUSDT").unwrap();
        let update = AccountUpdate {
            reason: UpdateReason::Order,
            event_time: Utc::now(),
            positions: vec![AccountPosition {
                symbol: symbol.clone(),
                amount: dec!(-2),
                entry_price: dec!(3000),
                mark_price: None,
                leverage: None,
                margin_type: MarginType::Cross,
                isolated_margin: dec!(0),
                position_side: PositionSide::Both,
                unrealized_pnl: dec!(0),
            }],
            balances: vec![],
        };

        supervisor.dispatch(StreamFrame::Event(StreamEvent::Account(update)));

        assert!(reconciler.position(&PositionKey::new(symbol, Side::Short)).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_stops_reconnect_loop() {
        let (supervisor, _, _) = supervisor();
        supervisor.shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), supervisor.run_liquidation_stream())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), supervisor.run_user_stream())
            .await
            .unwrap();
    }
}
