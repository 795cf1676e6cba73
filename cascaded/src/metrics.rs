//! Prometheus metrics.
//!
//! Counters are fed from the event bus, so every component that notifies
//! is counted without knowing about metrics. Gauges are refreshed by the
//! `/metrics` handler just before rendering.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cascade_domain::Notification;

use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::EventReceiver;

pub struct Metrics {
    registry: Registry,
    notifications: IntCounterVec,
    order_failures: IntCounterVec,
    errors: IntCounterVec,
    open_positions: IntGauge,
    pending_entries: IntGauge,
}

impl Metrics {
    pub fn new() -> DaemonResult<Self> {
        let registry = Registry::new();

        let notifications = IntCounterVec::new(
            Opts::new("cascade_notifications_total", "Notifications broadcast, by kind"),
            &["kind"],
        )?;
        let order_failures = IntCounterVec::new(
            Opts::new("cascade_order_failures_total", "Classified order failures, by error kind"),
            &["kind"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("cascade_errors_total", "Error notifications, by category"),
            &["category"],
        )?;
        let open_positions = IntGauge::new("cascade_open_positions", "Confirmed non-flat positions")?;
        let pending_entries = IntGauge::new("cascade_pending_entries", "Entry orders awaiting confirmation")?;

        registry.register(Box::new(notifications.clone()))?;
        registry.register(Box::new(order_failures.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(open_positions.clone()))?;
        registry.register(Box::new(pending_entries.clone()))?;

        Ok(Self {
            registry,
            notifications,
            order_failures,
            errors,
            open_positions,
            pending_entries,
        })
    }

    /// Count one notification
    pub fn record(&self, notification: &Notification) {
        self.notifications.with_label_values(&[notification.kind()]).inc();
        match notification {
            Notification::OrderFailed { kind, .. } => {
                self.order_failures.with_label_values(&[kind.as_str()]).inc();
            },
            Notification::Error { category, .. } => {
                self.errors.with_label_values(&[&category.to_string()]).inc();
            },
            _ => {},
        }
    }

    pub fn set_exposure(&self, open_positions: usize, pending_entries: usize) {
        self.open_positions.set(open_positions as i64);
        self.pending_entries.set(pending_entries as i64);
    }

    /// Prometheus text exposition
    pub fn render(&self) -> DaemonResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| DaemonError::Stream(e.to_string()))
    }

    /// Count everything the receiver sees until shutdown
    pub fn spawn_collector(self: Arc<Self>, mut receiver: EventReceiver, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = receiver.recv() => match event {
                        Some(Ok(notification)) => self.record(&notification),
                        Some(Err(lagged)) => warn!(%lagged, "Metrics collector lagging"),
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("Metrics collector stopped");
        })
    }
}
