//! Event bus for outbound notifications.
//!
//! Every component reports through one [`EventBus`]:
//! - Trader / OrderPlacer → orders placed, failed, positions opened
//! - Reconciler → protection placed, positions updated/closed, balances
//! - StreamSupervisor → websocket errors
//!
//! Subscribers (metrics, external broadcasters) receive a copy of each
//! [`Notification`]. Sending never blocks and never fails the sender.

use cascade_domain::Notification;
use cascade_exec::Notifier;
use tokio::sync::broadcast;
use tracing::trace;

// =============================================================================
// Event Bus
// =============================================================================

/// Fan-out channel for [`Notification`]s.
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    ///
    /// Capacity determines how many events can be buffered before
    /// slow receivers start missing events (lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send a notification to all subscribers.
    ///
    /// Returns the number of receivers that received it; 0 without receivers.
    pub fn send(&self, notification: Notification) -> usize {
        self.sender.send(notification).unwrap_or(0)
    }

    /// Subscribe to notifications sent after this call.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl Notifier for EventBus {
    fn notify(&self, notification: Notification) {
        let kind = notification.kind();
        let receivers = self.send(notification);
        trace!(kind, receivers, "Notification sent");
    }
}

/// Receiver for notifications.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Notification>,
}

impl EventReceiver {
    /// Receive the next notification.
    ///
    /// Returns `None` if the bus has been dropped.
    /// Returns error description if the receiver lagged (missed events).
    pub async fn recv(&mut self) -> Option<Result<Notification, String>> {
        match self.receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }

    /// Try to receive a notification without blocking.
    pub fn try_recv(&mut self) -> Option<Result<Notification, String>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Closed) => None,
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_domain::{CloseReason, ErrorCategory, PositionKey, Side, Symbol};
    use rust_decimal_macros::dec;

    fn closed() -> Notification {
        Notification::PositionClosed {
            key: PositionKey::new(Symbol::new("BTCUSDT").unwrap(), Side::Long),
            realized_pnl: Some(dec!(12.5)),
            reason: CloseReason::TakeProfit,
        }
    }

    #[tokio::test]
    async fn test_event_bus_send_recv() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.send(closed());

        let event = receiver.recv().await.unwrap().unwrap();
        match event {
            Notification::PositionClosed { key, reason, .. } => {
                assert_eq!(key.to_string(), "BTCUSDT_LONG");
                assert_eq!(reason, CloseReason::TakeProfit);
            },
            _ => panic!("Expected PositionClosed"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_multiple_receivers() {
        let bus = EventBus::new(10);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();

        assert_eq!(bus.receiver_count(), 2);

        bus.notify(Notification::error(ErrorCategory::Websocket, None, "disconnected"));

        let event1 = receiver1.recv().await.unwrap().unwrap();
        let event2 = receiver2.recv().await.unwrap().unwrap();

        assert_eq!(event1.kind(), "error");
        assert_eq!(event2.kind(), "error");
    }

    #[test]
    fn test_event_bus_no_receivers() {
        let bus = EventBus::new(10);

        // Sending with no receivers must not panic
        assert_eq!(bus.send(closed()), 0);
        bus.notify(closed());
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_missed_events() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for _ in 0..5 {
            bus.send(closed());
        }

        let first = receiver.recv().await.unwrap();
        assert!(first.unwrap_err().contains("missed 3"));
    }

    #[test]
    fn test_try_recv_empty() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        assert!(receiver.try_recv().is_none());
    }
}
