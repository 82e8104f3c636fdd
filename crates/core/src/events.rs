//! Engine → caller notifications
//!
//! The automatic scheduler reports everything a UI or automation layer needs
//! through seven notifications. They are delivered two ways:
//!
//! - a [`DialerEventHandler`] implementation installed with
//!   `PowerDialer::set_event_handler`, called in event order from a single task
//! - a `tokio::sync::broadcast` channel returned by `PowerDialer::subscribe`
//!
//! ```rust
//! use async_trait::async_trait;
//! use powerdial_core::events::DialerEventHandler;
//! use powerdial_core::types::ActiveCall;
//!
//! struct Screen;
//!
//! #[async_trait]
//! impl DialerEventHandler for Screen {
//!     async fn on_call_answered(&self, call: ActiveCall) {
//!         println!("Connected to {}", call.contact.name);
//!     }
//! }
//! ```

use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::session::SessionStatus;
use crate::stats::DialerStats;
use crate::types::{ActiveCall, QueueItem, SessionId};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Scheduler notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DialerEvent {
    /// A call won arbitration and now holds the operator
    CallAnswered { call: ActiveCall },
    /// A call answered while the operator was engaged and was hung up
    CallDroppedBusy { call: ActiveCall, queue_item: QueueItem },
    /// A call ended without being answered
    CallNoAnswer { call: ActiveCall, queue_item: QueueItem },
    /// Dispatch or signaling failure. `call` is absent when no call was placed.
    CallFailed {
        call: Option<ActiveCall>,
        queue_item: QueueItem,
        reason: String,
    },
    StatsUpdated { stats: DialerStats },
    QueueUpdated { queue: Vec<QueueItem> },
    ActiveCallsUpdated { calls: Vec<ActiveCall> },
    /// Session lifecycle change (broadcast only)
    SessionStatusChanged { session_id: SessionId, status: SessionStatus },
}

impl DialerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DialerEvent::CallAnswered { .. } => "call_answered",
            DialerEvent::CallDroppedBusy { .. } => "call_dropped_busy",
            DialerEvent::CallNoAnswer { .. } => "call_no_answer",
            DialerEvent::CallFailed { .. } => "call_failed",
            DialerEvent::StatsUpdated { .. } => "stats_update",
            DialerEvent::QueueUpdated { .. } => "queue_update",
            DialerEvent::ActiveCallsUpdated { .. } => "active_calls_update",
            DialerEvent::SessionStatusChanged { .. } => "session_status",
        }
    }
}

/// Callback surface of the automatic scheduler. Every method defaults to a no-op.
#[async_trait]
pub trait DialerEventHandler: Send + Sync {
    async fn on_call_answered(&self, _call: ActiveCall) {}

    async fn on_call_dropped_busy(&self, _call: ActiveCall, _queue_item: QueueItem) {}

    async fn on_call_no_answer(&self, _call: ActiveCall, _queue_item: QueueItem) {}

    async fn on_call_failed(&self, _call: Option<ActiveCall>, _queue_item: QueueItem, _reason: String) {}

    async fn on_stats_update(&self, _stats: DialerStats) {}

    async fn on_queue_update(&self, _queue: Vec<QueueItem>) {}

    async fn on_active_calls_update(&self, _calls: Vec<ActiveCall>) {}
}

/// Fan-out of scheduler events to the broadcast channel and the installed handler
///
/// `publish` never blocks, so it is safe to call while the scheduler state
/// lock is held, which keeps delivery order equal to decision order.
pub(crate) struct EventBus {
    broadcast: broadcast::Sender<DialerEvent>,
    handler_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<DialerEvent>>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (broadcast, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            broadcast,
            handler_tx: parking_lot::Mutex::new(None),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DialerEvent> {
        self.broadcast.subscribe()
    }

    pub(crate) fn publish(&self, event: DialerEvent) {
        debug!(kind = event.kind(), "📣 Dialer event");
        if let Some(tx) = self.handler_tx.lock().as_ref() {
            let _ = tx.send(event.clone());
        }
        let _ = self.broadcast.send(event);
    }

    /// Replace the installed handler; the previous delivery task drains and exits
    pub(crate) fn set_handler(&self, handler: Arc<dyn DialerEventHandler>) {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(handler, rx));
        *self.handler_tx.lock() = Some(tx);
    }
}

async fn deliver(handler: Arc<dyn DialerEventHandler>, mut rx: mpsc::UnboundedReceiver<DialerEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            DialerEvent::CallAnswered { call } => handler.on_call_answered(call).await,
            DialerEvent::CallDroppedBusy { call, queue_item } => {
                handler.on_call_dropped_busy(call, queue_item).await
            }
            DialerEvent::CallNoAnswer { call, queue_item } => {
                handler.on_call_no_answer(call, queue_item).await
            }
            DialerEvent::CallFailed { call, queue_item, reason } => {
                handler.on_call_failed(call, queue_item, reason).await
            }
            DialerEvent::StatsUpdated { stats } => handler.on_stats_update(stats).await,
            DialerEvent::QueueUpdated { queue } => handler.on_queue_update(queue).await,
            DialerEvent::ActiveCallsUpdated { calls } => handler.on_active_calls_update(calls).await,
            DialerEvent::SessionStatusChanged { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        stats_updates: AtomicU64,
        last_total_calls: AtomicU64,
    }

    #[async_trait]
    impl DialerEventHandler for CountingHandler {
        async fn on_stats_update(&self, stats: DialerStats) {
            self.stats_updates.fetch_add(1, Ordering::SeqCst);
            self.last_total_calls.store(stats.total_calls, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_bus_delivers_to_handler_and_subscribers_in_order() {
        let bus = EventBus::new();
        let handler = Arc::new(CountingHandler::default());
        bus.set_handler(handler.clone());
        let mut rx = bus.subscribe();

        for total in 1..=3 {
            let stats = DialerStats {
                total_calls: total,
                ..Default::default()
            };
            bus.publish(DialerEvent::StatsUpdated { stats });
        }

        for expected in 1..=3 {
            match rx.recv().await.unwrap() {
                DialerEvent::StatsUpdated { stats } => assert_eq!(stats.total_calls, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }

        for _ in 0..50 {
            if handler.stats_updates.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(handler.stats_updates.load(Ordering::SeqCst), 3);
        assert_eq!(handler.last_total_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_publish_without_listeners_is_harmless() {
        let bus = EventBus::new();
        bus.publish(DialerEvent::QueueUpdated { queue: Vec::new() });
    }
}
