#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use powerdial_core::prelude::*;

pub const POOL: [&str; 3] = ["+15550100", "+15550101", "+15550102"];

pub struct Harness {
    pub dialer: PowerDialer,
    pub telephony: Arc<SimulatedTelephony>,
    pub gateway: Arc<InMemoryGateway>,
    pub session_id: SessionId,
}

/// Let spawned tasks run without letting the paused clock move
pub async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}

/// Move the paused clock forward and let everything due run
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

pub fn phone(name: &str) -> String {
    let digits: u32 = name.bytes().map(u32::from).sum();
    format!("+1555{:07}", digits * 7919 % 10_000_000)
}

pub fn item(session: &SessionId, name: &str, priority: i32, max_attempts: u32) -> QueueItem {
    QueueItem::new(
        session.clone(),
        ContactSummary::new(name, name).with_phone(phone(name)),
        priority,
        max_attempts,
    )
    .with_id(name)
}

pub fn dispatch_config() -> DispatchConfig {
    DispatchConfig::default()
}

pub fn harness(limit: usize, numbers: &[&str]) -> Harness {
    harness_with(limit, numbers, dispatch_config(), SimulatedTelephony::new())
}

pub fn harness_with(
    limit: usize,
    numbers: &[&str],
    config: DispatchConfig,
    telephony: SimulatedTelephony,
) -> Harness {
    let telephony = Arc::new(telephony);
    let gateway = Arc::new(InMemoryGateway::new());
    let session = DialingSession::new(limit, numbers.iter().map(|n| n.to_string()).collect());
    let session_id = session.id.clone();
    let dialer = PowerDialer::new(config, session, telephony.clone(), gateway.clone(), true)
        .expect("valid session");
    Harness {
        dialer,
        telephony,
        gateway,
        session_id,
    }
}

impl Harness {
    pub fn queue_item(&self, id: &str) -> QueueItem {
        self.dialer
            .queue()
            .into_iter()
            .find(|item| item.id.as_str() == id)
            .unwrap_or_else(|| panic!("queue item {} missing", id))
    }

    pub fn handle(&self, name: &str) -> CallHandle {
        self.telephony
            .handle_for(&phone(name))
            .unwrap_or_else(|| panic!("no call placed to {}", name))
    }

    pub async fn start(&self) {
        self.dialer.start().await.expect("session starts");
        settle().await;
    }
}

/// Every event currently buffered on a receiver
pub fn drain(rx: &mut broadcast::Receiver<DialerEvent>) -> Vec<DialerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}
