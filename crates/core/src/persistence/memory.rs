use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;

use super::PersistenceGateway;
use crate::error::{DialerError, Result};
use crate::session::DialingSession;
use crate::types::{QueueItem, QueueItemId, QueueItemStatus, SessionId};

/// Gateway keeping everything in concurrent maps
#[derive(Default)]
pub struct InMemoryGateway {
    sessions: DashMap<SessionId, DialingSession>,
    /// Items keyed by id, with their first-insertion sequence number
    items: DashMap<QueueItemId, (u64, QueueItem)>,
    next_seq: AtomicU64,
    write_failures: AtomicU32,
    writes: AtomicU64,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a persistence error
    pub fn fail_next_writes(&self, count: u32) {
        self.write_failures.store(count, Ordering::SeqCst);
    }

    /// Successful writes so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Stored copy of a queue item
    pub fn queue_item(&self, id: &QueueItemId) -> Option<QueueItem> {
        self.items.get(id).map(|entry| entry.1.clone())
    }

    fn check_write(&self) -> Result<()> {
        let remaining = self.write_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.write_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DialerError::Persistence(anyhow!("simulated write failure")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn save_queue_item(&self, item: &QueueItem) -> Result<()> {
        self.check_write()?;
        let mut entry = self
            .items
            .entry(item.id.clone())
            .or_insert_with(|| (self.next_seq.fetch_add(1, Ordering::SeqCst), item.clone()));
        entry.1 = item.clone();
        Ok(())
    }

    async fn save_session(&self, session: &DialingSession) -> Result<()> {
        self.check_write()?;
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<DialingSession>> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn load_queue(&self, session_id: &SessionId, statuses: &[QueueItemStatus]) -> Result<Vec<QueueItem>> {
        let mut rows: Vec<(u64, QueueItem)> = self
            .items
            .iter()
            .filter(|entry| &entry.1.session_id == session_id && statuses.contains(&entry.1.status))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, item)| item).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContactSummary;

    #[tokio::test]
    async fn test_load_queue_filters_by_session_and_status() {
        let gateway = InMemoryGateway::new();
        let session = SessionId::from("s-1");
        let mut done = QueueItem::new(session.clone(), ContactSummary::new("c-1", "A"), 0, 3);
        done.status = QueueItemStatus::Completed;
        let pending = QueueItem::new(session.clone(), ContactSummary::new("c-2", "B"), 0, 3);
        let other = QueueItem::new(SessionId::from("s-2"), ContactSummary::new("c-3", "C"), 0, 3);

        for item in [&done, &pending, &other] {
            gateway.save_queue_item(item).await.unwrap();
        }

        let loaded = gateway
            .load_queue(&session, &QueueItemStatus::RESUMABLE)
            .await
            .unwrap();
        assert_eq!(loaded, vec![pending]);
    }

    #[tokio::test]
    async fn test_updates_keep_insertion_order() {
        let gateway = InMemoryGateway::new();
        let session = SessionId::from("s-1");
        let mut first = QueueItem::new(session.clone(), ContactSummary::new("c-1", "A"), 0, 3);
        let second = QueueItem::new(session.clone(), ContactSummary::new("c-2", "B"), 0, 3);
        gateway.save_queue_item(&first).await.unwrap();
        gateway.save_queue_item(&second).await.unwrap();

        first.priority = 1000;
        gateway.save_queue_item(&first).await.unwrap();

        let loaded = gateway.load_queue(&session, &[QueueItemStatus::Pending]).await.unwrap();
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[0].priority, 1000);
        assert_eq!(loaded[1].id, second.id);
    }

    #[tokio::test]
    async fn test_injected_write_failures() {
        let gateway = InMemoryGateway::new();
        gateway.fail_next_writes(1);
        let session = DialingSession::new(1, vec!["+15550100".into()]);
        assert!(gateway.save_session(&session).await.is_err());
        assert!(gateway.save_session(&session).await.is_ok());
        assert_eq!(gateway.write_count(), 1);
    }
}
