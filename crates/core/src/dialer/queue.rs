//! Working queue of the automatic scheduler

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::types::{QueueItem, QueueItemId, QueueItemStatus};

/// Prioritized queue of contacts to dial
///
/// Items are never removed; they are terminalized. Insertion order is the
/// final tie-breaker so selection is deterministic.
#[derive(Debug, Default)]
pub struct DialQueue {
    items: Vec<QueueItem>,
}

impl DialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue with the resumable (PENDING or CALLING) items of `items`
    pub fn replace(&mut self, items: Vec<QueueItem>) -> usize {
        let total = items.len();
        self.items = items
            .into_iter()
            .filter(|item| QueueItemStatus::RESUMABLE.contains(&item.status))
            .collect();
        info!(
            "📋 Loaded {} resumable queue items ({} skipped as terminal)",
            self.items.len(),
            total - self.items.len()
        );
        self.items.len()
    }

    /// Mark FAILED every resumable item with no attempts left; returns the failed items
    pub fn fail_exhausted(&mut self) -> Vec<QueueItem> {
        let mut failed = Vec::new();
        for item in &mut self.items {
            if QueueItemStatus::RESUMABLE.contains(&item.status) && !item.attempts_remaining() {
                warn!(
                    "❌ Queue item {} loaded as {} with {}/{} attempts used; failing it",
                    item.id,
                    item.status.as_str(),
                    item.attempt_count,
                    item.max_attempts
                );
                item.status = QueueItemStatus::Failed;
                failed.push(item.clone());
            }
        }
        failed
    }

    fn is_dispatchable(item: &QueueItem, bound: &HashSet<QueueItemId>) -> bool {
        QueueItemStatus::RESUMABLE.contains(&item.status)
            && item.attempts_remaining()
            && !bound.contains(&item.id)
    }

    /// Up to `limit` dispatchable items: retries first, then by descending priority
    ///
    /// `bound` holds items already attached to an in-flight call.
    pub fn select(&self, limit: usize, bound: &HashSet<QueueItemId>) -> Vec<QueueItemId> {
        if limit == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<&QueueItem> = self
            .items
            .iter()
            .filter(|item| Self::is_dispatchable(item, bound))
            .collect();

        // Stable sort keeps insertion order among equals
        candidates.sort_by(|a, b| {
            b.is_retry()
                .cmp(&a.is_retry())
                .then_with(|| b.priority.cmp(&a.priority))
        });

        let selected: Vec<QueueItemId> = candidates
            .into_iter()
            .take(limit)
            .map(|item| item.id.clone())
            .collect();
        debug!("Selected {} of {} requested queue items", selected.len(), limit);
        selected
    }

    pub fn has_dispatchable(&self, bound: &HashSet<QueueItemId>) -> bool {
        self.items.iter().any(|item| Self::is_dispatchable(item, bound))
    }

    pub fn get(&self, id: &QueueItemId) -> Option<&QueueItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn get_mut(&mut self, id: &QueueItemId) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.items.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContactSummary, SessionId};

    fn item(name: &str, priority: i32) -> QueueItem {
        QueueItem::new(
            SessionId::from("s-1"),
            ContactSummary::new(name, name).with_phone("+15550000"),
            priority,
            3,
        )
        .with_id(name)
    }

    fn ids(selected: &[QueueItemId]) -> Vec<&str> {
        selected.iter().map(|id| id.as_str()).collect()
    }

    #[test]
    fn test_replace_keeps_only_resumable_items() {
        let mut done = item("done", 0);
        done.status = QueueItemStatus::Completed;
        let mut calling = item("calling", 0);
        calling.status = QueueItemStatus::Calling;

        let mut queue = DialQueue::new();
        assert_eq!(queue.replace(vec![item("a", 0), done, calling]), 2);
        assert!(queue.get(&QueueItemId::from("done")).is_none());
        assert!(queue.get(&QueueItemId::from("calling")).is_some());
    }

    #[test]
    fn test_retries_before_priority() {
        let mut retry = item("retry", 1);
        retry.attempt_count = 1;

        let mut queue = DialQueue::new();
        queue.replace(vec![item("low", 2), item("high", 9), retry]);

        let selected = queue.select(3, &HashSet::new());
        assert_eq!(ids(&selected), vec!["retry", "high", "low"]);
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let mut queue = DialQueue::new();
        queue.replace(vec![item("first", 5), item("second", 5), item("third", 5)]);
        assert_eq!(ids(&queue.select(2, &HashSet::new())), vec!["first", "second"]);
    }

    #[test]
    fn test_skips_bound_and_exhausted_items() {
        let mut exhausted = item("exhausted", 10);
        exhausted.attempt_count = 3;

        let mut queue = DialQueue::new();
        queue.replace(vec![item("bound", 9), exhausted, item("free", 1)]);

        let bound: HashSet<QueueItemId> = [QueueItemId::from("bound")].into_iter().collect();
        assert_eq!(ids(&queue.select(5, &bound)), vec!["free"]);
        assert!(queue.has_dispatchable(&bound));

        queue.get_mut(&QueueItemId::from("free")).unwrap().status = QueueItemStatus::Skipped;
        assert!(!queue.has_dispatchable(&bound));
    }

    #[test]
    fn test_fail_exhausted_terminalizes_only_spent_items() {
        let mut stuck = item("stuck", 0);
        stuck.status = QueueItemStatus::Calling;
        stuck.attempt_count = 3;
        let mut spent = item("spent", 0);
        spent.attempt_count = 3;
        let mut retry = item("retry", 0);
        retry.attempt_count = 2;

        let mut queue = DialQueue::new();
        queue.replace(vec![stuck, spent, retry]);
        let failed = queue.fail_exhausted();

        let failed: Vec<&str> = failed.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(failed, vec!["stuck", "spent"]);
        assert_eq!(queue.get(&QueueItemId::from("stuck")).unwrap().status, QueueItemStatus::Failed);
        assert_eq!(queue.get(&QueueItemId::from("retry")).unwrap().status, QueueItemStatus::Pending);
        assert!(queue.fail_exhausted().is_empty());
    }

    #[test]
    fn test_zero_limit_selects_nothing() {
        let mut queue = DialQueue::new();
        queue.replace(vec![item("a", 0)]);
        assert!(queue.select(0, &HashSet::new()).is_empty());
    }
}
