use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::PersistenceGateway;
use crate::recovery::{retry_with_backoff, RetryConfig};
use crate::session::DialingSession;
use crate::types::QueueItem;

/// One queued write
#[derive(Debug)]
pub enum PersistOp {
    QueueItem(QueueItem),
    Session(DialingSession),
    /// Resolves once every earlier write has been applied
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget front of a [`PersistenceGateway`]
///
/// Writes are applied in submission order by a single task. Failures are
/// retried when recoverable, then logged and dropped; they never reach the
/// caller.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl PersistenceWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(gateway: Arc<dyn PersistenceGateway>, retry_writes: bool) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer(gateway, rx, retry_writes));
        (Self { tx }, task)
    }

    pub fn save_queue_item(&self, item: QueueItem) {
        self.submit(PersistOp::QueueItem(item));
    }

    pub fn save_session(&self, session: DialingSession) {
        self.submit(PersistOp::Session(session));
    }

    /// Wait until everything submitted so far has been written (or dropped)
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(PersistOp::Flush(done_tx));
        let _ = done_rx.await;
    }

    fn submit(&self, op: PersistOp) {
        if self.tx.send(op).is_err() {
            error!("❌ Persistence writer is gone; dropping write");
        }
    }
}

async fn run_writer(
    gateway: Arc<dyn PersistenceGateway>,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
    retry_writes: bool,
) {
    let retry = if retry_writes {
        RetryConfig::quick()
    } else {
        RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        }
    };

    while let Some(op) = rx.recv().await {
        let result = match &op {
            PersistOp::QueueItem(item) => {
                retry_with_backoff("save_queue_item", retry.clone(), || gateway.save_queue_item(item)).await
            }
            PersistOp::Session(session) => {
                retry_with_backoff("save_session", retry.clone(), || gateway.save_session(session)).await
            }
            PersistOp::Flush(_) => Ok(()),
        };

        match (op, result) {
            (PersistOp::Flush(done), _) => {
                let _ = done.send(());
            }
            (PersistOp::QueueItem(item), Err(e)) => {
                error!("❌ Dropping write for queue item {}: {}", item.id, e);
            }
            (PersistOp::Session(session), Err(e)) => {
                error!("❌ Dropping write for session {}: {}", session.id, e);
            }
            (_, Ok(())) => {}
        }
    }

    debug!("Persistence writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryGateway;
    use crate::types::{ContactSummary, QueueItemStatus, SessionId};

    #[tokio::test(start_paused = true)]
    async fn test_writes_are_applied_in_order_and_retried() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.fail_next_writes(2);
        let (writer, _task) = PersistenceWriter::spawn(gateway.clone(), true);

        let session = SessionId::from("s-1");
        let mut item = QueueItem::new(session.clone(), ContactSummary::new("c-1", "A"), 0, 3);
        writer.save_queue_item(item.clone());
        item.status = QueueItemStatus::Calling;
        item.attempt_count = 1;
        writer.save_queue_item(item.clone());
        writer.flush().await;

        let stored = gateway.queue_item(&item.id).unwrap();
        assert_eq!(stored.status, QueueItemStatus::Calling);
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_failed_writes_are_swallowed_without_retry() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.fail_next_writes(1);
        let (writer, _task) = PersistenceWriter::spawn(gateway.clone(), false);

        let item = QueueItem::new(SessionId::from("s-1"), ContactSummary::new("c-1", "A"), 0, 3);
        writer.save_queue_item(item.clone());
        writer.flush().await;

        assert!(gateway.queue_item(&item.id).is_none());
        assert_eq!(gateway.write_count(), 0);
    }
}
