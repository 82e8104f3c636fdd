//! # Session/Queue Persistence Gateway
//!
//! Durable record of dialing sessions and queue items. The scheduler never
//! reads it while dialing; it only pushes updates through a
//! [`PersistenceWriter`], so a slow or failing store cannot stall dispatch.
//!
//! Two gateways ship with the crate:
//!
//! - [`InMemoryGateway`] for tests and throwaway runs
//! - [`SqliteGateway`](crate::database::SqliteGateway) backed by sqlx

mod memory;
mod writer;

use async_trait::async_trait;

use crate::error::Result;
use crate::session::DialingSession;
use crate::types::{QueueItem, QueueItemStatus, SessionId};

pub use memory::InMemoryGateway;
pub use writer::{PersistOp, PersistenceWriter};

/// Durable store for sessions and queue items
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create or update a queue item (status, attempt count, priority)
    async fn save_queue_item(&self, item: &QueueItem) -> Result<()>;

    /// Create or update several queue items
    async fn save_queue_items(&self, items: &[QueueItem]) -> Result<()> {
        for item in items {
            self.save_queue_item(item).await?;
        }
        Ok(())
    }

    /// Create or update a session (status, stats snapshot, timestamps)
    async fn save_session(&self, session: &DialingSession) -> Result<()>;

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<DialingSession>>;

    /// Queue items of a session whose status is in `statuses`, in creation order
    async fn load_queue(&self, session_id: &SessionId, statuses: &[QueueItemStatus]) -> Result<Vec<QueueItem>>;
}
