//! # SQLite Persistence Gateway
//!
//! sqlx-backed [`PersistenceGateway`]. The schema is created on connect;
//! contact summaries, caller-id pools and stats snapshots are stored as JSON
//! columns.
//!
//! ```rust,no_run
//! use powerdial_core::config::PersistenceConfig;
//! use powerdial_core::database::SqliteGateway;
//!
//! # async fn example() -> powerdial_core::Result<()> {
//! let gateway = SqliteGateway::connect(&PersistenceConfig {
//!     database_url: "sqlite://powerdial.db".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod schema;

use std::str::FromStr;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::config::PersistenceConfig;
use crate::error::{DialerError, Result};
use crate::persistence::PersistenceGateway;
use crate::session::{DialingSession, SessionStatus};
use crate::types::{QueueItem, QueueItemStatus, SessionId};

/// SQLite gateway
#[derive(Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Open (creating if missing) the database and make sure the schema exists
    pub async fn connect(config: &PersistenceConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);

        // Every connection to an in-memory database is a separate database
        let max_connections = if config.database_url.contains(":memory:") {
            1
        } else {
            config.max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let gateway = Self { pool };
        gateway.create_schema().await?;
        info!("✅ SQLite gateway ready at {}", config.database_url);
        Ok(gateway)
    }

    async fn create_schema(&self) -> Result<()> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ready");
        Ok(())
    }
}

fn to_i64<T: TryInto<i64>>(value: T, field: &str) -> Result<i64> {
    value
        .try_into()
        .map_err(|_| DialerError::internal(format!("{} does not fit in an INTEGER column", field)))
}

fn from_i64<T: TryFrom<i64>>(value: i64, field: &str) -> Result<T> {
    T::try_from(value).map_err(|_| DialerError::internal(format!("stored {} is out of range: {}", field, value)))
}

const UPSERT_QUEUE_ITEM: &str = "INSERT INTO queue_items
        (id, session_id, contact_id, contact, status, attempt_count, max_attempts,
         priority, created_at, last_attempt_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT(id) DO UPDATE SET
        status = excluded.status,
        attempt_count = excluded.attempt_count,
        max_attempts = excluded.max_attempts,
        priority = excluded.priority,
        contact = excluded.contact,
        last_attempt_at = excluded.last_attempt_at";

/// Insert-or-update of one queue item, ready to run on a pool or a transaction
fn upsert_queue_item(item: &QueueItem) -> Result<Query<'_, Sqlite, SqliteArguments<'_>>> {
    Ok(sqlx::query(UPSERT_QUEUE_ITEM)
        .bind(item.id.as_str())
        .bind(item.session_id.as_str())
        .bind(item.contact_id.as_str())
        .bind(serde_json::to_string(&item.contact)?)
        .bind(item.status.as_str())
        .bind(i64::from(item.attempt_count))
        .bind(i64::from(item.max_attempts))
        .bind(i64::from(item.priority))
        .bind(item.created_at)
        .bind(item.last_attempt_at))
}

fn session_from_row(row: &SqliteRow) -> Result<DialingSession> {
    let status: String = row.try_get("status")?;
    let from_numbers: String = row.try_get("from_numbers")?;
    let stats: String = row.try_get("stats")?;

    Ok(DialingSession {
        id: SessionId::from(row.try_get::<String, _>("id")?),
        concurrency_limit: from_i64(row.try_get("concurrency_limit")?, "concurrency_limit")?,
        from_numbers: serde_json::from_str(&from_numbers)?,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| DialerError::internal(format!("unknown session status {}", status)))?,
        stats: serde_json::from_str(&stats)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        started_at: row.try_get("started_at")?,
        updated_at: row.try_get("updated_at")?,
        ended_at: row.try_get("ended_at")?,
    })
}

fn queue_item_from_row(row: &SqliteRow) -> Result<QueueItem> {
    let status: String = row.try_get("status")?;
    let contact: String = row.try_get("contact")?;

    Ok(QueueItem {
        id: row.try_get::<String, _>("id")?.into(),
        session_id: row.try_get::<String, _>("session_id")?.into(),
        contact_id: row.try_get::<String, _>("contact_id")?.into(),
        contact: serde_json::from_str(&contact)?,
        status: QueueItemStatus::parse(&status)
            .ok_or_else(|| DialerError::internal(format!("unknown queue item status {}", status)))?,
        attempt_count: from_i64(row.try_get("attempt_count")?, "attempt_count")?,
        max_attempts: from_i64(row.try_get("max_attempts")?, "max_attempts")?,
        priority: from_i64(row.try_get("priority")?, "priority")?,
        created_at: row.try_get("created_at")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
    })
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn save_queue_item(&self, item: &QueueItem) -> Result<()> {
        upsert_queue_item(item)?.execute(&self.pool).await?;
        debug!("💾 Queue item {} saved as {}", item.id, item.status.as_str());
        Ok(())
    }

    async fn save_queue_items(&self, items: &[QueueItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            upsert_queue_item(item)?.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!("💾 Saved {} queue items", items.len());
        Ok(())
    }

    async fn save_session(&self, session: &DialingSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO dialing_sessions
                (id, concurrency_limit, from_numbers, status, stats,
                 created_at, started_at, updated_at, ended_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                concurrency_limit = excluded.concurrency_limit,
                from_numbers = excluded.from_numbers,
                status = excluded.status,
                stats = excluded.stats,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at,
                ended_at = excluded.ended_at",
        )
        .bind(session.id.as_str())
        .bind(to_i64(session.concurrency_limit, "concurrency_limit")?)
        .bind(serde_json::to_string(&session.from_numbers)?)
        .bind(session.status.as_str())
        .bind(serde_json::to_string(&session.stats)?)
        .bind(session.created_at)
        .bind(session.started_at)
        .bind(session.updated_at)
        .bind(session.ended_at)
        .execute(&self.pool)
        .await?;

        debug!("💾 Session {} saved as {}", session.id, session.status.as_str());
        Ok(())
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<DialingSession>> {
        let row = sqlx::query("SELECT * FROM dialing_sessions WHERE id = ?")
            .bind(session_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn load_queue(&self, session_id: &SessionId, statuses: &[QueueItemStatus]) -> Result<Vec<QueueItem>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT * FROM queue_items WHERE session_id = ? AND status IN ({}) ORDER BY rowid",
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(session_id.as_str());
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        debug!("Loaded {} queue items for session {}", rows.len(), session_id);
        rows.iter().map(queue_item_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContactSummary;

    async fn memory_gateway() -> SqliteGateway {
        SqliteGateway::connect(&PersistenceConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_session_upsert_and_load() {
        let gateway = memory_gateway().await;
        let mut session = DialingSession::new(2, vec!["+15550100".into(), "+15550101".into()]);
        gateway.save_session(&session).await.unwrap();

        session.transition(SessionStatus::Running).unwrap();
        session.stats.total_calls = 4;
        gateway.save_session(&session).await.unwrap();

        let loaded = gateway.load_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Running);
        assert_eq!(loaded.stats.total_calls, 4);
        assert_eq!(loaded.from_numbers, session.from_numbers);
        assert!(loaded.started_at.is_some());

        assert!(gateway.load_session(&SessionId::from("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queue_filtered_by_status_in_insertion_order() {
        let gateway = memory_gateway().await;
        let session = SessionId::from("s-1");
        let contact = ContactSummary::new("c-1", "Pat Broker").with_phone("+15550001");

        let first = QueueItem::new(session.clone(), contact.clone(), 5, 3);
        let mut second = QueueItem::new(session.clone(), contact.clone(), 9, 3);
        let mut third = QueueItem::new(session.clone(), contact, 1, 3);
        second.status = QueueItemStatus::Calling;
        second.attempt_count = 1;
        third.status = QueueItemStatus::Skipped;

        gateway
            .save_queue_items(&[first.clone(), second.clone(), third])
            .await
            .unwrap();

        let loaded = gateway
            .load_queue(&session, &QueueItemStatus::RESUMABLE)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[1].id, second.id);
        assert_eq!(loaded[1].attempt_count, 1);
        assert_eq!(loaded[1].contact.phone.as_deref(), Some("+15550001"));
    }

    #[tokio::test]
    async fn test_single_and_batch_saves_update_the_same_row() {
        let gateway = memory_gateway().await;
        let session = SessionId::from("s-1");
        let contact = ContactSummary::new("c-1", "Pat Broker").with_phone("+15550001");
        let mut item = QueueItem::new(session.clone(), contact, 5, 3).with_id("q-1");

        gateway.save_queue_items(&[item.clone()]).await.unwrap();
        item.status = QueueItemStatus::Calling;
        item.attempt_count = 1;
        gateway.save_queue_item(&item).await.unwrap();
        item.status = QueueItemStatus::Failed;
        item.priority = 1005;
        gateway.save_queue_items(&[item.clone()]).await.unwrap();

        let failed = gateway
            .load_queue(&session, &[QueueItemStatus::Failed])
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempt_count, 1);
        assert_eq!(failed[0].priority, 1005);
        assert!(gateway
            .load_queue(&session, &QueueItemStatus::RESUMABLE)
            .await
            .unwrap()
            .is_empty());
    }
}
