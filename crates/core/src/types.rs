//! Data model shared by the scheduler, the supervisor, and the persistence gateway

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::lifecycle::CallPhase;
use crate::telephony::CallHandle;

/// Locally generated identifier for a dispatched or manually dialed call
pub type CallId = Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a dialing session
    SessionId
);
string_id!(
    /// Identifier of a queue item
    QueueItemId
);
string_id!(
    /// Identifier of a CRM contact
    ContactId
);

/// Denormalized contact data carried on queue items and calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSummary {
    pub id: ContactId,
    pub name: String,
    pub phone: Option<String>,
    pub phone2: Option<String>,
    pub phone3: Option<String>,
}

impl ContactSummary {
    pub fn new(id: impl Into<ContactId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: None,
            phone2: None,
            phone3: None,
        }
    }

    /// Builder-style setter filling the next empty phone slot
    pub fn with_phone(mut self, number: impl Into<String>) -> Self {
        let number = Some(number.into());
        if self.phone.is_none() {
            self.phone = number;
        } else if self.phone2.is_none() {
            self.phone2 = number;
        } else {
            self.phone3 = number;
        }
        self
    }

    /// First non-blank number across the three candidate fields
    pub fn first_phone_number(&self) -> Option<&str> {
        [&self.phone, &self.phone2, &self.phone3]
            .into_iter()
            .filter_map(|number| number.as_deref())
            .map(str::trim)
            .find(|number| !number.is_empty())
    }
}

/// Status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemStatus {
    Pending,
    Calling,
    Completed,
    Failed,
    Skipped,
}

impl QueueItemStatus {
    /// Statuses a session queue is resumed from
    pub const RESUMABLE: [QueueItemStatus; 2] = [QueueItemStatus::Pending, QueueItemStatus::Calling];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Completed | QueueItemStatus::Failed | QueueItemStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "PENDING",
            QueueItemStatus::Calling => "CALLING",
            QueueItemStatus::Completed => "COMPLETED",
            QueueItemStatus::Failed => "FAILED",
            QueueItemStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(QueueItemStatus::Pending),
            "CALLING" => Some(QueueItemStatus::Calling),
            "COMPLETED" => Some(QueueItemStatus::Completed),
            "FAILED" => Some(QueueItemStatus::Failed),
            "SKIPPED" => Some(QueueItemStatus::Skipped),
            _ => None,
        }
    }
}

/// One contact awaiting an automatic dial attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub session_id: SessionId,
    pub contact_id: ContactId,
    pub contact: ContactSummary,
    pub status: QueueItemStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Higher is dialed sooner
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(session_id: SessionId, contact: ContactSummary, priority: i32, max_attempts: u32) -> Self {
        Self {
            id: QueueItemId::new(),
            session_id,
            contact_id: contact.id.clone(),
            contact,
            status: QueueItemStatus::Pending,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            priority,
            created_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<QueueItemId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Retries are dispatched ahead of first attempts
    pub fn is_retry(&self) -> bool {
        self.attempt_count > 0
    }
}

/// One in-flight automatic call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCall {
    pub id: CallId,
    pub queue_item_id: QueueItemId,
    pub contact_id: ContactId,
    pub contact: ContactSummary,
    pub from_number: String,
    pub to_number: String,
    /// Set once the telephony backend accepts the origination
    pub handle: Option<CallHandle>,
    pub status: CallPhase,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) answered_clock: Option<Instant>,
    #[serde(skip)]
    pub(crate) dispatched_clock: Option<Instant>,
}

impl ActiveCall {
    /// Seconds spent in ANSWERED up to `now`
    pub fn talk_seconds(&self, now: Instant) -> u64 {
        self.answered_clock
            .map(|answered| now.saturating_duration_since(answered).as_secs())
            .unwrap_or(0)
    }
}
