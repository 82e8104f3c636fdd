//! Dialing session record and its lifecycle
//!
//! ```text
//! IDLE ──► RUNNING ◄──► PAUSED
//!   │         │            │
//!   │         ├──► COMPLETED
//!   └─────────┴────────────┴──► STOPPED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DispatchConfig;
use crate::error::{DialerError, Result};
use crate::stats::DialerStats;
use crate::types::SessionId;

/// Lifecycle status of a dialing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl SessionStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Completed)
    }

    /// Check if a state transition is valid
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;

        matches!(
            (self, to),
            (Idle, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Idle, Stopped)
                | (Running, Stopped)
                | (Paused, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "IDLE",
            SessionStatus::Running => "RUNNING",
            SessionStatus::Paused => "PAUSED",
            SessionStatus::Stopped => "STOPPED",
            SessionStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IDLE" => Some(SessionStatus::Idle),
            "RUNNING" => Some(SessionStatus::Running),
            "PAUSED" => Some(SessionStatus::Paused),
            "STOPPED" => Some(SessionStatus::Stopped),
            "COMPLETED" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

/// Persisted umbrella record of one dialing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialingSession {
    pub id: SessionId,
    pub concurrency_limit: usize,
    /// Outbound caller-id pool, used round-robin
    pub from_numbers: Vec<String>,
    pub status: SessionStatus,
    pub stats: DialerStats,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl DialingSession {
    pub fn new(concurrency_limit: usize, from_numbers: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            concurrency_limit,
            from_numbers,
            status: SessionStatus::Idle,
            stats: DialerStats::default(),
            created_at: now,
            started_at: None,
            updated_at: now,
            ended_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<SessionId>) -> Self {
        self.id = id.into();
        self
    }

    /// Check the session can be dialed under `config`
    pub fn validate(&self, config: &DispatchConfig) -> Result<()> {
        if self.concurrency_limit == 0 || self.concurrency_limit > config.max_concurrency_limit {
            return Err(DialerError::config(format!(
                "concurrency limit {} outside 1..={}",
                self.concurrency_limit, config.max_concurrency_limit
            )));
        }
        if self.from_numbers.iter().all(|number| number.trim().is_empty()) {
            return Err(DialerError::config("session has no outbound numbers"));
        }
        Ok(())
    }

    /// Validated status change, stamping the matching timestamps
    pub fn transition(&mut self, to: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DialerError::invalid_state(format!(
                "Session {} cannot go from {:?} to {:?}",
                self.id, self.status, to
            )));
        }

        debug!("🔄 Session {} {:?} → {:?}", self.id, self.status, to);
        let now = Utc::now();
        if to == SessionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_finished() {
            self.ended_at = Some(now);
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}
