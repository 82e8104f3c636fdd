//! # powerdial-core
//!
//! Outbound call orchestration for a single human operator: an automatic
//! queue scheduler ("power dialer") and a manual multi-line supervisor, both
//! driving a small number of concurrent telephony channels.
//!
//! ## Components
//!
//! - [`lifecycle`]: per-call state machine shared by both dialing modes
//! - [`stats`]: running session counters
//! - [`dialer`]: concurrency-bounded dispatch, answer arbitration, retries
//! - [`multiline`]: operator-originated calls with switchable audio focus
//! - [`telephony`]: the narrow contract to the softphone stack, plus a simulator
//! - [`persistence`] / [`database`]: fire-and-forget session and queue storage
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use powerdial_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> powerdial_core::Result<()> {
//!     let config = DialerConfig::default();
//!     let gateway = Arc::new(SqliteGateway::connect(&config.persistence).await?);
//!     let telephony = Arc::new(SimulatedTelephony::new());
//!
//!     let session = DialingSession::new(2, vec!["+15550100".into()]);
//!     let contact = ContactSummary::new("c-1", "Morgan Buyer").with_phone("+15550001");
//!     let item = QueueItem::new(session.id.clone(), contact, 0, config.dispatch.default_max_attempts);
//!
//!     let dialer = PowerDialer::new(config.dispatch.clone(), session, telephony, gateway, true)?;
//!     dialer.load_queue(vec![item]);
//!     dialer.start().await?;
//!     dialer.wait_finished().await;
//!     println!("answered {}", dialer.stats().total_answered);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod dialer;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod multiline;
pub mod persistence;
pub mod recovery;
pub mod session;
pub mod stats;
pub mod telephony;
pub mod types;

pub use config::DialerConfig;
pub use error::{DialerError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{DialerConfig, DispatchConfig, MultiLineConfig, PersistenceConfig};
    pub use crate::database::SqliteGateway;
    pub use crate::dialer::{OperatorFocus, PowerDialer};
    pub use crate::error::{DialerError, Result};
    pub use crate::events::{DialerEvent, DialerEventHandler};
    pub use crate::lifecycle::{CallPhase, CallSignal};
    pub use crate::multiline::{ManualCallStatus, ManualDialerCall, MultiLineEvent, MultiLineSupervisor};
    pub use crate::persistence::{InMemoryGateway, PersistenceGateway};
    pub use crate::session::{DialingSession, SessionStatus};
    pub use crate::stats::DialerStats;
    pub use crate::telephony::{CallHandle, SimulatedTelephony, StartCallRequest, TelephonyCallState, TelephonyClient};
    pub use crate::types::{ActiveCall, CallId, ContactId, ContactSummary, QueueItem, QueueItemId, QueueItemStatus, SessionId};
}
