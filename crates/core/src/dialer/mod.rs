//! # Automatic Queue Scheduler
//!
//! The power dialer works a prioritized queue of contacts for one dialing
//! session, keeping up to `concurrency_limit` calls in flight against a single
//! human operator.
//!
//! ## Dispatch
//!
//! Every tick (and once immediately on start) free slots are filled with
//! dispatchable queue items, retries first and then by descending priority.
//! Caller-id numbers are assigned round-robin from the session's pool, keyed
//! by the running total-call counter.
//!
//! ## Arbitration
//!
//! The first answered call engages the operator and every other ringing call
//! is hung up. A call answering while the operator is engaged is dropped,
//! marked BUSY, and its queue item is requeued with a priority boost so it is
//! redialed on the next tick. See [`arbitration::adjudicate`].
//!
//! ## Concurrency
//!
//! All decisions live in [`state::DialerState`], guarded by one mutex that is
//! never held across an await. Each dispatched call gets its own task that
//! originates the call and follows its state (push notifications when the
//! backend offers them, polling otherwise), so a slow call never stalls
//! dispatch.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use powerdial_core::prelude::*;
//!
//! # async fn example() -> powerdial_core::Result<()> {
//! let config = DialerConfig::default();
//! let session = DialingSession::new(2, vec!["+15550100".into(), "+15550101".into()]);
//! let contact = ContactSummary::new("c-1", "Jordan Seller").with_phone("+15550001");
//! let queue = vec![QueueItem::new(session.id.clone(), contact, 0, 3)];
//!
//! let dialer = PowerDialer::new(
//!     config.dispatch.clone(),
//!     session,
//!     Arc::new(SimulatedTelephony::new()),
//!     Arc::new(InMemoryGateway::new()),
//!     config.persistence.retry_writes,
//! )?;
//! dialer.load_queue(queue);
//! dialer.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod arbitration;
pub mod queue;
pub mod state;
mod engine;

pub use arbitration::{adjudicate, OperatorFocus, Verdict};
pub use engine::PowerDialer;
pub use queue::DialQueue;
pub use state::{DialerState, Dispatch, Effects};
