//! # Manual Multi-Line Supervisor
//!
//! Lets the operator originate up to `max_lines` calls by hand and decide
//! which connected call has the audio device ("primary").
//!
//! Unlike the automatic scheduler, several calls may be connected at once:
//! the first to connect becomes primary, later ones wait for the operator to
//! switch. Any call still ringing when another connects is hung up. Ended and
//! failed calls stay listed until dismissed.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use powerdial_core::prelude::*;
//!
//! # async fn example() -> powerdial_core::Result<()> {
//! let supervisor = MultiLineSupervisor::new(MultiLineConfig::default(), Arc::new(SimulatedTelephony::new()));
//! let call = supervisor.start_call(None, "+15550001", "+15550100").await?;
//! supervisor.switch_primary_call(call.id).await;
//! supervisor.hang_up_all_calls().await;
//! # Ok(())
//! # }
//! ```

mod board;

use std::sync::Arc;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MultiLineConfig;
use crate::error::{DialerError, Result};
use crate::lifecycle::CallSignal;
use crate::recovery::with_timeout;
use crate::telephony::{CallHandle, StartCallRequest, TelephonyCallState, TelephonyClient};
use crate::types::{CallId, ContactId, ContactSummary};
use board::{BoardEffects, LineBoard};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Status of a manually dialed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualCallStatus {
    Ringing,
    Connected,
    Ended,
    Failed,
}

impl ManualCallStatus {
    /// Occupies a line
    pub fn is_live(&self) -> bool {
        matches!(self, ManualCallStatus::Ringing | ManualCallStatus::Connected)
    }
}

/// One operator-originated call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualDialerCall {
    pub id: CallId,
    pub contact_id: Option<ContactId>,
    pub contact_name: Option<String>,
    pub phone_number: String,
    pub from_number: String,
    pub status: ManualCallStatus,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub handle: CallHandle,
}

/// Supervisor notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MultiLineEvent {
    CallsUpdated { calls: Vec<ManualDialerCall> },
    PrimaryChanged { call_id: Option<CallId> },
}

/// Manual multi-line call supervisor
#[derive(Clone)]
pub struct MultiLineSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: MultiLineConfig,
    telephony: Arc<dyn TelephonyClient>,
    board: Mutex<LineBoard>,
    events: broadcast::Sender<MultiLineEvent>,
    listeners: DashMap<CallId, JoinHandle<()>>,
}

impl MultiLineSupervisor {
    pub fn new(config: MultiLineConfig, telephony: Arc<dyn TelephonyClient>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SupervisorInner {
                board: Mutex::new(LineBoard::new(config.max_lines)),
                config,
                telephony,
                events,
                listeners: DashMap::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MultiLineEvent> {
        self.inner.events.subscribe()
    }

    /// Originate a call, refusing once every line is ringing or connected
    ///
    /// A refused call leaves every existing call untouched. Must be called
    /// inside a tokio runtime.
    pub async fn start_call(
        &self,
        contact: Option<&ContactSummary>,
        to_number: &str,
        from_number: &str,
    ) -> Result<ManualDialerCall> {
        let reservation = match LineReservation::acquire(&self.inner) {
            Ok(reservation) => reservation,
            Err(e) => {
                warn!("🚫 Manual call to {} refused: {}", to_number, e);
                return Err(e);
            }
        };

        match self.originate(contact, to_number, from_number).await {
            Ok(call) => {
                reservation.register(call.clone());
                self.inner.spawn_listener(call.id, call.handle.clone());
                Ok(call)
            }
            Err(e) => {
                error!("❌ Manual call to {} failed: {}", to_number, e);
                Err(e)
            }
        }
    }

    async fn originate(
        &self,
        contact: Option<&ContactSummary>,
        to_number: &str,
        from_number: &str,
    ) -> Result<ManualDialerCall> {
        let to_number = to_number.trim();
        if to_number.is_empty() {
            let who = contact.map(|c| c.id.to_string()).unwrap_or_else(|| "manual dial".to_string());
            return Err(DialerError::NoPhoneNumber(who));
        }

        self.inner.telephony.ensure_registered().await?;
        let handle = self
            .inner
            .telephony
            .start_call(StartCallRequest {
                to_number: to_number.to_string(),
                from_number: from_number.to_string(),
            })
            .await?;

        info!("📞 Manual call to {} from {} ({})", to_number, from_number, handle);
        Ok(ManualDialerCall {
            id: Uuid::new_v4(),
            contact_id: contact.map(|c| c.id.clone()),
            contact_name: contact.map(|c| c.name.clone()),
            phone_number: to_number.to_string(),
            from_number: from_number.to_string(),
            status: ManualCallStatus::Ringing,
            started_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            handle,
        })
    }

    /// Give audio focus to a connected call; `false` (and no change) otherwise
    pub async fn switch_primary_call(&self, id: CallId) -> bool {
        let Some(handle) = self.inner.apply(|board| {
            let handle = board.switch_primary(id);
            let fx = BoardEffects {
                primary_changed: handle.is_some(),
                ..Default::default()
            };
            (handle, fx)
        }) else {
            return false;
        };

        if let Err(e) = self.inner.telephony.set_audio_focus(&handle).await {
            warn!("⚠️ Audio focus switch to {} failed: {}", handle, e);
        }
        info!("🎧 Manual call {} is now primary", id);
        true
    }

    /// Request termination; the call becomes `ended` once telephony confirms
    pub async fn hang_up_call(&self, id: CallId) -> Result<()> {
        let call = self
            .inner
            .board
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| DialerError::not_found(format!("manual call {}", id)))?;

        if !call.status.is_live() {
            debug!("Manual call {} already {:?}", id, call.status);
            return Ok(());
        }
        let hangup = self.inner.telephony.hangup(&call.handle);
        with_timeout("hangup", self.inner.config.hangup_timeout, hangup).await
    }

    /// Request termination of every live call; failures are logged
    pub async fn hang_up_all_calls(&self) {
        let handles: Vec<CallHandle> = self
            .inner
            .board
            .lock()
            .calls()
            .iter()
            .filter(|call| call.status.is_live())
            .map(|call| call.handle.clone())
            .collect();
        self.inner.hang_up_all(handles).await;
    }

    /// Forget an ended or failed call
    pub fn dismiss_call(&self, id: CallId) -> bool {
        self.inner.apply(|board| {
            let dismissed = board.dismiss(id);
            let fx = BoardEffects {
                calls_changed: dismissed,
                ..Default::default()
            };
            (dismissed, fx)
        })
    }

    /// Forget every ended or failed call
    pub fn dismiss_all_ended(&self) -> usize {
        self.inner.apply(|board| {
            let dismissed = board.dismiss_all_ended();
            let fx = BoardEffects {
                calls_changed: dismissed > 0,
                ..Default::default()
            };
            (dismissed, fx)
        })
    }

    /// Hang up every live call, mark them ended, and stop all listeners
    pub async fn shutdown(&self) {
        self.hang_up_all_calls().await;
        self.inner.apply(|board| {
            let changed = board.end_all();
            let fx = BoardEffects {
                calls_changed: changed,
                primary_changed: changed,
                ..Default::default()
            };
            ((), fx)
        });
        for entry in self.inner.listeners.iter() {
            entry.value().abort();
        }
        self.inner.listeners.clear();
        info!("⏹️ Multi-line supervisor shut down");
    }

    pub fn calls(&self) -> Vec<ManualDialerCall> {
        self.inner.board.lock().calls().to_vec()
    }

    pub fn call(&self, id: CallId) -> Option<ManualDialerCall> {
        self.inner.board.lock().get(id).cloned()
    }

    pub fn primary_call(&self) -> Option<ManualDialerCall> {
        let board = self.inner.board.lock();
        board.primary().and_then(|id| board.get(id)).cloned()
    }

    /// Calls ringing or connected
    pub fn live_call_count(&self) -> usize {
        self.inner.board.lock().live_count()
    }
}

/// A line held while an origination is in flight
///
/// Dropping it gives the line back, so a cancelled or failed `start_call`
/// never keeps a line occupied.
struct LineReservation {
    inner: Arc<SupervisorInner>,
    held: bool,
}

impl LineReservation {
    fn acquire(inner: &Arc<SupervisorInner>) -> Result<Self> {
        inner.board.lock().reserve()?;
        Ok(Self {
            inner: inner.clone(),
            held: true,
        })
    }

    /// Turn the held line into a ringing call
    fn register(mut self, call: ManualDialerCall) {
        self.held = false;
        self.inner.apply(|board| {
            board.register(call);
            let fx = BoardEffects {
                calls_changed: true,
                ..Default::default()
            };
            ((), fx)
        });
    }
}

impl Drop for LineReservation {
    fn drop(&mut self) {
        if self.held {
            self.inner.board.lock().release_reservation();
            debug!("Line reservation released");
        }
    }
}

impl SupervisorInner {
    /// Update the board and publish what changed under the same lock
    fn apply<R>(&self, op: impl FnOnce(&mut LineBoard) -> (R, BoardEffects)) -> R {
        let mut board = self.board.lock();
        let (result, fx) = op(&mut board);
        self.publish(&board, &fx);
        result
    }

    fn publish(&self, board: &LineBoard, fx: &BoardEffects) {
        if fx.calls_changed {
            let _ = self.events.send(MultiLineEvent::CallsUpdated {
                calls: board.calls().to_vec(),
            });
        }
        if fx.primary_changed {
            let _ = self.events.send(MultiLineEvent::PrimaryChanged { call_id: board.primary() });
        }
    }

    async fn hang_up_all(&self, handles: Vec<CallHandle>) {
        for handle in handles {
            let hangup = with_timeout("hangup", self.config.hangup_timeout, self.telephony.hangup(&handle));
            if let Err(e) = hangup.await {
                warn!("⚠️ Hangup of {} failed: {}", handle, e);
            }
        }
    }

    async fn signal(&self, id: CallId, signal: CallSignal) {
        let fx = {
            let mut board = self.board.lock();
            let fx = board.on_signal(id, signal);
            self.publish(&board, &fx);
            fx
        };

        if let Some(handle) = &fx.focus {
            if let Err(e) = self.telephony.set_audio_focus(handle).await {
                warn!("⚠️ Audio focus switch to {} failed: {}", handle, e);
            }
        }
        self.hang_up_all(fx.hangups).await;
    }

    fn is_live(&self, id: CallId) -> bool {
        self.board
            .lock()
            .get(id)
            .map(|call| call.status.is_live())
            .unwrap_or(false)
    }

    async fn handle_state(&self, id: CallId, state: &TelephonyCallState) {
        if let Some(signal) = state.signal() {
            self.signal(id, signal).await;
        }
    }

    fn spawn_listener(self: &Arc<Self>, id: CallId, handle: CallHandle) {
        // Held until registered so the listener's own removal follows the insert
        let (registered_tx, registered) = oneshot::channel();
        let inner = self.clone();
        let listener = tokio::spawn(async move {
            if registered.await.is_ok() {
                inner.listen(id, handle).await;
            }
        });
        self.listeners.insert(id, listener);
        let _ = registered_tx.send(());
    }

    /// Follow one call until it ends
    async fn listen(self: Arc<Self>, id: CallId, handle: CallHandle) {
        let mut push = self.telephony.subscribe(&handle);
        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        // Catch up on anything reported before the subscription existed
        if let Ok(state) = self.telephony.call_state(&handle).await {
            self.handle_state(id, &state).await;
        }

        loop {
            if !self.is_live(id) {
                break;
            }

            let state = match push.as_mut() {
                Some(rx) => match rx.recv().await {
                    Ok(state) => Ok(state),
                    Err(broadcast::error::RecvError::Lagged(_)) => self.telephony.call_state(&handle).await,
                    Err(broadcast::error::RecvError::Closed) => {
                        push = None;
                        continue;
                    }
                },
                None => {
                    poll.tick().await;
                    self.telephony.call_state(&handle).await
                }
            };

            match state {
                Ok(state) => {
                    failures = 0;
                    self.handle_state(id, &state).await;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "⚠️ State poll {}/{} for manual call {} failed: {}",
                        failures, self.config.max_poll_failures, id, e
                    );
                    if failures >= self.config.max_poll_failures {
                        self.signal(id, CallSignal::Ended).await;
                    }
                }
            }
        }

        self.listeners.remove(&id);
        debug!("Stopped listening to manual call {}", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::telephony::SimulatedTelephony;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ended_calls_leave_no_listeners_behind() {
        let telephony = Arc::new(SimulatedTelephony::new());
        let supervisor = MultiLineSupervisor::new(MultiLineConfig::default(), telephony.clone());

        for round in 0..3 {
            let call = supervisor
                .start_call(None, &format!("+155500{:02}", round), "+15550100")
                .await
                .unwrap();
            telephony.set_state(&call.handle, TelephonyCallState::Rejected).unwrap();
        }

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while !supervisor.inner.listeners.is_empty() || supervisor.live_call_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(drained.is_ok());
        assert_eq!(supervisor.dismiss_all_ended(), 3);
    }
}
