//! In-process telephony backend
//!
//! Every originated call starts in a provisional `trying` state and only moves
//! when a test (or the CLI's answer script) calls [`SimulatedTelephony::set_state`].
//! Hangup requests are confirmed by reporting `hangup`, the way a real
//! softphone reports the end of a call it was asked to terminate.
//!
//! ```rust
//! use powerdial_core::telephony::{SimulatedTelephony, StartCallRequest, TelephonyCallState, TelephonyClient};
//!
//! # tokio_test::block_on(async {
//! let telephony = SimulatedTelephony::new();
//! let handle = telephony
//!     .start_call(StartCallRequest {
//!         to_number: "+15550001".to_string(),
//!         from_number: "+15550100".to_string(),
//!     })
//!     .await
//!     .unwrap();
//!
//! telephony.answer(&handle).unwrap();
//! assert_eq!(telephony.call_state(&handle).await.unwrap(), TelephonyCallState::Active);
//! # });
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{CallHandle, StartCallRequest, TelephonyCallState, TelephonyClient};
use crate::error::{DialerError, Result};

const CALL_EVENT_CAPACITY: usize = 32;
const ORIGINATION_EVENT_CAPACITY: usize = 256;

struct SimulatedCall {
    request: StartCallRequest,
    state: TelephonyCallState,
    events: broadcast::Sender<TelephonyCallState>,
}

/// Scriptable telephony backend for tests and demos
pub struct SimulatedTelephony {
    push_events: bool,
    next_id: AtomicU64,
    calls: DashMap<String, SimulatedCall>,
    failing_numbers: Mutex<HashSet<String>>,
    stalling_numbers: Mutex<HashSet<String>>,
    registration_failures: AtomicU32,
    registrations: AtomicU32,
    poll_failures: DashMap<String, u32>,
    fail_hangups: AtomicBool,
    stall_hangups: AtomicBool,
    originations: Mutex<Vec<(CallHandle, StartCallRequest)>>,
    hangups: Mutex<Vec<CallHandle>>,
    audio_focus: Mutex<Option<CallHandle>>,
    originated_tx: broadcast::Sender<(CallHandle, StartCallRequest)>,
}

impl SimulatedTelephony {
    /// Backend that pushes state changes through [`TelephonyClient::subscribe`]
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Backend without push notifications; callers must poll
    pub fn polling() -> Self {
        Self::build(false)
    }

    fn build(push_events: bool) -> Self {
        let (originated_tx, _) = broadcast::channel(ORIGINATION_EVENT_CAPACITY);
        Self {
            push_events,
            next_id: AtomicU64::new(1),
            calls: DashMap::new(),
            failing_numbers: Mutex::new(HashSet::new()),
            stalling_numbers: Mutex::new(HashSet::new()),
            registration_failures: AtomicU32::new(0),
            registrations: AtomicU32::new(0),
            poll_failures: DashMap::new(),
            fail_hangups: AtomicBool::new(false),
            stall_hangups: AtomicBool::new(false),
            originations: Mutex::new(Vec::new()),
            hangups: Mutex::new(Vec::new()),
            audio_focus: Mutex::new(None),
            originated_tx,
        }
    }

    /// Report a new state for a call, as the remote side would
    pub fn set_state(&self, handle: &CallHandle, state: TelephonyCallState) -> Result<()> {
        let mut call = self
            .calls
            .get_mut(&handle.session_id)
            .ok_or_else(|| DialerError::not_found(format!("simulated call {}", handle)))?;
        debug!("📞 Simulated call {} → {}", handle, state);
        call.state = state.clone();
        // No receivers simply means nobody subscribed to this call
        let _ = call.events.send(state);
        Ok(())
    }

    /// Convenience for `set_state(handle, Active)`
    pub fn answer(&self, handle: &CallHandle) -> Result<()> {
        self.set_state(handle, TelephonyCallState::Active)
    }

    /// Convenience for `set_state(handle, Ringing)`
    pub fn ring(&self, handle: &CallHandle) -> Result<()> {
        self.set_state(handle, TelephonyCallState::Ringing)
    }

    /// Remote side ends the call
    pub fn remote_hangup(&self, handle: &CallHandle) -> Result<()> {
        self.set_state(handle, TelephonyCallState::Bye)
    }

    /// Make origination to `number` fail
    pub fn fail_calls_to(&self, number: impl Into<String>) {
        self.failing_numbers.lock().insert(number.into());
    }

    /// Make origination to `number` hang without ever answering
    pub fn stall_calls_to(&self, number: impl Into<String>) {
        self.stalling_numbers.lock().insert(number.into());
    }

    /// Make the next `count` registration attempts fail
    pub fn fail_next_registrations(&self, count: u32) {
        self.registration_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` state queries for a call fail
    pub fn fail_next_polls(&self, handle: &CallHandle, count: u32) {
        self.poll_failures.insert(handle.session_id.clone(), count);
    }

    /// Make every hangup request fail without reaching the call
    pub fn set_hangup_failures(&self, enabled: bool) {
        self.fail_hangups.store(enabled, Ordering::SeqCst);
    }

    /// Make every hangup request hang without an acknowledgement
    pub fn set_hangup_stalls(&self, enabled: bool) {
        self.stall_hangups.store(enabled, Ordering::SeqCst);
    }

    /// Successful registrations so far
    pub fn registration_count(&self) -> u32 {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Every accepted origination, in order
    pub fn originations(&self) -> Vec<(CallHandle, StartCallRequest)> {
        self.originations.lock().clone()
    }

    /// Handle of the most recent origination to `to_number`
    pub fn handle_for(&self, to_number: &str) -> Option<CallHandle> {
        self.originations
            .lock()
            .iter()
            .rev()
            .find(|(_, request)| request.to_number == to_number)
            .map(|(handle, _)| handle.clone())
    }

    /// Every hangup request, in order
    pub fn hangups(&self) -> Vec<CallHandle> {
        self.hangups.lock().clone()
    }

    pub fn was_hung_up(&self, handle: &CallHandle) -> bool {
        self.hangups.lock().iter().any(|h| h == handle)
    }

    /// Call currently holding the operator's audio device
    pub fn audio_focus(&self) -> Option<CallHandle> {
        self.audio_focus.lock().clone()
    }

    /// Last reported state of a call
    pub fn state_of(&self, handle: &CallHandle) -> Option<TelephonyCallState> {
        self.calls.get(&handle.session_id).map(|call| call.state.clone())
    }

    /// Number a call was originated to
    pub fn destination_of(&self, handle: &CallHandle) -> Option<String> {
        self.calls.get(&handle.session_id).map(|call| call.request.to_number.clone())
    }

    /// Stream of accepted originations, used by scripted answer simulations
    pub fn originated(&self) -> broadcast::Receiver<(CallHandle, StartCallRequest)> {
        self.originated_tx.subscribe()
    }
}

impl Default for SimulatedTelephony {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelephonyClient for SimulatedTelephony {
    async fn ensure_registered(&self) -> Result<()> {
        let remaining = self.registration_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.registration_failures.store(remaining - 1, Ordering::SeqCst);
            warn!("❌ Simulated registration failure ({} more queued)", remaining - 1);
            return Err(DialerError::telephony("registrar did not respond"));
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_call(&self, request: StartCallRequest) -> Result<CallHandle> {
        let stalled = self.stalling_numbers.lock().contains(&request.to_number);
        if stalled {
            debug!("Origination to {} stalled", request.to_number);
            std::future::pending::<()>().await;
        }
        if self.failing_numbers.lock().contains(&request.to_number) {
            return Err(DialerError::telephony(format!(
                "origination to {} rejected",
                request.to_number
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = CallHandle::new(format!("sim-{}", id));
        let (events, _) = broadcast::channel(CALL_EVENT_CAPACITY);
        self.calls.insert(
            handle.session_id.clone(),
            SimulatedCall {
                request: request.clone(),
                state: TelephonyCallState::Other("trying".to_string()),
                events,
            },
        );
        self.originations.lock().push((handle.clone(), request.clone()));
        info!("📞 Simulated call {} {} → {}", handle, request.from_number, request.to_number);
        let _ = self.originated_tx.send((handle.clone(), request));
        Ok(handle)
    }

    async fn hangup(&self, handle: &CallHandle) -> Result<()> {
        if self.stall_hangups.load(Ordering::SeqCst) {
            debug!("Hangup of {} stalled", handle);
            std::future::pending::<()>().await;
        }
        if self.fail_hangups.load(Ordering::SeqCst) {
            return Err(DialerError::telephony(format!("hangup of {} failed", handle)));
        }
        let ended = {
            let call = self
                .calls
                .get(&handle.session_id)
                .ok_or_else(|| DialerError::not_found(format!("simulated call {}", handle)))?;
            call.state.is_terminal()
        };
        self.hangups.lock().push(handle.clone());
        if !ended {
            self.set_state(handle, TelephonyCallState::Hangup)?;
        }
        Ok(())
    }

    async fn call_state(&self, handle: &CallHandle) -> Result<TelephonyCallState> {
        if let Some(mut remaining) = self.poll_failures.get_mut(&handle.session_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DialerError::telephony(format!("state query for {} timed out", handle)));
            }
        }
        self.calls
            .get(&handle.session_id)
            .map(|call| call.state.clone())
            .ok_or_else(|| DialerError::not_found(format!("simulated call {}", handle)))
    }

    fn subscribe(&self, handle: &CallHandle) -> Option<broadcast::Receiver<TelephonyCallState>> {
        if !self.push_events {
            return None;
        }
        self.calls.get(&handle.session_id).map(|call| call.events.subscribe())
    }

    async fn set_audio_focus(&self, handle: &CallHandle) -> Result<()> {
        if !self.calls.contains_key(&handle.session_id) {
            return Err(DialerError::not_found(format!("simulated call {}", handle)));
        }
        *self.audio_focus.lock() = Some(handle.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(to: &str) -> StartCallRequest {
        StartCallRequest {
            to_number: to.to_string(),
            from_number: "+15550100".to_string(),
        }
    }

    #[tokio::test]
    async fn test_hangup_is_confirmed_with_hangup_state() {
        let sim = SimulatedTelephony::new();
        let handle = sim.start_call(request("+15550001")).await.unwrap();
        let mut rx = sim.subscribe(&handle).unwrap();

        sim.hangup(&handle).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), TelephonyCallState::Hangup);
        assert!(sim.was_hung_up(&handle));
        assert_eq!(sim.call_state(&handle).await.unwrap(), TelephonyCallState::Hangup);
    }

    #[tokio::test]
    async fn test_polling_backend_offers_no_subscription() {
        let sim = SimulatedTelephony::polling();
        let handle = sim.start_call(request("+15550001")).await.unwrap();
        assert!(sim.subscribe(&handle).is_none());

        sim.answer(&handle).unwrap();
        assert_eq!(sim.call_state(&handle).await.unwrap(), TelephonyCallState::Active);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let sim = SimulatedTelephony::new();
        sim.fail_calls_to("+15550666");
        assert!(sim.start_call(request("+15550666")).await.is_err());

        sim.fail_next_registrations(1);
        assert!(sim.ensure_registered().await.is_err());
        assert!(sim.ensure_registered().await.is_ok());
        assert_eq!(sim.registration_count(), 1);

        let handle = sim.start_call(request("+15550001")).await.unwrap();
        sim.fail_next_polls(&handle, 1);
        assert!(sim.call_state(&handle).await.is_err());
        assert!(sim.call_state(&handle).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalls_never_resolve() {
        let sim = SimulatedTelephony::new();
        sim.stall_calls_to("+15550777");
        let stalled = tokio::time::timeout(Duration::from_secs(60), sim.start_call(request("+15550777"))).await;
        assert!(stalled.is_err());
        assert!(sim.originations().is_empty());

        let handle = sim.start_call(request("+15550001")).await.unwrap();
        sim.set_hangup_stalls(true);
        assert!(tokio::time::timeout(Duration::from_secs(60), sim.hangup(&handle)).await.is_err());
        assert!(!sim.was_hung_up(&handle));
    }

    #[tokio::test]
    async fn test_handle_for_returns_latest_origination() {
        let sim = SimulatedTelephony::new();
        let first = sim.start_call(request("+15550001")).await.unwrap();
        let second = sim.start_call(request("+15550001")).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(sim.handle_for("+15550001"), Some(second));
        assert_eq!(sim.handle_for("+15559999"), None);
    }
}
