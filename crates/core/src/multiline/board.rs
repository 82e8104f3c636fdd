//! Bookkeeping of manually dialed lines

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{ManualCallStatus, ManualDialerCall};
use crate::error::{DialerError, Result};
use crate::lifecycle::CallSignal;
use crate::telephony::CallHandle;
use crate::types::CallId;

/// Telephony work produced by a board update
#[derive(Debug, Default, PartialEq)]
pub(crate) struct BoardEffects {
    pub hangups: Vec<CallHandle>,
    /// Route audio to this call
    pub focus: Option<CallHandle>,
    pub calls_changed: bool,
    pub primary_changed: bool,
}

#[derive(Debug)]
pub(crate) struct LineBoard {
    max_lines: usize,
    calls: Vec<ManualDialerCall>,
    primary: Option<CallId>,
    /// Lines claimed by originations still in progress
    reserved: usize,
}

impl LineBoard {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            calls: Vec::new(),
            primary: None,
            reserved: 0,
        }
    }

    pub fn calls(&self) -> &[ManualDialerCall] {
        &self.calls
    }

    pub fn primary(&self) -> Option<CallId> {
        self.primary
    }

    pub fn get(&self, id: CallId) -> Option<&ManualDialerCall> {
        self.calls.iter().find(|call| call.id == id)
    }

    fn get_mut(&mut self, id: CallId) -> Option<&mut ManualDialerCall> {
        self.calls.iter_mut().find(|call| call.id == id)
    }

    /// Calls ringing or connected
    pub fn live_count(&self) -> usize {
        self.calls.iter().filter(|call| call.status.is_live()).count()
    }

    /// Claim a line for an origination, refusing at the ceiling
    pub fn reserve(&mut self) -> Result<()> {
        if self.live_count() + self.reserved >= self.max_lines {
            return Err(DialerError::LineLimitReached { limit: self.max_lines });
        }
        self.reserved += 1;
        Ok(())
    }

    pub fn release_reservation(&mut self) {
        self.reserved = self.reserved.saturating_sub(1);
    }

    /// Turn a reservation into a ringing call
    pub fn register(&mut self, call: ManualDialerCall) {
        self.release_reservation();
        self.calls.push(call);
    }

    /// Apply a lifecycle signal for one call
    pub fn on_signal(&mut self, id: CallId, signal: CallSignal) -> BoardEffects {
        match signal {
            CallSignal::Ringing => BoardEffects::default(),
            CallSignal::Answered => self.on_answered(id),
            CallSignal::Ended => self.on_ended(id, false),
            CallSignal::Failed => self.on_ended(id, true),
        }
    }

    fn on_answered(&mut self, id: CallId) -> BoardEffects {
        let mut fx = BoardEffects::default();
        let Some(call) = self.get_mut(id) else {
            return fx;
        };
        if call.status != ManualCallStatus::Ringing {
            return fx;
        }

        call.status = ManualCallStatus::Connected;
        call.connected_at = Some(Utc::now());
        let handle = call.handle.clone();
        fx.calls_changed = true;
        info!("✅ Manual call {} connected", id);

        if self.primary.is_none() {
            self.primary = Some(id);
            fx.focus = Some(handle);
            fx.primary_changed = true;
            info!("🎧 Manual call {} is now primary", id);
        }

        fx.hangups = self
            .calls
            .iter()
            .filter(|other| other.id != id && other.status == ManualCallStatus::Ringing)
            .map(|other| other.handle.clone())
            .collect();
        fx
    }

    fn on_ended(&mut self, id: CallId, failed: bool) -> BoardEffects {
        let mut fx = BoardEffects::default();
        let Some(call) = self.get_mut(id) else {
            return fx;
        };
        if !call.status.is_live() {
            return fx;
        }

        call.status = if failed && call.status == ManualCallStatus::Ringing {
            ManualCallStatus::Failed
        } else {
            ManualCallStatus::Ended
        };
        call.ended_at = Some(Utc::now());
        fx.calls_changed = true;
        info!("📴 Manual call {} {:?}", id, call.status);

        if self.primary == Some(id) {
            self.primary = self.next_primary();
            fx.focus = self
                .primary
                .and_then(|next| self.get(next))
                .map(|next| next.handle.clone());
            fx.primary_changed = true;
            debug!("Primary moved to {:?}", self.primary);
        }
        fx
    }

    /// Earliest-connected call still connected
    fn next_primary(&self) -> Option<CallId> {
        self.calls
            .iter()
            .filter(|call| call.status == ManualCallStatus::Connected)
            .min_by_key(|call| call.connected_at)
            .map(|call| call.id)
    }

    /// Give audio focus to a connected call; `None` leaves everything untouched
    pub fn switch_primary(&mut self, id: CallId) -> Option<CallHandle> {
        match self.get(id) {
            Some(call) if call.status == ManualCallStatus::Connected => {
                let handle = call.handle.clone();
                self.primary = Some(id);
                Some(handle)
            }
            Some(call) => {
                warn!("⚠️ Cannot make call {} primary while {:?}", id, call.status);
                None
            }
            None => {
                warn!("⚠️ Cannot make unknown call {} primary", id);
                None
            }
        }
    }

    /// Mark every live call ended without waiting for confirmation
    pub fn end_all(&mut self) -> bool {
        let now = Utc::now();
        let mut changed = false;
        for call in self.calls.iter_mut().filter(|call| call.status.is_live()) {
            call.status = ManualCallStatus::Ended;
            call.ended_at = Some(now);
            changed = true;
        }
        self.primary = None;
        changed
    }

    /// Remove an ended or failed call from the board
    pub fn dismiss(&mut self, id: CallId) -> bool {
        match self.calls.iter().position(|call| call.id == id) {
            Some(index) if !self.calls[index].status.is_live() => {
                self.calls.remove(index);
                true
            }
            Some(_) => {
                warn!("⚠️ Call {} is still live; hang it up before dismissing", id);
                false
            }
            None => false,
        }
    }

    pub fn dismiss_all_ended(&mut self) -> usize {
        let before = self.calls.len();
        self.calls.retain(|call| call.status.is_live());
        before - self.calls.len()
    }
}
