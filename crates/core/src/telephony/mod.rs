//! # Telephony Client Contract
//!
//! The dialer never speaks SIP or WebRTC itself. Everything it needs from the
//! softphone stack goes through [`TelephonyClient`]: line registration, call
//! origination and hangup, call-state queries, optional push notifications,
//! and audio focus switching for the manual multi-line supervisor.
//!
//! Local requests only *ask* for a transition. The authoritative lifecycle
//! change is applied when the backend reports it, either through the
//! broadcast receiver returned by [`TelephonyClient::subscribe`] or through
//! [`TelephonyClient::call_state`] polling when no push channel exists.
//!
//! [`SimulatedTelephony`] is an in-process backend for tests and demos.

pub mod simulated;

use std::fmt;
use std::str::FromStr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::lifecycle::CallSignal;

pub use simulated::SimulatedTelephony;

/// Opaque per-call handle issued by the telephony backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallHandle {
    pub session_id: String,
}

impl CallHandle {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into() }
    }
}

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.session_id)
    }
}

/// Origination request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCallRequest {
    pub to_number: String,
    pub from_number: String,
}

/// Call state vocabulary reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TelephonyCallState {
    Ringing,
    Active,
    Answering,
    Hangup,
    Destroy,
    Failed,
    Bye,
    Cancel,
    Rejected,
    /// Anything outside the vocabulary (provisional states, vendor extensions)
    Other(String),
}

impl TelephonyCallState {
    pub fn as_str(&self) -> &str {
        match self {
            TelephonyCallState::Ringing => "ringing",
            TelephonyCallState::Active => "active",
            TelephonyCallState::Answering => "answering",
            TelephonyCallState::Hangup => "hangup",
            TelephonyCallState::Destroy => "destroy",
            TelephonyCallState::Failed => "failed",
            TelephonyCallState::Bye => "bye",
            TelephonyCallState::Cancel => "cancel",
            TelephonyCallState::Rejected => "rejected",
            TelephonyCallState::Other(state) => state,
        }
    }

    /// Lifecycle signal carried by this state, if any
    pub fn signal(&self) -> Option<CallSignal> {
        match self {
            TelephonyCallState::Ringing => Some(CallSignal::Ringing),
            TelephonyCallState::Active | TelephonyCallState::Answering => Some(CallSignal::Answered),
            TelephonyCallState::Hangup
            | TelephonyCallState::Destroy
            | TelephonyCallState::Bye
            | TelephonyCallState::Cancel => Some(CallSignal::Ended),
            TelephonyCallState::Failed | TelephonyCallState::Rejected => Some(CallSignal::Failed),
            TelephonyCallState::Other(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.signal(), Some(CallSignal::Ended | CallSignal::Failed))
    }
}

impl FromStr for TelephonyCallState {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match value.trim().to_ascii_lowercase().as_str() {
            "ringing" => TelephonyCallState::Ringing,
            "active" => TelephonyCallState::Active,
            "answering" => TelephonyCallState::Answering,
            "hangup" => TelephonyCallState::Hangup,
            "destroy" => TelephonyCallState::Destroy,
            "failed" => TelephonyCallState::Failed,
            "bye" => TelephonyCallState::Bye,
            "cancel" => TelephonyCallState::Cancel,
            "rejected" => TelephonyCallState::Rejected,
            other => TelephonyCallState::Other(other.to_string()),
        })
    }
}

impl From<String> for TelephonyCallState {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }
}

impl From<TelephonyCallState> for String {
    fn from(value: TelephonyCallState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TelephonyCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrow contract to the softphone stack
#[async_trait]
pub trait TelephonyClient: Send + Sync {
    /// Register the software phone line if it is not registered yet
    async fn ensure_registered(&self) -> Result<()>;

    /// Originate an outbound call
    async fn start_call(&self, request: StartCallRequest) -> Result<CallHandle>;

    /// Request termination of a call
    async fn hangup(&self, handle: &CallHandle) -> Result<()>;

    /// Current state of a call
    async fn call_state(&self, handle: &CallHandle) -> Result<TelephonyCallState>;

    /// Push notifications for one call, when the backend offers them
    fn subscribe(&self, _handle: &CallHandle) -> Option<broadcast::Receiver<TelephonyCallState>> {
        None
    }

    /// Route the operator's audio device to this call
    async fn set_audio_focus(&self, _handle: &CallHandle) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_maps_to_signals() {
        let cases = [
            ("ringing", Some(CallSignal::Ringing)),
            ("active", Some(CallSignal::Answered)),
            ("answering", Some(CallSignal::Answered)),
            ("hangup", Some(CallSignal::Ended)),
            ("destroy", Some(CallSignal::Ended)),
            ("bye", Some(CallSignal::Ended)),
            ("cancel", Some(CallSignal::Ended)),
            ("failed", Some(CallSignal::Failed)),
            ("rejected", Some(CallSignal::Failed)),
            ("early", None),
        ];
        for (raw, expected) in cases {
            let state: TelephonyCallState = raw.parse().unwrap();
            assert_eq!(state.signal(), expected, "state {}", raw);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive_and_keeps_unknowns() {
        let state: TelephonyCallState = " Active ".parse().unwrap();
        assert_eq!(state, TelephonyCallState::Active);
        let other: TelephonyCallState = "progress".parse().unwrap();
        assert_eq!(other, TelephonyCallState::Other("progress".into()));
        assert!(!other.is_terminal());
    }

    #[test]
    fn test_serializes_as_vocabulary_string() {
        let json = serde_json::to_string(&TelephonyCallState::Bye).unwrap();
        assert_eq!(json, "\"bye\"");
        let back: TelephonyCallState = serde_json::from_str("\"rejected\"").unwrap();
        assert_eq!(back, TelephonyCallState::Rejected);
    }
}
