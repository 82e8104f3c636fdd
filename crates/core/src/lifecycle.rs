//! Per-call lifecycle shared by automatic and manual dialing
//!
//! ```text
//! INITIATED ──► RINGING ──► ANSWERED ──► COMPLETED
//!     │            │
//!     ├────────────┴──► BUSY | NO_ANSWER | FAILED
//! ```
//!
//! Transitions are only applied from telephony notifications (or the
//! scheduler's own arbitration/timeouts); a call never moves backwards and
//! terminal phases absorb every later notification.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DialerError, Result};

/// Lifecycle phase of an automatic call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallPhase {
    /// Origination requested
    Initiated,
    /// Remote side is ringing
    Ringing,
    /// Answered and holding the operator
    Answered,
    /// Answered while the operator was engaged and dropped
    Busy,
    /// Ended without being answered
    NoAnswer,
    /// Origination or signaling failure before answer
    Failed,
    /// Answered call ended normally
    Completed,
}

/// Normalized telephony notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallSignal {
    Ringing,
    Answered,
    Ended,
    Failed,
}

/// Result of feeding a signal into a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given phase
    Advance(CallPhase),
    /// Duplicate or stale notification, nothing to do
    Ignore,
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallPhase::Busy | CallPhase::NoAnswer | CallPhase::Failed | CallPhase::Completed
        )
    }

    /// Not yet answered and not terminal
    pub fn is_pending_answer(&self) -> bool {
        matches!(self, CallPhase::Initiated | CallPhase::Ringing)
    }

    /// Phase the signal would lead to, before any arbitration
    pub fn on_signal(self, signal: CallSignal) -> Transition {
        use CallPhase::*;

        let next = match (self, signal) {
            (phase, _) if phase.is_terminal() => return Transition::Ignore,

            (Initiated, CallSignal::Ringing) => Ringing,
            (Ringing, CallSignal::Ringing) => return Transition::Ignore,

            (Initiated | Ringing, CallSignal::Answered) => Answered,

            (Initiated | Ringing, CallSignal::Ended) => NoAnswer,
            (Initiated | Ringing, CallSignal::Failed) => Failed,

            // Any ending after answer is a normal completion for accounting
            (Answered, CallSignal::Ended | CallSignal::Failed) => Completed,

            (Answered, CallSignal::Ringing | CallSignal::Answered) => return Transition::Ignore,

            _ => return Transition::Ignore,
        };

        Transition::Advance(next)
    }

    /// Check if a state transition is valid
    pub fn can_transition_to(&self, to: CallPhase) -> bool {
        use CallPhase::*;

        match (self, to) {
            // From Initiated
            (Initiated, Ringing) => true,
            (Initiated, Answered) => true,
            (Initiated, Busy) => true,
            (Initiated, NoAnswer) => true,
            (Initiated, Failed) => true,

            // From Ringing
            (Ringing, Answered) => true,
            (Ringing, Busy) => true,
            (Ringing, NoAnswer) => true,
            (Ringing, Failed) => true,

            // From Answered
            (Answered, Completed) => true,

            // No transitions out of terminal phases
            _ => false,
        }
    }

    /// Validated move to `to`
    pub fn transition(&mut self, to: CallPhase) -> Result<()> {
        if !self.can_transition_to(to) {
            return Err(DialerError::invalid_state(format!(
                "Invalid call transition from {:?} to {:?}",
                self, to
            )));
        }
        debug!("🔄 Call phase {:?} → {:?}", self, to);
        *self = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut phase = CallPhase::Initiated;
        for signal in [CallSignal::Ringing, CallSignal::Answered, CallSignal::Ended] {
            match phase.on_signal(signal) {
                Transition::Advance(next) => phase.transition(next).unwrap(),
                Transition::Ignore => panic!("signal {:?} ignored in {:?}", signal, phase),
            }
        }
        assert_eq!(phase, CallPhase::Completed);
    }

    #[test]
    fn test_unanswered_end_is_no_answer() {
        assert_eq!(
            CallPhase::Ringing.on_signal(CallSignal::Ended),
            Transition::Advance(CallPhase::NoAnswer)
        );
        assert_eq!(
            CallPhase::Initiated.on_signal(CallSignal::Failed),
            Transition::Advance(CallPhase::Failed)
        );
    }

    #[test]
    fn test_never_regresses() {
        assert_eq!(CallPhase::Answered.on_signal(CallSignal::Ringing), Transition::Ignore);
        assert_eq!(CallPhase::Ringing.on_signal(CallSignal::Ringing), Transition::Ignore);
        assert!(!CallPhase::Answered.can_transition_to(CallPhase::Ringing));
        assert!(!CallPhase::Ringing.can_transition_to(CallPhase::Initiated));
    }

    #[test]
    fn test_terminal_phases_absorb_signals() {
        for phase in [CallPhase::Busy, CallPhase::NoAnswer, CallPhase::Failed, CallPhase::Completed] {
            assert!(phase.is_terminal());
            for signal in [CallSignal::Ringing, CallSignal::Answered, CallSignal::Ended, CallSignal::Failed] {
                assert_eq!(phase.on_signal(signal), Transition::Ignore);
            }
        }
    }

    #[test]
    fn test_invalid_transition_is_an_error() {
        let mut phase = CallPhase::Completed;
        assert!(matches!(
            phase.transition(CallPhase::Answered),
            Err(DialerError::InvalidState(_))
        ));
        assert_eq!(phase, CallPhase::Completed);
    }
}
