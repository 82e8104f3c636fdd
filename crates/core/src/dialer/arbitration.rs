//! Answer arbitration: one operator, many ringing lines
//!
//! [`adjudicate`] is the only code path that engages the operator for an
//! answered call. It runs under the scheduler state lock, so two answers are
//! never judged against the same stale focus.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::CallId;

/// Who currently has the operator's attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorFocus {
    Free,
    /// Engaged on an automatic call, or declared busy by the operator (`call_id: None`)
    Engaged { call_id: Option<CallId> },
}

impl OperatorFocus {
    pub fn is_busy(&self) -> bool {
        matches!(self, OperatorFocus::Engaged { .. })
    }

    /// Call holding the operator, if any
    pub fn call(&self) -> Option<CallId> {
        match self {
            OperatorFocus::Engaged { call_id } => *call_id,
            OperatorFocus::Free => None,
        }
    }
}

impl Default for OperatorFocus {
    fn default() -> Self {
        OperatorFocus::Free
    }
}

/// Outcome of an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The call reaches the operator; the operator is now engaged on it
    Connect,
    /// The operator was already engaged; the call must be dropped
    DropBusy,
}

/// Decide an answered call and update the focus atomically with the decision
pub fn adjudicate(focus: &mut OperatorFocus, call_id: CallId) -> Verdict {
    match *focus {
        OperatorFocus::Free => {
            *focus = OperatorFocus::Engaged { call_id: Some(call_id) };
            info!("🎯 Call {} wins the operator", call_id);
            Verdict::Connect
        }
        OperatorFocus::Engaged { call_id: holder } => {
            info!("🚫 Call {} answered while operator engaged ({:?})", call_id, holder);
            Verdict::DropBusy
        }
    }
}

/// Free the operator if `call_id` is the call holding them
pub fn release(focus: &mut OperatorFocus, call_id: CallId) -> bool {
    if focus.call() == Some(call_id) {
        debug!("Operator released by call {}", call_id);
        *focus = OperatorFocus::Free;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_first_answer_wins() {
        let mut focus = OperatorFocus::Free;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(adjudicate(&mut focus, first), Verdict::Connect);
        assert_eq!(adjudicate(&mut focus, second), Verdict::DropBusy);
        assert_eq!(focus.call(), Some(first));
    }

    #[test]
    fn test_declared_busy_drops_every_answer() {
        let mut focus = OperatorFocus::Engaged { call_id: None };
        assert_eq!(adjudicate(&mut focus, Uuid::new_v4()), Verdict::DropBusy);
        assert!(focus.is_busy());
    }

    #[test]
    fn test_release_only_by_holder() {
        let holder = Uuid::new_v4();
        let mut focus = OperatorFocus::Engaged { call_id: Some(holder) };

        assert!(!release(&mut focus, Uuid::new_v4()));
        assert!(focus.is_busy());
        assert!(release(&mut focus, holder));
        assert_eq!(focus, OperatorFocus::Free);
    }

    #[test]
    fn test_release_never_frees_declared_busy() {
        let mut focus = OperatorFocus::Engaged { call_id: None };
        assert!(!release(&mut focus, Uuid::new_v4()));
        assert!(focus.is_busy());
    }
}
