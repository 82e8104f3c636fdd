//! Running counters for a dialing session

use serde::{Deserialize, Serialize};

/// Session statistics
///
/// Counters only grow. `unique_rate` is derived and never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialerStats {
    /// Calls dispatched
    pub total_calls: u64,
    /// Calls that reached the operator
    pub total_contacted: u64,
    /// Calls answered and connected to the operator
    pub total_answered: u64,
    /// Calls that ended without being answered
    pub total_no_answer: u64,
    /// Seconds spent in answered calls that have completed
    pub total_talk_time_secs: u64,
}

impl DialerStats {
    pub fn record_dispatch(&mut self) {
        self.total_calls += 1;
    }

    pub fn record_answer(&mut self) {
        self.total_contacted += 1;
        self.total_answered += 1;
    }

    pub fn record_no_answer(&mut self) {
        self.total_no_answer += 1;
    }

    pub fn record_talk_time(&mut self, seconds: u64) {
        self.total_talk_time_secs += seconds;
    }

    /// `total_answered / total_calls`, or 0 before the first dispatch
    pub fn unique_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_answered as f64 / self.total_calls as f64
        }
    }
}
