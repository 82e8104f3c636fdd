//! Scheduler state and every decision the scheduler makes
//!
//! `DialerState` is plain synchronous data. Each operation mutates it and
//! returns [`Effects`]: telephony work to perform (originations, hangups),
//! events to publish, and writes to persist. The async engine owns the state
//! behind one mutex, publishes events and writes while still holding it, and
//! performs telephony I/O after releasing it.

use std::collections::HashSet;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::arbitration::{adjudicate, release, OperatorFocus, Verdict};
use super::queue::DialQueue;
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::events::DialerEvent;
use crate::lifecycle::{CallPhase, CallSignal, Transition};
use crate::persistence::PersistOp;
use crate::session::{DialingSession, SessionStatus};
use crate::stats::DialerStats;
use crate::telephony::{CallHandle, StartCallRequest};
use crate::types::{ActiveCall, CallId, QueueItem, QueueItemId, QueueItemStatus};

/// Origination to perform for a newly planned call
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub call_id: CallId,
    pub request: StartCallRequest,
}

/// Side effects of one state operation
#[derive(Debug, Default)]
pub struct Effects {
    pub hangups: Vec<CallHandle>,
    pub dispatches: Vec<Dispatch>,
    pub events: Vec<DialerEvent>,
    pub writes: Vec<PersistOp>,
}

impl Effects {
    fn write_item(&mut self, item: &QueueItem) {
        self.writes.push(PersistOp::QueueItem(item.clone()));
    }

    fn write_session(&mut self, session: &DialingSession) {
        self.writes.push(PersistOp::Session(session.clone()));
    }
}

/// What changed, so the matching snapshot events can be emitted once
#[derive(Default)]
struct Changed {
    stats: bool,
    queue: bool,
    active: bool,
}

pub struct DialerState {
    config: DispatchConfig,
    session: DialingSession,
    queue: DialQueue,
    active: Vec<ActiveCall>,
    focus: OperatorFocus,
}

impl DialerState {
    pub fn new(config: DispatchConfig, session: DialingSession) -> Self {
        Self {
            config,
            session,
            queue: DialQueue::new(),
            active: Vec::new(),
            focus: OperatorFocus::Free,
        }
    }

    pub fn session(&self) -> &DialingSession {
        &self.session
    }

    pub fn stats(&self) -> DialerStats {
        self.session.stats
    }

    pub fn queue(&self) -> Vec<QueueItem> {
        self.queue.snapshot()
    }

    pub fn queue_item(&self, id: &QueueItemId) -> Option<&QueueItem> {
        self.queue.get(id)
    }

    pub fn active_calls(&self) -> Vec<ActiveCall> {
        self.active.clone()
    }

    pub fn focus(&self) -> OperatorFocus {
        self.focus
    }

    pub fn is_operator_busy(&self) -> bool {
        self.focus.is_busy()
    }

    pub fn call_phase(&self, call_id: CallId) -> Option<CallPhase> {
        self.find(call_id).map(|call| call.status)
    }

    /// Active calls whose origination has not returned a handle yet
    pub fn awaiting_origination(&self) -> HashSet<CallId> {
        self.active
            .iter()
            .filter(|call| call.handle.is_none())
            .map(|call| call.id)
            .collect()
    }

    fn find(&self, call_id: CallId) -> Option<&ActiveCall> {
        self.active.iter().find(|call| call.id == call_id)
    }

    fn find_mut(&mut self, call_id: CallId) -> Option<&mut ActiveCall> {
        self.active.iter_mut().find(|call| call.id == call_id)
    }

    fn take_call(&mut self, call_id: CallId) -> Option<ActiveCall> {
        let index = self.active.iter().position(|call| call.id == call_id)?;
        Some(self.active.remove(index))
    }

    fn bound_items(&self) -> HashSet<QueueItemId> {
        self.active.iter().map(|call| call.queue_item_id.clone()).collect()
    }

    fn emit(&self, fx: &mut Effects, changed: Changed) {
        if changed.stats {
            fx.events.push(DialerEvent::StatsUpdated { stats: self.session.stats });
        }
        if changed.queue {
            fx.events.push(DialerEvent::QueueUpdated { queue: self.queue.snapshot() });
        }
        if changed.active {
            fx.events.push(DialerEvent::ActiveCallsUpdated { calls: self.active.clone() });
        }
    }

    fn set_session_status(&mut self, to: SessionStatus, fx: &mut Effects) -> Result<()> {
        self.session.transition(to)?;
        fx.write_session(&self.session);
        fx.events.push(DialerEvent::SessionStatusChanged {
            session_id: self.session.id.clone(),
            status: to,
        });
        Ok(())
    }

    // Session lifecycle

    /// Replace the working queue with the resumable items of `items`
    ///
    /// Items that arrive with every attempt used are terminalized as FAILED.
    pub fn load_queue(&mut self, items: Vec<QueueItem>) -> Effects {
        let mut fx = Effects::default();
        self.queue.replace(items);
        for item in self.queue.fail_exhausted() {
            fx.write_item(&item);
        }
        self.emit(&mut fx, Changed { queue: true, ..Default::default() });
        fx
    }

    pub fn start(&mut self) -> Result<Effects> {
        let mut fx = Effects::default();
        self.set_session_status(SessionStatus::Running, &mut fx)?;
        info!("▶️ Session {} started with {} queued items", self.session.id, self.queue.len());
        Ok(fx)
    }

    pub fn pause(&mut self) -> Result<Effects> {
        let mut fx = Effects::default();
        self.set_session_status(SessionStatus::Paused, &mut fx)?;
        info!("⏸️ Session {} paused with {} calls in flight", self.session.id, self.active.len());
        Ok(fx)
    }

    pub fn resume(&mut self) -> Result<Effects> {
        let mut fx = Effects::default();
        self.set_session_status(SessionStatus::Running, &mut fx)?;
        info!("▶️ Session {} resumed", self.session.id);
        Ok(fx)
    }

    /// End the session, requesting hangup of every call that has a handle
    ///
    /// Idempotent: a finished session yields no effects.
    pub fn stop(&mut self) -> Effects {
        let mut fx = Effects::default();
        if self.session.status.is_finished() {
            debug!("Session {} already {:?}", self.session.id, self.session.status);
            return fx;
        }

        fx.hangups = self.active.iter().filter_map(|call| call.handle.clone()).collect();
        let dropped = self.active.len();
        self.active.clear();
        self.focus = OperatorFocus::Free;

        if let Err(e) = self.set_session_status(SessionStatus::Stopped, &mut fx) {
            warn!("⚠️ {}", e);
        }
        info!("⏹️ Session {} stopped, {} active calls cleared", self.session.id, dropped);
        self.emit(&mut fx, Changed { stats: true, active: true, ..Default::default() });
        fx
    }

    fn check_completion(&mut self, fx: &mut Effects) {
        if self.session.status != SessionStatus::Running
            || !self.active.is_empty()
            || self.queue.has_dispatchable(&HashSet::new())
        {
            return;
        }

        if let Err(e) = self.set_session_status(SessionStatus::Completed, fx) {
            warn!("⚠️ {}", e);
            return;
        }
        self.focus = OperatorFocus::Free;
        info!(
            "🏁 Session {} completed: {} calls, {} answered",
            self.session.id, self.session.stats.total_calls, self.session.stats.total_answered
        );
        self.emit(fx, Changed { stats: true, ..Default::default() });
    }

    /// Current stats snapshot to persist
    pub fn flush_stats(&mut self) -> Effects {
        let mut fx = Effects::default();
        self.session.updated_at = Utc::now();
        fx.write_session(&self.session);
        self.emit(&mut fx, Changed { stats: true, ..Default::default() });
        fx
    }

    // Operator controls

    /// Declare whether the operator is in a conversation outside the dialer
    ///
    /// Clearing is refused while an answered call still holds the operator;
    /// that call releases them when it ends.
    pub fn set_admin_busy(&mut self, busy: bool) {
        match (busy, self.focus) {
            (true, OperatorFocus::Free) => {
                self.focus = OperatorFocus::Engaged { call_id: None };
                info!("🙋 Operator declared busy");
            }
            (false, OperatorFocus::Engaged { call_id: Some(call_id) }) if self.find(call_id).is_some() => {
                warn!("⚠️ Operator is still on call {}; busy flag kept", call_id);
            }
            (false, OperatorFocus::Engaged { .. }) => {
                self.focus = OperatorFocus::Free;
                info!("🙋 Operator available");
            }
            _ => {}
        }
    }

    /// Mark a PENDING item SKIPPED
    pub fn skip(&mut self, item_id: &QueueItemId) -> (bool, Effects) {
        let mut fx = Effects::default();
        let bound = self.bound_items().contains(item_id);
        let Some(item) = self.queue.get_mut(item_id) else {
            warn!("⚠️ Cannot skip unknown queue item {}", item_id);
            return (false, fx);
        };
        if item.status != QueueItemStatus::Pending || bound {
            warn!("⚠️ Cannot skip queue item {} in status {}", item_id, item.status.as_str());
            return (false, fx);
        }

        item.status = QueueItemStatus::Skipped;
        fx.write_item(item);
        info!("⏭️ Queue item {} skipped", item_id);
        self.emit(&mut fx, Changed { queue: true, ..Default::default() });
        self.check_completion(&mut fx);
        (true, fx)
    }

    // Dispatch

    /// One dispatch tick: fill free slots in retry-then-priority order
    pub fn plan_dispatch(&mut self, now: Instant) -> Effects {
        let mut fx = Effects::default();
        if self.session.status != SessionStatus::Running {
            return fx;
        }

        let limit = self.session.concurrency_limit;
        let slots = limit.saturating_sub(self.active.len());
        if slots == 0 {
            debug!("All {} lines busy, nothing to dispatch", limit);
            return fx;
        }

        let pool: Vec<String> = self
            .session
            .from_numbers
            .iter()
            .map(|number| number.trim())
            .filter(|number| !number.is_empty())
            .map(str::to_string)
            .collect();
        if pool.is_empty() {
            warn!("⚠️ Session {} has no outbound numbers; not dispatching", self.session.id);
            return fx;
        }

        let picks = self.queue.select(slots, &self.bound_items());
        let mut changed = Changed::default();

        for item_id in picks {
            let Some(item) = self.queue.get_mut(&item_id) else {
                continue;
            };

            let Some(to_number) = item.contact.first_phone_number().map(str::to_string) else {
                item.status = QueueItemStatus::Failed;
                warn!("❌ Contact {} has no phone number; queue item {} failed", item.contact_id, item.id);
                fx.write_item(item);
                fx.events.push(DialerEvent::CallFailed {
                    call: None,
                    queue_item: item.clone(),
                    reason: format!("No phone number available for contact {}", item.contact_id),
                });
                changed.queue = true;
                continue;
            };

            let from_number = pool[(self.session.stats.total_calls % pool.len() as u64) as usize].clone();

            item.status = QueueItemStatus::Calling;
            item.attempt_count += 1;
            item.last_attempt_at = Some(Utc::now());
            fx.write_item(item);

            let call = ActiveCall {
                id: Uuid::new_v4(),
                queue_item_id: item.id.clone(),
                contact_id: item.contact_id.clone(),
                contact: item.contact.clone(),
                from_number: from_number.clone(),
                to_number: to_number.clone(),
                handle: None,
                status: CallPhase::Initiated,
                started_at: Utc::now(),
                answered_at: None,
                answered_clock: None,
                dispatched_clock: Some(now),
            };
            info!(
                "📞 Dispatching {} ({}) from {} [attempt {}/{}]",
                to_number, item.contact.name, from_number, item.attempt_count, item.max_attempts
            );

            self.session.stats.record_dispatch();
            fx.dispatches.push(Dispatch {
                call_id: call.id,
                request: StartCallRequest { to_number, from_number },
            });
            self.active.push(call);
            changed = Changed { stats: true, queue: true, active: true };
        }

        self.emit(&mut fx, changed);
        self.check_completion(&mut fx);
        fx
    }

    /// Origination accepted; an absent call means it was cleared meanwhile and the handle is hung up
    pub fn attach_handle(&mut self, call_id: CallId, handle: CallHandle) -> Effects {
        let mut fx = Effects::default();
        match self.find_mut(call_id) {
            Some(call) => {
                debug!("Call {} bound to telephony session {}", call_id, handle);
                call.handle = Some(handle);
                self.emit(&mut fx, Changed { active: true, ..Default::default() });
            }
            None => {
                warn!("⚠️ Call {} was cleared before origination returned; hanging up {}", call_id, handle);
                fx.hangups.push(handle);
            }
        }
        fx
    }

    /// Origination threw: the queue item fails terminally
    pub fn origination_failed(&mut self, call_id: CallId, reason: String) -> Effects {
        let mut fx = Effects::default();
        let Some(mut call) = self.take_call(call_id) else {
            return fx;
        };
        if let Err(e) = call.status.transition(CallPhase::Failed) {
            warn!("⚠️ {}", e);
        }

        if let Some(item) = self.queue.get_mut(&call.queue_item_id) {
            item.status = QueueItemStatus::Failed;
            fx.write_item(item);
            warn!("❌ Origination to {} failed: {}", call.to_number, reason);
            fx.events.push(DialerEvent::CallFailed {
                call: Some(call),
                queue_item: item.clone(),
                reason,
            });
        }

        self.emit(&mut fx, Changed { queue: true, active: true, ..Default::default() });
        self.check_completion(&mut fx);
        fx
    }

    /// Feed a telephony notification for one call
    pub fn on_signal(&mut self, call_id: CallId, signal: CallSignal, now: Instant) -> Effects {
        let mut fx = Effects::default();
        let Some(call) = self.find_mut(call_id) else {
            debug!("Ignoring {:?} for untracked call {}", signal, call_id);
            return fx;
        };

        match call.status.on_signal(signal) {
            Transition::Ignore => {}
            Transition::Advance(CallPhase::Ringing) => {
                if call.status.transition(CallPhase::Ringing).is_ok() {
                    debug!("🔔 Call {} ringing", call_id);
                    self.emit(&mut fx, Changed { active: true, ..Default::default() });
                }
            }
            Transition::Advance(CallPhase::Answered) => self.adjudicate_answer(call_id, now, &mut fx),
            Transition::Advance(CallPhase::NoAnswer) => {
                self.finish_unanswered(call_id, CallPhase::NoAnswer, None, &mut fx)
            }
            Transition::Advance(CallPhase::Failed) => self.finish_unanswered(
                call_id,
                CallPhase::Failed,
                Some("Call failed before answer".to_string()),
                &mut fx,
            ),
            Transition::Advance(CallPhase::Completed) => self.finish_answered(call_id, now, &mut fx),
            Transition::Advance(other) => warn!("⚠️ Unexpected advance of call {} to {:?}", call_id, other),
        }
        fx
    }

    /// The call rang past the ring timeout: hang up and classify NO_ANSWER
    pub fn ring_timeout(&mut self, call_id: CallId) -> Effects {
        let mut fx = Effects::default();
        let Some(call) = self.find(call_id) else {
            return fx;
        };
        if !call.status.is_pending_answer() {
            return fx;
        }

        info!("⏰ Call {} to {} unanswered after {:?}", call_id, call.to_number, self.config.ring_timeout);
        if let Some(handle) = call.handle.clone() {
            fx.hangups.push(handle);
        }
        self.finish_unanswered(call_id, CallPhase::NoAnswer, None, &mut fx);
        fx
    }

    fn adjudicate_answer(&mut self, call_id: CallId, now: Instant, fx: &mut Effects) {
        match adjudicate(&mut self.focus, call_id) {
            Verdict::Connect => {
                let Some(call) = self.find_mut(call_id) else {
                    release(&mut self.focus, call_id);
                    return;
                };
                if let Err(e) = call.status.transition(CallPhase::Answered) {
                    warn!("⚠️ {}", e);
                    release(&mut self.focus, call_id);
                    return;
                }
                call.answered_at = Some(Utc::now());
                call.answered_clock = Some(now);
                let answered = call.clone();

                self.session.stats.record_answer();

                // Nobody will pick up these callees
                for other in &self.active {
                    if other.id != call_id && other.status == CallPhase::Ringing {
                        if let Some(handle) = &other.handle {
                            info!("✂️ Hanging up ringing call {} after answer on {}", other.id, call_id);
                            fx.hangups.push(handle.clone());
                        }
                    }
                }

                info!("✅ Call {} to {} answered and connected", call_id, answered.to_number);
                fx.events.push(DialerEvent::CallAnswered { call: answered });
                self.emit(fx, Changed { stats: true, active: true, ..Default::default() });
            }
            Verdict::DropBusy => {
                let Some(mut call) = self.take_call(call_id) else {
                    return;
                };
                if let Err(e) = call.status.transition(CallPhase::Busy) {
                    warn!("⚠️ {}", e);
                }
                if let Some(handle) = &call.handle {
                    fx.hangups.push(handle.clone());
                }

                match self.requeue_or_fail(&call.queue_item_id, Some(self.config.busy_priority_boost)) {
                    Some(item) => {
                        info!(
                            "🔁 Call {} dropped busy; queue item {} now {} at priority {}",
                            call_id,
                            item.id,
                            item.status.as_str(),
                            item.priority
                        );
                        fx.write_item(&item);
                        fx.events.push(DialerEvent::CallDroppedBusy { call, queue_item: item });
                    }
                    None => warn!("⚠️ Queue item {} of dropped call is gone", call.queue_item_id),
                }

                self.emit(fx, Changed { queue: true, active: true, ..Default::default() });
                self.check_completion(fx);
            }
        }
    }

    fn finish_unanswered(&mut self, call_id: CallId, phase: CallPhase, reason: Option<String>, fx: &mut Effects) {
        let Some(mut call) = self.take_call(call_id) else {
            return;
        };
        if let Err(e) = call.status.transition(phase) {
            warn!("⚠️ {}", e);
        }
        self.session.stats.record_no_answer();

        match self.requeue_or_fail(&call.queue_item_id, None) {
            Some(item) => {
                info!(
                    "📵 Call {} to {} ended {:?}; queue item {} now {}",
                    call_id,
                    call.to_number,
                    phase,
                    item.id,
                    item.status.as_str()
                );
                fx.write_item(&item);
                fx.events.push(match reason {
                    Some(reason) => DialerEvent::CallFailed {
                        call: Some(call),
                        queue_item: item,
                        reason,
                    },
                    None => DialerEvent::CallNoAnswer { call, queue_item: item },
                });
            }
            None => warn!("⚠️ Queue item {} of call {} is gone", call.queue_item_id, call_id),
        }

        self.emit(fx, Changed { stats: true, queue: true, active: true });
        self.check_completion(fx);
    }

    fn finish_answered(&mut self, call_id: CallId, now: Instant, fx: &mut Effects) {
        let Some(mut call) = self.take_call(call_id) else {
            return;
        };
        if let Err(e) = call.status.transition(CallPhase::Completed) {
            warn!("⚠️ {}", e);
        }

        let talk = call.talk_seconds(now);
        self.session.stats.record_talk_time(talk);
        release(&mut self.focus, call_id);

        if let Some(item) = self.queue.get_mut(&call.queue_item_id) {
            if !item.status.is_terminal() {
                item.status = QueueItemStatus::Completed;
                fx.write_item(item);
            }
        }
        info!("☎️ Call {} to {} completed after {}s of talk", call_id, call.to_number, talk);

        self.emit(fx, Changed { stats: true, queue: true, active: true });
        self.check_completion(fx);
    }

    /// Retry path: back to PENDING while attempts remain, else FAILED
    fn requeue_or_fail(&mut self, item_id: &QueueItemId, boost: Option<i32>) -> Option<QueueItem> {
        let item = self.queue.get_mut(item_id)?;
        if item.attempts_remaining() {
            item.status = QueueItemStatus::Pending;
            if let Some(boost) = boost {
                item.priority = item.priority.saturating_add(boost);
            }
        } else {
            item.status = QueueItemStatus::Failed;
        }
        Some(item.clone())
    }
}
