use std::collections::HashSet;
use std::sync::Arc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::state::{DialerState, Dispatch, Effects};
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::events::{DialerEvent, DialerEventHandler, EventBus};
use crate::lifecycle::{CallPhase, CallSignal};
use crate::persistence::{PersistOp, PersistenceGateway, PersistenceWriter};
use crate::recovery::{retry_with_backoff, with_timeout, RetryConfig};
use crate::session::DialingSession;
use crate::stats::DialerStats;
use crate::telephony::{CallHandle, TelephonyCallState, TelephonyClient};
use crate::types::{ActiveCall, CallId, QueueItem, QueueItemId, QueueItemStatus};

/// Automatic queue scheduler ("power dialer") for one dialing session
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct PowerDialer {
    inner: Arc<DialerInner>,
}

struct DialerInner {
    config: DispatchConfig,
    state: Mutex<DialerState>,
    telephony: Arc<dyn TelephonyClient>,
    gateway: Arc<dyn PersistenceGateway>,
    writer: PersistenceWriter,
    events: EventBus,
    /// Tick and stats-flush loops
    loops: Mutex<Vec<JoinHandle<()>>>,
    /// One origination + monitor task per dispatched call
    call_tasks: DashMap<CallId, JoinHandle<()>>,
}

impl PowerDialer {
    /// Create a scheduler for `session`. Must be called inside a tokio runtime.
    pub fn new(
        config: DispatchConfig,
        session: DialingSession,
        telephony: Arc<dyn TelephonyClient>,
        gateway: Arc<dyn PersistenceGateway>,
        retry_writes: bool,
    ) -> Result<Self> {
        session.validate(&config)?;
        let (writer, _writer_task) = PersistenceWriter::spawn(gateway.clone(), retry_writes);
        writer.save_session(session.clone());

        info!(
            "🚀 Power dialer ready for session {} (limit {}, {} outbound numbers)",
            session.id,
            session.concurrency_limit,
            session.from_numbers.len()
        );

        Ok(Self {
            inner: Arc::new(DialerInner {
                state: Mutex::new(DialerState::new(config.clone(), session)),
                config,
                telephony,
                gateway,
                writer,
                events: EventBus::new(),
                loops: Mutex::new(Vec::new()),
                call_tasks: DashMap::new(),
            }),
        })
    }

    /// Install the callback handler; events are delivered to it in order
    pub fn set_event_handler(&self, handler: Arc<dyn DialerEventHandler>) {
        self.inner.events.set_handler(handler);
    }

    /// Broadcast stream of every scheduler event
    pub fn subscribe(&self) -> broadcast::Receiver<DialerEvent> {
        self.inner.events.subscribe()
    }

    /// Replace the working queue with the PENDING/CALLING items of `items`
    pub fn load_queue(&self, items: Vec<QueueItem>) {
        self.inner.apply(|state| state.load_queue(items));
    }

    /// Load this session's resumable queue through the persistence gateway
    ///
    /// A session unknown to the gateway is logged and leaves the queue untouched.
    pub async fn load_session_queue(&self) -> Result<usize> {
        let session_id = self.inner.state.lock().session().id.clone();
        self.inner.writer.flush().await;

        if self.inner.gateway.load_session(&session_id).await?.is_none() {
            warn!("⚠️ Session {} not found in persistence; queue not loaded", session_id);
            return Ok(0);
        }

        let items = self
            .inner
            .gateway
            .load_queue(&session_id, &QueueItemStatus::RESUMABLE)
            .await?;
        let count = items.len();
        self.load_queue(items);
        Ok(count)
    }

    /// Register the line, start dispatching immediately, then every tick
    pub async fn start(&self) -> Result<()> {
        let telephony = self.inner.telephony.clone();
        retry_with_backoff("ensure_registered", RetryConfig::slow(), || telephony.ensure_registered()).await?;

        self.inner.try_apply(|state| state.start())?;

        let tick = tokio::spawn(self.inner.clone().tick_loop());
        let flush = tokio::spawn(self.inner.clone().flush_loop());
        self.inner.loops.lock().extend([tick, flush]);
        Ok(())
    }

    /// Stop dispatching; calls in flight keep being tracked
    pub fn pause(&self) -> Result<()> {
        self.inner.try_apply(|state| state.pause())?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.inner.try_apply(|state| state.resume())?;
        self.inner.tick().await;
        Ok(())
    }

    /// End the session: hang up every active call and cancel all timers. Idempotent.
    pub async fn stop(&self) {
        let mut awaiting = HashSet::new();
        let fx = self.inner.apply(|state| {
            awaiting = state.awaiting_origination();
            state.stop()
        });

        for task in self.inner.loops.lock().drain(..) {
            task.abort();
        }

        // Tasks still waiting on origination hang up their own call once it returns
        self.inner.call_tasks.retain(|call_id, task| {
            if awaiting.contains(call_id) {
                true
            } else {
                task.abort();
                false
            }
        });

        self.inner.hang_up_all(fx.hangups).await;
        self.inner.writer.flush().await;
    }

    /// Declare whether the operator is already in a conversation
    pub fn set_admin_busy(&self, busy: bool) {
        self.inner.state.lock().set_admin_busy(busy);
    }

    /// Mark a PENDING queue item SKIPPED; `false` if it is unknown or not pending
    pub fn skip(&self, item_id: &QueueItemId) -> bool {
        let mut skipped = false;
        self.inner.apply(|state| {
            let (done, fx) = state.skip(item_id);
            skipped = done;
            fx
        });
        skipped
    }

    /// Persist the current stats snapshot now
    pub async fn flush_stats(&self) {
        self.inner.apply(|state| state.flush_stats());
        self.inner.writer.flush().await;
    }

    /// Run one dispatch tick now
    pub async fn tick(&self) {
        self.inner.tick().await;
    }

    pub fn stats(&self) -> DialerStats {
        self.inner.state.lock().stats()
    }

    pub fn queue(&self) -> Vec<QueueItem> {
        self.inner.state.lock().queue()
    }

    pub fn active_calls(&self) -> Vec<ActiveCall> {
        self.inner.state.lock().active_calls()
    }

    pub fn session(&self) -> DialingSession {
        self.inner.state.lock().session().clone()
    }

    pub fn is_operator_busy(&self) -> bool {
        self.inner.state.lock().is_operator_busy()
    }

    /// Resolves once the session is STOPPED or COMPLETED
    pub async fn wait_finished(&self) {
        let mut events = self.subscribe();
        loop {
            if self.session().status.is_finished() {
                return;
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

impl DialerInner {
    /// Run a state operation, then publish its events and queue its writes under the same lock
    fn apply(&self, op: impl FnOnce(&mut DialerState) -> Effects) -> Effects {
        let mut state = self.state.lock();
        let mut fx = op(&mut state);
        self.flush_effects(&mut fx);
        fx
    }

    fn try_apply(&self, op: impl FnOnce(&mut DialerState) -> Result<Effects>) -> Result<Effects> {
        let mut state = self.state.lock();
        let mut fx = op(&mut state)?;
        self.flush_effects(&mut fx);
        Ok(fx)
    }

    fn flush_effects(&self, fx: &mut Effects) {
        for event in fx.events.drain(..) {
            self.events.publish(event);
        }
        for write in fx.writes.drain(..) {
            match write {
                PersistOp::QueueItem(item) => self.writer.save_queue_item(item),
                PersistOp::Session(session) => self.writer.save_session(session),
                PersistOp::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.state.lock().session().status.is_finished()
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // First tick completes immediately
            ticker.tick().await;
            if self.is_finished() {
                break;
            }
            self.tick().await;
        }
        debug!("Dispatch loop stopped");
    }

    async fn flush_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.stats_flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.is_finished() {
                break;
            }
            self.apply(|state| state.flush_stats());
        }
    }

    async fn tick(self: &Arc<Self>) {
        let fx = self.apply(|state| state.plan_dispatch(Instant::now()));
        for dispatch in fx.dispatches {
            let call_id = dispatch.call_id;
            // Held until registered so the task's own removal follows the insert
            let (registered_tx, registered) = oneshot::channel();
            let inner = self.clone();
            let task = tokio::spawn(async move {
                if registered.await.is_ok() {
                    inner.run_call(dispatch).await;
                }
            });
            self.call_tasks.insert(call_id, task);
            let _ = registered_tx.send(());
        }
        self.hang_up_all(fx.hangups).await;
    }

    /// Request hangups one by one; a backend that never answers costs at most `hangup_timeout` each
    async fn hang_up_all(&self, handles: Vec<CallHandle>) {
        for handle in handles {
            let hangup = with_timeout("hangup", self.config.hangup_timeout, self.telephony.hangup(&handle));
            if let Err(e) = hangup.await {
                // The call may already be gone on the telephony side
                warn!("⚠️ Hangup of {} failed: {}", handle, e);
            }
        }
    }

    /// Originate one call, then follow it until it leaves the active set
    async fn run_call(self: Arc<Self>, dispatch: Dispatch) {
        let call_id = dispatch.call_id;
        let ring_deadline = Instant::now() + self.config.ring_timeout;

        let origination = with_timeout(
            "origination",
            self.config.origination_timeout,
            self.telephony.start_call(dispatch.request),
        );

        match origination.await {
            Ok(handle) => {
                let fx = self.apply(|state| state.attach_handle(call_id, handle.clone()));
                let orphaned = !fx.hangups.is_empty();
                self.hang_up_all(fx.hangups).await;
                if !orphaned {
                    self.monitor(call_id, handle, ring_deadline).await;
                }
            }
            Err(e) => {
                error!("❌ Origination for call {} failed: {}", call_id, e);
                self.apply(|state| state.origination_failed(call_id, e.to_string()));
            }
        }

        self.call_tasks.remove(&call_id);
    }

    async fn monitor(&self, call_id: CallId, handle: CallHandle, ring_deadline: Instant) {
        let mut push = self.telephony.subscribe(&handle);
        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll_failures = 0u32;

        // Catch up on anything reported before the subscription existed
        self.poll_once(call_id, &handle, &mut poll_failures).await;

        loop {
            let Some(phase) = self.state.lock().call_phase(call_id) else {
                break;
            };
            let ringing = phase == CallPhase::Initiated || phase == CallPhase::Ringing;

            tokio::select! {
                received = next_push(&mut push) => match received {
                    Ok(state) => self.handle_state(call_id, &state).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Call {} missed {} notifications; polling", call_id, skipped);
                        self.poll_once(call_id, &handle, &mut poll_failures).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Notifications for call {} closed; falling back to polling", call_id);
                        push = None;
                    }
                },
                _ = poll.tick(), if push.is_none() => {
                    self.poll_once(call_id, &handle, &mut poll_failures).await;
                }
                _ = sleep_until(ring_deadline), if ringing => {
                    let fx = self.apply(|state| state.ring_timeout(call_id));
                    self.hang_up_all(fx.hangups).await;
                }
            }
        }
        debug!("Stopped monitoring call {}", call_id);
    }

    async fn poll_once(&self, call_id: CallId, handle: &CallHandle, failures: &mut u32) {
        match self.telephony.call_state(handle).await {
            Ok(state) => {
                *failures = 0;
                self.handle_state(call_id, &state).await;
            }
            Err(e) => {
                *failures += 1;
                warn!(
                    "⚠️ State poll {}/{} for call {} failed: {}",
                    failures, self.config.max_poll_failures, call_id, e
                );
                if *failures >= self.config.max_poll_failures {
                    error!("❌ Lost track of call {}; treating as disconnected", call_id);
                    self.signal(call_id, CallSignal::Ended).await;
                }
            }
        }
    }

    async fn handle_state(&self, call_id: CallId, state: &TelephonyCallState) {
        match state.signal() {
            Some(signal) => self.signal(call_id, signal).await,
            None => debug!("Call {} reported {}", call_id, state),
        }
    }

    async fn signal(&self, call_id: CallId, signal: CallSignal) {
        let fx = self.apply(|state| state.on_signal(call_id, signal, Instant::now()));
        self.hang_up_all(fx.hangups).await;
    }
}

/// Next pushed state, or never when the backend offers no push channel
async fn next_push(
    push: &mut Option<broadcast::Receiver<TelephonyCallState>>,
) -> std::result::Result<TelephonyCallState, broadcast::error::RecvError> {
    match push {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
