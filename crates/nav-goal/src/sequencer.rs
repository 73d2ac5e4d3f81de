// sequencer.rs - GoalSequencer: the goal dispatch state machine.
//
//   Connecting → Idle → Dispatching → AwaitingResult → Idle ... → Exhausted
//   Connecting → Failed  (after maximum_retry consecutive probe timeouts)
//   any (but Connecting/Failed) → Dispatching when a new non-empty set arrives
//
// Each tick drains the status stream in delivery order, then consumes the
// "set replaced" flag, then decides whether to dispatch. Because the flag is
// consumed before the dispatch decision, a fresh goal set always wins over
// the outcome of a goal from the previous set.
//
// Status events are only applied when they carry the handle of the active
// submission AND that submission belongs to the goal set currently loaded.
// Everything else (duplicates, late results for an abandoned set) is
// dropped, so the cursor can never advance twice or cross sets.
//
// Lock order: control, then status stream, then queue. Lifecycle events
// produced under those locks are queued on Control and handed to the sinks
// only after every guard is released.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{GoalHandle, NavGoal, StatusEvent, StatusKind};
use crate::context::NavContext;
use crate::error::{ClientError, SequencerError};
use crate::events::NavEvent;
use crate::queue::GoalQueue;

/// Where the sequencer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    /// Probing the backend.
    Connecting,
    /// Connected, nothing in flight.
    Idle,
    /// Submitting the goal at the active index.
    Dispatching,
    /// A goal is in flight; waiting for its terminal status.
    AwaitingResult,
    /// Every goal of the current set was reached.
    Exhausted,
    /// The backend was never reached. Terminal.
    Failed,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerState::Connecting => write!(f, "connecting"),
            SequencerState::Idle => write!(f, "idle"),
            SequencerState::Dispatching => write!(f, "dispatching"),
            SequencerState::AwaitingResult => write!(f, "awaiting_result"),
            SequencerState::Exhausted => write!(f, "exhausted"),
            SequencerState::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time view of the sequencer, for logs and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencerStatus {
    pub state: SequencerState,
    pub set_id: Uuid,
    pub frame_id: String,
    pub active_index: usize,
    pub goal_count: usize,
    pub dispatch_pending: bool,
    pub sequence_complete: bool,
    /// Handle of the submission whose result is awaited.
    pub in_flight: Option<GoalHandle>,
    /// Set after a goal failed; cleared by the next goal set.
    pub stalled: bool,
    pub connect_attempts: u32,
}

/// The submission whose status events are currently honoured.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    handle: GoalHandle,
    set_id: Uuid,
    index: usize,
}

#[derive(Debug)]
struct Control {
    state: SequencerState,
    in_flight: Option<InFlight>,
    /// The active goal failed; do not re-dispatch it until a new set arrives.
    stalled: bool,
    connect_attempts: u32,
    stream_closed: bool,
    /// Events waiting to be published once the locks are dropped.
    outbox: Vec<NavEvent>,
}

impl Control {
    fn emit(&mut self, event: NavEvent) {
        self.outbox.push(event);
    }
}

/// Longest single sleep in `run`, so shutdown is noticed promptly.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Drives goal sets through the execution backend one goal at a time.
pub struct GoalSequencer {
    ctx: Arc<NavContext>,
    control: Mutex<Control>,
}

impl GoalSequencer {
    /// Create a sequencer in the `Connecting` state.
    pub fn new(ctx: Arc<NavContext>) -> Self {
        Self {
            ctx,
            control: Mutex::new(Control {
                state: SequencerState::Connecting,
                in_flight: None,
                stalled: false,
                connect_attempts: 0,
                stream_closed: false,
                outbox: Vec::new(),
            }),
        }
    }

    pub fn context(&self) -> &Arc<NavContext> {
        &self.ctx
    }

    pub fn state(&self) -> SequencerState {
        self.lock_control().state
    }

    pub fn status(&self) -> SequencerStatus {
        let control = self.lock_control();
        let queue = self.ctx.lock_queue();
        SequencerStatus {
            state: control.state,
            set_id: queue.set_id(),
            frame_id: queue.goal_set().frame_id.clone(),
            active_index: queue.active_index(),
            goal_count: queue.len(),
            dispatch_pending: queue.is_dispatch_pending(),
            sequence_complete: queue.is_complete(),
            in_flight: control.in_flight.map(|f| f.handle),
            stalled: control.stalled,
            connect_attempts: control.connect_attempts,
        }
    }

    /// Run one control step.
    ///
    /// Returns the state after the step. `ConnectionFailed` is returned
    /// exactly once, on the tick that gives up on the backend; a failed
    /// submit is returned as `Client` and leaves the sequencer stalled.
    pub fn tick(&self) -> Result<SequencerState, SequencerError> {
        let mut control = self.lock_control();
        match control.state {
            SequencerState::Failed => return Ok(SequencerState::Failed),
            SequencerState::Connecting => {
                // The probe blocks, so it runs without holding any lock.
                drop(control);
                let (guard, connected) = self.connect();
                control = guard;
                if let Err(e) = connected {
                    self.publish(control);
                    return Err(e);
                }
                if control.state != SequencerState::Idle {
                    let state = control.state;
                    self.publish(control);
                    return Ok(state);
                }
            }
            _ => {}
        }

        self.drain_status_events(&mut control);

        let decided = {
            let mut queue = self.ctx.lock_queue();
            self.decide(&mut control, &mut queue)
        };
        let state = control.state;
        self.publish(control);
        decided.map(|()| state)
    }

    /// Apply one status event. Callable from a status-delivery thread as an
    /// alternative to letting `tick` drain the stream.
    pub fn handle_event(&self, event: StatusEvent) {
        let mut control = self.lock_control();
        {
            let mut queue = self.ctx.lock_queue();
            self.apply_event(&mut control, &mut queue, event);
        }
        self.publish(control);
    }

    /// Tick at the configured rate until `shutdown` is set.
    ///
    /// The rate is re-read every iteration so a reload takes effect on the
    /// next tick. Reaching `Failed` does not end the loop.
    pub fn run(&self, shutdown: &AtomicBool) {
        tracing::info!("[{}] Starting node", self.ctx.node_name());
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let period = self.ctx.parameters().tick_period();

            match self.tick() {
                Ok(_) => {}
                Err(e @ SequencerError::ConnectionFailed { .. }) => {
                    tracing::error!("[{}] {}", self.ctx.node_name(), e);
                }
                Err(e) => tracing::warn!("[{}] {}", self.ctx.node_name(), e),
            }

            while !shutdown.load(Ordering::SeqCst) {
                match period.checked_sub(started.elapsed()) {
                    Some(rest) if !rest.is_zero() => thread::sleep(rest.min(SHUTDOWN_POLL)),
                    _ => break,
                }
            }
        }
        tracing::info!("[{}] Sequencer stopped", self.ctx.node_name());
    }

    /// One readiness probe. Re-acquires the control lock afterwards and
    /// hands it back together with the outcome.
    fn connect(&self) -> (MutexGuard<'_, Control>, Result<(), SequencerError>) {
        let params = self.ctx.parameters();
        let client = self.ctx.client();
        let node = self.ctx.node_name();

        let ready = client.wait_ready(params.backend_ready_timeout);

        let mut control = self.lock_control();
        if ready {
            control.connect_attempts = 0;
            tracing::info!("[{}] Configuration OK", node);
            tracing::info!("[{}] Connected to {} server", node, client.name());
            self.transition(&mut control, SequencerState::Idle);
            return (control, Ok(()));
        }

        control.connect_attempts += 1;
        if control.connect_attempts >= params.max_connect_retries {
            let attempts = control.connect_attempts;
            tracing::error!("[{}] Unable to reach connection ...", node);
            self.transition(&mut control, SequencerState::Failed);
            control.emit(NavEvent::ConnectionFailed {
                backend: client.name().to_string(),
                attempts,
                timestamp: Utc::now(),
            });
            return (control, Err(SequencerError::ConnectionFailed { attempts }));
        }

        tracing::warn!(
            "[{}] Action server did not respond after {:.1} seconds",
            node,
            params.backend_ready_timeout.as_secs_f64()
        );
        tracing::warn!(
            "[{}] Retrying to reach connection ... ({}/{})",
            node,
            control.connect_attempts,
            params.max_connect_retries
        );
        (control, Ok(()))
    }

    fn drain_status_events(&self, control: &mut Control) {
        let events = self.ctx.lock_status_events();
        loop {
            match events.try_recv() {
                Ok(event) => {
                    let mut queue = self.ctx.lock_queue();
                    self.apply_event(control, &mut queue, event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !control.stream_closed {
                        tracing::warn!(
                            "[{}] {}: {}",
                            self.ctx.node_name(),
                            self.ctx.client().name(),
                            ClientError::Disconnected
                        );
                        control.stream_closed = true;
                    }
                    break;
                }
            }
        }
    }

    fn apply_event(&self, control: &mut Control, queue: &mut GoalQueue, event: StatusEvent) {
        let node = self.ctx.node_name();
        let Some(flight) = control.in_flight else {
            tracing::debug!(
                "[{}] Ignoring {} for goal {}: nothing in flight",
                node,
                event.kind,
                event.handle
            );
            return;
        };

        if event.handle != flight.handle || flight.set_id != queue.set_id() {
            tracing::debug!(
                "[{}] Ignoring stale {} for goal {}",
                node,
                event.kind,
                event.handle
            );
            if event.handle == flight.handle && event.kind.is_terminal() {
                control.in_flight = None;
            }
            return;
        }

        let index = flight.index;
        match event.kind {
            StatusKind::Active => {
                tracing::info!(
                    "[{}] The goal with ID {} is now being processed by the Action Server...",
                    node,
                    index
                );
                control.emit(NavEvent::GoalActive {
                    set_id: flight.set_id,
                    index,
                    handle: flight.handle,
                    timestamp: Utc::now(),
                });
            }
            StatusKind::Feedback => {
                tracing::trace!("[{}] Feedback for goal with ID {}", node, index);
            }
            StatusKind::Succeeded => {
                control.in_flight = None;
                queue.clear_dispatch();
                queue.advance();
                tracing::info!("[{}] Reached Goal {} successfully", node, index);
                control.emit(NavEvent::GoalSucceeded {
                    set_id: flight.set_id,
                    index,
                    handle: flight.handle,
                    timestamp: Utc::now(),
                });

                if queue.is_complete() {
                    tracing::info!("[{}] Reached final goal", node);
                    self.transition(control, SequencerState::Exhausted);
                    control.emit(NavEvent::SequenceExhausted {
                        set_id: flight.set_id,
                        goal_count: queue.len(),
                        timestamp: Utc::now(),
                    });
                } else {
                    self.transition(control, SequencerState::Idle);
                }
            }
            kind @ (StatusKind::Aborted
            | StatusKind::Rejected
            | StatusKind::PreemptedBeforeStart
            | StatusKind::PreemptedAfterStart) => {
                control.in_flight = None;
                control.stalled = true;
                queue.clear_dispatch();
                match kind {
                    StatusKind::Aborted => tracing::warn!(
                        "[{}] {}",
                        node,
                        SequencerError::GoalAborted { index }
                    ),
                    StatusKind::Rejected => tracing::warn!(
                        "[{}] {}",
                        node,
                        SequencerError::GoalRejected { index }
                    ),
                    StatusKind::PreemptedBeforeStart => tracing::info!(
                        "[{}] The goal with ID {} received a cancel request before it started executing, successfully cancelled!",
                        node,
                        index
                    ),
                    _ => tracing::info!(
                        "[{}] The goal with ID {} received a cancel request after it started executing",
                        node,
                        index
                    ),
                }
                control.emit(NavEvent::GoalFailed {
                    set_id: flight.set_id,
                    index,
                    handle: flight.handle,
                    status: kind,
                    timestamp: Utc::now(),
                });
                self.transition(control, SequencerState::Idle);
            }
        }
    }

    fn decide(&self, control: &mut Control, queue: &mut GoalQueue) -> Result<(), SequencerError> {
        let node = self.ctx.node_name();

        if queue.consume_replaced_flag() {
            if let Some(stale) = control.in_flight.take() {
                tracing::info!(
                    "[{}] Goal set replaced, abandoning goal {} ({})",
                    node,
                    stale.index,
                    stale.handle
                );
            }
            control.stalled = false;
            if queue.is_complete() {
                self.transition(control, SequencerState::Exhausted);
                return Ok(());
            }
        }

        if queue.is_complete() || queue.is_dispatch_pending() || control.stalled {
            return Ok(());
        }

        self.transition(control, SequencerState::Dispatching);
        let index = queue.active_index();
        let set_id = queue.set_id();
        let (pose, frame_id) = queue.current()?;
        let goal = NavGoal::new(pose, frame_id);

        match self.ctx.client().submit(&goal) {
            Ok(handle) => {
                queue.mark_dispatched();
                control.in_flight = Some(InFlight {
                    handle,
                    set_id,
                    index,
                });
                tracing::info!(
                    "[{}] Sending goal with ID {} to Action Server",
                    node,
                    index
                );
                control.emit(NavEvent::goal_dispatched(set_id, index, handle, pose));
                self.transition(control, SequencerState::AwaitingResult);
                Ok(())
            }
            Err(e) => {
                control.stalled = true;
                self.transition(control, SequencerState::Idle);
                Err(e.into())
            }
        }
    }

    fn transition(&self, control: &mut Control, next: SequencerState) {
        if control.state == next {
            return;
        }
        tracing::debug!(
            "[{}] state {} -> {}",
            self.ctx.node_name(),
            control.state,
            next
        );
        let from = control.state;
        control.emit(NavEvent::state_changed(from, next));
        control.state = next;
    }

    /// Release the control lock, then hand queued events to the sinks.
    fn publish(&self, mut control: MutexGuard<'_, Control>) {
        let events = std::mem::take(&mut control.outbox);
        drop(control);
        for event in &events {
            self.ctx.dispatch(event);
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
