// sim.rs - In-process stand-in for the navigation backend.
//
// Each submission runs on its own worker thread that reports Active, one
// Feedback halfway through the travel time, and then a terminal status.
// Submitting a new goal preempts whatever was in flight, the same way the
// real backend treats a newer goal on its single action server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::client::{
    ExecutionClient, GoalHandle, HandleSequence, NavGoal, StatusEvent, StatusEvents, StatusKind,
    EXECUTION_BACKEND,
};
use crate::error::ClientError;

/// Simulated execution backend.
pub struct SimulatedBackend {
    name: String,
    travel_time: Duration,
    /// `None` means the backend never comes up.
    ready_at: Option<Instant>,
    connected: AtomicBool,
    handles: HandleSequence,
    /// Handle of the most recent submission; older workers preempt themselves.
    latest: Arc<AtomicU64>,
    /// Terminal statuses to report, in submission order. Empty means Succeeded.
    outcomes: Mutex<VecDeque<StatusKind>>,
    events: mpsc::Sender<StatusEvent>,
}

impl SimulatedBackend {
    /// Create a backend that is ready immediately and takes `travel_time`
    /// to reach each goal.
    pub fn new(travel_time: Duration) -> (Self, StatusEvents) {
        let (tx, rx) = mpsc::channel();
        let backend = Self {
            name: EXECUTION_BACKEND.to_string(),
            travel_time,
            ready_at: Some(Instant::now()),
            connected: AtomicBool::new(false),
            handles: HandleSequence::new(),
            latest: Arc::new(AtomicU64::new(0)),
            outcomes: Mutex::new(VecDeque::new()),
            events: tx,
        };
        (backend, rx)
    }

    /// Only become reachable after `delay` has elapsed.
    pub fn ready_after(mut self, delay: Duration) -> Self {
        self.ready_at = Some(Instant::now() + delay);
        self
    }

    /// Never become reachable.
    pub fn never_ready(mut self) -> Self {
        self.ready_at = None;
        self
    }

    /// Report these terminal statuses for the next submissions, in order.
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = StatusKind>) -> Self {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(outcomes);
        self
    }

    fn next_outcome(&self) -> StatusKind {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(StatusKind::Succeeded)
    }
}

impl ExecutionClient for SimulatedBackend {
    fn wait_ready(&self, timeout: Duration) -> bool {
        let Some(ready_at) = self.ready_at else {
            thread::sleep(timeout);
            return false;
        };
        let remaining = ready_at.saturating_duration_since(Instant::now());
        if remaining > timeout {
            thread::sleep(timeout);
            return false;
        }
        thread::sleep(remaining);
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    fn submit(&self, goal: &NavGoal) -> Result<GoalHandle, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected(self.name.clone()));
        }

        let handle = self.handles.next();
        self.latest.store(handle.0, Ordering::SeqCst);
        let outcome = self.next_outcome();

        tracing::debug!(
            "SimulatedBackend: goal {} to ({:.2}, {:.2}) in {}",
            handle,
            goal.pose.x,
            goal.pose.y,
            goal.frame_id
        );

        let latest = Arc::clone(&self.latest);
        let events = self.events.clone();
        let half_leg = self.travel_time / 2;

        // A closed receiver just means nobody listens any more.
        thread::spawn(move || {
            let superseded = || latest.load(Ordering::SeqCst) != handle.0;
            let emit = |kind| {
                let _ = events.send(StatusEvent::new(handle, kind));
            };

            if superseded() {
                emit(StatusKind::PreemptedBeforeStart);
                return;
            }
            emit(StatusKind::Active);

            for step in [StatusKind::Feedback, outcome] {
                thread::sleep(half_leg);
                if superseded() {
                    emit(StatusKind::PreemptedAfterStart);
                    return;
                }
                emit(step);
            }
        });

        Ok(handle)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Pose2D;

    fn goal() -> NavGoal {
        NavGoal::new(Pose2D::new(1.0, 1.0, 0.0, 1.0), "map")
    }

    fn collect(rx: &StatusEvents, handle: GoalHandle) -> Vec<StatusKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(2)) {
            if event.handle != handle {
                continue;
            }
            kinds.push(event.kind);
            if event.kind.is_terminal() {
                break;
            }
        }
        kinds
    }

    #[test]
    fn submit_before_connect_fails() {
        let (backend, _rx) = SimulatedBackend::new(Duration::from_millis(10));
        assert!(matches!(
            backend.submit(&goal()),
            Err(ClientError::NotConnected(_))
        ));
    }

    #[test]
    fn reports_active_feedback_then_success() {
        let (backend, rx) = SimulatedBackend::new(Duration::from_millis(10));
        assert!(backend.wait_ready(Duration::from_millis(10)));
        let handle = backend.submit(&goal()).unwrap();
        assert_eq!(
            collect(&rx, handle),
            vec![
                StatusKind::Active,
                StatusKind::Feedback,
                StatusKind::Succeeded
            ]
        );
    }

    #[test]
    fn scripted_outcomes_are_used_in_order() {
        let (backend, rx) = SimulatedBackend::new(Duration::from_millis(4));
        let backend = backend.with_outcomes([StatusKind::Aborted]);
        assert!(backend.wait_ready(Duration::ZERO));

        let first = backend.submit(&goal()).unwrap();
        assert_eq!(collect(&rx, first).last(), Some(&StatusKind::Aborted));

        let second = backend.submit(&goal()).unwrap();
        assert_eq!(collect(&rx, second).last(), Some(&StatusKind::Succeeded));
    }

    #[test]
    fn newer_submission_preempts_older() {
        let (backend, rx) = SimulatedBackend::new(Duration::from_millis(200));
        assert!(backend.wait_ready(Duration::ZERO));
        let first = backend.submit(&goal()).unwrap();
        let second = backend.submit(&goal()).unwrap();
        assert_ne!(first, second);

        let mut first_terminal = None;
        let mut second_terminal = None;
        while first_terminal.is_none() || second_terminal.is_none() {
            let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            if event.kind.is_terminal() {
                if event.handle == first {
                    first_terminal = Some(event.kind);
                } else {
                    second_terminal = Some(event.kind);
                }
            }
        }
        assert!(matches!(
            first_terminal,
            Some(StatusKind::PreemptedBeforeStart | StatusKind::PreemptedAfterStart)
        ));
        assert_eq!(second_terminal, Some(StatusKind::Succeeded));
    }

    #[test]
    fn never_ready_backend_times_out() {
        let (backend, _rx) = SimulatedBackend::new(Duration::ZERO);
        let backend = backend.never_ready();
        let started = Instant::now();
        assert!(!backend.wait_ready(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn delayed_backend_needs_a_long_enough_probe() {
        let (backend, _rx) = SimulatedBackend::new(Duration::ZERO);
        let backend = backend.ready_after(Duration::from_millis(200));
        assert!(!backend.wait_ready(Duration::from_millis(10)));
        assert!(backend.wait_ready(Duration::from_secs(2)));
    }
}
