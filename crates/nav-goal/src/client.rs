// client.rs - The narrow contract with the execution backend.
//
// The sequencer only needs three things from whatever drives the robot:
// a bounded readiness probe, a non-blocking submit that hands back a
// correlation handle, and an ordered stream of status events tagged with
// that handle. The stream is created together with the client and is
// never restarted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::pose::Pose2D;

/// Well-known name of the navigation backend the client talks to.
pub const EXECUTION_BACKEND: &str = "move_base";

/// Correlation token for one submission: a monotonically increasing
/// sequence number assigned by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GoalHandle(pub u64);

impl fmt::Display for GoalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out strictly increasing handles, starting at 1.
#[derive(Debug, Default)]
pub struct HandleSequence(AtomicU64);

impl HandleSequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> GoalHandle {
        GoalHandle(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// What the backend reports about a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// The backend started working on the goal.
    Active,
    /// Progress report while active.
    Feedback,
    Succeeded,
    Aborted,
    Rejected,
    /// Cancelled before the backend started executing it.
    PreemptedBeforeStart,
    /// Cancelled while executing.
    PreemptedAfterStart,
}

impl StatusKind {
    /// Terminal statuses end the lifecycle of a submission.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatusKind::Active | StatusKind::Feedback)
    }

    /// Map the backend's numeric goal status to a kind.
    ///
    /// PENDING and the transient cancel states carry no information the
    /// sequencer acts on and map to `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(StatusKind::Active),
            2 => Some(StatusKind::PreemptedAfterStart),
            3 => Some(StatusKind::Succeeded),
            4 => Some(StatusKind::Aborted),
            5 => Some(StatusKind::Rejected),
            8 => Some(StatusKind::PreemptedBeforeStart),
            _ => None,
        }
    }

    /// Inverse of [`StatusKind::from_code`]. Feedback has no status code.
    pub fn code(&self) -> Option<u8> {
        match self {
            StatusKind::Active => Some(1),
            StatusKind::PreemptedAfterStart => Some(2),
            StatusKind::Succeeded => Some(3),
            StatusKind::Aborted => Some(4),
            StatusKind::Rejected => Some(5),
            StatusKind::PreemptedBeforeStart => Some(8),
            StatusKind::Feedback => None,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Active => write!(f, "active"),
            StatusKind::Feedback => write!(f, "feedback"),
            StatusKind::Succeeded => write!(f, "succeeded"),
            StatusKind::Aborted => write!(f, "aborted"),
            StatusKind::Rejected => write!(f, "rejected"),
            StatusKind::PreemptedBeforeStart => write!(f, "preempted_before_start"),
            StatusKind::PreemptedAfterStart => write!(f, "preempted_after_start"),
        }
    }
}

/// One status callback from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub handle: GoalHandle,
    pub kind: StatusKind,
}

impl StatusEvent {
    pub fn new(handle: GoalHandle, kind: StatusKind) -> Self {
        Self { handle, kind }
    }
}

/// Receiving end of a client's status stream.
pub type StatusEvents = mpsc::Receiver<StatusEvent>;

/// A goal as submitted to the backend: pose, frame and stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavGoal {
    pub frame_id: String,
    pub pose: Pose2D,
    pub stamp: DateTime<Utc>,
}

impl NavGoal {
    /// Stamp a pose with the current time.
    pub fn new(pose: Pose2D, frame_id: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
            pose,
            stamp: Utc::now(),
        }
    }
}

/// Adapter for an execution backend.
///
/// `submit` must not block on goal execution: results arrive later on the
/// client's [`StatusEvents`] stream. The client does not enforce a single
/// outstanding submission; the sequencer does.
pub trait ExecutionClient: Send + Sync {
    /// Wait up to `timeout` for the backend to become reachable.
    fn wait_ready(&self, timeout: Duration) -> bool;

    /// Send one goal and return the handle its status events will carry.
    fn submit(&self, goal: &NavGoal) -> Result<GoalHandle, ClientError>;

    /// Backend display name (for logs).
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_increase_monotonically() {
        let seq = HandleSequence::new();
        let a = seq.next();
        let b = seq.next();
        assert_eq!(a, GoalHandle(1));
        assert!(b > a);
    }

    #[test]
    fn status_codes_map_both_ways() {
        for code in [1u8, 2, 3, 4, 5, 8] {
            let kind = StatusKind::from_code(code).unwrap();
            assert_eq!(kind.code(), Some(code));
        }
        assert_eq!(StatusKind::from_code(0), None);
        assert_eq!(StatusKind::from_code(9), None);
        assert_eq!(StatusKind::Feedback.code(), None);
    }

    #[test]
    fn only_active_and_feedback_are_transient() {
        assert!(!StatusKind::Active.is_terminal());
        assert!(!StatusKind::Feedback.is_terminal());
        assert!(StatusKind::Succeeded.is_terminal());
        assert!(StatusKind::Aborted.is_terminal());
        assert!(StatusKind::Rejected.is_terminal());
        assert!(StatusKind::PreemptedBeforeStart.is_terminal());
        assert!(StatusKind::PreemptedAfterStart.is_terminal());
    }

    #[test]
    fn status_kind_serializes_snake_case() {
        let json = serde_json::to_string(&StatusKind::PreemptedAfterStart).unwrap();
        assert_eq!(json, "\"preempted_after_start\"");
    }
}
