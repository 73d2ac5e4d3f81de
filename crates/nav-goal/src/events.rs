// events.rs - Lifecycle event model and notification dispatch.
//
// The sequencer emits a NavEvent at every point an operator may care about:
// a new goal set, each dispatch and its outcome, sequence exhaustion, state
// changes, connection failure and parameter reloads. Sinks (a JSONL file,
// a test collector, ...) subscribe through the EventDispatcher. Sink errors
// are logged and never reach the sequencer.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{GoalHandle, StatusKind};
use crate::error::SinkError;
use crate::pose::Pose2D;
use crate::sequencer::SequencerState;

/// Events emitted by the goal sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum NavEvent {
    /// A goal set replaced the previous one.
    GoalSetReceived {
        set_id: Uuid,
        frame_id: String,
        goal_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A goal was submitted to the backend.
    GoalDispatched {
        set_id: Uuid,
        index: usize,
        handle: GoalHandle,
        pose: Pose2D,
        timestamp: DateTime<Utc>,
    },

    /// The backend started executing the goal.
    GoalActive {
        set_id: Uuid,
        index: usize,
        handle: GoalHandle,
        timestamp: DateTime<Utc>,
    },

    /// The robot reached the goal.
    GoalSucceeded {
        set_id: Uuid,
        index: usize,
        handle: GoalHandle,
        timestamp: DateTime<Utc>,
    },

    /// The goal ended without being reached (aborted, rejected, preempted).
    GoalFailed {
        set_id: Uuid,
        index: usize,
        handle: GoalHandle,
        status: StatusKind,
        timestamp: DateTime<Utc>,
    },

    /// Every goal of the set has been reached.
    SequenceExhausted {
        set_id: Uuid,
        goal_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// The sequencer changed state.
    StateChanged {
        from_state: SequencerState,
        to_state: SequencerState,
        timestamp: DateTime<Utc>,
    },

    /// The backend could not be reached; dispatch is halted for good.
    ConnectionFailed {
        backend: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Parameters were reloaded on request.
    ParametersReloaded {
        reload_trigger_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A reload request failed; the previous parameters stay in effect.
    ReloadFailed {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl NavEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &str {
        match self {
            NavEvent::GoalSetReceived { .. } => "goal_set_received",
            NavEvent::GoalDispatched { .. } => "goal_dispatched",
            NavEvent::GoalActive { .. } => "goal_active",
            NavEvent::GoalSucceeded { .. } => "goal_succeeded",
            NavEvent::GoalFailed { .. } => "goal_failed",
            NavEvent::SequenceExhausted { .. } => "sequence_exhausted",
            NavEvent::StateChanged { .. } => "state_changed",
            NavEvent::ConnectionFailed { .. } => "connection_failed",
            NavEvent::ParametersReloaded { .. } => "parameters_reloaded",
            NavEvent::ReloadFailed { .. } => "reload_failed",
        }
    }

    pub fn goal_set_received(set_id: Uuid, frame_id: &str, goal_count: usize) -> Self {
        NavEvent::GoalSetReceived {
            set_id,
            frame_id: frame_id.to_string(),
            goal_count,
            timestamp: Utc::now(),
        }
    }

    pub fn goal_dispatched(set_id: Uuid, index: usize, handle: GoalHandle, pose: Pose2D) -> Self {
        NavEvent::GoalDispatched {
            set_id,
            index,
            handle,
            pose,
            timestamp: Utc::now(),
        }
    }

    pub fn state_changed(from: SequencerState, to: SequencerState) -> Self {
        NavEvent::StateChanged {
            from_state: from,
            to_state: to,
            timestamp: Utc::now(),
        }
    }
}

/// Trait for receiving sequencer events.
pub trait NotificationSink: Send + Sync {
    /// Handle an event. Errors are logged but don't stop the sequencer.
    fn send(&self, event: &NavEvent) -> Result<(), SinkError>;
}

/// Appends events as JSON lines to a file.
///
/// The file (and its parent directory) is created on the first event and
/// kept open afterwards. A failed write drops the handle so the next event
/// reopens the file.
pub struct LogSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    fn open(&self) -> Result<File, SinkError> {
        let io_error = |source| SinkError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error)
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &NavEvent) -> Result<(), SinkError> {
        let line = serde_json::to_string(event)?;

        let mut slot = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = match slot.take() {
            Some(file) => file,
            None => self.open()?,
        };
        writeln!(file, "{}", line).map_err(|source| SinkError::Io {
            path: self.path.clone(),
            source,
        })?;
        *slot = Some(file);
        Ok(())
    }
}

/// Dispatches events to multiple sinks.
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Dispatch an event to all sinks.
    pub fn dispatch(&self, event: &NavEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!("dropping {} event for one sink: {}", event.event_type(), e);
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
