// error.rs - Error types for the goal sequencing subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`GoalQueue`](crate::queue::GoalQueue) accessors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// `current()` was called on a completed or empty sequence.
    #[error("no active goal: index {index} of {len}")]
    EmptyQueue { index: usize, len: usize },
}

/// Errors raised while loading runtime parameters.
///
/// A failed load never touches the parameters currently in effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The parameter file exists but could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The parameter file is not valid TOML or has a mistyped option.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// An option parsed but its value is out of range.
    #[error("invalid value for `{option}`: {reason}")]
    Invalid { option: String, reason: String },
}

/// Errors surfaced by an [`ExecutionClient`](crate::client::ExecutionClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The backend has not become reachable yet.
    #[error("execution backend `{0}` is not connected")]
    NotConnected(String),

    /// The backend refused to accept a submission.
    #[error("goal submission failed: {0}")]
    Submit(String),

    /// The status event stream was closed by the backend.
    #[error("status event stream disconnected")]
    Disconnected,
}

/// Errors raised by the [`GoalSequencer`](crate::sequencer::GoalSequencer).
///
/// Only `ConnectionFailed` halts the state machine; everything else is
/// logged and the sequencer keeps ticking.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// The backend never answered within `maximum_retry` attempts.
    #[error("unable to reach execution backend after {attempts} attempts")]
    ConnectionFailed { attempts: u32 },

    /// The backend aborted the active goal.
    #[error("goal {index} was aborted by the execution backend")]
    GoalAborted { index: usize },

    /// The backend rejected the active goal.
    #[error("goal {index} was rejected by the execution backend")]
    GoalRejected { index: usize },

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),
}

/// Errors from lifecycle event sinks. Logged by the dispatcher, never
/// fatal to sequencing.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The event log could not be created or appended to.
    #[error("event log {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The event could not be encoded as JSON.
    #[error("cannot encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// The sink's downstream is not accepting events.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}
