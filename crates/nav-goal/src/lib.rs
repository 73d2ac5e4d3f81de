//! # nav-goal
//!
//! Goal-set sequencing for a mobile robot.
//!
//! A robot manager receives ordered batches of target poses ([`GoalSet`]),
//! submits them one at a time to an asynchronous navigation backend through
//! an [`ExecutionClient`], and advances through the batch as the backend
//! reports status. A new batch always replaces the old one and restarts
//! from its first goal.
//!
//! ## Key components
//!
//! - [`GoalQueue`] - the active goal set and the cursor into it
//! - [`GoalSequencer`] - the tick-driven state machine (Connecting → Idle
//!   → Dispatching → AwaitingResult → Exhausted, or Failed)
//! - [`NavContext`] - shared state handed to the tick loop and the inbound
//!   goal-set / reload handlers
//! - [`UpdateGate`] - atomic parameter reload against concurrent readers
//! - [`SimulatedBackend`] - in-process backend for demos and tests
//! - [`NavEvent`] / [`EventDispatcher`] - lifecycle events for sinks

pub mod client;
pub mod context;
pub mod error;
pub mod events;
pub mod params;
pub mod pose;
pub mod queue;
pub mod sequencer;
pub mod sim;

pub use client::{
    ExecutionClient, GoalHandle, HandleSequence, NavGoal, StatusEvent, StatusEvents, StatusKind,
    EXECUTION_BACKEND,
};
pub use context::NavContext;
pub use error::{ClientError, ConfigError, QueueError, SequencerError, SinkError};
pub use events::{EventDispatcher, LogSink, NavEvent, NotificationSink};
pub use params::{
    DefaultSource, ParameterSource, ParameterStore, RuntimeParameters, TomlFileSource,
    UpdateGate, DEFAULT_NODE_NAME,
};
pub use pose::{GoalSet, Pose2D};
pub use queue::GoalQueue;
pub use sequencer::{GoalSequencer, SequencerState, SequencerStatus};
pub use sim::SimulatedBackend;
