// queue.rs - GoalQueue: the active goal set and the cursor into it.
//
// Invariants held after every public method:
//   0 <= active_index <= len(goal_set)
//   sequence_complete == (active_index == len(goal_set))
//
// The queue itself is not synchronized; the sequencer context wraps it in
// a single mutex shared by the tick loop, the status-event handler and the
// inbound goal-set feed.

use crate::error::QueueError;
use crate::pose::{GoalSet, Pose2D};
use uuid::Uuid;

/// The ordered goals from the latest update plus dispatch bookkeeping.
#[derive(Debug, Clone)]
pub struct GoalQueue {
    goal_set: GoalSet,
    active_index: usize,
    sequence_replaced: bool,
    sequence_complete: bool,
    dispatch_pending: bool,
}

impl GoalQueue {
    /// An empty, already-complete queue. Nothing is dispatched until the
    /// first goal set arrives.
    pub fn new() -> Self {
        Self {
            goal_set: GoalSet::empty(),
            active_index: 0,
            sequence_replaced: false,
            sequence_complete: true,
            dispatch_pending: false,
        }
    }

    /// Overwrite the queue with a fresh goal set, restarting at index 0.
    ///
    /// An empty set is valid and leaves the queue complete. Any pending
    /// dispatch belongs to the previous set and is forgotten here; its late
    /// status callbacks are filtered out by set id.
    pub fn replace(&mut self, goal_set: GoalSet) {
        self.sequence_complete = goal_set.is_empty();
        self.goal_set = goal_set;
        self.active_index = 0;
        self.sequence_replaced = true;
        self.dispatch_pending = false;
    }

    /// The pose at the active index and the frame it is expressed in.
    pub fn current(&self) -> Result<(Pose2D, &str), QueueError> {
        self.goal_set
            .poses
            .get(self.active_index)
            .map(|pose| (*pose, self.goal_set.frame_id.as_str()))
            .ok_or(QueueError::EmptyQueue {
                index: self.active_index,
                len: self.goal_set.len(),
            })
    }

    /// Move to the next goal. Returns `false` (and changes nothing) when the
    /// sequence is already exhausted.
    pub fn advance(&mut self) -> bool {
        if self.active_index >= self.goal_set.len() {
            self.sequence_complete = true;
            return false;
        }
        self.active_index += 1;
        if self.active_index == self.goal_set.len() {
            self.sequence_complete = true;
        }
        true
    }

    /// Return and clear the "new batch arrived" flag.
    pub fn consume_replaced_flag(&mut self) -> bool {
        std::mem::take(&mut self.sequence_replaced)
    }

    /// Record that the goal at the active index has been submitted.
    pub fn mark_dispatched(&mut self) {
        self.dispatch_pending = true;
    }

    /// Record that the submitted goal reached a terminal status.
    pub fn clear_dispatch(&mut self) {
        self.dispatch_pending = false;
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn len(&self) -> usize {
        self.goal_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goal_set.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.sequence_complete
    }

    pub fn is_replaced(&self) -> bool {
        self.sequence_replaced
    }

    pub fn is_dispatch_pending(&self) -> bool {
        self.dispatch_pending
    }

    /// Id of the goal set currently loaded.
    pub fn set_id(&self) -> Uuid {
        self.goal_set.set_id
    }

    pub fn goal_set(&self) -> &GoalSet {
        &self.goal_set
    }
}

impl Default for GoalQueue {
    fn default() -> Self {
        Self::new()
    }
}
