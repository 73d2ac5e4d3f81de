// context.rs - NavContext: everything the sequencer and its inbound
// handlers share.
//
// Instead of node-wide globals, one context object owns the goal queue,
// the parameter gate, the backend client and its status stream, and the
// event dispatcher. The goal-set feed and the reload endpoint call into it
// from their own threads; the sequencer reads it from the tick loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
#[cfg(test)]
use std::sync::TryLockError;

use crate::client::{ExecutionClient, StatusEvents};
use crate::error::ConfigError;
use crate::events::{EventDispatcher, NavEvent};
use crate::params::{ParameterSource, RuntimeParameters, UpdateGate};
use crate::pose::GoalSet;
use crate::queue::GoalQueue;

/// Shared state for one robot manager node.
pub struct NavContext {
    node_name: String,
    queue: Mutex<GoalQueue>,
    params: UpdateGate,
    client: Arc<dyn ExecutionClient>,
    status_events: Mutex<StatusEvents>,
    dispatcher: EventDispatcher,
}

impl NavContext {
    pub fn new(
        node_name: impl Into<String>,
        params: UpdateGate,
        client: Arc<dyn ExecutionClient>,
        status_events: StatusEvents,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            queue: Mutex::new(GoalQueue::new()),
            params,
            client,
            status_events: Mutex::new(status_events),
            dispatcher: EventDispatcher::new(),
        }
    }

    /// Attach an event dispatcher (replaces the empty default).
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Inbound goal-set feed: replace the queue with `goal_set`.
    pub fn on_goal_set(&self, goal_set: GoalSet) {
        tracing::info!(
            "[{}] Received {} goals in frame '{}'",
            self.node_name,
            goal_set.len(),
            goal_set.frame_id
        );
        let event =
            NavEvent::goal_set_received(goal_set.set_id, &goal_set.frame_id, goal_set.len());
        self.lock_queue().replace(goal_set);
        self.dispatcher.dispatch(&event);
    }

    /// Reload trigger: re-read parameters from `source` and swap them in.
    ///
    /// The error goes back to the caller only; the tick loop keeps running
    /// with the previous parameters.
    pub fn on_reload(&self, source: &dyn ParameterSource) -> Result<(), ConfigError> {
        match self.params.reload(source) {
            Ok(params) => {
                tracing::info!("[{}] Parameter update after request", self.node_name);
                self.dispatcher.dispatch(&NavEvent::ParametersReloaded {
                    reload_trigger_id: params.reload_trigger_id,
                    timestamp: chrono::Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("[{}] Parameter update rejected: {}", self.node_name, e);
                self.dispatcher.dispatch(&NavEvent::ReloadFailed {
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                Err(e)
            }
        }
    }

    pub fn parameters(&self) -> RuntimeParameters {
        self.params.snapshot()
    }

    pub(crate) fn client(&self) -> &dyn ExecutionClient {
        self.client.as_ref()
    }

    pub(crate) fn dispatch(&self, event: &NavEvent) {
        self.dispatcher.dispatch(event);
    }

    /// Lock the goal queue. The queue is only ever mutated by whole-method
    /// calls, so a poisoned lock still guards a consistent value.
    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, GoalQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_status_events(&self) -> MutexGuard<'_, StatusEvents> {
        self.status_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn queue_is_locked(&self) -> bool {
        matches!(self.queue.try_lock(), Err(TryLockError::WouldBlock))
    }
}
