// sequencing.rs - End-to-end runs of the sequencer against the simulated
// backend.
//
// Each test hosts GoalSequencer::run on its own thread, feeds goal sets and
// reload requests from the test thread, and observes the outcome through
// an in-memory notification sink.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::tempdir;

use nav_goal::{
    EventDispatcher, GoalSequencer, GoalSet, NavContext, NavEvent, NotificationSink,
    Pose2D, RuntimeParameters, SequencerState, SimulatedBackend, SinkError, StatusKind,
    TomlFileSource, UpdateGate,
};

#[derive(Clone, Default)]
struct Collector(Arc<Mutex<Vec<NavEvent>>>);

impl Collector {
    fn events(&self) -> Vec<NavEvent> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl NotificationSink for Collector {
    fn send(&self, event: &NavEvent) -> Result<(), SinkError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Node {
    sequencer: Arc<GoalSequencer>,
    shutdown: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    events: Collector,
}

impl Node {
    fn start(backend: SimulatedBackend, status: nav_goal::StatusEvents, params: UpdateGate) -> Self {
        let events = Collector::default();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(events.clone()));

        let ctx = NavContext::new("it_node", params, Arc::new(backend), status)
            .with_dispatcher(dispatcher);
        let sequencer = Arc::new(GoalSequencer::new(Arc::new(ctx)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let sequencer = Arc::clone(&sequencer);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || sequencer.run(&shutdown))
        };

        Self {
            sequencer,
            shutdown,
            worker: Some(worker),
            events,
        }
    }

    fn fast_params() -> UpdateGate {
        UpdateGate::new(RuntimeParameters {
            tick_rate: 200.0,
            backend_ready_timeout: Duration::from_millis(20),
            ..RuntimeParameters::defaults("it_node")
        })
    }

    fn wait_for(&self, what: &str, cond: impl Fn(&Node) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond(self) {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn poses(xs: &[f64]) -> Vec<Pose2D> {
    xs.iter().map(|x| Pose2D::from_yaw(*x, 0.0, 0.0)).collect()
}

#[test]
fn visits_every_goal_in_order_then_exhausts() {
    let (backend, status) = SimulatedBackend::new(Duration::from_millis(10));
    let node = Node::start(backend, status, Node::fast_params());

    node.sequencer
        .context()
        .on_goal_set(GoalSet::new("map", poses(&[1.0, 2.0, 3.0])));

    node.wait_for("exhaustion", |n| {
        n.sequencer.state() == SequencerState::Exhausted
    });

    let status = node.sequencer.status();
    assert_eq!(status.active_index, 3);
    assert!(status.sequence_complete);

    let reached: Vec<usize> = node
        .events
        .events()
        .iter()
        .filter_map(|e| match e {
            NavEvent::GoalSucceeded { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(reached, vec![0, 1, 2]);
    assert_eq!(node.events.count("sequence_exhausted"), 1);
}

#[test]
fn aborted_goal_stalls_the_sequence() {
    let (backend, status) = SimulatedBackend::new(Duration::from_millis(10));
    let backend = backend.with_outcomes([StatusKind::Succeeded, StatusKind::Aborted]);
    let node = Node::start(backend, status, Node::fast_params());

    node.sequencer
        .context()
        .on_goal_set(GoalSet::new("map", poses(&[1.0, 2.0, 3.0])));

    node.wait_for("abort", |n| n.events.count("goal_failed") == 1);
    thread::sleep(Duration::from_millis(100));

    let status = node.sequencer.status();
    assert_eq!(status.active_index, 1);
    assert!(status.stalled);
    assert_eq!(node.events.count("goal_dispatched"), 2);
}

#[test]
fn replacement_mid_run_restarts_on_new_set() {
    let (backend, status) = SimulatedBackend::new(Duration::from_millis(300));
    let node = Node::start(backend, status, Node::fast_params());

    let ctx = Arc::clone(node.sequencer.context());
    ctx.on_goal_set(GoalSet::new("map", poses(&[1.0, 2.0])));
    node.wait_for("first dispatch", |n| n.events.count("goal_dispatched") == 1);

    let next = GoalSet::new("odom", poses(&[9.0]));
    let next_id = next.set_id;
    ctx.on_goal_set(next);

    node.wait_for("exhaustion of new set", |n| {
        n.sequencer.state() == SequencerState::Exhausted
    });

    let status = node.sequencer.status();
    assert_eq!(status.set_id, next_id);
    assert_eq!(status.frame_id, "odom");
    assert_eq!(status.active_index, 1);

    // Nothing from the abandoned set was counted as reached.
    let succeeded_old = node.events.events().iter().any(|e| {
        matches!(e, NavEvent::GoalSucceeded { set_id, .. } if *set_id != next_id)
    });
    assert!(!succeeded_old);
}

#[test]
fn unreachable_backend_fails_after_retries() {
    let (backend, status) = SimulatedBackend::new(Duration::ZERO);
    let backend = backend.never_ready();
    let params = UpdateGate::new(RuntimeParameters {
        tick_rate: 200.0,
        backend_ready_timeout: Duration::from_millis(5),
        max_connect_retries: 3,
        ..RuntimeParameters::defaults("it_node")
    });
    let node = Node::start(backend, status, params);
    node.sequencer
        .context()
        .on_goal_set(GoalSet::new("map", poses(&[1.0])));

    node.wait_for("failure", |n| n.sequencer.state() == SequencerState::Failed);
    thread::sleep(Duration::from_millis(50));

    assert_eq!(node.sequencer.status().connect_attempts, 3);
    assert_eq!(node.events.count("connection_failed"), 1);
    assert_eq!(node.events.count("goal_dispatched"), 0);
}

#[test]
fn reload_while_running_changes_parameters_atomically() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("params.toml");
    fs::write(&path, "rate = 100\nwait_time = 0.05\n").unwrap();
    let source = TomlFileSource::new(&path, "it_node");

    let (backend, status) = SimulatedBackend::new(Duration::from_millis(10));
    let node = Node::start(backend, status, UpdateGate::load(&source).unwrap());
    let ctx = Arc::clone(node.sequencer.context());

    fs::write(&path, "rate = 40\nmaximum_retry = 6\n").unwrap();
    ctx.on_reload(&source).unwrap();
    let params = ctx.parameters();
    assert_eq!(params.tick_rate, 40.0);
    assert_eq!(params.max_connect_retries, 6);
    assert_eq!(params.backend_ready_timeout, Duration::from_secs(5));

    // A broken file is reported to the caller and changes nothing.
    fs::write(&path, "rate = [1, 2]\n").unwrap();
    assert!(ctx.on_reload(&source).is_err());
    assert_eq!(ctx.parameters(), params);

    // Dispatch keeps working across reloads.
    ctx.on_goal_set(GoalSet::new("map", poses(&[1.0])));
    node.wait_for("exhaustion", |n| {
        n.sequencer.state() == SequencerState::Exhausted
    });
    assert_eq!(node.events.count("parameters_reloaded"), 1);
    assert_eq!(node.events.count("reload_failed"), 1);
}
