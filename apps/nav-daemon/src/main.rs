//! # nav-daemon
//!
//! Robot manager node: feeds goal sets to the navigation sequencer.
//!
//! Goal sets and reload requests arrive as JSON lines on stdin (see
//! [`feed`]); the sequencer runs its tick loop on a blocking task and talks
//! to an in-process simulated `move_base` backend. Logs go to stderr.
//! The node runs until interrupted.
//!
//! ```text
//! echo '{"type":"goals","frame_id":"map","poses":[{"x":1,"y":0,"z":0,"w":1}]}' \
//!     | nav-daemon --config robot_manager.toml --events-log events.jsonl
//! ```

mod feed;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nav_goal::{
    DefaultSource, EventDispatcher, GoalSequencer, LogSink, NavContext, ParameterSource,
    SimulatedBackend, TomlFileSource, UpdateGate, DEFAULT_NODE_NAME,
};

/// Robot manager: sequences navigation goals through the backend.
#[derive(Parser)]
#[command(name = "nav-daemon", version, about)]
struct Cli {
    /// Runtime parameter file (TOML). Re-read on every reload request.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node name, used as log prefix and reload endpoint prefix.
    #[arg(long, default_value = DEFAULT_NODE_NAME)]
    node_name: String,

    /// Append lifecycle events as JSONL to this file.
    #[arg(long)]
    events_log: Option<PathBuf>,

    /// Simulated travel time per goal, in milliseconds.
    #[arg(long, default_value_t = 500)]
    backend_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout stays clean; stdin is the feed.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("nav_goal=info".parse()?)
                .add_directive("nav_daemon=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source: Arc<dyn ParameterSource> = match &cli.config {
        Some(path) => Arc::new(TomlFileSource::new(path, &cli.node_name)),
        None => Arc::new(DefaultSource::new(&cli.node_name)),
    };
    let gate = UpdateGate::load(source.as_ref())?;
    let params = gate.snapshot();
    tracing::info!(
        "[{}] Goals topic {}, reload endpoint {}, rate {} Hz",
        cli.node_name,
        params.goals_topic,
        params.reload_trigger_id,
        params.tick_rate
    );

    let (backend, status_events) =
        SimulatedBackend::new(Duration::from_millis(cli.backend_delay_ms));

    let mut dispatcher = EventDispatcher::new();
    if let Some(path) = &cli.events_log {
        tracing::info!("[{}] Event log: {}", cli.node_name, path.display());
        dispatcher.add_sink(Box::new(LogSink::new(path)));
    }

    let ctx = Arc::new(
        NavContext::new(&cli.node_name, gate, Arc::new(backend), status_events)
            .with_dispatcher(dispatcher),
    );
    let sequencer = Arc::new(GoalSequencer::new(Arc::clone(&ctx)));
    let shutdown = Arc::new(AtomicBool::new(false));

    let tick_loop = {
        let sequencer = Arc::clone(&sequencer);
        let shutdown = Arc::clone(&shutdown);
        tokio::task::spawn_blocking(move || sequencer.run(&shutdown))
    };

    let feed_task = tokio::spawn(feed::serve(Arc::clone(&ctx), source, feed::stdin_lines()));

    // The node keeps running after the feed closes, like a subscriber whose
    // publisher went away; only an interrupt stops it.
    tokio::signal::ctrl_c().await?;
    tracing::info!("[{}] Interrupt received", cli.node_name);
    feed_task.abort();

    shutdown.store(true, Ordering::SeqCst);
    tick_loop.await?;

    let status = sequencer.status();
    tracing::info!(
        "[{}] Final state {}: goal {}/{} of set {}",
        cli.node_name,
        status.state,
        status.active_index,
        status.goal_count,
        status.set_id
    );
    Ok(())
}
