// feed.rs - Newline-delimited JSON inbound feed.
//
// Stands in for the pub/sub goal topic and the parameter-reload service.
// Each line is one message:
//
//   {"type":"goals","frame_id":"map","poses":[{"x":1,"y":2,"z":0,"w":1}]}
//   {"type":"reload"}
//
// Malformed lines are logged and skipped. stdin is read on a plain thread
// because a pending tokio stdin read would hold up runtime shutdown.

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use serde::Deserialize;
use tokio::sync::mpsc;

use nav_goal::{GoalSet, NavContext, ParameterSource, Pose2D};

/// One inbound message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// A new goal set, replacing the current one.
    Goals {
        frame_id: String,
        poses: Vec<Pose2D>,
    },
    /// Re-read the runtime parameters.
    Reload,
}

/// Forward stdin lines into a channel from a detached reader thread.
/// The channel closes at EOF or on a read error.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("stdin read error: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Apply messages from `lines` to `ctx` until the channel closes.
pub async fn serve(
    ctx: Arc<NavContext>,
    source: Arc<dyn ParameterSource>,
    mut lines: mpsc::Receiver<String>,
) {
    while let Some(line) = lines.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<FeedMessage>(line) {
            Ok(message) => apply(&ctx, source.as_ref(), message),
            Err(e) => tracing::warn!("[{}] skipping malformed feed line: {}", ctx.node_name(), e),
        }
    }
}

fn apply(ctx: &NavContext, source: &dyn ParameterSource, message: FeedMessage) {
    match message {
        FeedMessage::Goals { frame_id, poses } => {
            ctx.on_goal_set(GoalSet::new(frame_id, poses));
        }
        FeedMessage::Reload => {
            // The reload error was already logged by the context.
            if ctx.on_reload(source).is_ok() {
                tracing::debug!(
                    "[{}] reload acknowledged on {}",
                    ctx.node_name(),
                    ctx.parameters().reload_trigger_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use nav_goal::{GoalSequencer, SimulatedBackend, TomlFileSource, UpdateGate};
    use tempfile::tempdir;

    async fn feed(lines: &[&str]) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.send(line.to_string()).await.unwrap();
        }
        rx
    }

    fn context(source: &dyn ParameterSource) -> Arc<NavContext> {
        let (backend, status) = SimulatedBackend::new(Duration::from_millis(10));
        let gate = UpdateGate::load(source).unwrap();
        Arc::new(NavContext::new(
            "feed_test",
            gate,
            Arc::new(backend),
            status,
        ))
    }

    #[test]
    fn parses_goal_and_reload_messages() {
        let goals: FeedMessage = serde_json::from_str(
            r#"{"type":"goals","frame_id":"map","poses":[{"x":1.0,"y":2.0,"z":0.0,"w":1.0}]}"#,
        )
        .unwrap();
        assert!(matches!(goals, FeedMessage::Goals { ref poses, .. } if poses.len() == 1));

        let reload: FeedMessage = serde_json::from_str(r#"{"type":"reload"}"#).unwrap();
        assert!(matches!(reload, FeedMessage::Reload));
    }

    #[test]
    fn goals_without_a_frame_are_rejected() {
        let result = serde_json::from_str::<FeedMessage>(
            r#"{"type":"goals","poses":[{"x":1.0,"y":2.0,"z":0.0,"w":1.0}]}"#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn frameless_goal_line_leaves_the_queue_untouched() {
        let source: Arc<dyn ParameterSource> = Arc::new(nav_goal::DefaultSource::new("feed_test"));
        let ctx = context(source.as_ref());
        let sequencer = GoalSequencer::new(Arc::clone(&ctx));
        let before = sequencer.status().set_id;

        let lines = feed(&[r#"{"type":"goals","poses":[{"x":1,"y":0,"z":0,"w":1}]}"#]).await;
        serve(Arc::clone(&ctx), source, lines).await;

        let status = sequencer.status();
        assert_eq!(status.set_id, before);
        assert_eq!(status.goal_count, 0);
    }

    #[tokio::test]
    async fn goal_lines_replace_the_queue() {
        let dir = tempdir().unwrap();
        let source: Arc<dyn ParameterSource> =
            Arc::new(TomlFileSource::new(dir.path().join("none.toml"), "feed_test"));
        let ctx = context(source.as_ref());
        let sequencer = GoalSequencer::new(Arc::clone(&ctx));

        let lines = feed(&[
            r#"{"type":"goals","frame_id":"map","poses":[{"x":1,"y":0,"z":0,"w":1}]}"#,
            "this is not json",
            "",
            r#"{"type":"goals","frame_id":"odom","poses":[{"x":1,"y":0,"z":0,"w":1},{"x":2,"y":0,"z":0,"w":1}]}"#,
        ])
        .await;
        serve(Arc::clone(&ctx), source, lines).await;

        let status = sequencer.status();
        assert_eq!(status.frame_id, "odom");
        assert_eq!(status.goal_count, 2);
        assert_eq!(status.active_index, 0);
    }

    #[tokio::test]
    async fn reload_line_rereads_parameters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.toml");
        fs::write(&path, "rate = 10\n").unwrap();
        let source: Arc<dyn ParameterSource> = Arc::new(TomlFileSource::new(&path, "feed_test"));
        let ctx = context(source.as_ref());
        assert_eq!(ctx.parameters().tick_rate, 10.0);

        fs::write(&path, "rate = 25\n").unwrap();
        let lines = feed(&[r#"{"type":"reload"}"#]).await;
        serve(Arc::clone(&ctx), source, lines).await;
        assert_eq!(ctx.parameters().tick_rate, 25.0);
    }
}
