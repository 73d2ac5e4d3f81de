// pose.rs - Planar target poses and the goal sets that carry them.
//
// A goal set is an ordered batch of poses sharing one coordinate frame.
// Every inbound update builds a fresh GoalSet with its own id; the id is
// what the sequencer uses to tell a stale status callback from a live one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A target position plus heading.
///
/// The heading is stored as the z/w components of a planar quaternion
/// (rotation about the vertical axis), which is how the navigation backend
/// expects it. x/y of the quaternion are always zero for a planar goal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Build a pose from a yaw angle in radians.
    pub fn from_yaw(x: f64, y: f64, yaw: f64) -> Self {
        let half = yaw / 2.0;
        Self {
            x,
            y,
            z: half.sin(),
            w: half.cos(),
        }
    }

    /// Heading in radians, in `(-pi, pi]`.
    pub fn yaw(&self) -> f64 {
        2.0 * self.z.atan2(self.w)
    }
}

/// An ordered batch of goals in one frame.
///
/// Created atomically per inbound update and never merged with a previous
/// set; the queue replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalSet {
    /// Unique id for this batch, assigned on receipt.
    pub set_id: Uuid,

    /// Coordinate frame shared by every pose in the batch (e.g. "map").
    pub frame_id: String,

    /// Target poses, in the order they must be visited.
    pub poses: Vec<Pose2D>,

    /// When the batch was received.
    pub received_at: DateTime<Utc>,
}

impl GoalSet {
    pub fn new(frame_id: impl Into<String>, poses: Vec<Pose2D>) -> Self {
        Self {
            set_id: Uuid::new_v4(),
            frame_id: frame_id.into(),
            poses,
            received_at: Utc::now(),
        }
    }

    /// The set every queue starts with before the first update arrives.
    pub fn empty() -> Self {
        Self::new("", Vec::new())
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}
