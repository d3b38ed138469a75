//! Planar pose utilities.
//!
//! Reduces full 3-D poses to the `(x, y, theta)` form the navigation policy
//! works in, and re-expresses world-frame goals relative to the robot.
//!
//! # Example
//!
//! ```rust
//! use arena_perception::geometry::{Pose2D, goal_in_robot_frame};
//!
//! let robot = Pose2D::new(0.0, 0.0, 0.0);
//! let goal = Pose2D::new(3.0, 4.0, 0.0);
//!
//! let (rho, theta) = goal_in_robot_frame(&goal, &robot);
//! assert!((rho - 5.0).abs() < 1e-12);
//! assert!((theta - 0.9273).abs() < 1e-4);
//! ```

use std::f64::consts::{PI, TAU};

use arena_types::{ArenaError, Pose3D, Quaternion};
use serde::{Deserialize, Serialize};

/// Quaternions with a norm below this are treated as degenerate.
const MIN_QUATERNION_NORM: f64 = 1e-9;

// ────────────────────────────────────────────────────────────────────────────
// Pose2D
// ────────────────────────────────────────────────────────────────────────────

/// A planar pose. `theta` is kept in `(-π, π]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose2D {
    /// Create a pose, wrapping `theta` into `(-π, π]`.
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: wrap_angle(theta),
        }
    }

    /// Euclidean distance between the two positions (heading ignored).
    pub fn distance_to(&self, other: &Pose2D) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Angle wrapping
// ────────────────────────────────────────────────────────────────────────────

/// Wrap any angle into `(-π, π]` without looping over revolutions.
///
/// `wrap_angle(a)` is congruent to `a` modulo 2π for every finite input.
/// `rem_euclid` can round up to exactly `TAU` for tiny negative arguments;
/// the trailing `% TAU` folds that case back to 0 without a branch.
pub fn wrap_angle(raw: f64) -> f64 {
    PI - (PI - raw).rem_euclid(TAU) % TAU
}

// ────────────────────────────────────────────────────────────────────────────
// 3-D → 2-D reduction
// ────────────────────────────────────────────────────────────────────────────

/// Yaw (rotation about +Z) of `q`, after normalising it.
///
/// Non-unit quaternions are normalised rather than rejected; only a zero or
/// non-finite quaternion fails.
pub fn yaw_from_quaternion(q: &Quaternion) -> Result<f64, ArenaError> {
    let norm = q.norm();
    if !norm.is_finite() || norm < MIN_QUATERNION_NORM {
        return Err(ArenaError::MalformedPose(format!(
            "orientation ({}, {}, {}, {}) cannot be normalised",
            q.x, q.y, q.z, q.w
        )));
    }
    let (x, y, z, w) = (q.x / norm, q.y / norm, q.z / norm, q.w / norm);
    let siny_cosp = 2.0 * (w * z + x * y);
    let cosy_cosp = 1.0 - 2.0 * (y * y + z * z);
    Ok(siny_cosp.atan2(cosy_cosp))
}

/// Drop z, roll and pitch from `pose`, keeping `(x, y, yaw)`.
pub fn pose3d_to_pose2d(pose: &Pose3D) -> Result<Pose2D, ArenaError> {
    let yaw = yaw_from_quaternion(&pose.orientation)?;
    if !pose.position.x.is_finite() || !pose.position.y.is_finite() {
        return Err(ArenaError::MalformedPose(format!(
            "position ({}, {}) is not finite",
            pose.position.x, pose.position.y
        )));
    }
    Ok(Pose2D::new(pose.position.x, pose.position.y, yaw))
}

// ────────────────────────────────────────────────────────────────────────────
// Robot-frame transform
// ────────────────────────────────────────────────────────────────────────────

/// Express `goal` in polar coordinates relative to `robot`.
///
/// Returns `(rho, theta)`: the distance to the goal and its bearing measured
/// from the robot's heading, wrapped into `(-π, π]`.
pub fn goal_in_robot_frame(goal: &Pose2D, robot: &Pose2D) -> (f64, f64) {
    let dx = goal.x - robot.x;
    let dy = goal.y - robot.y;
    let rho = dx.hypot(dy);
    let theta = wrap_angle(dy.atan2(dx) - robot.theta);
    (rho, theta)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
