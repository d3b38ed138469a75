//! Observation layout and bounds: the contract a policy is built against.
//!
//! The observation vector always starts with the `num_beams` laser ranges
//! and is followed by the layout's tail fields:
//!
//! | Layout | Tail fields | Tail bounds |
//! |---|---|---|
//! | [`ObservationLayout::PoseAndReward`] | `robot_x, robot_y, robot_theta, subgoal_x, subgoal_y, last_reward` | `[-5,30] [-5,25] [-π,π] [-5,30] [-5,25] [-10,15]` |
//! | [`ObservationLayout::GoalPolar`] | `rho, theta` | `[0,10] [-π,π]` |
//!
//! Scan ranges are bounded by `[0, max_range]` in both layouts.  The vector
//! and its [`ObservationBounds`] are produced from the same layout value, so
//! their lengths always agree; changing a layout is a breaking change for
//! every trained policy.
//!
//! `last_reward` is the value passed to the most recent
//! `register_reward` call.  It is feedback from the previous step carried
//! into the current observation, not the reward of the transition that
//! produces this observation.

use std::f32::consts::PI;

use arena_perception::Pose2D;
use arena_types::{ArenaError, Twist};
use serde::{Deserialize, Serialize};

/// Workspace x extent of the arena maps (metres).
pub const MAP_X_BOUNDS: (f32, f32) = (-5.0, 30.0);
/// Workspace y extent of the arena maps (metres).
pub const MAP_Y_BOUNDS: (f32, f32) = (-5.0, 25.0);
pub const HEADING_BOUNDS: (f32, f32) = (-PI, PI);
pub const REWARD_BOUNDS: (f32, f32) = (-10.0, 15.0);
pub const GOAL_DISTANCE_BOUNDS: (f32, f32) = (0.0, 10.0);

// ────────────────────────────────────────────────────────────────────────────
// Layout
// ────────────────────────────────────────────────────────────────────────────

/// Which fields follow the scan in the observation vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationLayout {
    /// Scan, absolute robot pose, absolute subgoal and the last reward.
    #[default]
    PoseAndReward,
    /// Scan and the goal in robot-frame polar coordinates.
    GoalPolar,
}

/// Everything a layout may draw from when assembling a vector.
#[derive(Debug, Clone, Copy)]
pub struct ObservationInputs<'a> {
    pub scan: &'a [f32],
    pub robot: &'a Pose2D,
    pub subgoal: &'a Pose2D,
    pub goal_in_robot_frame: (f64, f64),
    pub last_reward: f32,
}

impl ObservationLayout {
    /// Names of the fields after the scan, in vector order.
    pub fn tail_fields(&self) -> &'static [&'static str] {
        match self {
            ObservationLayout::PoseAndReward => &[
                "robot_x",
                "robot_y",
                "robot_theta",
                "subgoal_x",
                "subgoal_y",
                "last_reward",
            ],
            ObservationLayout::GoalPolar => &["rho", "theta"],
        }
    }

    /// Total vector length for `num_beams` scan samples.
    pub fn vector_len(&self, num_beams: usize) -> usize {
        num_beams + self.tail_fields().len()
    }

    /// Per-field bounds, in vector order.
    pub fn bounds(&self, num_beams: usize, max_range: f32) -> ObservationBounds {
        let mut bounds = ObservationBounds::with_capacity(self.vector_len(num_beams));
        bounds.push_repeated((0.0, max_range), num_beams);
        match self {
            ObservationLayout::PoseAndReward => {
                bounds.push(MAP_X_BOUNDS);
                bounds.push(MAP_Y_BOUNDS);
                bounds.push(HEADING_BOUNDS);
                bounds.push(MAP_X_BOUNDS);
                bounds.push(MAP_Y_BOUNDS);
                bounds.push(REWARD_BOUNDS);
            }
            ObservationLayout::GoalPolar => {
                bounds.push(GOAL_DISTANCE_BOUNDS);
                bounds.push(HEADING_BOUNDS);
            }
        }
        bounds
    }

    /// Concatenate the scan and the tail fields.
    pub fn assemble(&self, inputs: &ObservationInputs<'_>) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.vector_len(inputs.scan.len()));
        vector.extend_from_slice(inputs.scan);
        match self {
            ObservationLayout::PoseAndReward => vector.extend_from_slice(&[
                inputs.robot.x as f32,
                inputs.robot.y as f32,
                inputs.robot.theta as f32,
                inputs.subgoal.x as f32,
                inputs.subgoal.y as f32,
                inputs.last_reward,
            ]),
            ObservationLayout::GoalPolar => {
                let (rho, theta) = inputs.goal_in_robot_frame;
                vector.extend_from_slice(&[rho as f32, theta as f32]);
            }
        }
        vector
    }
}

/// Bounds of the default [`ObservationLayout::PoseAndReward`] layout.
///
/// Pure: the same `(num_beams, max_range)` always gives the same bounds.
pub fn build_observation_space(num_beams: usize, max_range: f32) -> ObservationBounds {
    ObservationLayout::PoseAndReward.bounds(num_beams, max_range)
}

// ────────────────────────────────────────────────────────────────────────────
// Bounds
// ────────────────────────────────────────────────────────────────────────────

/// Element-wise `(low, high)` box, same order as the observation vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationBounds {
    pub low: Vec<f32>,
    pub high: Vec<f32>,
}

impl ObservationBounds {
    fn with_capacity(n: usize) -> Self {
        Self {
            low: Vec::with_capacity(n),
            high: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, (low, high): (f32, f32)) {
        self.low.push(low);
        self.high.push(high);
    }

    fn push_repeated(&mut self, bound: (f32, f32), n: usize) {
        for _ in 0..n {
            self.push(bound);
        }
    }

    pub fn len(&self) -> usize {
        self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.low.is_empty()
    }

    /// `(low, high)` of field `i`.
    pub fn get(&self, i: usize) -> Option<(f32, f32)> {
        Some((*self.low.get(i)?, *self.high.get(i)?))
    }

    /// `true` when `vector` has the right length and every element lies
    /// within its bound.
    pub fn contains(&self, vector: &[f32]) -> bool {
        vector.len() == self.len()
            && vector
                .iter()
                .zip(self.low.iter().zip(&self.high))
                .all(|(v, (lo, hi))| *v >= *lo && *v <= *hi)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Observation products
// ────────────────────────────────────────────────────────────────────────────

/// Structured companion of the observation vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationDict {
    pub laser_scan: Vec<f32>,
    /// `(rho, theta)` of the subgoal relative to the robot.
    pub goal_in_robot_frame: (f64, f64),
    /// `false` when the request ended without a fresh synchronized tuple
    /// (cancelled, or a deployment pacing wait that timed out).
    pub synced: bool,
    /// Step requests issued for this observation.
    pub sync_iterations: usize,
    /// Scan stamp of the fused tuple behind this observation.
    pub stamp: f64,
}

/// One observation: the policy input vector plus its structured view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub vector: Vec<f32>,
    pub aux: ObservationDict,
}

/// Planar action: the command velocity's `linear.x` and `angular.z`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub linear_x: f64,
    pub angular_z: f64,
}

impl Action {
    pub fn new(linear_x: f64, angular_z: f64) -> Self {
        Self {
            linear_x,
            angular_z,
        }
    }

    pub fn to_array(&self) -> [f32; 2] {
        [self.linear_x as f32, self.angular_z as f32]
    }

    pub fn to_twist(&self) -> Twist {
        Twist::planar(self.linear_x, self.angular_z)
    }
}

impl From<&Twist> for Action {
    fn from(twist: &Twist) -> Self {
        Self::new(twist.linear.x, twist.angular.z)
    }
}

/// Fit `ranges` to the configured beam count.
///
/// An empty scan (nothing fused yet) is filled with `max_range`; any other
/// length mismatch means the simulator and the collector disagree on the
/// lidar and is rejected rather than silently reshaping the vector.
pub fn fit_scan(ranges: &[f32], num_beams: usize, max_range: f32) -> Result<Vec<f32>, ArenaError> {
    if ranges.is_empty() {
        return Ok(vec![max_range; num_beams]);
    }
    if ranges.len() != num_beams {
        return Err(ArenaError::InvalidScan(format!(
            "scan has {} beams, observation layout expects {}",
            ranges.len(),
            num_beams
        )));
    }
    Ok(ranges.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(scan: &'a [f32], robot: &'a Pose2D, goal: &'a Pose2D) -> ObservationInputs<'a> {
        ObservationInputs {
            scan,
            robot,
            subgoal: goal,
            goal_in_robot_frame: (5.0, 0.9273),
            last_reward: 7.5,
        }
    }

    #[test]
    fn bounds_and_vector_lengths_match_for_every_beam_count() {
        let robot = Pose2D::new(1.0, 2.0, 0.3);
        let goal = Pose2D::new(3.0, 4.0, 0.0);
        for layout in [ObservationLayout::PoseAndReward, ObservationLayout::GoalPolar] {
            for n in 1..=64 {
                let scan = vec![1.0; n];
                let bounds = layout.bounds(n, 10.0);
                let vector = layout.assemble(&inputs(&scan, &robot, &goal));
                assert_eq!(bounds.len(), vector.len(), "layout={layout:?} n={n}");
                assert_eq!(bounds.len(), layout.vector_len(n));
            }
        }
    }

    #[test]
    fn default_space_has_declared_field_order() {
        let bounds = build_observation_space(3, 3.5);
        assert_eq!(bounds.len(), 9);
        assert_eq!(bounds.get(0), Some((0.0, 3.5)));
        assert_eq!(bounds.get(2), Some((0.0, 3.5)));
        assert_eq!(bounds.get(3), Some(MAP_X_BOUNDS));
        assert_eq!(bounds.get(4), Some(MAP_Y_BOUNDS));
        assert_eq!(bounds.get(5), Some(HEADING_BOUNDS));
        assert_eq!(bounds.get(6), Some(MAP_X_BOUNDS));
        assert_eq!(bounds.get(7), Some(MAP_Y_BOUNDS));
        assert_eq!(bounds.get(8), Some(REWARD_BOUNDS));
        assert_eq!(bounds.get(9), None);
    }

    #[test]
    fn build_observation_space_is_deterministic() {
        assert_eq!(build_observation_space(360, 10.0), build_observation_space(360, 10.0));
    }

    #[test]
    fn pose_and_reward_vector_layout() {
        let robot = Pose2D::new(1.0, 2.0, 0.5);
        let goal = Pose2D::new(3.0, 4.0, 0.0);
        let scan = [1.0, 10.0, 3.0];
        let v = ObservationLayout::PoseAndReward.assemble(&inputs(&scan, &robot, &goal));
        assert_eq!(v, vec![1.0, 10.0, 3.0, 1.0, 2.0, 0.5, 3.0, 4.0, 7.5]);
    }

    #[test]
    fn goal_polar_vector_layout() {
        let robot = Pose2D::default();
        let goal = Pose2D::default();
        let scan = [2.0, 2.0];
        let v = ObservationLayout::GoalPolar.assemble(&inputs(&scan, &robot, &goal));
        assert_eq!(v.len(), 4);
        assert_eq!(v[2], 5.0);
        assert!((v[3] - 0.9273).abs() < 1e-6);
    }

    #[test]
    fn contains_checks_length_and_range() {
        let bounds = ObservationLayout::GoalPolar.bounds(2, 10.0);
        assert!(bounds.contains(&[1.0, 10.0, 5.0, 0.0]));
        assert!(!bounds.contains(&[1.0, 10.5, 5.0, 0.0]));
        assert!(!bounds.contains(&[1.0, 1.0, 5.0]));
    }

    #[test]
    fn fit_scan_fills_empty_and_rejects_mismatch() {
        assert_eq!(fit_scan(&[], 3, 10.0).unwrap(), vec![10.0; 3]);
        assert_eq!(fit_scan(&[1.0, 2.0], 2, 10.0).unwrap(), vec![1.0, 2.0]);
        assert!(matches!(fit_scan(&[1.0], 2, 10.0), Err(ArenaError::InvalidScan(_))));
    }

    #[test]
    fn action_from_twist_keeps_planar_components() {
        let action = Action::from(&Twist::planar(0.4, -0.7));
        assert_eq!(action.to_array(), [0.4, -0.7]);
        assert_eq!(action.to_twist(), Twist::planar(0.4, -0.7));
    }

    #[test]
    fn layout_serializes_snake_case() {
        let json = serde_json::to_string(&ObservationLayout::GoalPolar).unwrap();
        assert_eq!(json, "\"goal_polar\"");
    }
}
