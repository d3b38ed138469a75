//! `arena-perception` – sensor fusion for the observation collector.
//!
//! Turns asynchronous, independently-stamped sensor streams into one
//! temporally-consistent view of the robot.
//!
//! # Modules
//!
//! - [`geometry`] – [`Pose2D`][geometry::Pose2D], 3-D → 2-D pose reduction
//!   and the world → robot-frame polar transform used for goal features.
//! - [`sync`] – [`ApproximateTimeSynchronizer`][sync::ApproximateTimeSynchronizer]:
//!   matches stamped streams within a time tolerance (`slop`), pairing
//!   headerless streams by latest value.
//! - [`fusion`] – [`SensorHub`][fusion::SensorHub]: the mutex-guarded stream
//!   buffers, synchronizer windows, [`FusedState`][fusion::FusedState] and
//!   freshness flag shared between transport callbacks and the consumer.

pub mod fusion;
pub mod geometry;
pub mod sync;

pub use fusion::{FusedState, FusionSnapshot, SensorHub, StreamBuffers};
pub use geometry::{Pose2D, goal_in_robot_frame, pose3d_to_pose2d, wrap_angle};
pub use sync::{ApproximateTimeSynchronizer, StreamSpec};
