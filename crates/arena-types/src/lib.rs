//! `arena-types` – message vocabulary shared by every Arena crate.
//!
//! The structs mirror the ROS messages the observation collector consumes
//! (`sensor_msgs/LaserScan`, `geometry_msgs/Twist`, `PoseStamped`, the
//! planner's `RobotStateStamped`) without tying the crates to a concrete
//! transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Message header carrying the acquisition time.
///
/// `stamp` is simulation (or ROS) time in seconds; it is the value the
/// approximate-time synchronizer matches on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u64,
    pub stamp: f64,
    pub frame_id: String,
}

impl Header {
    pub fn at(stamp: f64) -> Self {
        Self {
            seq: 0,
            stamp,
            frame_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation quaternion in ROS `(x, y, z, w)` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Pure rotation of `yaw` radians about +Z.
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw * 0.5;
        Self::new(0.0, 0.0, half.sin(), half.cos())
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// A full 3-D pose: position plus orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose3D {
    pub position: Vector3,
    pub orientation: Quaternion,
}

/// Linear and angular velocity (`geometry_msgs/Twist`).
///
/// Only `linear.x` and `angular.z` matter for a planar robot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

impl Twist {
    /// Planar differential-drive command.
    pub fn planar(linear_x: f64, angular_z: f64) -> Self {
        Self {
            linear: Vector3::new(linear_x, 0.0, 0.0),
            angular: Vector3::new(0.0, 0.0, angular_z),
        }
    }
}

/// A single 2-D laser scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    pub header: Header,
    pub angle_min: f32,
    pub angle_max: f32,
    pub angle_increment: f32,
    pub range_min: f32,
    pub range_max: f32,
    /// Measured distances in metres; invalid returns may be NaN on the wire.
    pub ranges: Vec<f32>,
}

/// Robot pose and velocity as published by the plan manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub pose: Pose3D,
    pub twist: Twist,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotStateStamped {
    pub header: Header,
    pub state: RobotState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose3D,
}

/// Every message that crosses the transport boundary into the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "msg", rename_all = "snake_case")]
pub enum SensorMessage {
    Scan(LaserScan),
    RobotState(RobotStateStamped),
    /// Headerless: paired by latest value, never by time.
    CmdVel(Twist),
    /// Delivered out-of-band from synchronization.
    Subgoal(PoseStamped),
    /// Deployment pacing tick.
    NextCycle(bool),
}

impl SensorMessage {
    /// Header stamp, or `None` for headerless messages.
    pub fn stamp(&self) -> Option<f64> {
        match self {
            SensorMessage::Scan(m) => Some(m.header.stamp),
            SensorMessage::RobotState(m) => Some(m.header.stamp),
            SensorMessage::Subgoal(m) => Some(m.header.stamp),
            SensorMessage::CmdVel(_) | SensorMessage::NextCycle(_) => None,
        }
    }
}

/// Envelope routed over the transport bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"arena-sim::flatland"`
    pub source: String,
    pub payload: SensorMessage,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: SensorMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Error type shared across the collector stack.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArenaError {
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Malformed Pose: {0}")]
    MalformedPose(String),

    #[error("Synchronization Timeout: no fused observation after {iterations} step requests")]
    SynchronizationTimeout { iterations: usize },

    #[error("Invalid Scan: {0}")]
    InvalidScan(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}
