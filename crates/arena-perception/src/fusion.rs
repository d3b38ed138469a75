//! Stream buffers and the fused sensor state.
//!
//! [`SensorHub`] is the single piece of shared mutable state between the
//! transport side (which calls [`SensorHub::ingest`] for every delivered
//! message) and the observation consumer (which resets and polls the
//! freshness flag and reads a [`FusionSnapshot`]).
//!
//! Everything lives behind one mutex: the approximate-time synchronizer's
//! windows, the per-stream [`StreamBuffers`], the [`FusedState`] and the
//! `fresh` flag.  Each `ingest` call updates all of them atomically with
//! respect to the consumer's reset-then-poll handshake.
//!
//! Scan, robot state and command velocity are fused only as a synchronized
//! triple.  The subgoal bypasses the synchronizer and lands in the fused
//! state the moment it arrives, so it may be paired with a scan/pose pair
//! from a slightly earlier instant.
//!
//! # Example
//!
//! ```rust
//! use arena_perception::fusion::SensorHub;
//! use arena_types::{Header, LaserScan, RobotStateStamped, SensorMessage, Twist};
//!
//! let hub = SensorHub::new(0.05, 100);
//! hub.reset_fresh();
//!
//! hub.ingest(SensorMessage::CmdVel(Twist::planar(0.3, 0.0))).unwrap();
//! hub.ingest(SensorMessage::Scan(LaserScan {
//!     header: Header::at(10.00),
//!     range_max: 10.0,
//!     ranges: vec![1.0, f32::NAN],
//!     ..LaserScan::default()
//! }))
//! .unwrap();
//! let fused = hub
//!     .ingest(SensorMessage::RobotState(RobotStateStamped {
//!         header: Header::at(10.03),
//!         ..RobotStateStamped::default()
//!     }))
//!     .unwrap();
//!
//! assert!(fused);
//! let snap = hub.snapshot();
//! assert!(snap.fresh);
//! assert_eq!(snap.state.scan.ranges, vec![1.0, 10.0]);
//! ```

use std::sync::Arc;

use arena_types::{
    ArenaError, LaserScan, PoseStamped, RobotStateStamped, SensorMessage, Twist,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::geometry::{Pose2D, pose3d_to_pose2d};
use crate::sync::{ApproximateTimeSynchronizer, StreamSpec};

/// Synchronizer stream index of the laser scan.
pub const SCAN_STREAM: usize = 0;
/// Synchronizer stream index of the robot state.
pub const ROBOT_STATE_STREAM: usize = 1;
/// Synchronizer stream index of the headerless command velocity.
pub const CMD_VEL_STREAM: usize = 2;

// ────────────────────────────────────────────────────────────────────────────
// Scan processing
// ────────────────────────────────────────────────────────────────────────────

/// Replace every NaN range with `range_max`.  Other values pass through.
///
/// # Errors
///
/// [`ArenaError::InvalidScan`] when `range_max` itself is not a positive
/// finite number, since there is nothing sensible to clamp to.
pub fn remove_nans(mut scan: LaserScan) -> Result<LaserScan, ArenaError> {
    if !scan.range_max.is_finite() || scan.range_max <= 0.0 {
        return Err(ArenaError::InvalidScan(format!(
            "range_max {} is not a positive finite distance",
            scan.range_max
        )));
    }
    let range_max = scan.range_max;
    for r in scan.ranges.iter_mut().filter(|r| r.is_nan()) {
        *r = range_max;
    }
    Ok(scan)
}

// ────────────────────────────────────────────────────────────────────────────
// State holders
// ────────────────────────────────────────────────────────────────────────────

/// Latest decoded value of each inbound stream, overwritten on delivery.
#[derive(Debug, Clone, Default)]
pub struct StreamBuffers {
    pub scan: Option<LaserScan>,
    pub robot_state: Option<RobotStateStamped>,
    pub command: Option<Twist>,
    pub subgoal: Option<PoseStamped>,
}

/// The most recent synchronized view of the robot and its surroundings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusedState {
    /// NaN-free scan from the last synchronized tuple.
    pub scan: LaserScan,
    pub robot_pose: Pose2D,
    pub robot_vel: Twist,
    /// Command velocity paired with the last synchronized tuple.
    pub last_command: Twist,
    /// Latest subgoal; persists until a new goal arrives.
    pub subgoal: Pose2D,
    /// Header stamp of the scan in the last synchronized tuple.
    pub stamp: f64,
}

/// A consistent copy of the hub taken under its lock.
#[derive(Debug, Clone)]
pub struct FusionSnapshot {
    pub state: FusedState,
    pub fresh: bool,
    /// Number of synchronized tuples fused so far.
    pub fused_count: u64,
    /// Set while the latest fused robot pose could not be reduced to 2-D.
    pub fault: Option<ArenaError>,
}

struct HubInner {
    sync: ApproximateTimeSynchronizer<SensorMessage>,
    buffers: StreamBuffers,
    fused: FusedState,
    fresh: bool,
    fused_count: u64,
    pose_fault: Option<ArenaError>,
}

// ────────────────────────────────────────────────────────────────────────────
// SensorHub
// ────────────────────────────────────────────────────────────────────────────

/// Shared handle over the synchronizer, stream buffers and fused state.
///
/// Clone it cheaply: all clones share the same state.
#[derive(Clone)]
pub struct SensorHub {
    inner: Arc<Mutex<HubInner>>,
}

impl SensorHub {
    /// Create a hub whose synchronizer matches scan and robot state within
    /// `slop` seconds, buffering up to `queue_size` messages per stream.
    pub fn new(slop: f64, queue_size: usize) -> Self {
        let sync = ApproximateTimeSynchronizer::new(
            vec![
                StreamSpec::stamped("scan"),
                StreamSpec::stamped("robot_state"),
                StreamSpec::headerless("cmd_vel"),
            ],
            queue_size,
            slop,
        );
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                sync,
                buffers: StreamBuffers::default(),
                fused: FusedState::default(),
                fresh: false,
                fused_count: 0,
                pose_fault: None,
            })),
        }
    }

    /// Deliver one transport message.
    ///
    /// Returns `Ok(true)` when the message completed a synchronized tuple and
    /// the fused state was updated (and marked fresh).
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidScan`] for a scan without a usable `range_max`.
    /// - [`ArenaError::MalformedPose`] when a fused robot pose or a subgoal
    ///   has a degenerate orientation.  For the robot pose the tuple is still
    ///   marked fresh and the fault is kept in the snapshot, so the consumer
    ///   observes it instead of stepping forever.  A malformed subgoal is
    ///   only reported here; the previous subgoal stays in effect.
    /// - [`ArenaError::Channel`] for stamped messages without a finite stamp.
    pub fn ingest(&self, msg: SensorMessage) -> Result<bool, ArenaError> {
        let mut inner = self.inner.lock();
        let stamp = msg.stamp();
        let tuple = match msg {
            SensorMessage::Scan(scan) => {
                let scan = remove_nans(scan)?;
                inner.buffers.scan = Some(scan.clone());
                inner.sync.add(SCAN_STREAM, stamp, SensorMessage::Scan(scan))?
            }
            SensorMessage::RobotState(state) => {
                inner.buffers.robot_state = Some(state.clone());
                inner
                    .sync
                    .add(ROBOT_STATE_STREAM, stamp, SensorMessage::RobotState(state))?
            }
            SensorMessage::CmdVel(twist) => {
                inner.buffers.command = Some(twist);
                inner.sync.add(CMD_VEL_STREAM, None, SensorMessage::CmdVel(twist))?
            }
            SensorMessage::Subgoal(goal) => {
                Self::apply_subgoal(&mut inner, goal)?;
                return Ok(false);
            }
            SensorMessage::NextCycle(_) => return Ok(false),
        };

        match tuple {
            Some(tuple) => Self::apply_synchronized(&mut inner, tuple).map(|_| true),
            None => Ok(false),
        }
    }

    /// Clear the freshness flag at the start of an observation request.
    pub fn reset_fresh(&self) {
        self.inner.lock().fresh = false;
    }

    /// `true` once a synchronized tuple has been fused since the last
    /// [`reset_fresh`][Self::reset_fresh].
    pub fn is_fresh(&self) -> bool {
        self.inner.lock().fresh
    }

    /// Copy the fused state, freshness and fault under the lock.
    pub fn snapshot(&self) -> FusionSnapshot {
        let inner = self.inner.lock();
        FusionSnapshot {
            state: inner.fused.clone(),
            fresh: inner.fresh,
            fused_count: inner.fused_count,
            fault: inner.pose_fault.clone(),
        }
    }

    /// Copy the raw per-stream buffers.
    pub fn buffers(&self) -> StreamBuffers {
        self.inner.lock().buffers.clone()
    }

    // ── internal ────────────────────────────────────────────────────────────

    fn apply_subgoal(inner: &mut HubInner, goal: PoseStamped) -> Result<(), ArenaError> {
        let reduced = pose3d_to_pose2d(&goal.pose);
        inner.buffers.subgoal = Some(goal);
        match reduced {
            Ok(pose) => {
                debug!(x = pose.x, y = pose.y, "subgoal updated");
                inner.fused.subgoal = pose;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "discarding subgoal with malformed orientation");
                Err(e)
            }
        }
    }

    /// The fusion callback: a pure state update, no downstream calls.
    fn apply_synchronized(inner: &mut HubInner, tuple: Vec<SensorMessage>) -> Result<(), ArenaError> {
        let mut parts = tuple.into_iter();
        let (
            Some(SensorMessage::Scan(scan)),
            Some(SensorMessage::RobotState(state)),
            Some(SensorMessage::CmdVel(cmd)),
        ) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ArenaError::Channel(
                "synchronizer emitted a tuple in an unexpected shape".to_string(),
            ));
        };

        inner.fused.stamp = scan.header.stamp;
        inner.fused.scan = scan;
        inner.fused.robot_vel = state.state.twist;
        inner.fused.last_command = cmd;
        inner.fused_count += 1;
        inner.fresh = true;

        match pose3d_to_pose2d(&state.state.pose) {
            Ok(pose) => {
                inner.fused.robot_pose = pose;
                inner.pose_fault = None;
                debug!(
                    stamp = inner.fused.stamp,
                    x = pose.x,
                    y = pose.y,
                    theta = pose.theta,
                    "fused synchronized tuple"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, stamp = inner.fused.stamp, "fused tuple carries a malformed robot pose");
                inner.pose_fault = Some(e.clone());
                Err(e)
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
