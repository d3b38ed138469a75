//! `arena-sim` – in-process stand-in for the Flatland simulator.
//!
//! [`SimWorld`] implements [`StepService`]: every `step_world` call advances
//! a unicycle robot inside a circular room and publishes the resulting laser
//! scan and robot state on the [`EventBus`].  Scan and state can be emitted
//! on different tick periods and with a timestamp skew, so the collector's
//! synchronizer and stepping loop are exercised the way a real simulator
//! would exercise them, without requiring one.
//!
//! # Example
//!
//! ```rust
//! use arena_middleware::{EventBus, StepService};
//! use arena_sim::{SimConfig, SimWorld};
//!
//! # tokio_test_block(async {
//! let bus = EventBus::default();
//! let sim = SimWorld::new(bus.clone(), SimConfig::default());
//! sim.step_world(None).await.expect("sim step must succeed");
//! assert_eq!(sim.steps(), 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use arena_middleware::{EventBus, StepService, Topic, TopicReceiver};
use arena_perception::geometry::{Pose2D, wrap_angle};
use arena_types::{
    ArenaError, Header, LaserScan, Pose3D, PoseStamped, Quaternion, RobotState,
    RobotStateStamped, SensorMessage, Twist, Vector3,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::f64::consts::TAU;
use tracing::{debug, trace};

const SOURCE: &str = "arena-sim::flatland";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables of the simulated world.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Simulated seconds per `step_world(None)`.
    pub tick_secs: f64,
    /// Publish a scan every N ticks.
    pub scan_period_ticks: u64,
    /// Publish the robot state every N ticks.
    pub state_period_ticks: u64,
    /// Added to the robot-state stamp to emulate pipeline latency.
    pub state_skew_secs: f64,
    pub num_beams: usize,
    pub range_max: f32,
    /// Radius of the circular room centred at the origin (metres).
    pub room_radius: f64,
    /// Re-publish the executed command each tick as the headerless stream.
    pub echo_cmd_vel: bool,
    pub start: Pose2D,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_secs: 0.1,
            scan_period_ticks: 1,
            state_period_ticks: 1,
            state_skew_secs: 0.0,
            num_beams: 360,
            range_max: 10.0,
            room_radius: 8.0,
            echo_cmd_vel: true,
            start: Pose2D::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimWorld
// ────────────────────────────────────────────────────────────────────────────

struct SimInner {
    time: f64,
    tick: u64,
    pose: Pose2D,
    command: Twist,
    failures_remaining: u32,
    cmd_rx: TopicReceiver,
}

/// Kinematic simulator driven by `step_world`.
pub struct SimWorld {
    bus: EventBus,
    config: SimConfig,
    inner: Mutex<SimInner>,
}

impl SimWorld {
    /// Create a world publishing on `bus`.  Commands published on the bus
    /// `cmd_vel` lane are executed from the next step on.
    pub fn new(bus: EventBus, config: SimConfig) -> Self {
        let cmd_rx = bus.subscribe_to(Topic::CmdVel);
        let inner = SimInner {
            time: 0.0,
            tick: 0,
            pose: config.start,
            command: Twist::default(),
            failures_remaining: 0,
            cmd_rx,
        };
        Self {
            bus,
            config,
            inner: Mutex::new(inner),
        }
    }

    /// Make the next `n` step requests fail with a transport error.
    pub fn fail_next_steps(&self, n: u32) {
        self.inner.lock().failures_remaining = n;
    }

    /// Set the executed command directly, bypassing the bus.
    pub fn set_command(&self, command: Twist) {
        self.inner.lock().command = command;
    }

    /// Publish a navigation subgoal at `(x, y)` facing `theta`.
    pub fn publish_subgoal(&self, x: f64, y: f64, theta: f64) -> Result<usize, ArenaError> {
        let stamp = self.sim_time();
        self.bus.publish_msg(
            SOURCE,
            SensorMessage::Subgoal(PoseStamped {
                header: Header::at(stamp),
                pose: Pose3D {
                    position: Vector3::new(x, y, 0.0),
                    orientation: Quaternion::from_yaw(theta),
                },
            }),
        )
    }

    /// Publish one deployment pacing tick.
    pub fn publish_next_cycle(&self) -> Result<usize, ArenaError> {
        self.bus.publish_msg(SOURCE, SensorMessage::NextCycle(true))
    }

    /// Number of successful steps so far.
    pub fn steps(&self) -> u64 {
        self.inner.lock().tick
    }

    pub fn sim_time(&self) -> f64 {
        self.inner.lock().time
    }

    pub fn pose(&self) -> Pose2D {
        self.inner.lock().pose
    }

    /// Cast one beam per configured bearing against the room wall.
    ///
    /// Beams whose wall hit lies beyond `range_max` come back as NaN, the way
    /// a real driver reports invalid returns.
    pub fn cast_scan(&self, pose: &Pose2D) -> Vec<f32> {
        let n = self.config.num_beams.max(1);
        let increment = TAU / n as f64;
        (0..n)
            .map(|i| {
                let bearing = pose.theta - std::f64::consts::PI + increment * i as f64;
                let (dx, dy) = (bearing.cos(), bearing.sin());
                let p_dot_d = pose.x * dx + pose.y * dy;
                let c = pose.x * pose.x + pose.y * pose.y - self.config.room_radius.powi(2);
                let disc = p_dot_d * p_dot_d - c;
                let hit = -p_dot_d + disc.max(0.0).sqrt();
                if hit > self.config.range_max as f64 || hit < 0.0 {
                    f32::NAN
                } else {
                    hit as f32
                }
            })
            .collect()
    }

    fn scan_message(&self, stamp: f64, pose: &Pose2D) -> SensorMessage {
        let n = self.config.num_beams.max(1);
        let increment = (TAU / n as f64) as f32;
        SensorMessage::Scan(LaserScan {
            header: Header {
                seq: 0,
                stamp,
                frame_id: "laser".to_string(),
            },
            angle_min: -std::f32::consts::PI,
            angle_max: -std::f32::consts::PI + increment * (n as f32 - 1.0),
            angle_increment: increment,
            range_min: 0.0,
            range_max: self.config.range_max,
            ranges: self.cast_scan(pose),
        })
    }

    fn state_message(stamp: f64, pose: &Pose2D, twist: Twist) -> SensorMessage {
        SensorMessage::RobotState(RobotStateStamped {
            header: Header {
                seq: 0,
                stamp,
                frame_id: "map".to_string(),
            },
            state: RobotState {
                pose: Pose3D {
                    position: Vector3::new(pose.x, pose.y, 0.0),
                    orientation: Quaternion::from_yaw(pose.theta),
                },
                twist,
            },
        })
    }
}

#[async_trait]
impl StepService for SimWorld {
    async fn step_world(&self, duration: Option<f64>) -> Result<(), ArenaError> {
        let (tick, time, pose, command) = {
            let mut inner = self.inner.lock();
            if inner.failures_remaining > 0 {
                inner.failures_remaining -= 1;
                return Err(ArenaError::Transport(
                    "step_world service unavailable".to_string(),
                ));
            }
            while let Ok(event) = inner.cmd_rx.try_recv() {
                if let SensorMessage::CmdVel(twist) = event.payload {
                    inner.command = twist;
                }
            }

            let dt = duration.unwrap_or(self.config.tick_secs).max(0.0);
            let (v, w) = (inner.command.linear.x, inner.command.angular.z);
            let theta = inner.pose.theta;
            inner.pose = Pose2D::new(
                inner.pose.x + v * theta.cos() * dt,
                inner.pose.y + v * theta.sin() * dt,
                wrap_angle(theta + w * dt),
            );
            inner.time += dt;
            inner.tick += 1;
            (inner.tick, inner.time, inner.pose, inner.command)
        };

        trace!(tick, time, "sim step");
        if self.config.echo_cmd_vel {
            self.bus.publish_msg(SOURCE, SensorMessage::CmdVel(command))?;
        }
        if tick % self.config.scan_period_ticks.max(1) == 0 {
            self.bus.publish_msg(SOURCE, self.scan_message(time, &pose))?;
        }
        if tick % self.config.state_period_ticks.max(1) == 0 {
            let stamp = time + self.config.state_skew_secs;
            self.bus
                .publish_msg(SOURCE, Self::state_message(stamp, &pose, command))?;
        }
        debug!(tick, x = pose.x, y = pose.y, "sim advanced");
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
