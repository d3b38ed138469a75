//! [`AgentLoop`] – the deployment decision cycle.
//!
//! Each tick:
//!
//! 1. **Observe** – [`ObservationCollector::get_observation_and_action`]
//!    steps (training) or paces (deployment) until a fresh tuple is fused.
//! 2. **Decide** – the injected [`Policy`] maps the observation to an
//!    [`Action`].
//! 3. **Act** – the action is published on the bus `cmd_vel` lane, where the
//!    simulator (or the robot driver) picks it up.
//! 4. **Record** – optionally, the observation and the synchronized command
//!    are appended to a [`RolloutRecorder`].
//!
//! Malformed poses skip the cycle with a warning; the loop keeps running.
//! Every other collector error ends [`AgentLoop::run`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use arena_middleware::EventBus;
use arena_types::{ArenaError, SensorMessage};
use tracing::{debug, info, warn};

use crate::collector::ObservationCollector;
use crate::observation::{Action, Observation};
use crate::rollout::{RolloutRecord, RolloutRecorder};

// ─────────────────────────────────────────────────────────────────────────────
// Policy seam
// ─────────────────────────────────────────────────────────────────────────────

/// Maps an observation to a planar command.
pub trait Policy: Send {
    fn act(&mut self, observation: &Observation) -> Action;
}

impl<F> Policy for F
where
    F: FnMut(&Observation) -> Action + Send,
{
    fn act(&mut self, observation: &Observation) -> Action {
        self(observation)
    }
}

/// Proportional controller on the goal's robot-frame polar coordinates.
///
/// Not a learned policy; it drives the demo and smoke tests.
#[derive(Debug, Clone, Copy)]
pub struct GoalSeekingPolicy {
    pub max_linear: f64,
    pub max_angular: f64,
    /// Stop within this distance of the goal (metres).
    pub tolerance: f64,
}

impl Default for GoalSeekingPolicy {
    fn default() -> Self {
        Self {
            max_linear: 0.3,
            max_angular: 1.0,
            tolerance: 0.2,
        }
    }
}

impl Policy for GoalSeekingPolicy {
    fn act(&mut self, observation: &Observation) -> Action {
        let (rho, theta) = observation.aux.goal_in_robot_frame;
        if rho < self.tolerance {
            return Action::default();
        }
        let angular = (2.0 * theta).clamp(-self.max_angular, self.max_angular);
        // Turn in place while the goal is well off the heading.
        let linear = if theta.abs() > std::f64::consts::FRAC_PI_2 {
            0.0
        } else {
            (0.5 * rho).min(self.max_linear) * theta.cos()
        };
        Action::new(linear, angular)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`AgentLoop`].
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Stop after this many cycles; `None` runs until cancelled.
    pub max_cycles: Option<u64>,
    /// Event source name for published commands.
    pub source: String,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_cycles: None,
            source: "arena-runtime::agent".to_string(),
        }
    }
}

/// Result of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub observation: Observation,
    /// Command synchronized with `observation` (the one being executed).
    pub executed: Action,
    /// Command the policy chose for the next cycle.
    pub action: Action,
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct AgentLoop<P: Policy> {
    collector: ObservationCollector,
    policy: P,
    bus: EventBus,
    config: AgentLoopConfig,
    cancel: Arc<AtomicBool>,
    recorder: Option<RolloutRecorder>,
    cycles: u64,
    skipped: u64,
}

impl<P: Policy> AgentLoop<P> {
    /// The loop shares the cancellation flag of the collector's stepper.
    pub fn new(collector: ObservationCollector, policy: P, bus: EventBus, config: AgentLoopConfig) -> Self {
        let cancel = collector.stepper().cancellation_flag();
        Self {
            collector,
            policy,
            bus,
            config,
            cancel,
            recorder: None,
            cycles: 0,
            skipped: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: RolloutRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn collector(&self) -> &ObservationCollector {
        &self.collector
    }

    /// Forwarded to [`ObservationCollector::register_reward`].
    pub fn register_reward(&mut self, reward: f32) {
        self.collector.register_reward(reward);
    }

    /// Completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Cycles skipped because of a malformed pose.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Run one observe–decide–act cycle.
    pub async fn tick(&mut self) -> Result<CycleReport, ArenaError> {
        let (observation, executed) = self.collector.get_observation_and_action().await?;
        let action = self.policy.act(&observation);
        let receivers = self
            .bus
            .publish_msg(&self.config.source, SensorMessage::CmdVel(action.to_twist()))?;

        if let Some(recorder) = self.recorder.as_mut() {
            let record =
                RolloutRecord::new(self.cycles, &observation, executed, self.collector.last_reward());
            recorder.record(&record)?;
        }

        let cycle = self.cycles;
        self.cycles += 1;
        debug!(
            cycle,
            receivers,
            linear_x = action.linear_x,
            angular_z = action.angular_z,
            "command published"
        );
        Ok(CycleReport {
            cycle,
            observation,
            executed,
            action,
        })
    }

    /// Tick until cancelled or until `max_cycles` cycles were attempted.
    ///
    /// Returns the number of completed cycles.
    pub async fn run(&mut self) -> Result<u64, ArenaError> {
        info!(max_cycles = ?self.config.max_cycles, "agent loop started");
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!(cycles = self.cycles, "agent loop cancelled");
                break;
            }
            if let Some(max) = self.config.max_cycles
                && self.cycles + self.skipped >= max
            {
                break;
            }
            match self.tick().await {
                Ok(_) => {}
                Err(ArenaError::MalformedPose(reason)) => {
                    self.skipped += 1;
                    warn!(%reason, skipped = self.skipped, "skipping cycle with malformed pose");
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.flush()?;
        }
        info!(cycles = self.cycles, skipped = self.skipped, "agent loop finished");
        Ok(self.cycles)
    }
}
