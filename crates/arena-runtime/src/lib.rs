//! `arena-runtime` – observation collection for a learned local planner.
//!
//! # Modules
//!
//! - [`observation`] – [`ObservationLayout`] and [`ObservationBounds`]: the
//!   fixed vector layout a policy is trained against, and
//!   [`build_observation_space`].
//! - [`stepper`] – [`SimulationStepper`]: steps the simulator (training) or
//!   waits on the pacing signal (deployment) until a fresh synchronized
//!   tuple is fused.
//! - [`collector`] – [`ObservationCollector`]: `get_observation`,
//!   `get_observation_and_action` and `register_reward`.
//! - [`agent_loop`] – [`AgentLoop`]: observe, ask a [`Policy`], publish the
//!   command on the bus.
//! - [`rollout`] – [`RolloutRecorder`]: JSON-lines log of observations and
//!   synchronized commands.
//! - [`config`] – [`CollectorConfig`]: TOML file plus `ARENA_*` overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with optional OTLP span export.

pub mod agent_loop;
pub mod collector;
pub mod config;
pub mod observation;
pub mod rollout;
pub mod stepper;
pub mod telemetry;

pub use agent_loop::{AgentLoop, AgentLoopConfig, CycleReport, GoalSeekingPolicy, Policy};
pub use collector::ObservationCollector;
pub use config::CollectorConfig;
pub use observation::{
    Action, Observation, ObservationBounds, ObservationDict, ObservationLayout,
    build_observation_space,
};
pub use rollout::{RolloutRecord, RolloutRecorder};
pub use stepper::{SimulationStepper, StepOutcome, SyncState};
