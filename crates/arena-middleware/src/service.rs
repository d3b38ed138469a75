//! Request/response seams towards the simulator and the deployment pacer.
//!
//! - [`StepService`] – the `step_world` service call that advances the
//!   simulator.  Training-mode observation requests drive it in a loop.
//! - [`PacingSignal`] – the one-shot `next_cycle` wait a deployed agent
//!   performs once per decision cycle instead of stepping.
//! - [`BusPacing`] – [`PacingSignal`] backed by the [`EventBus`]
//!   `NextCycle` lane.

use std::time::Duration;

use arena_types::{ArenaError, SensorMessage};
use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::bus::{EventBus, Topic, TopicReceiver};

/// Advances the simulator.
///
/// # Contract
///
/// * `duration` – requested advance in seconds; `None` lets the simulator
///   use its own tick length.
/// * Returning `Ok(())` acknowledges the step.  Transport failures are
///   returned as [`ArenaError::Transport`] and are retried by the caller.
#[async_trait]
pub trait StepService: Send + Sync {
    async fn step_world(&self, duration: Option<f64>) -> Result<(), ArenaError>;
}

/// External pacing for deployment mode.
#[async_trait]
pub trait PacingSignal: Send {
    /// Wait at most `timeout` for the next decision cycle.
    ///
    /// Returns `Ok(true)` when the signal arrived and `Ok(false)` on timeout.
    async fn wait_next_cycle(&mut self, timeout: Duration) -> Result<bool, ArenaError>;
}

/// Waits on the bus `NextCycle` lane.
pub struct BusPacing {
    rx: TopicReceiver,
}

impl BusPacing {
    /// Subscribe to `next_cycle` on `bus`.  Signals published before this
    /// call are not observed.
    pub fn new(bus: &EventBus) -> Self {
        Self {
            rx: bus.subscribe_to(Topic::NextCycle),
        }
    }
}

#[async_trait]
impl PacingSignal for BusPacing {
    async fn wait_next_cycle(&mut self, timeout: Duration) -> Result<bool, ArenaError> {
        let wait = async {
            loop {
                match self.rx.recv().await {
                    Ok(event) => {
                        if matches!(event.payload, SensorMessage::NextCycle(_)) {
                            return Ok(true);
                        }
                    }
                    // Missed ticks still mean a cycle boundary has passed.
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "next_cycle receiver lagged");
                        return Ok(true);
                    }
                    Err(RecvError::Closed) => {
                        return Err(ArenaError::Channel("next_cycle lane closed".to_string()));
                    }
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "next_cycle wait timed out");
                Ok(false)
            }
        }
    }
}
