//! [`SimulationStepper`] – turns one observation request into "the world has
//! produced a fresh synchronized tuple".
//!
//! # Modes
//!
//! * **Training** – step the simulator, give the producer side a chance to
//!   deliver, check the hub's fresh flag, repeat.  Each round issues exactly
//!   one step request.  Step-service failures are logged and retried on the
//!   next round.
//! * **Deployment** – wait once on the external pacing signal.  A timeout is
//!   soft: the request proceeds with whatever state is available.
//!
//! # States
//!
//! ```text
//!             request starts
//!   ┌──────────────────────────────┐
//!   ▼                              │
//! AWAITING_SYNC ──fresh tuple──▶ SYNCED
//! ```
//!
//! Training mode can leave `AWAITING_SYNC` without a tuple in two ways: the
//! iteration ceiling ([`ArenaError::SynchronizationTimeout`]) or the
//! cancellation flag ([`StepOutcome::Cancelled`]).

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use arena_middleware::{PacingSignal, StepService};
use arena_perception::SensorHub;
use arena_types::ArenaError;
use tracing::{debug, trace, warn};

use crate::config::CollectorConfig;

/// Where the stepper is within the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    AwaitingSync,
    Synced,
}

/// How a request left the stepper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A fresh tuple was fused after `iterations` step requests.
    Synced { iterations: usize },
    /// Deployment wait finished; `signalled` is `false` after a timeout.
    Paced { signalled: bool },
    /// The cancellation flag was raised before a tuple arrived.
    Cancelled { iterations: usize },
}

impl StepOutcome {
    pub fn iterations(&self) -> usize {
        match self {
            StepOutcome::Synced { iterations } | StepOutcome::Cancelled { iterations } => *iterations,
            StepOutcome::Paced { .. } => 0,
        }
    }
}

enum StepMode {
    Train {
        service: Arc<dyn StepService>,
        step_size: Option<f64>,
        max_iterations: Option<usize>,
    },
    Deploy {
        pacing: Box<dyn PacingSignal>,
        timeout: Duration,
    },
}

/// Drives the world until the [`SensorHub`] reports a fresh tuple.
pub struct SimulationStepper {
    mode: StepMode,
    state: SyncState,
    cancel: Arc<AtomicBool>,
    step_requests: u64,
    transport_failures: u64,
}

impl SimulationStepper {
    /// Training-mode stepper.  `max_iterations = None` steps forever.
    pub fn training(
        service: Arc<dyn StepService>,
        step_size: Option<f64>,
        max_iterations: Option<usize>,
    ) -> Self {
        Self::with_mode(StepMode::Train {
            service,
            step_size,
            max_iterations,
        })
    }

    /// Deployment-mode stepper waiting at most `timeout` per request.
    pub fn deployment(pacing: Box<dyn PacingSignal>, timeout: Duration) -> Self {
        Self::with_mode(StepMode::Deploy { pacing, timeout })
    }

    /// Pick the mode from `config.train_mode`.  The seam for the unused mode
    /// may be `None`.
    pub fn from_config(
        config: &CollectorConfig,
        service: Option<Arc<dyn StepService>>,
        pacing: Option<Box<dyn PacingSignal>>,
    ) -> Result<Self, ArenaError> {
        if config.train_mode {
            let service = service.ok_or_else(|| {
                ArenaError::Config("train_mode requires a step service".to_string())
            })?;
            Ok(Self::training(
                service,
                config.step_size_secs,
                config.iteration_ceiling(),
            ))
        } else {
            let pacing = pacing.ok_or_else(|| {
                ArenaError::Config("deployment mode requires a pacing signal".to_string())
            })?;
            Ok(Self::deployment(pacing, config.pacing_timeout()))
        }
    }

    fn with_mode(mode: StepMode) -> Self {
        Self {
            mode,
            state: SyncState::AwaitingSync,
            cancel: Arc::new(AtomicBool::new(false)),
            step_requests: 0,
            transport_failures: 0,
        }
    }

    /// Share an externally owned cancellation flag (e.g. set by Ctrl-C).
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_training(&self) -> bool {
        matches!(self.mode, StepMode::Train { .. })
    }

    /// Step requests issued over the stepper's lifetime.
    pub fn step_requests(&self) -> u64 {
        self.step_requests
    }

    /// Step requests that failed with a transport error.
    pub fn transport_failures(&self) -> u64 {
        self.transport_failures
    }

    /// Run one request against `hub`.
    ///
    /// The caller clears the hub's fresh flag before calling; a tuple fused
    /// after that point satisfies the request.
    pub async fn synchronize(&mut self, hub: &SensorHub) -> Result<StepOutcome, ArenaError> {
        self.state = SyncState::AwaitingSync;
        let outcome = match &mut self.mode {
            StepMode::Train {
                service,
                step_size,
                max_iterations,
            } => {
                let service = Arc::clone(service);
                let (step_size, max_iterations) = (*step_size, *max_iterations);
                self.step_until_fresh(service.as_ref(), step_size, max_iterations, hub)
                    .await?
            }
            StepMode::Deploy { pacing, timeout } => {
                if self.cancel.load(Ordering::SeqCst) {
                    return Ok(StepOutcome::Cancelled { iterations: 0 });
                }
                let signalled = match pacing.wait_next_cycle(*timeout).await {
                    Ok(signalled) => signalled,
                    Err(e) => {
                        debug!(error = %e, "pacing signal failed; using current state");
                        false
                    }
                };
                if !signalled {
                    debug!(
                        timeout_ms = timeout.as_millis() as u64,
                        "no next_cycle within timeout; proceeding with best-effort state"
                    );
                }
                if hub.is_fresh() {
                    self.state = SyncState::Synced;
                }
                StepOutcome::Paced { signalled }
            }
        };
        Ok(outcome)
    }

    async fn step_until_fresh(
        &mut self,
        service: &dyn StepService,
        step_size: Option<f64>,
        max_iterations: Option<usize>,
        hub: &SensorHub,
    ) -> Result<StepOutcome, ArenaError> {
        let mut iterations = 0usize;
        let mut failure_streak = 0u32;
        loop {
            if hub.is_fresh() {
                self.state = SyncState::Synced;
                trace!(iterations, "synchronized");
                return Ok(StepOutcome::Synced { iterations });
            }
            if self.cancel.load(Ordering::SeqCst) {
                debug!(iterations, "observation request cancelled");
                return Ok(StepOutcome::Cancelled { iterations });
            }
            if let Some(max) = max_iterations
                && iterations >= max
            {
                warn!(
                    iterations,
                    transport_failures = self.transport_failures,
                    "no synchronized tuple within iteration ceiling"
                );
                return Err(ArenaError::SynchronizationTimeout { iterations });
            }

            self.step_requests += 1;
            iterations += 1;
            match service.step_world(step_size).await {
                Ok(()) => failure_streak = 0,
                Err(e) => {
                    self.transport_failures += 1;
                    failure_streak += 1;
                    debug!(iterations, failure_streak, error = %e, "step_world failed; retrying");
                }
            }
            // Let the producer task deliver what this step published.
            tokio::task::yield_now().await;
        }
    }
}
