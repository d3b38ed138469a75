//! [`ObservationCollector`] – the agent-facing entry point.
//!
//! One call to [`ObservationCollector::get_observation`]:
//!
//! 1. clears the hub's fresh flag,
//! 2. lets the [`SimulationStepper`] step (training) or pace (deployment)
//!    until a fresh synchronized tuple has been fused,
//! 3. snapshots the fused state under the hub lock,
//! 4. computes the goal in robot-frame polar coordinates and assembles the
//!    observation vector in the configured [`ObservationLayout`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use arena_middleware::{spawn_ingest, EventBus, StepService};
//! use arena_runtime::{CollectorConfig, ObservationCollector};
//! use arena_sim::{SimConfig, SimWorld};
//!
//! # async fn run() -> Result<(), arena_types::ArenaError> {
//! let bus = EventBus::default();
//! let sim: Arc<dyn StepService> = Arc::new(SimWorld::new(bus.clone(), SimConfig::default()));
//! let mut collector =
//!     ObservationCollector::from_config(&CollectorConfig::default(), Some(sim), None)?;
//! let _pump = spawn_ingest(&bus, collector.hub().clone());
//!
//! let (obs, action) = collector.get_observation_and_action().await?;
//! println!("{} values, action {:?}", obs.vector.len(), action);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use arena_middleware::{PacingSignal, StepService};
use arena_perception::{FusionSnapshot, SensorHub, goal_in_robot_frame};
use arena_types::ArenaError;
use tracing::{debug, instrument};

use crate::config::CollectorConfig;
use crate::observation::{
    Action, Observation, ObservationBounds, ObservationDict, ObservationInputs, ObservationLayout,
    fit_scan,
};
use crate::stepper::{SimulationStepper, StepOutcome};

/// Produces one observation per decision step.
pub struct ObservationCollector {
    hub: SensorHub,
    stepper: SimulationStepper,
    layout: ObservationLayout,
    bounds: ObservationBounds,
    num_beams: usize,
    lidar_range: f32,
    last_reward: f32,
}

impl ObservationCollector {
    /// Assemble a collector from an existing hub and stepper.
    pub fn new(
        config: &CollectorConfig,
        hub: SensorHub,
        stepper: SimulationStepper,
    ) -> Result<Self, ArenaError> {
        config.validate()?;
        Ok(Self {
            hub,
            stepper,
            layout: config.layout,
            bounds: config.layout.bounds(config.num_lidar_beams, config.lidar_range),
            num_beams: config.num_lidar_beams,
            lidar_range: config.lidar_range,
            last_reward: 0.0,
        })
    }

    /// Build the hub and stepper from `config`.  Training mode needs
    /// `service`, deployment mode needs `pacing`.
    pub fn from_config(
        config: &CollectorConfig,
        service: Option<Arc<dyn StepService>>,
        pacing: Option<Box<dyn PacingSignal>>,
    ) -> Result<Self, ArenaError> {
        config.validate()?;
        let hub = SensorHub::new(config.slop_secs, config.queue_size);
        let stepper = SimulationStepper::from_config(config, service, pacing)?;
        Self::new(config, hub, stepper)
    }

    /// The hub the ingest side delivers into.
    pub fn hub(&self) -> &SensorHub {
        &self.hub
    }

    pub fn stepper(&self) -> &SimulationStepper {
        &self.stepper
    }

    pub fn layout(&self) -> ObservationLayout {
        self.layout
    }

    /// Bounds matching every vector this collector produces.
    pub fn observation_space(&self) -> &ObservationBounds {
        &self.bounds
    }

    /// Record the reward to carry into subsequent observations.
    pub fn register_reward(&mut self, reward: f32) {
        self.last_reward = reward;
    }

    pub fn last_reward(&self) -> f32 {
        self.last_reward
    }

    /// Step or pace until a fresh tuple is fused and build the observation.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::SynchronizationTimeout`] when training-mode stepping
    ///   hits the iteration ceiling.
    /// - [`ArenaError::MalformedPose`] when the fused robot pose has a
    ///   degenerate orientation.  A malformed subgoal is discarded on ingest
    ///   and the previous one stays in effect.
    /// - [`ArenaError::InvalidScan`] when the scan length disagrees with the
    ///   configured beam count.
    pub async fn get_observation(&mut self) -> Result<Observation, ArenaError> {
        self.observe().await.map(|(obs, _)| obs)
    }

    /// [`get_observation`][Self::get_observation] plus the planar command
    /// velocity fused in the same tuple as the observation.
    pub async fn get_observation_and_action(&mut self) -> Result<(Observation, Action), ArenaError> {
        let (obs, snapshot) = self.observe().await?;
        Ok((obs, Action::from(&snapshot.state.last_command)))
    }

    #[instrument(level = "debug", skip(self), fields(layout = ?self.layout))]
    async fn observe(&mut self) -> Result<(Observation, FusionSnapshot), ArenaError> {
        self.hub.reset_fresh();
        let outcome = self.stepper.synchronize(&self.hub).await?;
        let snapshot = self.hub.snapshot();
        if let Some(fault) = snapshot.fault.clone() {
            return Err(fault);
        }
        if let StepOutcome::Cancelled { iterations } = outcome {
            debug!(iterations, "returning partial observation after cancellation");
        }

        let state = &snapshot.state;
        let goal = goal_in_robot_frame(&state.subgoal, &state.robot_pose);
        let scan = fit_scan(&state.scan.ranges, self.num_beams, self.lidar_range)?;
        let vector = self.layout.assemble(&ObservationInputs {
            scan: &scan,
            robot: &state.robot_pose,
            subgoal: &state.subgoal,
            goal_in_robot_frame: goal,
            last_reward: self.last_reward,
        });
        debug_assert_eq!(vector.len(), self.bounds.len());

        let obs = Observation {
            vector,
            aux: ObservationDict {
                laser_scan: scan,
                goal_in_robot_frame: goal,
                synced: snapshot.fresh,
                sync_iterations: outcome.iterations(),
                stamp: state.stamp,
            },
        };
        debug!(
            rho = goal.0,
            theta = goal.1,
            synced = snapshot.fresh,
            iterations = outcome.iterations(),
            "observation ready"
        );
        Ok((obs, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_types::{
        Header, LaserScan, Pose3D, PoseStamped, Quaternion, RobotState, RobotStateStamped,
        SensorMessage, Twist, Vector3,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Fuses one `(scan, state)` tuple into the hub per step.
    struct TupleWorld {
        hub: SensorHub,
        ranges: Vec<f32>,
        orientation: Quaternion,
        position: Vector3,
        stamp: Mutex<f64>,
    }

    impl TupleWorld {
        fn new(hub: SensorHub, ranges: Vec<f32>) -> Self {
            Self {
                hub,
                ranges,
                orientation: Quaternion::identity(),
                position: Vector3::new(0.0, 0.0, 0.0),
                stamp: Mutex::new(0.0),
            }
        }
    }

    #[async_trait]
    impl StepService for TupleWorld {
        async fn step_world(&self, _duration: Option<f64>) -> Result<(), ArenaError> {
            let stamp = {
                let mut s = self.stamp.lock();
                *s += 0.1;
                *s
            };
            self.hub.ingest(SensorMessage::Scan(LaserScan {
                header: Header::at(stamp),
                range_max: 10.0,
                ranges: self.ranges.clone(),
                ..LaserScan::default()
            }))?;
            self.hub.ingest(SensorMessage::RobotState(RobotStateStamped {
                header: Header::at(stamp + 0.01),
                state: RobotState {
                    pose: Pose3D {
                        position: self.position,
                        orientation: self.orientation,
                    },
                    twist: Twist::default(),
                },
            }))?;
            Ok(())
        }
    }

    fn three_beam_config() -> CollectorConfig {
        CollectorConfig {
            num_lidar_beams: 3,
            ..CollectorConfig::default()
        }
    }

    fn collector_with(world: TupleWorld, config: &CollectorConfig) -> ObservationCollector {
        let hub = world.hub.clone();
        let stepper = SimulationStepper::training(Arc::new(world), None, Some(50));
        ObservationCollector::new(config, hub, stepper).unwrap()
    }

    fn prime(hub: &SensorHub, command: Twist, goal: (f64, f64)) {
        hub.ingest(SensorMessage::CmdVel(command)).unwrap();
        hub.ingest(SensorMessage::Subgoal(PoseStamped {
            header: Header::at(0.0),
            pose: Pose3D {
                position: Vector3::new(goal.0, goal.1, 0.0),
                orientation: Quaternion::identity(),
            },
        }))
        .unwrap();
    }

    #[tokio::test]
    async fn builds_documented_observation() {
        let hub = SensorHub::new(0.05, 100);
        prime(&hub, Twist::planar(0.3, -0.2), (3.0, 4.0));
        let config = three_beam_config();
        let mut collector =
            collector_with(TupleWorld::new(hub, vec![1.0, f32::NAN, 3.0]), &config);
        collector.register_reward(2.0);

        let (obs, action) = collector.get_observation_and_action().await.unwrap();

        assert_eq!(obs.vector, vec![1.0, 10.0, 3.0, 0.0, 0.0, 0.0, 3.0, 4.0, 2.0]);
        assert_eq!(obs.aux.laser_scan, vec![1.0, 10.0, 3.0]);
        let (rho, theta) = obs.aux.goal_in_robot_frame;
        assert!((rho - 5.0).abs() < 1e-9);
        assert!((theta - 0.9273).abs() < 1e-4);
        assert!(obs.aux.synced);
        assert_eq!(obs.aux.sync_iterations, 1);
        assert_eq!(action, Action::new(0.3, -0.2));
        assert!(collector.observation_space().contains(&obs.vector));
    }

    #[tokio::test]
    async fn registered_reward_carries_forward() {
        let hub = SensorHub::new(0.05, 100);
        prime(&hub, Twist::default(), (1.0, 1.0));
        let mut collector = collector_with(TupleWorld::new(hub, vec![2.0; 3]), &three_beam_config());

        collector.register_reward(7.5);
        let first = collector.get_observation().await.unwrap();
        let second = collector.get_observation().await.unwrap();

        assert_eq!(first.vector.last(), Some(&7.5));
        assert_eq!(second.vector.last(), Some(&7.5));
        assert!(second.aux.stamp > first.aux.stamp);
    }

    #[tokio::test]
    async fn goal_polar_layout_matches_its_bounds() {
        let hub = SensorHub::new(0.05, 100);
        prime(&hub, Twist::default(), (3.0, 4.0));
        let config = CollectorConfig {
            layout: ObservationLayout::GoalPolar,
            ..three_beam_config()
        };
        let mut collector = collector_with(TupleWorld::new(hub, vec![1.0, 2.0, 3.0]), &config);

        let obs = collector.get_observation().await.unwrap();
        assert_eq!(obs.vector.len(), collector.observation_space().len());
        assert_eq!(obs.vector.len(), 5);
        assert!((obs.vector[3] - 5.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn degenerate_orientation_is_reported() {
        let hub = SensorHub::new(0.05, 100);
        prime(&hub, Twist::default(), (3.0, 4.0));
        let mut world = TupleWorld::new(hub, vec![1.0; 3]);
        world.orientation = Quaternion {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 0.0,
        };
        let mut collector = collector_with(world, &three_beam_config());

        let err = collector.get_observation().await.unwrap_err();
        assert!(matches!(err, ArenaError::MalformedPose(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn beam_count_mismatch_is_rejected() {
        let hub = SensorHub::new(0.05, 100);
        prime(&hub, Twist::default(), (3.0, 4.0));
        let mut collector = collector_with(TupleWorld::new(hub, vec![1.0; 5]), &three_beam_config());
        assert!(matches!(
            collector.get_observation().await,
            Err(ArenaError::InvalidScan(_))
        ));
    }

    #[tokio::test]
    async fn deployment_timeout_yields_best_effort_observation() {
        struct Silent;
        #[async_trait]
        impl PacingSignal for Silent {
            async fn wait_next_cycle(&mut self, _timeout: Duration) -> Result<bool, ArenaError> {
                Ok(false)
            }
        }

        let config = CollectorConfig {
            train_mode: false,
            pacing_timeout_ms: 1,
            ..three_beam_config()
        };
        let mut collector =
            ObservationCollector::from_config(&config, None, Some(Box::new(Silent))).unwrap();

        let obs = collector.get_observation().await.unwrap();
        assert!(!obs.aux.synced);
        assert_eq!(obs.aux.laser_scan, vec![10.0; 3]);
        assert_eq!(obs.vector.len(), 9);
    }

    #[tokio::test]
    async fn malformed_subgoal_falls_back_to_previous_goal() {
        let hub = SensorHub::new(0.05, 100);
        prime(&hub, Twist::default(), (3.0, 4.0));
        let bad = hub.ingest(SensorMessage::Subgoal(PoseStamped {
            header: Header::at(0.05),
            pose: Pose3D {
                position: Vector3::new(-8.0, 1.0, 0.0),
                orientation: Quaternion {
                    x: 0.0,
                    y: 0.0,
                    z: 0.0,
                    w: 0.0,
                },
            },
        }));
        assert!(matches!(bad, Err(ArenaError::MalformedPose(_))));
        let mut collector = collector_with(TupleWorld::new(hub, vec![1.0; 3]), &three_beam_config());

        for _ in 0..3 {
            let obs = collector.get_observation().await.unwrap();
            assert!(obs.aux.synced);
            let (rho, theta) = obs.aux.goal_in_robot_frame;
            assert!((rho - 5.0).abs() < 1e-9, "rho={rho}");
            assert!((theta - 0.9273).abs() < 1e-4, "theta={theta}");
        }
    }

    #[tokio::test]
    async fn cancelled_request_returns_partial_observation() {
        struct Dead;
        #[async_trait]
        impl StepService for Dead {
            async fn step_world(&self, _duration: Option<f64>) -> Result<(), ArenaError> {
                Ok(())
            }
        }

        let hub = SensorHub::new(0.05, 100);
        prime(&hub, Twist::default(), (3.0, 4.0));
        // No iteration ceiling: only the flag can end the request.
        let stepper = SimulationStepper::training(Arc::new(Dead), None, None);
        let mut collector = ObservationCollector::new(&three_beam_config(), hub, stepper).unwrap();
        let cancel = collector.stepper().cancellation_flag();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        let obs = tokio::time::timeout(Duration::from_secs(5), collector.get_observation())
            .await
            .expect("cancellation must end the request")
            .unwrap();
        assert!(!obs.aux.synced);
        assert!(obs.aux.sync_iterations > 0);
        assert_eq!(obs.vector.len(), collector.observation_space().len());
        assert_eq!(obs.aux.laser_scan, vec![10.0; 3]);
    }

    #[tokio::test]
    async fn collects_from_simulated_world_over_the_bus() {
        use arena_middleware::{EventBus, spawn_ingest};
        use arena_sim::{SimConfig, SimWorld};

        let bus = EventBus::default();
        let sim = Arc::new(SimWorld::new(
            bus.clone(),
            SimConfig {
                num_beams: 8,
                scan_period_ticks: 2,
                state_skew_secs: 0.01,
                ..SimConfig::default()
            },
        ));
        let config = CollectorConfig {
            num_lidar_beams: 8,
            ..CollectorConfig::default()
        };
        let service: Arc<dyn StepService> = sim.clone();
        let mut collector = ObservationCollector::from_config(&config, Some(service), None).unwrap();
        let _pump = spawn_ingest(&bus, collector.hub().clone());
        sim.publish_subgoal(3.0, 4.0, 0.0).unwrap();

        let first = collector.get_observation().await.unwrap();
        assert!(first.aux.synced);
        assert!(first.aux.sync_iterations >= 2, "scans arrive every other tick");
        let (rho, theta) = first.aux.goal_in_robot_frame;
        assert!((rho - 5.0).abs() < 1e-9);
        assert!((theta - 0.9273).abs() < 1e-4);
        assert!(collector.observation_space().contains(&first.vector));

        let second = collector.get_observation().await.unwrap();
        assert!(second.aux.stamp > first.aux.stamp);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = CollectorConfig {
            num_lidar_beams: 0,
            ..CollectorConfig::default()
        };
        let hub = SensorHub::new(0.05, 100);
        let stepper = SimulationStepper::training(Arc::new(TupleWorld::new(hub.clone(), vec![])), None, None);
        assert!(matches!(
            ObservationCollector::new(&config, hub, stepper),
            Err(ArenaError::Config(_))
        ));
    }
}
