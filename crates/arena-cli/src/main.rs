//! `arena-collector` – runs the observation collector against the in-process
//! simulator.
//!
//! 1. Loads `~/.arena/collector.toml` (or the path in `ARENA_CONFIG`) with
//!    `ARENA_*` overrides; falls back to defaults when the file is absent.
//! 2. Wires bus, simulator, ingest pump, collector and a goal-seeking agent.
//! 3. Collects `ARENA_OBSERVATIONS` observations (default 100), optionally
//!    logging them to the JSON-lines file in `ARENA_ROLLOUT`.
//! 4. Ctrl-C raises the cancellation flag; the current request returns a
//!    partial observation and the loop stops.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use tracing::{debug, info, warn};

use arena_middleware::{BusPacing, EventBus, PacingSignal, StepService, spawn_ingest};
use arena_perception::SensorHub;
use arena_runtime::config::{apply_env_overrides, load_from};
use arena_runtime::telemetry::init_tracing;
use arena_runtime::{
    AgentLoop, AgentLoopConfig, CollectorConfig, GoalSeekingPolicy, ObservationCollector,
    RolloutRecorder, SimulationStepper,
};
use arena_sim::{SimConfig, SimWorld};
use arena_types::ArenaError;

const DEFAULT_OBSERVATIONS: u64 = 100;
/// Pacing period of the simulated deployment clock.
const PACER_PERIOD: Duration = Duration::from_millis(100);
const SUBGOAL: (f64, f64) = (4.0, 3.0);

fn main() -> ExitCode {
    let _telemetry = init_tracing("arena-collector");
    print_banner();

    // ── Shared cancellation flag ──────────────────────────────────────────
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_handler = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after the current observation …".yellow().bold());
        cancel_handler.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will terminate immediately");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let path = config_path();
    let cfg = match resolve_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "  {} mode, {} beams, slop {} s",
        if cfg.train_mode { "training".bold() } else { "deployment".bold() },
        cfg.num_lidar_beams,
        cfg.slop_secs
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start Tokio runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let observations = env_count("ARENA_OBSERVATIONS").unwrap_or(DEFAULT_OBSERVATIONS);
    let rollout = std::env::var("ARENA_ROLLOUT").ok().map(PathBuf::from);
    match runtime.block_on(run(cfg, observations, rollout, cancel)) {
        Ok(summary) => {
            println!();
            println!(
                "  {} {} observation(s), {} skipped, robot at ({:.2}, {:.2}) after {} sim step(s)",
                "✓".green().bold(),
                summary.cycles,
                summary.skipped,
                summary.final_x,
                summary.final_y,
                summary.sim_steps
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Collector failed".red(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

struct Summary {
    cycles: u64,
    skipped: u64,
    sim_steps: u64,
    final_x: f64,
    final_y: f64,
}

async fn run(
    cfg: CollectorConfig,
    observations: u64,
    rollout: Option<PathBuf>,
    cancel: Arc<AtomicBool>,
) -> Result<Summary, ArenaError> {
    let bus = EventBus::default();
    let sim = Arc::new(SimWorld::new(
        bus.clone(),
        SimConfig {
            num_beams: cfg.num_lidar_beams,
            range_max: cfg.lidar_range,
            ..SimConfig::default()
        },
    ));

    let pacing: Option<Box<dyn PacingSignal>> = if cfg.train_mode {
        None
    } else {
        Some(Box::new(BusPacing::new(&bus)))
    };
    let service: Arc<dyn StepService> = sim.clone();
    let stepper = SimulationStepper::from_config(&cfg, Some(service), pacing)?
        .with_cancellation(Arc::clone(&cancel));
    let hub = SensorHub::new(cfg.slop_secs, cfg.queue_size);
    let collector = ObservationCollector::new(&cfg, hub.clone(), stepper)?;
    let pump = spawn_ingest(&bus, hub);

    // Deployment: the world runs on its own clock and announces each cycle.
    let pacer = (!cfg.train_mode).then(|| {
        let sim = Arc::clone(&sim);
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PACER_PERIOD);
            while !cancel.load(Ordering::SeqCst) {
                interval.tick().await;
                if let Err(e) = sim.step_world(None).await {
                    debug!(error = %e, "pacer step failed");
                }
                if let Err(e) = sim.publish_next_cycle() {
                    debug!(error = %e, "next_cycle publish failed");
                }
            }
        })
    });

    sim.publish_subgoal(SUBGOAL.0, SUBGOAL.1, 0.0)?;
    info!(x = SUBGOAL.0, y = SUBGOAL.1, "subgoal published");

    let mut agent = AgentLoop::new(
        collector,
        GoalSeekingPolicy::default(),
        bus.clone(),
        AgentLoopConfig {
            max_cycles: Some(observations),
            source: "arena-cli::agent".to_string(),
        },
    );
    if let Some(path) = rollout {
        info!(path = %path.display(), "recording rollout");
        agent = agent.with_recorder(RolloutRecorder::open(path)?);
    }

    let result = agent.run().await;

    cancel.store(true, Ordering::SeqCst);
    if let Some(pacer) = pacer {
        pacer.abort();
    }
    pump.abort();

    let cycles = result?;
    let pose = sim.pose();
    info!(
        cycles,
        transport_failures = agent.collector().stepper().transport_failures(),
        "session finished"
    );
    Ok(Summary {
        cycles,
        skipped: agent.skipped(),
        sim_steps: sim.steps(),
        final_x: pose.x,
        final_y: pose.y,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `ARENA_CONFIG`, or `~/.arena/collector.toml`.
fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("ARENA_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".arena").join("collector.toml")
}

/// Load and validate the config at `path`, defaulting when it is absent.
fn resolve_config(path: &Path) -> Result<CollectorConfig, ArenaError> {
    let cfg = match load_from(path)? {
        Some(cfg) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        None => {
            println!("  {}", "No config file found; using defaults.".dimmed());
            let mut cfg = CollectorConfig::default();
            apply_env_overrides(&mut cfg);
            cfg
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

fn env_count(var: &str) -> Option<u64> {
    std::env::var(var).ok()?.trim().parse().ok()
}

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      Arena Observation Collector     ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!(
        "  {} {}",
        "arena-collector".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
}
