//! Collector configuration – reads/writes a TOML file with `ARENA_*`
//! environment overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use arena_types::ArenaError;
use serde::{Deserialize, Serialize};

use crate::observation::ObservationLayout;

/// Tunables of one observation collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Beam count of the lidar; fixes the scan part of the observation.
    #[serde(default = "default_num_lidar_beams")]
    pub num_lidar_beams: usize,

    /// Maximum lidar range in metres; upper bound of every scan element.
    #[serde(default = "default_lidar_range")]
    pub lidar_range: f32,

    /// Step the simulator per observation (`true`) or wait on the
    /// deployment pacing signal (`false`).
    #[serde(default = "default_train_mode")]
    pub train_mode: bool,

    /// Synchronizer slop in seconds.
    #[serde(default = "default_slop_secs")]
    pub slop_secs: f64,

    /// Per-stream window of the synchronizer.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Step requests per observation before giving up; `0` never gives up.
    #[serde(default = "default_max_sync_iterations")]
    pub max_sync_iterations: usize,

    /// Requested advance per step request; `None` uses the simulator tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_size_secs: Option<f64>,

    /// How long a deployment observation waits for `next_cycle`.
    #[serde(default = "default_pacing_timeout_ms")]
    pub pacing_timeout_ms: u64,

    #[serde(default)]
    pub layout: ObservationLayout,
}

fn default_num_lidar_beams() -> usize {
    360
}
fn default_lidar_range() -> f32 {
    10.0
}
fn default_train_mode() -> bool {
    true
}
fn default_slop_secs() -> f64 {
    0.05
}
fn default_queue_size() -> usize {
    100
}
fn default_max_sync_iterations() -> usize {
    1000
}
fn default_pacing_timeout_ms() -> u64 {
    1000
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            num_lidar_beams: default_num_lidar_beams(),
            lidar_range: default_lidar_range(),
            train_mode: default_train_mode(),
            slop_secs: default_slop_secs(),
            queue_size: default_queue_size(),
            max_sync_iterations: default_max_sync_iterations(),
            step_size_secs: None,
            pacing_timeout_ms: default_pacing_timeout_ms(),
            layout: ObservationLayout::default(),
        }
    }
}

impl CollectorConfig {
    /// Parse a TOML document.  Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ArenaError> {
        toml::from_str(raw).map_err(|e| ArenaError::Config(format!("failed to parse config: {e}")))
    }

    /// Reject values no collector can run with.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.num_lidar_beams == 0 {
            return Err(ArenaError::Config("num_lidar_beams must be positive".to_string()));
        }
        if !(self.lidar_range.is_finite() && self.lidar_range > 0.0) {
            return Err(ArenaError::Config(format!(
                "lidar_range must be a positive number, got {}",
                self.lidar_range
            )));
        }
        if self.slop_secs.is_nan() || self.slop_secs < 0.0 {
            return Err(ArenaError::Config(format!(
                "slop_secs must not be negative, got {}",
                self.slop_secs
            )));
        }
        if self.queue_size == 0 {
            return Err(ArenaError::Config("queue_size must be positive".to_string()));
        }
        Ok(())
    }

    /// `None` when stepping is unbounded.
    pub fn iteration_ceiling(&self) -> Option<usize> {
        (self.max_sync_iterations > 0).then_some(self.max_sync_iterations)
    }

    pub fn pacing_timeout(&self) -> Duration {
        Duration::from_millis(self.pacing_timeout_ms)
    }
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<CollectorConfig>, ArenaError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        ArenaError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg = CollectorConfig::from_toml_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ARENA_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARENA_TRAIN_MODE` | `train_mode` (`true`/`false`/`1`/`0`) |
/// | `ARENA_NUM_LIDAR_BEAMS` | `num_lidar_beams` |
/// | `ARENA_LIDAR_RANGE` | `lidar_range` |
/// | `ARENA_SLOP_SECS` | `slop_secs` |
/// | `ARENA_MAX_SYNC_ITERATIONS` | `max_sync_iterations` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut CollectorConfig) {
    if let Some(mode) = env_parsed("ARENA_TRAIN_MODE", parse_flag) {
        cfg.train_mode = mode;
    }
    if let Some(beams) = env_parsed("ARENA_NUM_LIDAR_BEAMS", |v| v.parse().ok()) {
        cfg.num_lidar_beams = beams;
    }
    if let Some(range) = env_parsed("ARENA_LIDAR_RANGE", |v| v.parse().ok()) {
        cfg.lidar_range = range;
    }
    if let Some(slop) = env_parsed("ARENA_SLOP_SECS", |v| v.parse().ok()) {
        cfg.slop_secs = slop;
    }
    if let Some(max) = env_parsed("ARENA_MAX_SYNC_ITERATIONS", |v| v.parse().ok()) {
        cfg.max_sync_iterations = max;
    }
}

fn env_parsed<T>(var: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    std::env::var(var).ok().and_then(|v| parse(v.trim()))
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Write `cfg` to `path` as pretty TOML, creating parent directories.
pub fn save_to(cfg: &CollectorConfig, path: &Path) -> Result<(), ArenaError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ArenaError::Config(format!("failed to create config directory: {e}")))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| ArenaError::Serialization(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        ArenaError::Config(format!("failed to write config at {}: {e}", path.display()))
    })
}
