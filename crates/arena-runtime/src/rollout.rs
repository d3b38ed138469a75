//! JSON-lines rollout log: one `(observation, aux, action, reward)` record
//! per decision step, for imitation-style datasets.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use arena_types::ArenaError;
use serde::{Deserialize, Serialize};

use crate::observation::{Action, Observation, ObservationDict};

/// One line of the rollout log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutRecord {
    pub step: u64,
    pub observation: Vec<f32>,
    pub aux: ObservationDict,
    /// Command velocity synchronized with `observation`.
    pub action: Action,
    /// Reward registered when the observation was taken.
    pub reward: f32,
}

impl RolloutRecord {
    pub fn new(step: u64, observation: &Observation, action: Action, reward: f32) -> Self {
        Self {
            step,
            observation: observation.vector.clone(),
            aux: observation.aux.clone(),
            action,
            reward,
        }
    }
}

/// Appends [`RolloutRecord`]s to a file.
pub struct RolloutRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl RolloutRecorder {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArenaError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(&path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn record(&mut self, record: &RolloutRecord) -> Result<(), ArenaError> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| ArenaError::Serialization(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| io_error(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ArenaError> {
        self.writer.flush().map_err(|e| io_error(&self.path, e))
    }

    /// Records written through this recorder.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every record back from a rollout log.  Blank lines are skipped.
pub fn read_rollout(path: impl AsRef<Path>) -> Result<Vec<RolloutRecord>, ArenaError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_error(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            ArenaError::Serialization(format!("{}:{}: {e}", path.display(), lineno + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}

fn io_error(path: &Path, e: std::io::Error) -> ArenaError {
    ArenaError::Serialization(format!("rollout log {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(stamp: f64) -> Observation {
        Observation {
            vector: vec![1.0, 2.0, 0.5],
            aux: ObservationDict {
                laser_scan: vec![1.0],
                goal_in_robot_frame: (5.0, 0.9273),
                synced: true,
                sync_iterations: 2,
                stamp,
            },
        }
    }

    #[test]
    fn records_append_across_recorders() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("runs").join("rollout.jsonl");

        let mut first = RolloutRecorder::open(&path).unwrap();
        first
            .record(&RolloutRecord::new(0, &observation(0.1), Action::new(0.2, 0.0), 0.0))
            .unwrap();
        first.flush().unwrap();
        drop(first);

        let mut second = RolloutRecorder::open(&path).unwrap();
        second
            .record(&RolloutRecord::new(1, &observation(0.2), Action::new(0.3, -0.1), 7.5))
            .unwrap();
        second.flush().unwrap();
        assert_eq!(second.written(), 1);

        let records = read_rollout(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].step, 0);
        assert_eq!(records[1].action, Action::new(0.3, -0.1));
        assert_eq!(records[1].reward, 7.5);
        assert_eq!(records[1].aux.stamp, 0.2);
    }

    #[test]
    fn corrupt_line_reports_position() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("rollout.jsonl");
        std::fs::write(&path, "\n{not json}\n").unwrap();
        let err = read_rollout(&path).unwrap_err();
        match err {
            ArenaError::Serialization(msg) => assert!(msg.contains(":2:"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
