//! Epoch checkpoints: capture, JSON persistence, and latest-epoch resume

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bandit::ArmPolicy;
use crate::comm::Communicator;
use crate::gradient::{GradientAccumulator, GradientTriple};
use crate::schedule::{CurriculumScheduler, TrainingHistory};
use crate::validate::{BestSnapshots, ValidationSets};

/// Errors from checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no checkpoint for epoch {epoch} in {dir}")]
    NotFound { epoch: usize, dir: PathBuf },

    #[error("no checkpoints in {dir}")]
    Empty { dir: PathBuf },
}

/// Result alias for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Everything needed to resume a run at an epoch boundary
///
/// The bandit policy is persisted in a sidecar file keyed by the same
/// epoch, so callers can deserialize it into whichever policy type the
/// run was configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerCheckpoint {
    /// Epoch the capture closed
    pub epoch: usize,
    /// Steps taken across all epochs
    pub total_count: u64,
    /// Reward cadence in force when the capture was taken
    pub select_freq: usize,
    /// Full run history
    pub history: TrainingHistory,
    /// Per-arm gradient window, including the partially filled one
    #[serde(default)]
    pub accumulator: Option<GradientAccumulator>,
    /// Latest gradient per arm; the resume fallback for older payloads
    #[serde(default)]
    pub latest_gradients: Option<Vec<Option<GradientTriple>>>,
    /// Cumulative policy restarts at capture time
    #[serde(default)]
    pub num_restart: Option<u32>,
    /// Coordinator-held overall validation sets
    #[serde(default)]
    pub validation: Option<ValidationSets>,
    /// Historical best snapshots per task
    pub snapshots: BestSnapshots,
    /// Opaque serialized model weights
    pub model: Vec<u8>,
    /// Opaque serialized optimizer state
    pub optimizer: Vec<u8>,
}

impl TrainerCheckpoint {
    /// Capture a scheduler's state at an epoch boundary
    #[must_use]
    pub fn capture<P: ArmPolicy, C: Communicator>(
        sched: &CurriculumScheduler<P, C>,
        epoch: usize,
        model: Vec<u8>,
        optimizer: Vec<u8>,
        validation: Option<&ValidationSets>,
    ) -> Self {
        Self {
            epoch,
            total_count: sched.total_count(),
            select_freq: sched.select_freq(),
            history: sched.history().clone(),
            accumulator: Some(sched.accumulator().clone()),
            latest_gradients: Some(sched.accumulator().latest_snapshot()),
            num_restart: Some(sched.controller().restarts()),
            validation: validation.cloned(),
            snapshots: sched.snapshots().clone(),
            model,
            optimizer,
        }
    }
}

/// Directory of numbered epoch checkpoints
///
/// Each epoch writes `checkpoint-{epoch}.json` next to a
/// `bandit-{epoch}.json` holding the policy. Files go through a temp
/// name and rename, so a crash mid-write never leaves a torn checkpoint
/// where the latest-epoch scan would find it.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `dir`; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory the store writes into
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_name(epoch: usize) -> String {
        format!("checkpoint-{epoch}.json")
    }

    fn bandit_name(epoch: usize) -> String {
        format!("bandit-{epoch}.json")
    }

    /// Persist a checkpoint and its policy sidecar
    pub fn save<P: Serialize>(&self, checkpoint: &TrainerCheckpoint, policy: &P) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.write_json(&Self::checkpoint_name(checkpoint.epoch), checkpoint)?;
        self.write_json(&Self::bandit_name(checkpoint.epoch), policy)?;
        debug!(
            epoch = checkpoint.epoch,
            dir = %self.dir.display(),
            "Checkpoint written"
        );
        Ok(())
    }

    /// Load a checkpoint and its policy, an exact epoch or the latest
    pub fn load<P: DeserializeOwned>(
        &self,
        epoch: Option<usize>,
    ) -> Result<(TrainerCheckpoint, P)> {
        let epoch = match epoch {
            Some(epoch) => {
                if !self.dir.join(Self::checkpoint_name(epoch)).exists() {
                    return Err(CheckpointError::NotFound {
                        epoch,
                        dir: self.dir.clone(),
                    });
                }
                epoch
            }
            None => self.latest_epoch()?,
        };
        let checkpoint = self.read_json(&Self::checkpoint_name(epoch))?;
        let policy = self.read_json(&Self::bandit_name(epoch))?;
        Ok((checkpoint, policy))
    }

    /// Highest epoch with a checkpoint on disk
    pub fn latest_epoch(&self) -> Result<usize> {
        let mut latest = None;
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let parsed = name
                .strip_prefix("checkpoint-")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|num| num.parse::<usize>().ok());
            if let Some(epoch) = parsed {
                latest = Some(latest.map_or(epoch, |best: usize| best.max(epoch)));
            }
        }
        latest.ok_or_else(|| CheckpointError::Empty {
            dir: self.dir.clone(),
        })
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        let tmp = self.dir.join(format!("{name}.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.dir.join(name))?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let bytes = fs::read(self.dir.join(name))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::Thompson;
    use crate::comm::LocalComm;
    use crate::config::{BanditAlgorithm, CurriculumConfig};
    use crate::schedule::StepOutcome;
    use ndarray::array;
    use tempfile::tempdir;

    fn run_scheduler(steps: usize) -> CurriculumScheduler<Thompson, LocalComm> {
        let config = CurriculumConfig::new(vec![2])
            .with_algorithm(BanditAlgorithm::Thompson)
            .with_train_episodes(4)
            .with_train_batch_size(1)
            .with_select_freq(2)
            .with_seed(5);
        let policy = Thompson::new(config.nb_arms(), config.seed);
        let mut sched = CurriculumScheduler::new(config, policy, LocalComm::single()).unwrap();
        for _ in 0..steps {
            let choice = sched.next_arm().unwrap();
            let triple = crate::gradient::GradientTriple::new(
                array![1.0f32, 0.5],
                array![0.25f32],
                array![0.1f32],
            );
            sched
                .complete_step(StepOutcome::new(choice.arm, 0.5).with_gradients(triple))
                .unwrap();
        }
        sched
    }

    #[test]
    fn test_capture_reflects_scheduler_state() {
        let sched = run_scheduler(3);
        let checkpoint =
            TrainerCheckpoint::capture(&sched, 7, b"model".to_vec(), b"opt".to_vec(), None);

        assert_eq!(checkpoint.epoch, 7);
        assert_eq!(checkpoint.total_count, 3);
        assert_eq!(checkpoint.select_freq, 2);
        assert_eq!(checkpoint.history.choices().len(), 3);
        assert_eq!(checkpoint.num_restart, Some(0));
        assert!(checkpoint.accumulator.is_some());
        assert_eq!(checkpoint.model, b"model");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let sched = run_scheduler(4);
        let checkpoint =
            TrainerCheckpoint::capture(&sched, 2, b"m".to_vec(), b"o".to_vec(), None);

        store.save(&checkpoint, sched.controller().policy()).unwrap();
        let (loaded, policy): (TrainerCheckpoint, Thompson) = store.load(Some(2)).unwrap();

        assert_eq!(loaded, checkpoint);
        let saved_policy = serde_json::to_string(sched.controller().policy()).unwrap();
        assert_eq!(serde_json::to_string(&policy).unwrap(), saved_policy);
    }

    #[test]
    fn test_latest_epoch_scan() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let sched = run_scheduler(2);

        for epoch in [1, 5, 3] {
            let checkpoint =
                TrainerCheckpoint::capture(&sched, epoch, Vec::new(), Vec::new(), None);
            store.save(&checkpoint, sched.controller().policy()).unwrap();
        }

        assert_eq!(store.latest_epoch().unwrap(), 5);
        let (loaded, _): (TrainerCheckpoint, Thompson) = store.load(None).unwrap();
        assert_eq!(loaded.epoch, 5);
    }

    #[test]
    fn test_missing_epoch_is_not_found() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        fs::create_dir_all(store.dir()).unwrap();

        let result: Result<(TrainerCheckpoint, Thompson)> = store.load(Some(9));
        assert!(matches!(
            result,
            Err(CheckpointError::NotFound { epoch: 9, .. })
        ));
        assert!(matches!(
            store.latest_epoch(),
            Err(CheckpointError::Empty { .. })
        ));
    }

    #[test]
    fn test_temp_files_do_not_confuse_the_scan() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let sched = run_scheduler(1);
        let checkpoint = TrainerCheckpoint::capture(&sched, 4, Vec::new(), Vec::new(), None);
        store.save(&checkpoint, sched.controller().policy()).unwrap();

        fs::write(dir.path().join("checkpoint-9.json.tmp"), b"{").unwrap();
        assert_eq!(store.latest_epoch().unwrap(), 4);
    }

    #[test]
    fn test_older_payload_without_window_fields() {
        let sched = run_scheduler(2);
        let checkpoint =
            TrainerCheckpoint::capture(&sched, 1, Vec::new(), Vec::new(), None);

        let mut value = serde_json::to_value(&checkpoint).unwrap();
        let map = value.as_object_mut().unwrap();
        map.remove("accumulator");
        map.remove("latest_gradients");
        map.remove("num_restart");
        map.remove("validation");

        let back: TrainerCheckpoint = serde_json::from_value(value).unwrap();
        assert!(back.accumulator.is_none());
        assert!(back.latest_gradients.is_none());
        assert_eq!(back.total_count, 2);
    }

    #[test]
    fn test_restore_prefers_checkpoint_cadence() {
        let sched = run_scheduler(3);
        let mut checkpoint =
            TrainerCheckpoint::capture(&sched, 1, Vec::new(), Vec::new(), None);
        checkpoint.select_freq = 7;

        let config = sched.config().clone();
        let policy = Thompson::new(config.nb_arms(), 99);
        let restored =
            CurriculumScheduler::restore(config, policy, LocalComm::single(), &checkpoint)
                .unwrap();

        assert_eq!(restored.select_freq(), 7);
        assert_eq!(restored.total_count(), 3);
        assert_eq!(restored.history().choices(), sched.history().choices());
    }

    #[test]
    fn test_restore_falls_back_to_latest_gradients() {
        let sched = run_scheduler(3);
        let mut checkpoint =
            TrainerCheckpoint::capture(&sched, 1, Vec::new(), Vec::new(), None);
        let latest = checkpoint.latest_gradients.clone().unwrap();
        checkpoint.accumulator = None;

        let config = sched.config().clone();
        let policy = Thompson::new(config.nb_arms(), 99);
        let restored =
            CurriculumScheduler::restore(config, policy, LocalComm::single(), &checkpoint)
                .unwrap();

        // Fresh window: no pulls, but the latest gradients survive
        assert_eq!(restored.accumulator().pull_counts(), vec![0, 0]);
        for (arm, kept) in latest.iter().enumerate() {
            assert_eq!(restored.accumulator().latest(arm), kept.as_ref());
        }
    }
}
