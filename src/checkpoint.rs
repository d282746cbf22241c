//! Checkpoint persistence and resume resolution.
//!
//! A checkpoint at step N is a set of sibling files in the run's output
//! directory: model and optimizer artifacts plus one data record holding the
//! run arguments and page-chunk queue. Artifacts are written before the data
//! record, and every file lands via write-then-rename, so a data record on
//! disk always refers to artifacts that exist in full.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::{RunArgs, RunOverrides, apply_overrides};
use crate::constants::checkpoint::{
    ARTIFACT_EXT, BITCODE_PREFIX, DATA_EXT, DATA_PREFIX, MODEL_PREFIX, OPTIMIZER_PREFIX,
    RECORD_VERSION, SPARSE_OPTIMIZER_PREFIX, STEP_WIDTH,
};
use crate::errors::CorpusError;
use crate::types::{GlobalStep, PageChunk};

/// Lifecycle of one training run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainState {
    /// Created but no step taken yet.
    Fresh,
    /// Stepping normally.
    Running,
    /// A checkpoint was just written.
    Snapshotted,
    /// Restored from a checkpoint, not yet stepped.
    Resumed,
    /// Reached the configured step count.
    Completed,
}

/// Opaque model/optimizer payloads produced by one training step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepArtifacts {
    /// Serialized model weights.
    pub model: Vec<u8>,
    /// Serialized optimizer state.
    pub optimizer: Vec<u8>,
    /// Serialized sparse-optimizer state, when the run uses one.
    pub sparse_optimizer: Option<Vec<u8>>,
}

/// The run-state record persisted alongside step artifacts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct CheckpointData {
    /// Full run configuration at checkpoint time.
    pub args: RunArgs,
    /// Steps completed.
    pub global_step: GlobalStep,
    /// Epochs completed.
    pub epoch: u32,
    /// Page chunks not yet consumed in the current epoch.
    pub page_chunks: Vec<PageChunk>,
}

/// Names, writes, and resolves checkpoints inside one output directory.
pub struct CheckpointManager {
    output_dir: PathBuf,
}

impl CheckpointManager {
    /// Bind to `output_dir`, creating it if needed.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    /// The bound output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the data record for `step`.
    pub fn data_path(&self, step: GlobalStep) -> PathBuf {
        self.step_file(DATA_PREFIX, step, DATA_EXT)
    }

    /// Path of the model artifact for `step`.
    pub fn model_path(&self, step: GlobalStep) -> PathBuf {
        self.step_file(MODEL_PREFIX, step, ARTIFACT_EXT)
    }

    /// Path of the optimizer artifact for `step`.
    pub fn optimizer_path(&self, step: GlobalStep) -> PathBuf {
        self.step_file(OPTIMIZER_PREFIX, step, ARTIFACT_EXT)
    }

    /// Path of the sparse-optimizer artifact for `step`.
    pub fn sparse_optimizer_path(&self, step: GlobalStep) -> PathBuf {
        self.step_file(SPARSE_OPTIMIZER_PREFIX, step, ARTIFACT_EXT)
    }

    fn step_file(&self, prefix: &str, step: GlobalStep, ext: &str) -> PathBuf {
        self.output_dir
            .join(format!("{prefix}{step:0width$}.{ext}", width = STEP_WIDTH))
    }

    /// Write a full checkpoint for `data.global_step`.
    ///
    /// Artifact files are committed before the data record; if the process
    /// dies mid-save, no data record points at a missing artifact.
    pub fn save(
        &self,
        data: &CheckpointData,
        artifacts: &StepArtifacts,
    ) -> Result<(), CorpusError> {
        let step = data.global_step;
        self.write_atomic(&self.model_path(step), &artifacts.model)?;
        self.write_atomic(&self.optimizer_path(step), &artifacts.optimizer)?;
        if let Some(sparse) = &artifacts.sparse_optimizer {
            self.write_atomic(&self.sparse_optimizer_path(step), sparse)?;
        }

        let raw = bitcode::encode(data);
        let mut blob = Vec::with_capacity(2 + raw.len());
        blob.push(BITCODE_PREFIX);
        blob.push(RECORD_VERSION);
        blob.extend_from_slice(&raw);
        self.write_atomic(&self.data_path(step), &blob)?;
        info!(step, epoch = data.epoch, "checkpoint written");
        Ok(())
    }

    fn write_atomic(&self, path: &Path, payload: &[u8]) -> Result<(), CorpusError> {
        let mut tmp = NamedTempFile::new_in(&self.output_dir)?;
        tmp.write_all(payload)?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Highest step with a data record on disk, if any.
    ///
    /// Steps are zero-padded to a fixed width, so the lexically greatest
    /// data filename is also the numerically latest checkpoint.
    pub fn latest_step(&self) -> Result<Option<GlobalStep>, CorpusError> {
        let suffix = format!(".{DATA_EXT}");
        let mut latest = None;
        for entry in fs::read_dir(&self.output_dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(middle) = name
                .strip_prefix(DATA_PREFIX)
                .and_then(|rest| rest.strip_suffix(&suffix))
                && let Ok(step) = middle.parse::<GlobalStep>()
            {
                latest = latest.max(Some(step));
            }
        }
        Ok(latest)
    }

    /// Load the checkpoint at `step`, or the latest one when `step` is unset.
    ///
    /// The stored arguments are patched to continue from the checkpoint
    /// (step, epoch, artifact file paths) and `overrides` are applied last,
    /// so explicit overrides beat everything stored.
    pub fn resume(
        &self,
        step: Option<GlobalStep>,
        overrides: &RunOverrides,
    ) -> Result<CheckpointData, CorpusError> {
        let resolved = match step {
            Some(step) => Some(step),
            None => self.latest_step()?,
        };
        let Some(resolved) = resolved else {
            return Err(CorpusError::CheckpointNotFound {
                output_dir: self.output_dir.clone(),
                step,
            });
        };

        let data_path = self.data_path(resolved);
        if !data_path.exists() {
            return Err(CorpusError::CheckpointNotFound {
                output_dir: self.output_dir.clone(),
                step,
            });
        }
        let mut data = self.read_data(resolved, &data_path)?;

        let model_path = self.model_path(resolved);
        let optimizer_path = self.optimizer_path(resolved);
        for required in [&model_path, &optimizer_path] {
            if !required.exists() {
                return Err(CorpusError::CheckpointCorrupt {
                    step: resolved,
                    path: required.clone(),
                });
            }
        }
        let sparse_path = self.sparse_optimizer_path(resolved);

        data.args.global_step = data.global_step;
        data.args.epoch = data.epoch;
        data.args.output_dir = self.output_dir.to_string_lossy().into_owned();
        data.args.model_file = Some(model_path.to_string_lossy().into_owned());
        data.args.optimizer_file = Some(optimizer_path.to_string_lossy().into_owned());
        data.args.sparse_optimizer_file = sparse_path
            .exists()
            .then(|| sparse_path.to_string_lossy().into_owned());
        apply_overrides(&mut data.args, overrides);

        debug!(
            step = resolved,
            epoch = data.epoch,
            chunks_left = data.page_chunks.len(),
            "checkpoint resolved"
        );
        Ok(data)
    }

    fn read_data(&self, step: GlobalStep, path: &Path) -> Result<CheckpointData, CorpusError> {
        let corrupt = || CorpusError::CheckpointCorrupt {
            step,
            path: path.to_path_buf(),
        };
        let blob = fs::read(path)?;
        if blob.len() < 2 || blob[0] != BITCODE_PREFIX || blob[1] != RECORD_VERSION {
            return Err(corrupt());
        }
        bitcode::decode(&blob[2..]).map_err(|_| corrupt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommonTrainingOpts, MaskedLmOpts};
    use clap::Parser;
    use tempfile::tempdir;

    #[derive(Parser)]
    struct DefaultOpts {
        #[command(flatten)]
        common: CommonTrainingOpts,
        #[command(flatten)]
        masked_lm: MaskedLmOpts,
    }

    fn args(output_dir: &Path) -> RunArgs {
        let defaults = DefaultOpts::parse_from(["test"]);
        RunArgs {
            corpus_data_dir: "corpus".to_string(),
            entity_vocab_file: "vocab.txt".to_string(),
            output_dir: output_dir.to_string_lossy().into_owned(),
            log_dir: "log".to_string(),
            mmap: false,
            single_sentence: false,
            single_token_per_mention: false,
            allocate_gpu_for_optimizer: false,
            model_file: None,
            optimizer_file: None,
            sparse_optimizer_file: None,
            global_step: 0,
            epoch: 0,
            common: defaults.common,
            masked_lm: defaults.masked_lm,
            e2e: None,
        }
    }

    fn data(output_dir: &Path, step: GlobalStep) -> CheckpointData {
        CheckpointData {
            args: args(output_dir),
            global_step: step,
            epoch: 1,
            page_chunks: vec![vec!["Paris".to_string()], vec!["Berlin".to_string()]],
        }
    }

    fn artifacts(sparse: bool) -> StepArtifacts {
        StepArtifacts {
            model: b"model".to_vec(),
            optimizer: b"optimizer".to_vec(),
            sparse_optimizer: sparse.then(|| b"sparse".to_vec()),
        }
    }

    #[test]
    fn step_paths_are_zero_padded() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        assert!(
            manager
                .data_path(42)
                .ends_with("data_step0000042.pkl")
        );
        assert!(
            manager
                .model_path(42)
                .ends_with("model_step0000042.bin")
        );
    }

    #[test]
    fn save_then_resume_round_trips_the_run_state() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        manager
            .save(&data(dir.path(), 5_000), &artifacts(true))
            .expect("save");

        let resumed = manager.resume(None, &RunOverrides::default()).expect("resume");
        assert_eq!(resumed.global_step, 5_000);
        assert_eq!(resumed.epoch, 1);
        assert_eq!(resumed.page_chunks.len(), 2);
        assert_eq!(resumed.args.global_step, 5_000);
        assert_eq!(
            resumed.args.model_file.as_deref(),
            manager.model_path(5_000).to_str()
        );
        assert!(resumed.args.sparse_optimizer_file.is_some());
    }

    #[test]
    fn resume_picks_the_numerically_latest_step() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        for step in [7, 700, 70] {
            manager
                .save(&data(dir.path(), step), &artifacts(false))
                .expect("save");
        }
        assert_eq!(manager.latest_step().expect("latest"), Some(700));
        let resumed = manager.resume(None, &RunOverrides::default()).expect("resume");
        assert_eq!(resumed.global_step, 700);
    }

    #[test]
    fn explicit_step_beats_latest() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        for step in [10, 20] {
            manager
                .save(&data(dir.path(), step), &artifacts(false))
                .expect("save");
        }
        let resumed = manager
            .resume(Some(10), &RunOverrides::default())
            .expect("resume");
        assert_eq!(resumed.global_step, 10);
    }

    #[test]
    fn overrides_apply_after_checkpoint_state() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        manager
            .save(&data(dir.path(), 100), &artifacts(false))
            .expect("save");
        let overrides = RunOverrides {
            batch_size: Some(128),
            ..RunOverrides::default()
        };
        let resumed = manager.resume(None, &overrides).expect("resume");
        assert_eq!(resumed.args.common.batch_size, 128);
        assert_eq!(resumed.args.common.learning_rate, 1e-4);
    }

    #[test]
    fn empty_directory_reports_not_found() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        assert!(matches!(
            manager.resume(None, &RunOverrides::default()),
            Err(CorpusError::CheckpointNotFound { .. })
        ));
        assert!(matches!(
            manager.resume(Some(99), &RunOverrides::default()),
            Err(CorpusError::CheckpointNotFound { .. })
        ));
    }

    #[test]
    fn missing_artifacts_are_corruption_not_absence() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        manager
            .save(&data(dir.path(), 50), &artifacts(false))
            .expect("save");
        fs::remove_file(manager.optimizer_path(50)).expect("remove");
        assert!(matches!(
            manager.resume(Some(50), &RunOverrides::default()),
            Err(CorpusError::CheckpointCorrupt { step: 50, .. })
        ));
    }

    #[test]
    fn missing_sparse_optimizer_is_fine() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        manager
            .save(&data(dir.path(), 60), &artifacts(false))
            .expect("save");
        let resumed = manager
            .resume(Some(60), &RunOverrides::default())
            .expect("resume");
        assert_eq!(resumed.args.sparse_optimizer_file, None);
    }

    #[test]
    fn garbage_data_record_reports_corruption() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        manager
            .save(&data(dir.path(), 70), &artifacts(false))
            .expect("save");
        fs::write(manager.data_path(70), b"garbage").expect("write");
        assert!(matches!(
            manager.resume(Some(70), &RunOverrides::default()),
            Err(CorpusError::CheckpointCorrupt { step: 70, .. })
        ));
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let dir = tempdir().expect("tempdir");
        let manager = CheckpointManager::new(dir.path()).expect("manager");
        manager
            .save(&data(dir.path(), 80), &artifacts(true))
            .expect("save");
        let extras: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with("data_step") && !name.ends_with(".bin"))
            .collect();
        assert!(extras.is_empty(), "unexpected files: {extras:?}");
    }
}
