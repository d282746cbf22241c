//! Training loop driver: page-chunk queue, step counting, checkpoints.
//!
//! The trainer owns run progression only; what a "step" computes lives
//! behind [`TrainBackend`]. Page chunks are consumed front to back, the
//! queue refills (with an epoch increment) when it runs dry, and the
//! remaining queue is persisted with every checkpoint so a resumed run
//! picks up mid-epoch exactly where it stopped.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::checkpoint::{CheckpointData, CheckpointManager, StepArtifacts, TrainState};
use crate::config::{RunArgs, RunOverrides};
use crate::corpus::WikiCorpus;
use crate::errors::CorpusError;
use crate::pool::partition_count;
use crate::types::{GlobalStep, PageChunk, PageTitle};

/// Computes one optimization step over one page chunk.
pub trait TrainBackend {
    /// Run the step and return the artifacts a checkpoint would persist.
    fn run_step(
        &mut self,
        args: &RunArgs,
        chunk: &PageChunk,
        step: GlobalStep,
    ) -> Result<StepArtifacts, CorpusError>;
}

/// Backend that produces deterministic placeholder artifacts.
///
/// Stands in where no accelerator is wired up; keeps the run loop and
/// checkpoint machinery fully exercisable.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBackend {
    /// Emit a sparse-optimizer artifact alongside the dense one.
    pub with_sparse: bool,
}

impl TrainBackend for NullBackend {
    fn run_step(
        &mut self,
        _args: &RunArgs,
        chunk: &PageChunk,
        step: GlobalStep,
    ) -> Result<StepArtifacts, CorpusError> {
        let tag = format!("step={step} pages={}", chunk.len());
        Ok(StepArtifacts {
            model: format!("model {tag}").into_bytes(),
            optimizer: format!("optimizer {tag}").into_bytes(),
            sparse_optimizer: self
                .with_sparse
                .then(|| format!("sparse {tag}").into_bytes()),
        })
    }
}

/// Drives one training run to its configured step count.
pub struct Trainer<B: TrainBackend> {
    args: RunArgs,
    titles: Vec<PageTitle>,
    queue: VecDeque<PageChunk>,
    global_step: GlobalStep,
    epoch: u32,
    state: TrainState,
    manager: CheckpointManager,
    backend: B,
}

impl<B: TrainBackend> Trainer<B> {
    /// Start a fresh run from step zero.
    pub fn fresh(args: RunArgs, backend: B) -> Result<Self, CorpusError> {
        let manager = CheckpointManager::new(&args.output_dir)?;
        let titles = corpus_titles(&args)?;
        let queue = chunk_queue(&titles, args.common.num_page_chunks);
        Ok(Self {
            global_step: args.global_step,
            epoch: args.epoch,
            args,
            titles,
            queue,
            state: TrainState::Fresh,
            manager,
            backend,
        })
    }

    /// Restore a run from a resolved checkpoint.
    pub fn from_checkpoint(data: CheckpointData, backend: B) -> Result<Self, CorpusError> {
        let manager = CheckpointManager::new(&data.args.output_dir)?;
        let titles = corpus_titles(&data.args)?;
        Ok(Self {
            args: data.args,
            titles,
            queue: data.page_chunks.into(),
            global_step: data.global_step,
            epoch: data.epoch,
            state: TrainState::Resumed,
            manager,
            backend,
        })
    }

    /// Resolve a checkpoint in `output_dir` and restore from it.
    pub fn resume(
        output_dir: &str,
        step: Option<GlobalStep>,
        overrides: &RunOverrides,
        backend: B,
    ) -> Result<Self, CorpusError> {
        let manager = CheckpointManager::new(output_dir)?;
        let data = manager.resume(step, overrides)?;
        Self::from_checkpoint(data, backend)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrainState {
        self.state
    }

    /// Steps completed so far.
    pub fn global_step(&self) -> GlobalStep {
        self.global_step
    }

    /// Epochs completed so far.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Page chunks left in the current epoch.
    pub fn chunks_left(&self) -> usize {
        self.queue.len()
    }

    /// Run until `num_train_steps`, checkpointing every `save_every` steps
    /// and once more at the end.
    pub fn run(&mut self) -> Result<(), CorpusError> {
        let target = self.args.common.num_train_steps;
        let save_every = self.args.common.save_every.max(1);
        info!(
            start_step = self.global_step,
            target, epoch = self.epoch, "training run started"
        );

        while self.global_step < target {
            let chunk = self.next_chunk();
            let step = self.global_step + 1;
            let artifacts = self.backend.run_step(&self.args, &chunk, step)?;
            self.global_step = step;
            self.state = TrainState::Running;
            debug!(step, chunks_left = self.queue.len(), "step complete");

            if step % save_every == 0 || step == target {
                self.save(&artifacts)?;
                self.state = TrainState::Snapshotted;
            }
        }

        self.state = TrainState::Completed;
        info!(step = self.global_step, epoch = self.epoch, "training run completed");
        Ok(())
    }

    fn next_chunk(&mut self) -> PageChunk {
        if self.queue.is_empty() {
            self.epoch += 1;
            self.queue = chunk_queue(&self.titles, self.args.common.num_page_chunks);
            debug!(epoch = self.epoch, chunks = self.queue.len(), "epoch advanced");
        }
        // chunk_queue never yields an empty queue for a non-empty corpus
        self.queue.pop_front().unwrap_or_default()
    }

    fn save(&mut self, artifacts: &StepArtifacts) -> Result<(), CorpusError> {
        self.args.global_step = self.global_step;
        self.args.epoch = self.epoch;
        let data = CheckpointData {
            args: self.args.clone(),
            global_step: self.global_step,
            epoch: self.epoch,
            page_chunks: self.queue.iter().cloned().collect(),
        };
        self.manager.save(&data, artifacts)
    }
}

fn corpus_titles(args: &RunArgs) -> Result<Vec<PageTitle>, CorpusError> {
    let corpus = WikiCorpus::open(args.corpus_data_dir.as_str())?;
    let mut titles = Vec::new();
    for record in corpus.records()? {
        titles.push(record.title);
    }
    Ok(titles)
}

fn chunk_queue(titles: &[PageTitle], num_page_chunks: usize) -> VecDeque<PageChunk> {
    partition_count(titles.to_vec(), num_page_chunks).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommonTrainingOpts, MaskedLmOpts};
    use crate::constants::corpus::{BITCODE_PREFIX, RECORD_VERSION};
    use crate::corpus::{CorpusRecord, shard_path};
    use clap::Parser;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    #[derive(Parser)]
    struct DefaultOpts {
        #[command(flatten)]
        common: CommonTrainingOpts,
        #[command(flatten)]
        masked_lm: MaskedLmOpts,
    }

    fn write_corpus(dir: &Path, titles: &[&str]) {
        let records: Vec<CorpusRecord> = titles
            .iter()
            .map(|title| CorpusRecord {
                title: (*title).to_string(),
                token_ids: vec![1, 2, 3],
                links: Vec::new(),
                sentence_offsets: vec![0],
            })
            .collect();
        let raw = bitcode::encode(&records);
        let mut blob = vec![BITCODE_PREFIX, RECORD_VERSION];
        blob.extend_from_slice(&raw);
        fs::write(shard_path(dir, 0), blob).expect("write shard");
    }

    fn args(corpus_dir: &Path, output_dir: &Path, steps: u64, save_every: u64) -> RunArgs {
        let defaults = DefaultOpts::parse_from(["test"]);
        let mut common = defaults.common;
        common.num_train_steps = steps;
        common.save_every = save_every;
        common.num_page_chunks = 2;
        RunArgs {
            corpus_data_dir: corpus_dir.to_string_lossy().into_owned(),
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
            common,
            masked_lm: defaults.masked_lm,
            e2e: None,
        }
    }

    #[test]
    fn fresh_run_reaches_target_and_checkpoints() {
        let corpus_dir = tempdir().expect("tempdir");
        let out_dir = tempdir().expect("tempdir");
        write_corpus(corpus_dir.path(), &["A", "B", "C", "D"]);

        let mut trainer = Trainer::fresh(
            args(corpus_dir.path(), out_dir.path(), 6, 2),
            NullBackend::default(),
        )
        .expect("fresh");
        assert_eq!(trainer.state(), TrainState::Fresh);
        trainer.run().expect("run");

        assert_eq!(trainer.state(), TrainState::Completed);
        assert_eq!(trainer.global_step(), 6);
        // 2 chunks per epoch, 6 steps: the queue refills twice
        assert_eq!(trainer.epoch(), 2);
        let manager = CheckpointManager::new(out_dir.path()).expect("manager");
        assert_eq!(manager.latest_step().expect("latest"), Some(6));
        assert!(manager.data_path(2).exists());
        assert!(manager.data_path(4).exists());
    }

    #[test]
    fn resumed_run_continues_from_saved_state() {
        let corpus_dir = tempdir().expect("tempdir");
        let out_dir = tempdir().expect("tempdir");
        write_corpus(corpus_dir.path(), &["A", "B", "C", "D"]);

        let mut first = Trainer::fresh(
            args(corpus_dir.path(), out_dir.path(), 4, 2),
            NullBackend::default(),
        )
        .expect("fresh");
        first.run().expect("run");

        let out = out_dir.path().to_string_lossy().into_owned();
        let mut resumed = Trainer::resume(
            &out,
            None,
            &RunOverrides {
                num_train_steps: Some(8),
                ..RunOverrides::default()
            },
            NullBackend::default(),
        )
        .expect("resume");
        assert_eq!(resumed.state(), TrainState::Resumed);
        assert_eq!(resumed.global_step(), 4);
        resumed.run().expect("run");
        assert_eq!(resumed.global_step(), 8);
        let manager = CheckpointManager::new(out_dir.path()).expect("manager");
        assert_eq!(manager.latest_step().expect("latest"), Some(8));
    }

    #[test]
    fn final_checkpoint_lands_even_off_interval() {
        let corpus_dir = tempdir().expect("tempdir");
        let out_dir = tempdir().expect("tempdir");
        write_corpus(corpus_dir.path(), &["A", "B"]);

        let mut trainer = Trainer::fresh(
            args(corpus_dir.path(), out_dir.path(), 5, 3),
            NullBackend::default(),
        )
        .expect("fresh");
        trainer.run().expect("run");
        let manager = CheckpointManager::new(out_dir.path()).expect("manager");
        assert!(manager.data_path(3).exists());
        assert!(manager.data_path(5).exists());
    }

    #[test]
    fn sparse_backend_persists_sparse_artifacts() {
        let corpus_dir = tempdir().expect("tempdir");
        let out_dir = tempdir().expect("tempdir");
        write_corpus(corpus_dir.path(), &["A", "B"]);

        let mut trainer = Trainer::fresh(
            args(corpus_dir.path(), out_dir.path(), 2, 2),
            NullBackend { with_sparse: true },
        )
        .expect("fresh");
        trainer.run().expect("run");
        let manager = CheckpointManager::new(out_dir.path()).expect("manager");
        assert!(manager.sparse_optimizer_path(2).exists());
        let resumed = manager.resume(None, &RunOverrides::default()).expect("resume");
        assert!(resumed.args.sparse_optimizer_file.is_some());
    }
}
