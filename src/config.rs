//! Training run configuration.
//!
//! Option groups mirror the command line: the shared hyperparameters, the
//! masked-LM extras, and the end-to-end extras each live in their own
//! `clap` group so the run subcommands can flatten what they need. The
//! assembled [`RunArgs`] is what checkpoints persist and resumes patch.

use clap::{ArgAction, Args};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CorpusError;
use crate::types::GlobalStep;

/// Hyperparameters shared by every training mode.
#[derive(Clone, Debug, PartialEq, Args, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct CommonTrainingOpts {
    /// Examples per optimization batch.
    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,
    /// Micro-batches accumulated per optimizer step.
    #[arg(long, default_value_t = 1)]
    pub gradient_accumulation_steps: usize,
    /// Peak learning rate.
    #[arg(long, default_value_t = 1e-4)]
    pub learning_rate: f64,
    /// Decay the learning rate over training.
    #[arg(long)]
    pub lr_decay: bool,
    /// Linear warmup steps before the peak learning rate.
    #[arg(long, default_value_t = 10_000)]
    pub warmup_steps: u64,
    /// Maximum word tokens per sequence.
    #[arg(long, default_value_t = 512)]
    pub max_seq_length: usize,
    /// Maximum entities per sequence.
    #[arg(long, default_value_t = 128)]
    pub max_entity_length: usize,
    /// Maximum mention length in word tokens.
    #[arg(long, default_value_t = 100)]
    pub max_mention_length: usize,
    /// Probability of sampling a shortened sequence.
    #[arg(long, default_value_t = 0.1)]
    pub short_seq_prob: f64,
    /// Word masking probability.
    #[arg(long, default_value_t = 0.15)]
    pub masked_lm_prob: f64,
    /// Cap on masked word predictions per sequence.
    #[arg(long, default_value_t = 77)]
    pub max_predictions_per_seq: usize,
    /// Total optimization steps.
    #[arg(long, default_value_t = 300_000)]
    pub num_train_steps: u64,
    /// Page chunks per epoch; the unit of shuffling and checkpoint state.
    #[arg(long, default_value_t = 100)]
    pub num_page_chunks: usize,
    /// Checkpoint interval in steps.
    #[arg(long, default_value_t = 5_000)]
    pub save_every: u64,
    /// Entity embedding width.
    #[arg(long, default_value_t = 768)]
    pub entity_emb_size: usize,
    /// Base encoder identifier.
    #[arg(long, default_value = "bert-base-uncased")]
    pub bert_model_name: String,
}

/// Extra hyperparameters for masked entity prediction.
#[derive(Clone, Debug, PartialEq, Args, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct MaskedLmOpts {
    /// Entity masking probability.
    #[arg(long, default_value_t = 0.15)]
    pub masked_entity_prob: f64,
    /// Cap on masked entity predictions per sequence.
    #[arg(long, default_value_t = 19)]
    pub max_entity_predictions_per_seq: usize,
    /// Update encoder weights in addition to entity embeddings.
    #[arg(long)]
    pub update_all_weights: bool,
}

/// Extra hyperparameters for end-to-end linking pretraining.
#[derive(Clone, Debug, PartialEq, Args, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct E2eOpts {
    /// Number of link-probability feature bins.
    #[arg(long, default_value_t = 20)]
    pub link_prob_bin_size: usize,
    /// Number of prior-probability feature bins.
    #[arg(long, default_value_t = 20)]
    pub prior_prob_bin_size: usize,
    /// Train the entity classification head.
    #[arg(long = "no-entity-classification", action = ArgAction::SetFalse, default_value_t = true)]
    pub entity_classification: bool,
    /// Warm-start weights from a pretrained model file.
    #[arg(long)]
    pub pretrained_model_file: Option<String>,
}

/// The full state of one training run.
///
/// Persisted inside every checkpoint data record and patched on resume, so
/// a resumed run continues with the exact configuration it started with
/// unless explicit overrides say otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct RunArgs {
    /// Corpus shard directory.
    pub corpus_data_dir: String,
    /// Entity vocabulary file.
    pub entity_vocab_file: String,
    /// Run output directory (checkpoints land here).
    pub output_dir: String,
    /// Run log directory.
    pub log_dir: String,
    /// Memory-map corpus shards instead of loading them.
    pub mmap: bool,
    /// Build examples from single sentences instead of sentence pairs.
    pub single_sentence: bool,
    /// Emit one token per mention instead of the full span.
    pub single_token_per_mention: bool,
    /// Keep optimizer state on the accelerator.
    pub allocate_gpu_for_optimizer: bool,
    /// Model weights to load, if resuming or warm-starting.
    pub model_file: Option<String>,
    /// Optimizer state to load, if resuming.
    pub optimizer_file: Option<String>,
    /// Sparse optimizer state to load, if resuming.
    pub sparse_optimizer_file: Option<String>,
    /// Steps already completed.
    pub global_step: GlobalStep,
    /// Epochs already completed.
    pub epoch: u32,
    /// Shared hyperparameters.
    pub common: CommonTrainingOpts,
    /// Masked-LM hyperparameters.
    pub masked_lm: MaskedLmOpts,
    /// End-to-end hyperparameters; present only for e2e runs.
    pub e2e: Option<E2eOpts>,
}

/// Hyperparameter overrides accepted when resuming a run.
///
/// Every field is optional; an unset field never clobbers the value stored
/// in the checkpoint.
#[derive(
    Clone, Debug, Default, PartialEq, Args, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
pub struct RunOverrides {
    /// Override the batch size.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Override gradient accumulation.
    #[arg(long)]
    pub gradient_accumulation_steps: Option<usize>,
    /// Override the learning rate.
    #[arg(long)]
    pub learning_rate: Option<f64>,
    /// Override learning-rate decay.
    #[arg(long)]
    pub lr_decay: Option<bool>,
    /// Override the total step count.
    #[arg(long)]
    pub num_train_steps: Option<u64>,
    /// Override the checkpoint interval.
    #[arg(long)]
    pub save_every: Option<u64>,
}

impl RunOverrides {
    /// Whether any override is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Apply `overrides` onto `args`; set fields win, unset fields change nothing.
pub fn apply_overrides(args: &mut RunArgs, overrides: &RunOverrides) {
    if let Some(batch_size) = overrides.batch_size {
        args.common.batch_size = batch_size;
    }
    if let Some(steps) = overrides.gradient_accumulation_steps {
        args.common.gradient_accumulation_steps = steps;
    }
    if let Some(learning_rate) = overrides.learning_rate {
        args.common.learning_rate = learning_rate;
    }
    if let Some(lr_decay) = overrides.lr_decay {
        args.common.lr_decay = lr_decay;
    }
    if let Some(num_train_steps) = overrides.num_train_steps {
        args.common.num_train_steps = num_train_steps;
    }
    if let Some(save_every) = overrides.save_every {
        args.common.save_every = save_every;
    }
}

/// Merge a JSON object's top-level keys onto a serializable value.
///
/// Keys absent from `json` keep their current values; unknown keys are a
/// configuration error rather than silently ignored.
pub fn merge_json<T>(value: &mut T, json: &str) -> Result<(), CorpusError>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let patch: Value = serde_json::from_str(json)
        .map_err(|err| CorpusError::Configuration(format!("invalid JSON arguments: {err}")))?;
    let Value::Object(patch) = patch else {
        return Err(CorpusError::Configuration(
            "JSON arguments must be an object".to_string(),
        ));
    };
    let mut current = serde_json::to_value(&*value)
        .map_err(|err| CorpusError::Configuration(format!("arguments not serializable: {err}")))?;
    let Value::Object(current_map) = &mut current else {
        return Err(CorpusError::Configuration(
            "arguments did not serialize to an object".to_string(),
        ));
    };
    for (key, patch_value) in patch {
        if !current_map.contains_key(&key) {
            return Err(CorpusError::Configuration(format!(
                "unknown argument key '{key}'"
            )));
        }
        current_map.insert(key, patch_value);
    }
    *value = serde_json::from_value(current)
        .map_err(|err| CorpusError::Configuration(format!("invalid argument value: {err}")))?;
    Ok(())
}
