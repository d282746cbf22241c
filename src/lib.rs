#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Checkpoint persistence and resume resolution.
pub mod checkpoint;
/// Command-line interface over the full pipeline.
pub mod cli;
/// Training run configuration and overrides.
pub mod config;
/// Centralized constants used across the pipeline stages.
pub mod constants;
/// Corpus building and shard reading.
pub mod corpus;
/// Indexed Wikipedia page store.
pub mod dump;
/// Mention-to-entity span resolution.
pub mod linker;
/// Mention statistics database.
pub mod mention_db;
/// Worker pool and deterministic partitioning helpers.
pub mod pool;
/// Tokenizer and sentence-tokenizer seams.
pub mod tokenize;
/// Training loop driver.
pub mod trainer;
/// Shared type aliases.
pub mod types;
/// Text normalization helpers.
pub mod utils;
/// Entity vocabulary.
pub mod vocab;

mod errors;

pub use checkpoint::{CheckpointData, CheckpointManager, StepArtifacts, TrainState};
pub use config::{
    CommonTrainingOpts, E2eOpts, MaskedLmOpts, RunArgs, RunOverrides, apply_overrides, merge_json,
};
pub use corpus::{
    CorpusBuildOptions, CorpusRecord, CorpusStats, PageTarget, WikiCorpus, build_corpus_data,
};
pub use dump::{Anchor, DumpDb, DumpDbWriter, DumpPage, build_from_jsonl};
pub use errors::CorpusError;
pub use linker::{EntityLink, EntityLinker};
pub use mention_db::{MentionCandidate, MentionDb, MentionDbOptions};
pub use tokenize::{
    RuleSentenceTokenizer, SentenceSpan, SentenceTokenizer, Token, Tokenizer, VocabTokenizer,
};
pub use trainer::{NullBackend, TrainBackend, Trainer};
pub use types::{
    EntityId, EntityIndex, GlobalStep, MentionText, PageChunk, PageTitle, TokenId,
};
pub use vocab::{EntityVocab, VocabBuildOptions};
