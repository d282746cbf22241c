use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::PageTitle;

/// Error type for dump access, corpus building, and checkpoint persistence failures.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("dump page '{title}' is unusable: {reason}")]
    DumpPage { title: PageTitle, reason: String },
    #[error("dump store '{}' failure: {reason}", .path.display())]
    DumpStore { path: PathBuf, reason: String },
    #[error("mention db at '{}' could not be loaded: {reason}", .path.display())]
    MentionDbLoad { path: PathBuf, reason: String },
    #[error("corpus shard missing for chunk {chunk_id}: expected '{}'", .path.display())]
    ShardMissing { chunk_id: usize, path: PathBuf },
    #[error("corpus data at '{}' could not be read: {reason}", .path.display())]
    CorpusLoad { path: PathBuf, reason: String },
    #[error("no checkpoint found in '{}'{}", .output_dir.display(), step_suffix(.step))]
    CheckpointNotFound {
        output_dir: PathBuf,
        step: Option<u64>,
    },
    #[error("checkpoint for step {step} is incomplete: missing '{}'", .path.display())]
    CheckpointCorrupt { step: u64, path: PathBuf },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
}

fn step_suffix(step: &Option<u64>) -> String {
    match step {
        Some(step) => format!(" for step {step}"),
        None => String::new(),
    }
}
