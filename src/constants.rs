/// Constants used by the persisted dump page store.
pub mod dump {
    /// Key used for dump-store global metadata.
    pub const META_KEY: &[u8] = b"__meta__";
    /// Key prefix for indexed page-title records (`title:<n>`).
    pub const TITLE_KEY_PREFIX: &[u8] = b"title:";
    /// Key prefix for per-title page records (`page:<title>`).
    pub const PAGE_KEY_PREFIX: &[u8] = b"page:";
    /// Version tag for dump-store metadata compatibility checks.
    pub const STORE_VERSION: u8 = 1;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
}

/// Constants used by mention database building and persistence.
pub mod mention_db {
    /// Version tag for persisted mention-db blobs.
    pub const RECORD_VERSION: u8 = 1;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
    /// Default minimum link probability threshold.
    pub const DEFAULT_MIN_LINK_PROB: f64 = 0.1;
    /// Default cap on per-mention candidate lists.
    pub const DEFAULT_MAX_CANDIDATE_SIZE: usize = 100;
    /// Default minimum per-candidate link count.
    pub const DEFAULT_MIN_LINK_COUNT: u32 = 0;
    /// Default maximum mention length in characters.
    pub const DEFAULT_MAX_MENTION_LEN: usize = 100;
    /// Default page-chunk size for parallel building.
    pub const DEFAULT_CHUNK_SIZE: usize = 30;
}

/// Constants used by corpus shard layout and reading.
pub mod corpus {
    /// Shard filename prefix; the chunk id follows, zero-padded.
    pub const SHARD_PREFIX: &str = "corpus_chunk";
    /// Shard filename extension.
    pub const SHARD_EXT: &str = "bin";
    /// Zero-padding width for shard chunk ids.
    pub const SHARD_ID_WIDTH: usize = 5;
    /// Version tag for persisted shard payloads.
    pub const RECORD_VERSION: u8 = 1;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
    /// Default minimum sentence length in tokens.
    pub const DEFAULT_MIN_SENTENCE_LEN: usize = 5;
}

/// Constants used by checkpoint artifact naming and resolution.
///
/// The filename layout is load-bearing: the step is zero-padded to a fixed
/// width so that lexical sort order over data filenames equals numeric step
/// order when resolving the latest checkpoint.
pub mod checkpoint {
    /// Filename prefix for the run-state data record.
    pub const DATA_PREFIX: &str = "data_step";
    /// Filename prefix for model weight artifacts.
    pub const MODEL_PREFIX: &str = "model_step";
    /// Filename prefix for optimizer state artifacts.
    pub const OPTIMIZER_PREFIX: &str = "optimizer_step";
    /// Filename prefix for optional sparse-optimizer state artifacts.
    pub const SPARSE_OPTIMIZER_PREFIX: &str = "sparse_optimizer_step";
    /// Extension used by the run-state data record.
    pub const DATA_EXT: &str = "pkl";
    /// Extension used by model/optimizer artifacts.
    pub const ARTIFACT_EXT: &str = "bin";
    /// Fixed zero-padding width for the step number in filenames.
    pub const STEP_WIDTH: usize = 7;
    /// Version tag for persisted run-state data records.
    pub const RECORD_VERSION: u8 = 1;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
}

/// Constants used by entity vocabulary building.
pub mod vocab {
    /// Default entity vocabulary size cap.
    pub const DEFAULT_VOCAB_SIZE: usize = 1_000_000;
}
