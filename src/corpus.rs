//! Corpus building over dump pages and shard-file reading.
//!
//! Page titles are partitioned into a fixed number of contiguous chunks;
//! each chunk is processed by one worker and written to a shard whose id is
//! the partition index, so output is reproducible regardless of worker
//! scheduling or pool size.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::corpus::{
    BITCODE_PREFIX, DEFAULT_MIN_SENTENCE_LEN, RECORD_VERSION, SHARD_EXT, SHARD_ID_WIDTH,
    SHARD_PREFIX,
};
use crate::dump::{DumpDb, DumpPage};
use crate::errors::CorpusError;
use crate::linker::{EntityLink, EntityLinker};
use crate::pool::{WorkerPool, partition_count};
use crate::tokenize::{SentenceTokenizer, Tokenizer};
use crate::types::{PageTitle, TokenId};

/// Which part of each page the builder processes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum PageTarget {
    /// Lead section only (text before the first blank-line break).
    Abstract,
    /// The entire page body.
    Full,
}

/// One processed page: tokens, resolved entity links, sentence boundaries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct CorpusRecord {
    /// Source page title.
    pub title: PageTitle,
    /// Token ids across all kept sentences, in order.
    pub token_ids: Vec<TokenId>,
    /// Entity links with page-level token offsets.
    pub links: Vec<EntityLink>,
    /// Token index at which each kept sentence starts.
    pub sentence_offsets: Vec<usize>,
}

/// Corpus build configuration.
#[derive(Clone, Debug)]
pub struct CorpusBuildOptions {
    /// Page region to process.
    pub target: PageTarget,
    /// Sentences with fewer tokens than this are discarded.
    pub min_sentence_len: usize,
    /// Worker threads.
    pub pool_size: usize,
    /// Number of output shards; also the unit of checkpointable work.
    pub num_page_chunks: usize,
}

impl Default for CorpusBuildOptions {
    fn default() -> Self {
        Self {
            target: PageTarget::Full,
            min_sentence_len: DEFAULT_MIN_SENTENCE_LEN,
            pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            num_page_chunks: 100,
        }
    }
}

/// Totals reported after a corpus build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CorpusStats {
    /// Shards written.
    pub shards: usize,
    /// Records kept across all shards.
    pub records: usize,
    /// Pages skipped due to errors or empty output.
    pub skipped_pages: usize,
}

/// Shard path for a chunk id (a pure function of the partition index).
pub fn shard_path(dir: &Path, chunk_id: usize) -> PathBuf {
    dir.join(format!(
        "{SHARD_PREFIX}{chunk_id:0width$}.{SHARD_EXT}",
        width = SHARD_ID_WIDTH
    ))
}

/// Build corpus shards from every page in the dump.
///
/// Single-page failures are logged with the page title and skipped; they
/// never abort sibling pages or the build. After the pool drains, every
/// expected shard file must exist on disk or the build fails, so a killed
/// worker cannot silently drop its partition.
pub fn build_corpus_data(
    dump: &DumpDb,
    tokenizer: &dyn Tokenizer,
    sentence_tokenizer: &dyn SentenceTokenizer,
    entity_linker: &EntityLinker,
    out_dir: &Path,
    options: &CorpusBuildOptions,
) -> Result<CorpusStats, CorpusError> {
    fs::create_dir_all(out_dir)?;
    let titles = dump.titles()?;
    let chunks = partition_count(titles, options.num_page_chunks);
    let chunk_count = chunks.len();
    let pool = WorkerPool::new(options.pool_size);
    let dump_path = dump.path().to_path_buf();

    let per_chunk = pool.run_chunks(chunks, |chunk_id, titles| {
        let handle = DumpDb::open(&dump_path)?;
        let mut records = Vec::new();
        let mut skipped = 0usize;
        for title in &titles {
            let outcome = handle.page(title).and_then(|page| {
                process_page(&page, tokenizer, sentence_tokenizer, entity_linker, options)
            });
            match outcome {
                Ok(Some(record)) => records.push(record),
                Ok(None) => skipped += 1,
                Err(err) => {
                    warn!(title = %title, error = %err, "skipping unprocessable page");
                    skipped += 1;
                }
            }
        }
        write_shard(&shard_path(out_dir, chunk_id), &records)?;
        Ok((records.len(), skipped))
    })?;

    for chunk_id in 0..chunk_count {
        let path = shard_path(out_dir, chunk_id);
        if !path.exists() {
            return Err(CorpusError::ShardMissing { chunk_id, path });
        }
    }

    let stats = CorpusStats {
        shards: chunk_count,
        records: per_chunk.iter().map(|(records, _)| records).sum(),
        skipped_pages: per_chunk.iter().map(|(_, skipped)| skipped).sum(),
    };
    if stats.records == 0 {
        warn!("corpus build produced zero records; check thresholds and input dump");
    } else {
        info!(
            shards = stats.shards,
            records = stats.records,
            skipped = stats.skipped_pages,
            "corpus data built"
        );
    }
    Ok(stats)
}

fn process_page(
    page: &DumpPage,
    tokenizer: &dyn Tokenizer,
    sentence_tokenizer: &dyn SentenceTokenizer,
    entity_linker: &EntityLinker,
    options: &CorpusBuildOptions,
) -> Result<Option<CorpusRecord>, CorpusError> {
    let text = match options.target {
        PageTarget::Full => page.text.as_str(),
        PageTarget::Abstract => page
            .text
            .split("\n\n")
            .next()
            .unwrap_or(page.text.as_str()),
    };

    let mut token_ids = Vec::new();
    let mut links = Vec::new();
    let mut sentence_offsets = Vec::new();
    for span in sentence_tokenizer.split(text) {
        let sentence = &text[span.start..span.end];
        let tokens = tokenizer.tokenize(sentence);
        if tokens.len() < options.min_sentence_len {
            continue;
        }
        let base = token_ids.len();
        sentence_offsets.push(base);
        for link in entity_linker.link(sentence, &tokens) {
            links.push(EntityLink {
                start: base + link.start,
                end: base + link.end,
                ..link
            });
        }
        token_ids.extend(tokens.iter().map(|token| token.id));
    }

    if sentence_offsets.is_empty() {
        return Ok(None);
    }
    Ok(Some(CorpusRecord {
        title: page.title.clone(),
        token_ids,
        links,
        sentence_offsets,
    }))
}

fn write_shard(path: &Path, records: &[CorpusRecord]) -> Result<(), CorpusError> {
    let raw = bitcode::encode(&records.to_vec());
    let mut blob = Vec::with_capacity(2 + raw.len());
    blob.push(BITCODE_PREFIX);
    blob.push(RECORD_VERSION);
    blob.extend_from_slice(&raw);
    fs::write(path, blob)?;
    Ok(())
}

fn read_shard(path: &Path) -> Result<Vec<CorpusRecord>, CorpusError> {
    let load_err = |reason: String| CorpusError::CorpusLoad {
        path: path.to_path_buf(),
        reason,
    };
    let blob = fs::read(path).map_err(|err| load_err(err.to_string()))?;
    if blob.len() < 2 || blob[0] != BITCODE_PREFIX {
        return Err(load_err("payload missing expected prefix".to_string()));
    }
    if blob[1] != RECORD_VERSION {
        return Err(load_err(format!(
            "record version mismatch (expected {RECORD_VERSION}, found {})",
            blob[1]
        )));
    }
    bitcode::decode(&blob[2..]).map_err(|err| load_err(format!("corrupt payload: {err}")))
}

/// Read-side handle over a built corpus directory.
pub struct WikiCorpus {
    dir: PathBuf,
    shard_paths: Vec<PathBuf>,
}

impl WikiCorpus {
    /// Open a corpus directory, enumerating shards in chunk-id order.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let dir = dir.into();
        let mut shard_paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|err| CorpusError::CorpusLoad {
            path: dir.clone(),
            reason: err.to_string(),
        })? {
            let path = entry?.path();
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            if name.starts_with(SHARD_PREFIX) && name.ends_with(&format!(".{SHARD_EXT}")) {
                shard_paths.push(path);
            }
        }
        // zero-padded chunk ids make lexical order the chunk order
        shard_paths.sort();
        if shard_paths.is_empty() {
            warn!(dir = %dir.display(), "corpus directory contains no shards");
        }
        Ok(Self { dir, shard_paths })
    }

    /// Corpus directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of shard files.
    pub fn shard_count(&self) -> usize {
        self.shard_paths.len()
    }

    /// Load one shard's records.
    pub fn load_shard(&self, index: usize) -> Result<Vec<CorpusRecord>, CorpusError> {
        let path = self
            .shard_paths
            .get(index)
            .ok_or_else(|| CorpusError::CorpusLoad {
                path: self.dir.clone(),
                reason: format!("shard index {index} out of range"),
            })?;
        read_shard(path)
    }

    /// Load all records in shard order.
    pub fn records(&self) -> Result<Vec<CorpusRecord>, CorpusError> {
        let mut records = Vec::new();
        for index in 0..self.shard_paths.len() {
            records.extend(self.load_shard(index)?);
        }
        Ok(records)
    }

    /// Total record count across shards.
    pub fn page_count(&self) -> Result<usize, CorpusError> {
        let mut count = 0;
        for index in 0..self.shard_paths.len() {
            count += self.load_shard(index)?.len();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(title: &str) -> CorpusRecord {
        CorpusRecord {
            title: title.to_string(),
            token_ids: vec![1, 2, 3],
            links: Vec::new(),
            sentence_offsets: vec![0],
        }
    }

    #[test]
    fn shard_path_zero_pads_chunk_ids() {
        let path = shard_path(Path::new("/tmp/corpus"), 7);
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("corpus_chunk00007.bin")
        );
    }

    #[test]
    fn shard_round_trip_preserves_records() {
        let dir = tempdir().expect("tempdir");
        let path = shard_path(dir.path(), 0);
        let records = vec![record("Paris"), record("Berlin")];
        write_shard(&path, &records).expect("write");
        assert_eq!(read_shard(&path).expect("read"), records);
    }

    #[test]
    fn corpus_reader_walks_shards_in_chunk_order() {
        let dir = tempdir().expect("tempdir");
        write_shard(&shard_path(dir.path(), 1), &[record("B")]).expect("write");
        write_shard(&shard_path(dir.path(), 0), &[record("A")]).expect("write");
        let corpus = WikiCorpus::open(dir.path()).expect("open");
        assert_eq!(corpus.shard_count(), 2);
        let titles: Vec<String> = corpus
            .records()
            .expect("records")
            .into_iter()
            .map(|record| record.title)
            .collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(corpus.page_count().expect("count"), 2);
    }

    #[test]
    fn reader_rejects_corrupt_shards() {
        let dir = tempdir().expect("tempdir");
        let path = shard_path(dir.path(), 0);
        fs::write(&path, b"garbage").expect("write");
        assert!(matches!(
            read_shard(&path),
            Err(CorpusError::CorpusLoad { .. })
        ));
    }
}
