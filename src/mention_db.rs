//! Probabilistic mention-to-entity database built from anchor-text statistics.
//!
//! Building runs two parallel passes over disjoint page chunks: an anchor
//! scan that accumulates per-(mention, entity) link counts, then a plain-text
//! scan that counts how often each known mention occurs at all. Both merges
//! are key-wise sums, so chunk boundaries and completion order cannot change
//! the final statistics. Thresholds are applied once after the merge; pruning
//! is final and not reversible at query time.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::mention_db::{
    BITCODE_PREFIX, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CANDIDATE_SIZE, DEFAULT_MAX_MENTION_LEN,
    DEFAULT_MIN_LINK_COUNT, DEFAULT_MIN_LINK_PROB, RECORD_VERSION,
};
use crate::dump::DumpDb;
use crate::errors::CorpusError;
use crate::pool::{WorkerPool, partition_size};
use crate::types::{EntityId, MentionText, PageTitle};
use crate::utils::{fold_mention, word_spans};

/// One candidate entity for a mention, with its anchor statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct MentionCandidate {
    /// Candidate entity id (link target title).
    pub entity: EntityId,
    /// Times this mention linked to this entity.
    pub link_count: u32,
    /// Times this mention appeared at all, linked or not.
    pub total_count: u64,
    /// `link_count / total_count`.
    pub prior_prob: f64,
    /// Fraction of this mention's occurrences that carry any link.
    pub link_prob: f64,
}

/// Build-time thresholds and scheduling knobs.
#[derive(Clone, Debug)]
pub struct MentionDbOptions {
    /// Candidates whose link or prior probability falls below this are dropped.
    pub min_link_prob: f64,
    /// Per-mention candidate list cap (highest prior probability kept).
    pub max_candidate_size: usize,
    /// Candidates linked fewer times than this are dropped.
    pub min_link_count: u32,
    /// Mentions longer than this many characters are ignored.
    pub max_mention_len: usize,
    /// Worker threads used for both build passes.
    pub pool_size: usize,
    /// Pages per worker chunk.
    pub chunk_size: usize,
    /// Fold mentions to lowercase when building and querying.
    pub uncased: bool,
}

impl Default for MentionDbOptions {
    fn default() -> Self {
        Self {
            min_link_prob: DEFAULT_MIN_LINK_PROB,
            max_candidate_size: DEFAULT_MAX_CANDIDATE_SIZE,
            min_link_count: DEFAULT_MIN_LINK_COUNT,
            max_mention_len: DEFAULT_MAX_MENTION_LEN,
            pool_size: default_pool_size(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            uncased: true,
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Immutable mention → candidate mapping; built once, then read-only.
#[derive(Debug)]
pub struct MentionDb {
    mentions: IndexMap<MentionText, Vec<MentionCandidate>>,
    uncased: bool,
    max_mention_len: usize,
    max_mention_words: usize,
}

#[derive(bitcode::Encode, bitcode::Decode)]
struct PersistedMentionDb {
    uncased: bool,
    max_mention_len: usize,
    max_mention_words: usize,
    mentions: Vec<(MentionText, Vec<MentionCandidate>)>,
}

type LinkCounts = HashMap<MentionText, HashMap<EntityId, u32>>;
type OccurrenceCounts = HashMap<MentionText, u64>;

struct MentionMatcher {
    known: HashSet<MentionText>,
    max_words: usize,
    max_chars: usize,
    uncased: bool,
}

impl MentionDb {
    /// Build the database from a dump store.
    ///
    /// Unreadable pages are logged and skipped; an empty result (nothing
    /// survives the thresholds) is valid and distinguishable from a load
    /// failure.
    pub fn build(dump: &DumpDb, options: &MentionDbOptions) -> Result<Self, CorpusError> {
        let titles = dump.titles()?;
        let chunks = partition_size(titles, options.chunk_size);
        let pool = WorkerPool::new(options.pool_size);

        let link_counts = Self::scan_links(dump, &pool, chunks.clone(), options)?;
        // Budget in word_spans units, not space-separated words: punctuation
        // inside a mention ("Paris, Texas", "U.S.") occupies spans of its own.
        let matcher = Arc::new(MentionMatcher {
            max_words: link_counts
                .keys()
                .map(|mention| word_spans(mention).len())
                .max()
                .unwrap_or(1),
            max_chars: options.max_mention_len,
            uncased: options.uncased,
            known: link_counts.keys().cloned().collect(),
        });
        let occurrences = Self::scan_occurrences(dump, &pool, chunks, &matcher)?;

        let db = Self::assemble(link_counts, occurrences, options);
        if db.is_empty() {
            warn!(
                min_link_prob = options.min_link_prob,
                min_link_count = options.min_link_count,
                "mention db is empty after pruning; thresholds may be misconfigured"
            );
        } else {
            info!(
                mentions = db.len(),
                candidates = db.candidate_count(),
                "mention db built"
            );
        }
        Ok(db)
    }

    fn scan_links(
        dump: &DumpDb,
        pool: &WorkerPool,
        chunks: Vec<Vec<PageTitle>>,
        options: &MentionDbOptions,
    ) -> Result<LinkCounts, CorpusError> {
        let uncased = options.uncased;
        let max_chars = options.max_mention_len;
        let dump_path = dump.path().to_path_buf();
        pool.map_reduce(
            chunks,
            |chunk_id, titles| {
                let mut counts = LinkCounts::new();
                let handle = match DumpDb::open(&dump_path) {
                    Ok(handle) => handle,
                    Err(err) => {
                        warn!(chunk_id, error = %err, "link scan worker lost its dump handle");
                        return counts;
                    }
                };
                for title in &titles {
                    let page = match handle.page(title) {
                        Ok(page) => page,
                        Err(err) => {
                            warn!(title = %title, error = %err, "skipping unreadable page");
                            continue;
                        }
                    };
                    for anchor in page.links {
                        let mention = fold_mention(&anchor.text, uncased);
                        if mention.is_empty() || mention.chars().count() > max_chars {
                            continue;
                        }
                        *counts
                            .entry(mention)
                            .or_default()
                            .entry(anchor.target)
                            .or_insert(0) += 1;
                    }
                }
                counts
            },
            LinkCounts::new,
            merge_link_counts,
        )
    }

    fn scan_occurrences(
        dump: &DumpDb,
        pool: &WorkerPool,
        chunks: Vec<Vec<PageTitle>>,
        matcher: &Arc<MentionMatcher>,
    ) -> Result<OccurrenceCounts, CorpusError> {
        let dump_path = dump.path().to_path_buf();
        pool.map_reduce(
            chunks,
            |chunk_id, titles| {
                let mut counts = OccurrenceCounts::new();
                let handle = match DumpDb::open(&dump_path) {
                    Ok(handle) => handle,
                    Err(err) => {
                        warn!(chunk_id, error = %err, "occurrence scan worker lost its dump handle");
                        return counts;
                    }
                };
                for title in &titles {
                    let page = match handle.page(title) {
                        Ok(page) => page,
                        Err(err) => {
                            warn!(title = %title, error = %err, "skipping unreadable page");
                            continue;
                        }
                    };
                    let spans = word_spans(&page.text);
                    for (_, _, mention) in greedy_match(
                        &page.text,
                        &spans,
                        matcher.max_words,
                        matcher.max_chars,
                        matcher.uncased,
                        |key| matcher.known.contains(key),
                    ) {
                        *counts.entry(mention).or_insert(0) += 1;
                    }
                }
                counts
            },
            OccurrenceCounts::new,
            merge_occurrence_counts,
        )
    }

    fn assemble(
        link_counts: LinkCounts,
        occurrences: OccurrenceCounts,
        options: &MentionDbOptions,
    ) -> Self {
        let mut keys: Vec<MentionText> = link_counts.keys().cloned().collect();
        keys.sort();

        let mut mentions = IndexMap::new();
        let mut max_words = 1;
        for mention in keys {
            let by_entity = &link_counts[&mention];
            let total_links: u64 = by_entity.values().map(|count| u64::from(*count)).sum();
            // Anchors are part of the page text, so the occurrence scan sees
            // linked occurrences too; the max() guards against tokenization
            // drift pushing probabilities above 1.
            let total_count = occurrences
                .get(&mention)
                .copied()
                .unwrap_or(0)
                .max(total_links);
            if total_count == 0 {
                continue;
            }
            let link_prob = total_links as f64 / total_count as f64;
            if link_prob < options.min_link_prob {
                continue;
            }
            let mut candidates: Vec<MentionCandidate> = by_entity
                .iter()
                .map(|(entity, link_count)| MentionCandidate {
                    entity: entity.clone(),
                    link_count: *link_count,
                    total_count,
                    prior_prob: f64::from(*link_count) / total_count as f64,
                    link_prob,
                })
                .filter(|candidate| {
                    candidate.link_count >= options.min_link_count
                        && candidate.prior_prob >= options.min_link_prob
                })
                .collect();
            if candidates.is_empty() {
                // A mention whose candidate list prunes to nothing is dropped
                // entirely rather than kept empty.
                continue;
            }
            candidates.sort_by(|left, right| {
                right
                    .prior_prob
                    .partial_cmp(&left.prior_prob)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| right.link_count.cmp(&left.link_count))
                    .then_with(|| left.entity.cmp(&right.entity))
            });
            candidates.truncate(options.max_candidate_size);
            max_words = max_words.max(word_spans(&mention).len());
            mentions.insert(mention, candidates);
        }

        Self {
            mentions,
            uncased: options.uncased,
            max_mention_len: options.max_mention_len,
            max_mention_words: max_words,
        }
    }

    /// Number of mentions with at least one surviving candidate.
    pub fn len(&self) -> usize {
        self.mentions.len()
    }

    /// Returns `true` when no candidates survived the build thresholds.
    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty()
    }

    /// Total candidate entries across all mentions.
    pub fn candidate_count(&self) -> usize {
        self.mentions.values().map(Vec::len).sum()
    }

    /// Whether mention keys were folded to lowercase at build time.
    pub fn uncased(&self) -> bool {
        self.uncased
    }

    /// Maximum mention length in characters accepted at build time.
    pub fn max_mention_len(&self) -> usize {
        self.max_mention_len
    }

    /// Candidates for a surface string, best prior probability first.
    pub fn candidates(&self, surface: &str) -> Option<&[MentionCandidate]> {
        let key = fold_mention(surface, self.uncased);
        self.mentions.get(&key).map(Vec::as_slice)
    }

    /// Iterate mentions in build order.
    pub fn iter(&self) -> impl Iterator<Item = (&MentionText, &[MentionCandidate])> {
        self.mentions
            .iter()
            .map(|(mention, candidates)| (mention, candidates.as_slice()))
    }

    /// Greedy longest-match-first scan of `text` over word `spans`.
    ///
    /// Returns `(start_word, end_word, mention_key)` triples; matched spans
    /// are consumed, so results never overlap.
    pub fn match_spans(
        &self,
        text: &str,
        spans: &[(usize, usize)],
    ) -> Vec<(usize, usize, MentionText)> {
        greedy_match(
            text,
            spans,
            self.max_mention_words,
            self.max_mention_len,
            self.uncased,
            |key| self.mentions.contains_key(key),
        )
    }

    /// Candidate list for an already-folded mention key.
    pub(crate) fn candidates_for_key(&self, key: &str) -> Option<&[MentionCandidate]> {
        self.mentions.get(key).map(Vec::as_slice)
    }

    /// Persist the database as a single versioned blob.
    pub fn save(&self, path: &Path) -> Result<(), CorpusError> {
        let persisted = PersistedMentionDb {
            uncased: self.uncased,
            max_mention_len: self.max_mention_len,
            max_mention_words: self.max_mention_words,
            mentions: self
                .mentions
                .iter()
                .map(|(mention, candidates)| (mention.clone(), candidates.clone()))
                .collect(),
        };
        let raw = bitcode::encode(&persisted);
        let mut blob = Vec::with_capacity(2 + raw.len());
        blob.push(BITCODE_PREFIX);
        blob.push(RECORD_VERSION);
        blob.extend_from_slice(&raw);
        fs::write(path, blob)?;
        Ok(())
    }

    /// Load a database persisted by [`MentionDb::save`].
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let load_err = |reason: String| CorpusError::MentionDbLoad {
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
        let persisted: PersistedMentionDb =
            bitcode::decode(&blob[2..]).map_err(|err| load_err(format!("corrupt payload: {err}")))?;
        Ok(Self {
            mentions: persisted.mentions.into_iter().collect(),
            uncased: persisted.uncased,
            max_mention_len: persisted.max_mention_len,
            max_mention_words: persisted.max_mention_words,
        })
    }
}

fn merge_link_counts(mut left: LinkCounts, right: LinkCounts) -> LinkCounts {
    for (mention, by_entity) in right {
        let target = left.entry(mention).or_default();
        for (entity, count) in by_entity {
            *target.entry(entity).or_insert(0) += count;
        }
    }
    left
}

fn merge_occurrence_counts(mut left: OccurrenceCounts, right: OccurrenceCounts) -> OccurrenceCounts {
    for (mention, count) in right {
        *left.entry(mention).or_insert(0) += count;
    }
    left
}

fn greedy_match(
    text: &str,
    spans: &[(usize, usize)],
    max_words: usize,
    max_chars: usize,
    uncased: bool,
    contains: impl Fn(&str) -> bool,
) -> Vec<(usize, usize, MentionText)> {
    let mut matches = Vec::new();
    let mut start = 0;
    while start < spans.len() {
        let mut advance = start + 1;
        let upper = (start + max_words).min(spans.len());
        for end in (start + 1..=upper).rev() {
            let surface = &text[spans[start].0..spans[end - 1].1];
            if surface.chars().count() > max_chars {
                continue;
            }
            let key = fold_mention(surface, uncased);
            if contains(&key) {
                matches.push((start, end, key));
                advance = end;
                break;
            }
        }
        start = advance;
    }
    matches
}
