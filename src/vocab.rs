//! Entity vocabulary built from corpus link frequencies.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use tracing::info;

use crate::constants::vocab::DEFAULT_VOCAB_SIZE;
use crate::corpus::WikiCorpus;
use crate::errors::CorpusError;
use crate::types::{EntityId, EntityIndex};

/// Entity vocabulary options.
#[derive(Clone, Debug)]
pub struct VocabBuildOptions {
    /// Maximum number of entities kept.
    pub vocab_size: usize,
    /// Entities forced into the vocabulary ahead of frequency ranking.
    pub white_list: Vec<EntityId>,
    /// Keep only whitelisted entities.
    pub white_list_only: bool,
}

impl Default for VocabBuildOptions {
    fn default() -> Self {
        Self {
            vocab_size: DEFAULT_VOCAB_SIZE,
            white_list: Vec::new(),
            white_list_only: false,
        }
    }
}

/// Ordered entity-to-index mapping.
///
/// Indices are assigned by insertion order: whitelist entries first (in
/// the order given), then remaining entities by descending link frequency
/// with ties broken lexicographically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityVocab {
    entities: IndexMap<EntityId, EntityIndex>,
}

impl EntityVocab {
    /// Build a vocabulary from corpus entity-link frequencies.
    pub fn build(corpus: &WikiCorpus, options: &VocabBuildOptions) -> Result<Self, CorpusError> {
        let distinct_white_list: HashSet<&EntityId> = options.white_list.iter().collect();
        if distinct_white_list.len() > options.vocab_size {
            return Err(CorpusError::Configuration(format!(
                "white list holds {} distinct entities but vocab size is {}",
                distinct_white_list.len(),
                options.vocab_size
            )));
        }

        let mut counts: HashMap<EntityId, u64> = HashMap::new();
        for record in corpus.records()? {
            for link in &record.links {
                *counts.entry(link.entity.clone()).or_default() += 1;
            }
        }

        let mut vocab = Self::default();
        for entity in &options.white_list {
            vocab.push(entity.clone());
        }
        if !options.white_list_only {
            let mut ranked: Vec<(EntityId, u64)> = counts
                .into_iter()
                .filter(|(entity, _)| !vocab.contains(entity))
                .collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            for (entity, _) in ranked {
                if vocab.len() >= options.vocab_size {
                    break;
                }
                vocab.push(entity);
            }
        }

        info!(entities = vocab.len(), "entity vocabulary built");
        Ok(vocab)
    }

    fn push(&mut self, entity: EntityId) {
        let next = self.entities.len() as EntityIndex;
        self.entities.entry(entity).or_insert(next);
    }

    /// Dense index for `entity`, if present.
    pub fn index(&self, entity: &str) -> Option<EntityIndex> {
        self.entities.get(entity).copied()
    }

    /// Entity at `index`, if in range.
    pub fn entity(&self, index: EntityIndex) -> Option<&EntityId> {
        self.entities.get_index(index as usize).map(|(id, _)| id)
    }

    /// Whether `entity` is in the vocabulary.
    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in index order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    /// Write the vocabulary as one entity per line, in index order.
    pub fn save(&self, path: &Path) -> Result<(), CorpusError> {
        let mut out = String::new();
        for entity in self.entities.keys() {
            out.push_str(entity);
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }

    /// Load a vocabulary file written by [`EntityVocab::save`].
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let content = fs::read_to_string(path)?;
        let mut vocab = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if !line.is_empty() {
                vocab.push(line.to_string());
            }
        }
        if vocab.is_empty() {
            return Err(CorpusError::Configuration(format!(
                "entity vocab file '{}' is empty",
                path.display()
            )));
        }
        Ok(vocab)
    }
}
