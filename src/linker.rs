//! Resolves token spans to entity candidates using the mention database.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::mention_db::MentionDb;
use crate::tokenize::Token;
use crate::types::EntityId;

/// One resolved span: token offsets, chosen entity, and its prior probability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct EntityLink {
    /// Index of the first token covered by the link.
    pub start: usize,
    /// Index one past the last token covered by the link.
    pub end: usize,
    /// Resolved entity id.
    pub entity: EntityId,
    /// Prior probability of the chosen candidate.
    pub prior_prob: f64,
}

/// Entity linker bound to a mention database and a confidence threshold.
pub struct EntityLinker {
    db: Arc<MentionDb>,
    min_prior_prob: f64,
}

impl EntityLinker {
    /// Bind `db` with the minimum prior probability a link must reach.
    pub fn new(db: Arc<MentionDb>, min_prior_prob: f64) -> Self {
        Self { db, min_prior_prob }
    }

    /// The bound mention database.
    pub fn mention_db(&self) -> &MentionDb {
        &self.db
    }

    /// Link one tokenized sentence.
    ///
    /// Scans for maximal token spans whose surface is a known mention
    /// (longest match first) and keeps the candidate with the highest prior
    /// probability. A match whose best candidate falls below the threshold is
    /// discarded whole; its span stays consumed, so emitted links never
    /// overlap. The linker operates strictly within one sentence.
    pub fn link(&self, sentence: &str, tokens: &[Token]) -> Vec<EntityLink> {
        if tokens.is_empty() {
            return Vec::new();
        }
        let spans: Vec<(usize, usize)> = tokens
            .iter()
            .map(|token| (token.start, token.end))
            .collect();
        let mut links = Vec::new();
        for (start, end, key) in self.db.match_spans(sentence, &spans) {
            let Some(candidates) = self.db.candidates_for_key(&key) else {
                continue;
            };
            // candidate lists are sorted best-first at build time
            let best = &candidates[0];
            if best.prior_prob < self.min_prior_prob {
                continue;
            }
            links.push(EntityLink {
                start,
                end,
                entity: best.entity.clone(),
                prior_prob: best.prior_prob,
            });
        }
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::{Anchor, DumpDbWriter};
    use crate::mention_db::{MentionDb, MentionDbOptions};
    use crate::tokenize::{Tokenizer, VocabTokenizer};
    use tempfile::tempdir;

    fn build_db(pages: &[(&str, &str, &[(&str, &str)])]) -> MentionDb {
        let dir = tempdir().expect("tempdir");
        let mut writer = DumpDbWriter::create(dir.path().join("dump.bin"), false).expect("create");
        for (title, text, links) in pages {
            let anchors = links
                .iter()
                .map(|(text, target)| Anchor {
                    text: (*text).to_string(),
                    target: (*target).to_string(),
                })
                .collect();
            writer.append(title, text, anchors).expect("append");
        }
        let dump = writer.finish().expect("finish");
        let options = MentionDbOptions {
            pool_size: 1,
            min_link_prob: 0.1,
            ..MentionDbOptions::default()
        };
        MentionDb::build(&dump, &options).expect("build")
    }

    fn tokenizer() -> VocabTokenizer {
        VocabTokenizer::new(
            ["[UNK]", "paris", "is", "the", "capital", "of", "france", "new", "york", "city"],
            true,
        )
    }

    #[test]
    fn link_emits_known_mentions_above_threshold() {
        let db = build_db(&[(
            "France",
            "Paris is the capital of France.",
            &[("Paris", "Paris_(city)"), ("France", "France")],
        )]);
        let linker = EntityLinker::new(Arc::new(db), 0.1);
        let sentence = "Paris is the capital of France";
        let tokens = tokenizer().tokenize(sentence);
        let links = linker.link(sentence, &tokens);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].entity, "Paris_(city)");
        assert_eq!(links[0].start, 0);
        assert_eq!(links[0].end, 1);
        assert_eq!(links[1].entity, "France");
        assert!(links.iter().all(|link| link.prior_prob >= 0.1));
    }

    #[test]
    fn link_never_emits_overlapping_spans() {
        let db = build_db(&[(
            "NYC",
            "New York City contains New York. New York City is large.",
            &[
                ("New York City", "New_York_City"),
                ("New York", "New_York_(state)"),
                ("New York City", "New_York_City"),
            ],
        )]);
        let linker = EntityLinker::new(Arc::new(db), 0.0);
        let sentence = "New York City hosts people";
        let tokens = tokenizer().tokenize(sentence);
        let links = linker.link(sentence, &tokens);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].entity, "New_York_City");
        assert_eq!((links[0].start, links[0].end), (0, 3));
    }

    #[test]
    fn link_resolves_punctuated_mentions() {
        let db = build_db(&[(
            "Texas",
            "Paris, Texas is a small city. People often mention Paris, Texas fondly.",
            &[
                ("Paris, Texas", "Paris,_Texas"),
                ("Paris, Texas", "Paris,_Texas"),
            ],
        )]);
        let linker = EntityLinker::new(Arc::new(db), 0.5);
        let sentence = "Paris, Texas is a small city";
        let tokens = tokenizer().tokenize(sentence);
        let links = linker.link(sentence, &tokens);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].entity, "Paris,_Texas");
        assert_eq!((links[0].start, links[0].end), (0, 3));
    }

    #[test]
    fn link_discards_matches_below_threshold() {
        let db = build_db(&[(
            "France",
            "Paris is the capital of France. Paris again and Paris once more.",
            &[("Paris", "Paris_(city)")],
        )]);
        // one link out of three occurrences: prior 1/3
        let linker = EntityLinker::new(Arc::new(db), 0.9);
        let sentence = "Paris is the capital";
        let tokens = tokenizer().tokenize(sentence);
        assert!(linker.link(sentence, &tokens).is_empty());
    }

    #[test]
    fn link_handles_empty_sentence() {
        let db = build_db(&[("France", "Paris here.", &[("Paris", "Paris_(city)")])]);
        let linker = EntityLinker::new(Arc::new(db), 0.1);
        assert!(linker.link("", &[]).is_empty());
    }
}
