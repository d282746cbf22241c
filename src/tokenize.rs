//! Tokenizer and sentence-tokenizer seams.
//!
//! Subword and sentence-grammar internals stay behind these traits; the
//! built-in implementations are deterministic stand-ins good enough for
//! corpus building and tests.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::errors::CorpusError;
use crate::types::TokenId;
use crate::utils::{sentence_spans, word_spans};

/// One token with its byte span into the tokenized text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    /// Dense vocabulary id.
    pub id: TokenId,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

/// One sentence's byte span into the source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentenceSpan {
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

/// Deterministic text-to-token mapping.
pub trait Tokenizer: Send + Sync {
    /// Tokenize `text`, returning tokens in order with byte spans.
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

/// Deterministic sentence boundary detection.
pub trait SentenceTokenizer: Send + Sync {
    /// Split `text` into ordered sentence spans.
    fn split(&self, text: &str) -> Vec<SentenceSpan>;
}

/// Token id reserved for out-of-vocabulary words when the vocab has no
/// explicit unknown marker.
const FALLBACK_UNK_ID: TokenId = 0;
/// Conventional unknown-token surface in word vocab files.
const UNK_SURFACE: &str = "[UNK]";

/// Word tokenizer backed by a fixed vocabulary file (one surface per line).
pub struct VocabTokenizer {
    vocab: HashMap<String, TokenId>,
    lowercase: bool,
    unk_id: TokenId,
}

impl VocabTokenizer {
    /// Build from an in-memory vocabulary; ids follow the given order.
    pub fn new<I, S>(words: I, lowercase: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = HashMap::new();
        for (idx, word) in words.into_iter().enumerate() {
            vocab.entry(word.into()).or_insert(idx as TokenId);
        }
        let unk_id = vocab.get(UNK_SURFACE).copied().unwrap_or(FALLBACK_UNK_ID);
        Self {
            vocab,
            lowercase,
            unk_id,
        }
    }

    /// Load a vocabulary file with one surface per line.
    pub fn from_file(path: &Path, lowercase: bool) -> Result<Self, CorpusError> {
        let content = fs::read_to_string(path)?;
        let words: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if words.is_empty() {
            return Err(CorpusError::Configuration(format!(
                "word vocab file '{}' is empty",
                path.display()
            )));
        }
        Ok(Self::new(words, lowercase))
    }

    /// Number of distinct vocabulary entries.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn lookup(&self, surface: &str) -> TokenId {
        let id = if self.lowercase {
            let folded = surface.to_lowercase();
            self.vocab.get(folded.as_str()).copied()
        } else {
            self.vocab.get(surface).copied()
        };
        id.unwrap_or(self.unk_id)
    }
}

impl Tokenizer for VocabTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        word_spans(text)
            .into_iter()
            .map(|(start, end)| Token {
                id: self.lookup(&text[start..end]),
                start,
                end,
            })
            .collect()
    }
}

/// Heuristic sentence tokenizer over terminal punctuation and blank lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleSentenceTokenizer;

impl SentenceTokenizer for RuleSentenceTokenizer {
    fn split(&self, text: &str) -> Vec<SentenceSpan> {
        sentence_spans(text)
            .into_iter()
            .map(|(start, end)| SentenceSpan { start, end })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocab_tokenizer_maps_known_and_unknown_words() {
        let tokenizer = VocabTokenizer::new(["[UNK]", "paris", "is", "nice"], true);
        let tokens = tokenizer.tokenize("Paris is beautiful");
        let ids: Vec<TokenId> = tokens.iter().map(|token| token.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
        let text = "Paris is beautiful";
        assert_eq!(&text[tokens[0].start..tokens[0].end], "Paris");
        assert_eq!(&text[tokens[2].start..tokens[2].end], "beautiful");
    }

    #[test]
    fn cased_tokenizer_misses_folded_surfaces() {
        let tokenizer = VocabTokenizer::new(["[UNK]", "paris"], false);
        let tokens = tokenizer.tokenize("Paris");
        assert_eq!(tokens[0].id, 0);
    }

    #[test]
    fn tokenize_is_deterministic() {
        let tokenizer = VocabTokenizer::new(["[UNK]", "a", "b", "."], true);
        let first = tokenizer.tokenize("A b. a");
        let second = tokenizer.tokenize("A b. a");
        assert_eq!(first, second);
    }

    #[test]
    fn rule_sentence_tokenizer_returns_spans() {
        let text = "One sentence here. Another one!";
        let spans = RuleSentenceTokenizer.split(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].start..spans[0].end], "One sentence here.");
        assert_eq!(&text[spans[1].start..spans[1].end], "Another one!");
        assert!(RuleSentenceTokenizer.split("").is_empty());
    }
}
