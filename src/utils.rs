//! Text normalization helpers shared by the dump builder, mention scanning,
//! and the rule-based sentence tokenizer.

use crate::types::MentionText;

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_inline_whitespace<T: AsRef<str>>(text: T) -> String {
    let mut normalized = String::new();
    let mut seen_space = false;
    for ch in text.as_ref().chars() {
        if ch.is_whitespace() {
            if !seen_space {
                normalized.push(' ');
                seen_space = true;
            }
        } else {
            normalized.push(ch);
            seen_space = false;
        }
    }
    normalized.trim().to_string()
}

/// Clean raw page text for storage: normalize whitespace inside paragraphs
/// while preserving blank-line paragraph boundaries (the lead-section marker),
/// optionally stripping Latin accents.
pub fn clean_text(text: &str, strip_accents: bool) -> String {
    let mut blocks = Vec::new();
    for block in text.split("\n\n") {
        let normalized = normalize_inline_whitespace(block);
        if normalized.is_empty() {
            continue;
        }
        if strip_accents {
            blocks.push(normalized.chars().map(strip_accent).collect::<String>());
        } else {
            blocks.push(normalized);
        }
    }
    blocks.join("\n\n")
}

/// Normalize a surface string into its mention key form.
pub fn fold_mention(surface: &str, uncased: bool) -> MentionText {
    let normalized = normalize_inline_whitespace(surface);
    if uncased {
        normalized.to_lowercase()
    } else {
        normalized
    }
}

/// Byte spans of word-level units: alphanumeric runs plus single
/// punctuation characters. Whitespace never appears in a span.
pub fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;
    for (offset, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            if word_start.is_none() {
                word_start = Some(offset);
            }
            continue;
        }
        if let Some(start) = word_start.take() {
            spans.push((start, offset));
        }
        if !ch.is_whitespace() {
            spans.push((offset, offset + ch.len_utf8()));
        }
    }
    if let Some(start) = word_start {
        spans.push((start, text.len()));
    }
    spans
}

/// Byte spans of sentences detected by terminal punctuation and blank-line
/// boundaries, with decimal and dotted-abbreviation guards.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut last_end = 0;
    for (idx, &(offset, ch)) in chars.iter().enumerate() {
        if ch.is_whitespace() {
            if ch == '\n'
                && matches!(chars.get(idx + 1), Some(&(_, '\n')))
                && let Some(s) = start.take()
            {
                spans.push((s, last_end));
            }
            continue;
        }
        if start.is_none() {
            start = Some(offset);
        }
        last_end = offset + ch.len_utf8();
        if is_sentence_boundary(&chars, idx)
            && let Some(s) = start.take()
        {
            spans.push((s, last_end));
        }
    }
    if let Some(s) = start {
        spans.push((s, last_end));
    }
    spans
}

fn is_sentence_boundary(chars: &[(usize, char)], idx: usize) -> bool {
    match chars[idx].1 {
        '.' => is_dot_boundary(chars, idx),
        '!' | '?' => true,
        _ => false,
    }
}

fn is_dot_boundary(chars: &[(usize, char)], idx: usize) -> bool {
    if is_decimal_middle(chars, idx) || is_abbreviation_middle(chars, idx) {
        return false;
    }
    // ellipsis: defer to the last dot
    if idx + 1 < chars.len() && chars[idx + 1].1 == '.' {
        return false;
    }
    true
}

fn is_decimal_middle(chars: &[(usize, char)], idx: usize) -> bool {
    idx > 0
        && idx + 1 < chars.len()
        && chars[idx - 1].1.is_ascii_digit()
        && chars[idx + 1].1.is_ascii_digit()
}

fn is_abbreviation_middle(chars: &[(usize, char)], idx: usize) -> bool {
    idx > 0
        && idx + 1 < chars.len()
        && is_abbreviation_char(chars[idx - 1].1)
        && is_abbreviation_char(chars[idx + 1].1)
}

fn is_abbreviation_char(ch: char) -> bool {
    ch.is_ascii_uppercase() || ch.is_ascii_digit()
}

fn strip_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' | 'ă' => 'a',
        'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' | 'Ā' | 'Ă' => 'A',
        'é' | 'è' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ě' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ě' => 'E',
        'í' | 'ì' | 'î' | 'ï' | 'ī' | 'ĭ' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' | 'Ī' | 'Ĭ' => 'I',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ō' | 'ŏ' | 'ő' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' | 'Ō' | 'Ŏ' | 'Ő' => 'O',
        'ú' | 'ù' | 'û' | 'ü' | 'ū' | 'ŭ' | 'ů' | 'ű' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' => 'Y',
        'ñ' | 'ń' | 'ň' => 'n',
        'Ñ' | 'Ń' | 'Ň' => 'N',
        'ç' | 'ć' | 'č' => 'c',
        'Ç' | 'Ć' | 'Č' => 'C',
        'ß' => 's',
        'š' | 'ś' => 's',
        'Š' | 'Ś' => 'S',
        'ž' | 'ź' | 'ż' => 'z',
        'Ž' | 'Ź' | 'Ż' => 'Z',
        other => other,
    }
}
