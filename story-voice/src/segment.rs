// Story Voice - Text Segmentation
// Splits long-form text into chunks sized for a single synthesis call.
//
// Sentences are merged greedily up to the character budget. Abbreviations
// that end in a period are masked first so they are not read as sentence
// ends, and sentences longer than the budget are split on commas, then on
// words. A short sentence that would open a chunk alone takes the sentence
// before it along. Budgets are measured in UTF-8 bytes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::validation::ValidationError;

/// A sentence with fewer words than this never opens a chunk on its own when
/// the sentence before it can move forward and share the chunk in budget.
pub const SHORT_SENTENCE_WORDS: usize = 5;

/// Period-terminated abbreviations that never end a sentence.
const ABBREVIATION_PATTERNS: &[&str] = &[
    r"TP\.",
    r"Tp\.",
    r"Tr\.",
    r"CN\.",
    r"T\d+\.",
    r"Th\d+\.",
    r"BS\.",
    r"TS\.",
    r"PGS\.",
    r"GS\.",
    r"v\.v\.\.",
    r"v\.v\.",
];

/// Characters accepted as the end of a generation text.
const GENERATION_TERMINALS: &[char] = &['.', '!', '?', ',', ';', ':', '。', '！', '？'];

/// One chunk of a segmented text, tagged with its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

impl TextChunk {
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }
}

/// Segment `text` into ordered chunks no longer than `max_chars` bytes.
pub fn segment(text: &str, max_chars: usize) -> Vec<TextChunk> {
    chunk_text(text, max_chars)
        .into_iter()
        .enumerate()
        .map(|(index, text)| TextChunk { index, text })
        .collect()
}

/// Split `text` into chunk strings no longer than `max_chars` bytes.
///
/// A single word longer than the budget is kept whole. Text that already
/// fits is returned untouched; empty text yields no chunks.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let max_chars = if max_chars == 0 {
        log::warn!("[Segment] max_chars=0, using 1");
        1
    } else {
        max_chars
    };

    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let guard = AbbreviationGuard::protect(text);
    let sentences = split_sentences(&guard.text);

    let mut merged: Vec<String> = Vec::new();
    let mut current = String::new();
    // Byte offset of the last whole sentence in `current`, 0 when there is
    // only one (or `current` ends in a force-split piece).
    let mut last_start = 0usize;

    for sentence in sentences {
        if guard.joined_len(&current, &sentence) <= max_chars {
            if !current.is_empty() {
                current.push(' ');
                last_start = current.len();
            }
            current.push_str(&sentence);
            continue;
        }

        if sentence.split_whitespace().count() < SHORT_SENTENCE_WORDS
            && last_start > 0
            && guard.joined_len(&current[last_start..], &sentence) <= max_chars
            && current[..last_start].split_whitespace().count() >= SHORT_SENTENCE_WORDS
        {
            let tail = current.split_off(last_start);
            merged.push(current.trim_end().to_string());
            last_start = tail.len() + 1;
            current = format!("{} {}", tail, sentence);
            continue;
        }

        if !current.is_empty() {
            merged.push(std::mem::take(&mut current));
        }
        last_start = 0;

        if guard.visible_len(&sentence) > max_chars {
            let mut pieces = force_split(&guard, &sentence, max_chars);
            current = pieces.pop().unwrap_or_default();
            merged.extend(pieces);
        } else {
            current = sentence;
        }
    }

    if !current.is_empty() {
        merged.push(current);
    }

    let chunks: Vec<String> = merged
        .iter()
        .map(|chunk| guard.restore(chunk))
        .filter(|chunk| !chunk.trim().is_empty())
        .collect();

    if chunks.is_empty() {
        return vec![text.to_string()];
    }

    log::debug!(
        "[Segment] {} bytes -> {} chunks (max_chars={})",
        text.len(),
        chunks.len(),
        max_chars
    );

    chunks
}

/// Collapse whitespace and make sure the generation text ends with
/// punctuation the acoustic model can close a phrase on.
pub fn normalize_generation_text(text: &str) -> Result<String, ValidationError> {
    let collapsed = match whitespace_run() {
        Some(re) => re.replace_all(text, " ").trim().to_string(),
        None => text.split_whitespace().collect::<Vec<_>>().join(" "),
    };

    let Some(last) = collapsed.chars().last() else {
        return Err(ValidationError::EmptyGenerationText);
    };

    let mut normalized = collapsed;
    if !GENERATION_TERMINALS.contains(&last) {
        normalized.push('.');
    }
    Ok(normalized)
}

pub(crate) fn whitespace_run() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").ok()).as_ref()
}

fn sentence_boundary() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?;]+\s+").ok()).as_ref()
}

fn abbreviation_regexes() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        ABBREVIATION_PATTERNS
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("[Segment] Skipping abbreviation pattern {}: {}", pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// Split on runs of sentence punctuation followed by whitespace, keeping the
/// punctuation on the sentence it closes.
fn split_sentences(text: &str) -> Vec<String> {
    let Some(boundary) = sentence_boundary() else {
        return vec![text.trim().to_string()];
    };

    let mut sentences = Vec::new();
    let mut start = 0;

    for m in boundary.find_iter(text) {
        let punctuation = m.as_str().trim_end();
        let sentence = format!("{}{}", &text[start..m.start()], punctuation);
        let trimmed = sentence.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_string());
        }
        start = m.end();
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Split one over-long sentence: comma clauses first, words as a fallback.
fn force_split(guard: &AbbreviationGuard, sentence: &str, max_chars: usize) -> Vec<String> {
    let clauses: Vec<&str> = sentence
        .split_inclusive(',')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .collect();

    if clauses.len() <= 1 {
        return split_words(guard, sentence, max_chars);
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for clause in clauses {
        if guard.visible_len(clause) > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(split_words(guard, clause, max_chars));
            continue;
        }

        if guard.joined_len(&current, clause) <= max_chars {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(clause);
        } else {
            pieces.push(std::mem::take(&mut current));
            current = clause.to_string();
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

fn split_words(guard: &AbbreviationGuard, text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() || guard.joined_len(&current, word) <= max_chars {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        } else {
            pieces.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

/// Masks abbreviations with unique placeholders and restores them later.
struct AbbreviationGuard {
    text: String,
    mappings: Vec<(String, String)>,
}

impl AbbreviationGuard {
    fn protect(text: &str) -> Self {
        let mut protected = text.to_string();
        let mut mappings = Vec::new();

        for (pattern_index, re) in abbreviation_regexes().iter().enumerate() {
            if !re.is_match(&protected) {
                continue;
            }
            let mut occurrence = 0usize;
            let replaced = re
                .replace_all(&protected, |caps: &regex::Captures<'_>| {
                    let placeholder = format!("__ABBR{}_{}__", pattern_index, occurrence);
                    occurrence += 1;
                    mappings.push((placeholder.clone(), caps[0].to_string()));
                    placeholder
                })
                .into_owned();
            protected = replaced;
        }

        Self {
            text: protected,
            mappings,
        }
    }

    fn restore(&self, chunk: &str) -> String {
        let mut restored = chunk.to_string();
        for (placeholder, original) in &self.mappings {
            if restored.contains(placeholder.as_str()) {
                restored = restored.replace(placeholder.as_str(), original);
            }
        }
        restored
    }

    /// Byte length of `s` once its placeholders are restored.
    fn visible_len(&self, s: &str) -> usize {
        self.mappings
            .iter()
            .filter(|(placeholder, _)| s.contains(placeholder.as_str()))
            .fold(s.len(), |len, (placeholder, original)| {
                len - placeholder.len() + original.len()
            })
    }

    fn joined_len(&self, current: &str, next: &str) -> usize {
        if current.is_empty() {
            self.visible_len(next)
        } else {
            self.visible_len(current) + 1 + self.visible_len(next)
        }
    }
}
