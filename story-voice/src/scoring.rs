// Story Voice - Edit-distance scoring
// Word and character error rates between a source text and a transcript

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// WER/CER pair. `None` means the rate is not computable because one of the
/// compared strings was empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorRates {
    pub wer: Option<f32>,
    pub cer: Option<f32>,
}

impl ErrorRates {
    pub const NOT_COMPUTABLE: Self = Self {
        wer: None,
        cer: None,
    };

    pub fn is_computable(&self) -> bool {
        self.wer.is_some() && self.cer.is_some()
    }
}

/// Score a hypothesis against a reference text.
///
/// Blank input on either side short-circuits to [`ErrorRates::NOT_COMPUTABLE`]
/// instead of producing a ratio that looks meaningful.
pub fn score(reference: &str, hypothesis: &str) -> ErrorRates {
    if reference.trim().is_empty() || hypothesis.trim().is_empty() {
        return ErrorRates::NOT_COMPUTABLE;
    }

    ErrorRates {
        wer: Some(calculate_wer(reference, hypothesis)),
        cer: Some(calculate_cer(reference, hypothesis)),
    }
}

/// Word Error Rate: edit distance over whitespace tokens divided by the
/// number of reference tokens.
pub fn calculate_wer(reference: &str, hypothesis: &str) -> f32 {
    let ref_words = tokenize_words(reference);
    let hyp_words = tokenize_words(hypothesis);

    if ref_words.is_empty() {
        return if hyp_words.is_empty() { 0.0 } else { 1.0 };
    }

    let distance = levenshtein_distance(&ref_words, &hyp_words);
    distance as f32 / ref_words.len() as f32
}

/// Character Error Rate: edit distance over characters with whitespace
/// removed, divided by the reference character count.
pub fn calculate_cer(reference: &str, hypothesis: &str) -> f32 {
    let ref_chars = scoring_chars(reference);
    let hyp_chars = scoring_chars(hypothesis);

    if ref_chars.is_empty() {
        return if hyp_chars.is_empty() { 0.0 } else { 1.0 };
    }

    let distance = levenshtein_distance(&ref_chars, &hyp_chars);
    distance as f32 / ref_chars.len() as f32
}

// NFC first so precomposed and combining Vietnamese diacritics compare equal.
fn fold(text: &str) -> String {
    text.nfc().collect::<String>().to_lowercase()
}

fn tokenize_words(text: &str) -> Vec<String> {
    fold(text).split_whitespace().map(str::to_string).collect()
}

fn scoring_chars(text: &str) -> Vec<char> {
    fold(text).chars().filter(|c| !c.is_whitespace()).collect()
}

/// Unit-cost Levenshtein distance over a full (m+1)x(n+1) table.
fn levenshtein_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let m = a.len();
    let n = b.len();

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let width = n + 1;
    let mut table = vec![0usize; (m + 1) * width];
    for i in 0..=m {
        table[i * width] = i;
    }
    for j in 0..=n {
        table[j] = j;
    }

    for i in 1..=m {
        for j in 1..=n {
            let diagonal = table[(i - 1) * width + (j - 1)];
            table[i * width + j] = if a[i - 1] == b[j - 1] {
                diagonal
            } else {
                let up = table[(i - 1) * width + j];
                let left = table[i * width + (j - 1)];
                1 + up.min(left).min(diagonal)
            };
        }
    }

    table[m * width + n]
}
