//! Sentence-scoped negation analysis for clinical narrative text.
//!
//! A feature phrase counts as asserted when at least one occurrence
//! anywhere in the text is not preceded by a negation marker within its own
//! sentence — existential semantics: one clear positive mention outweighs
//! any number of negated ones. Negation never crosses a sentence boundary.

/// Markers that negate a phrase when they appear earlier in the same
/// sentence. Multi-word markers are matched as literal word sequences.
pub const NEGATION_MARKERS: &[&str] = &[
    "no",
    "not",
    "without",
    "absent",
    "excluded",
    "negative for",
    "lack of",
    "neither",
    "free of",
    "denies",
];

/// Split on sentence-ending punctuation and newlines. Empty fragments are
/// dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split(|c| matches!(c, '.' | ';' | '!' | '?' | '\n'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// True when `phrase` is asserted somewhere in `text` (case-insensitive).
pub fn phrase_asserted(text: &str, phrase: &str) -> bool {
    let phrase = phrase.to_lowercase();
    if phrase.is_empty() {
        return false;
    }
    for sentence in split_sentences(text) {
        let lower = sentence.to_lowercase();
        let mut from = 0;
        while let Some(pos) = lower[from..].find(&phrase) {
            let at = from + pos;
            // Only the text preceding this occurrence, within this sentence,
            // can negate it.
            if !prefix_negated(&lower[..at]) {
                return true;
            }
            from = at + phrase.len();
        }
    }
    false
}

/// True when `phrase` occurs in `text` at all, negated or not.
pub fn phrase_mentioned(text: &str, phrase: &str) -> bool {
    let phrase = phrase.to_lowercase();
    !phrase.is_empty() && text.to_lowercase().contains(&phrase)
}

/// Scan an already-lowercased sentence prefix for a negation marker,
/// matching whole words so "no" never fires inside "nodule".
fn prefix_negated(prefix: &str) -> bool {
    let words: Vec<&str> = prefix
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    for marker in NEGATION_MARKERS {
        let marker_words: Vec<&str> = marker.split(' ').collect();
        if words
            .windows(marker_words.len())
            .any(|w| w == marker_words.as_slice())
        {
            return true;
        }
    }
    false
}
