//! Relevance selection: which past turns are worth showing the model.
//!
//! A turn is relevant when it shares at least two distinct words with the
//! new prompt. Words are whitespace-split and lower-cased; punctuation stays
//! attached, so `"pizza?"` and `"pizza"` are different words. The transcript
//! is scanned newest-first and the scan stops at `limit` matches, so older
//! turns never displace more recent ones.

use parley_core::turn::Turn;
use std::collections::HashSet;

/// Minimum number of distinct shared words for a turn to count as relevant.
pub const MIN_SHARED_WORDS: usize = 2;

/// Select up to `limit` turns relevant to `prompt`, oldest first.
pub fn select<'a>(prompt: &str, transcript: &'a [Turn], limit: usize) -> Vec<&'a Turn> {
    if limit == 0 {
        return Vec::new();
    }

    let prompt_words = words(prompt);
    let mut relevant: Vec<&Turn> = transcript
        .iter()
        .rev()
        .filter(|turn| prompt_words.intersection(&words(turn.text())).count() >= MIN_SHARED_WORDS)
        .take(limit)
        .collect();

    relevant.reverse();
    relevant
}

fn words(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}
