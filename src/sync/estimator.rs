use std::slice;

use super::chunker::{Chunk, WORD_PUNCTUATION};

/// Estimated display time for one word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordTiming<'a> {
    /// The raw token, punctuation still attached.
    pub word: &'a str,
    /// How long this word holds before the next one, in milliseconds.
    pub delay_ms: f64,
}

/// Lazy per-word timing for a chunk.
///
/// A clone continues from the same position; call [`estimate`] again to
/// start over.
#[derive(Debug, Clone)]
pub struct Estimate<'a> {
    words: slice::Iter<'a, String>,
    interval_ms: f64,
    average_len: f64,
}

/// Milliseconds per word at the given rate.
pub fn baseline_interval_ms(rate: f32, baseline_wpm: f32) -> f64 {
    let words_per_second = (f64::from(baseline_wpm) / 60.0) * f64::from(rate);
    1000.0 / words_per_second
}

/// Estimate per-word delays for a chunk spoken at `rate`.
///
/// Every word gets the baseline interval scaled by its length relative to the
/// chunk's average word length, so the chunk total stays at
/// `word_count * interval` while long words hold longer. Lengths ignore
/// punctuation.
pub fn estimate(chunk: &Chunk, rate: f32, baseline_wpm: f32) -> Estimate<'_> {
    let words = chunk.words();
    let total_len: usize = words.iter().map(|w| stripped_len(w)).sum();
    let average_len = if words.is_empty() {
        0.0
    } else {
        total_len as f64 / words.len() as f64
    };

    Estimate {
        words: words.iter(),
        interval_ms: baseline_interval_ms(rate, baseline_wpm),
        average_len,
    }
}

impl<'a> Estimate<'a> {
    fn timing(&self, word: &'a str) -> WordTiming<'a> {
        let delay_ms = if self.average_len > 0.0 {
            self.interval_ms * (stripped_len(word) as f64 / self.average_len)
        } else {
            self.interval_ms
        };
        WordTiming {
            word,
            delay_ms: delay_ms.max(0.0),
        }
    }

    /// Sum of the remaining delays.
    pub fn total_ms(&self) -> f64 {
        self.clone().map(|t| t.delay_ms).sum()
    }
}

impl<'a> Iterator for Estimate<'a> {
    type Item = WordTiming<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let word = self.words.next()?;
        Some(self.timing(word))
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        let word = self.words.nth(n)?;
        Some(self.timing(word))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.words.size_hint()
    }
}

impl ExactSizeIterator for Estimate<'_> {}

fn stripped_len(word: &str) -> usize {
    word.chars().filter(|c| !WORD_PUNCTUATION.contains(c)).count()
}
