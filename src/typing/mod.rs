//! Typing speed test
//!
//! Scores a typed attempt against a sample text and keeps a local
//! leaderboard of results.

mod leaderboard;

pub use leaderboard::{Leaderboard, LeaderboardEntry, MAX_LEADERBOARD_ENTRIES};

use serde::Serialize;
use std::time::Duration;

/// Texts offered by the test, in rotation order
pub const SAMPLE_TEXTS: [&str; 3] = [
    "Design is a conversation between material and intention.",
    "Rammed earth breathes with the climate and anchors the home.",
    "Whenua and wai shape how we inhabit place and remember.",
];

/// Index of the text after `index`, wrapping around
pub fn next_text_index(index: usize) -> usize {
    (index + 1) % SAMPLE_TEXTS.len()
}

/// Score of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TypingStats {
    /// Words per minute, rounded
    pub wpm: u32,
    /// Percentage of typed characters matching the target at the same position
    pub accuracy: u32,
    /// Typed text is exactly the target
    pub complete: bool,
}

impl TypingStats {
    pub fn compute(target: &str, typed: &str, elapsed: Duration) -> Self {
        let typed_chars = typed.chars().count();
        let correct = typed
            .chars()
            .zip(target.chars())
            .filter(|(a, b)| a == b)
            .count();

        let accuracy = if typed_chars == 0 {
            100
        } else {
            (correct as f64 / typed_chars as f64 * 100.0).round() as u32
        };

        let minutes = elapsed.as_secs_f64() / 60.0;
        let words = typed.split_whitespace().count();
        let wpm = if minutes > 0.0 {
            (words as f64 / minutes).round() as u32
        } else {
            0
        };

        Self {
            wpm,
            accuracy,
            complete: typed == target,
        }
    }
}

/// Per-character verdict for rendering the target text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharMark {
    /// Not typed yet
    Untyped,
    Correct,
    Incorrect,
}

pub fn char_marks(target: &str, typed: &str) -> Vec<(char, CharMark)> {
    let mut typed = typed.chars();
    target
        .chars()
        .map(|expected| {
            let mark = match typed.next() {
                None => CharMark::Untyped,
                Some(c) if c == expected => CharMark::Correct,
                Some(_) => CharMark::Incorrect,
            };
            (expected, mark)
        })
        .collect()
}
