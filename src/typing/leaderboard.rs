//! Local typing leaderboard
//!
//! Stored as JSON in the user data directory, best speed first, capped at
//! [`MAX_LEADERBOARD_ENTRIES`].

use super::TypingStats;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum number of entries kept
pub const MAX_LEADERBOARD_ENTRIES: usize = 50;

/// Leaderboard storage filename
const LEADERBOARD_FILENAME: &str = "typing_leaderboard.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub wpm: u32,
    pub accuracy: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
    storage_path: PathBuf,
}

impl Leaderboard {
    /// Load from `storage_path`; a missing or unreadable file gives an empty board
    pub fn load(storage_path: PathBuf) -> Self {
        let entries = match Self::load_from_disk(&storage_path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Ignoring unreadable leaderboard: {:#}", e);
                Vec::new()
            }
        };
        Self {
            entries,
            storage_path,
        }
    }

    /// Default location under the platform data directory
    pub fn default_path() -> PathBuf {
        match directories::ProjectDirs::from("", "", "prism") {
            Some(dirs) => dirs.data_dir().join(LEADERBOARD_FILENAME),
            None => PathBuf::from(LEADERBOARD_FILENAME),
        }
    }

    fn load_from_disk(path: &Path) -> Result<Vec<LeaderboardEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path).context("Failed to read leaderboard file")?;
        let entries = serde_json::from_str(&content).context("Failed to parse leaderboard")?;
        Ok(entries)
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Record a result; returns its 1-based rank, or `None` if the name is
    /// blank or the result did not make the cut
    pub fn submit(&mut self, name: &str, stats: TypingStats, at: DateTime<Utc>) -> Option<usize> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let entry = LeaderboardEntry {
            name: name.to_string(),
            wpm: stats.wpm,
            accuracy: stats.accuracy,
            timestamp: at,
        };
        // Ties keep submission order
        let position = self
            .entries
            .iter()
            .position(|e| e.wpm < entry.wpm)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
        self.entries.truncate(MAX_LEADERBOARD_ENTRIES);

        (position < MAX_LEADERBOARD_ENTRIES).then_some(position + 1)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.storage_path, content).with_context(|| {
            format!(
                "Failed to write leaderboard {}",
                self.storage_path.display()
            )
        })?;
        Ok(())
    }

    /// Remove every entry and the backing file
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        if self.storage_path.exists() {
            std::fs::remove_file(&self.storage_path)?;
        }
        Ok(())
    }
}
