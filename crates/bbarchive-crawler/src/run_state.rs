//! Persisted per-repository completion markers (`run_state.json`)

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bbarchive_core::write_atomic;

/// Repositories whose crawl and relativization both finished.
///
/// A repository is either fully redone or fully skipped; there is no
/// mid-crawl checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub completed: BTreeMap<String, DateTime<Utc>>,
}

impl RunState {
    /// Read state from `path`; a missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize run state")?;
        write_atomic(path, json.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn is_complete(&self, repository: &str) -> bool {
        self.completed.contains_key(repository)
    }

    pub fn completed_at(&self, repository: &str) -> Option<DateTime<Utc>> {
        self.completed.get(repository).copied()
    }

    pub fn mark_complete(&mut self, repository: impl Into<String>, at: DateTime<Utc>) {
        self.completed.insert(repository.into(), at);
    }

    pub fn clear(&mut self) {
        self.completed.clear();
    }
}
