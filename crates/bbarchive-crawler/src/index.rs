//! `repos.json`: index of archived repositories for the static site

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use bbarchive_core::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Repository object, relative to the publish root
    pub project_file: String,
    /// Directory holding the repository's objects, relative to the publish root
    pub project_path: String,
}

pub type RepositoryIndex = BTreeMap<String, IndexEntry>;

pub fn build_index<'a>(owner: &str, slugs: impl IntoIterator<Item = &'a str>) -> RepositoryIndex {
    slugs
        .into_iter()
        .map(|slug| {
            let entry = IndexEntry {
                project_file: format!("data/repositories/{owner}/{slug}.json"),
                project_path: format!("data/repositories/{owner}/{slug}/"),
            };
            (slug.to_string(), entry)
        })
        .collect()
}

/// Write `<publish_root>/repos.json`.
pub fn write_index(publish_root: &Path, index: &RepositoryIndex) -> Result<()> {
    let path = publish_root.join("repos.json");
    let json = serde_json::to_string_pretty(index).context("failed to serialize repository index")?;
    write_atomic(&path, json.as_bytes()).with_context(|| format!("failed to write {}", path.display()))
}
