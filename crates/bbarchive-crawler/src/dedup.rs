//! Per-repository dedup cache keyed by local file path

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::provenance::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// First reference this run: process fully
    First,
    /// Path already claimed by the given node
    Repeat(NodeId),
}

/// Local path → first node that claimed it.
///
/// Lives for one repository's crawl and is dropped with it.
#[derive(Debug, Default)]
pub struct DedupCache {
    seen: FxHashMap<PathBuf, NodeId>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for `node`, or report who claimed it first.
    pub fn visit(&mut self, path: &Path, node: NodeId) -> Visit {
        match self.seen.get(path) {
            Some(&first) => Visit::Repeat(first),
            None => {
                self.seen.insert(path.to_path_buf(), node);
                Visit::First
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
