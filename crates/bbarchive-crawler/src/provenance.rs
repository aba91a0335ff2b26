//! Provenance store: arena of fetch records for one repository's crawl
//!
//! Nodes are stored in a `Vec` and refer to their children by index, so the
//! crawl DAG (shared users, shared media) becomes a tree of references plus
//! the [`DedupCache`](crate::dedup::DedupCache) without cyclic ownership.

use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What was fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Json,
    Media,
}

/// Terminal state of one queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Fetched and written this run
    Saved,
    /// Already on disk from an earlier run; children rediscovered
    Cached,
    /// Repeat reference to a path visited earlier this run
    Skipped,
    /// Permanent per-item failure, nothing written
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProvenanceNode {
    pub kind: NodeKind,
    /// URL as referenced by the parent document
    pub absolute_url: String,
    /// URL actually requested (after rewrite rules)
    pub rewritten_url: String,
    pub local_path: PathBuf,
    pub already_processed: bool,
    /// `None` while the item is being fetched
    pub outcome: Option<Outcome>,
    children: Vec<NodeId>,
}

impl ProvenanceNode {
    pub fn new(
        kind: NodeKind,
        absolute_url: impl Into<String>,
        rewritten_url: impl Into<String>,
        local_path: PathBuf,
    ) -> Self {
        Self {
            kind,
            absolute_url: absolute_url.into(),
            rewritten_url: rewritten_url.into(),
            local_path,
            already_processed: false,
            outcome: None,
            children: Vec::new(),
        }
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Default)]
pub struct ProvenanceTree {
    nodes: Vec<ProvenanceNode>,
    roots: Vec<NodeId>,
}

impl ProvenanceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `node` under `parent` (or as a root) and return its id.
    ///
    /// # Panics
    /// If `parent` is a duplicate-reference node; those never get children.
    pub fn add(&mut self, parent: Option<NodeId>, node: ProvenanceNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        match parent {
            Some(p) => {
                let parent = &mut self.nodes[p.0];
                assert!(
                    !parent.already_processed,
                    "duplicate reference cannot own children"
                );
                parent.children.push(id);
            }
            None => self.roots.push(id),
        }
        id
    }

    pub fn get(&self, id: NodeId) -> &ProvenanceNode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut ProvenanceNode {
        &mut self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ProvenanceNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Breadth-first order from the roots, without recursion.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            tree: self,
            queue: self.roots.iter().copied().collect(),
        }
    }

    /// Count of nodes per outcome: (saved, cached, skipped, failed)
    pub fn outcome_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for node in &self.nodes {
            match node.outcome {
                Some(Outcome::Saved) => counts.0 += 1,
                Some(Outcome::Cached) => counts.1 += 1,
                Some(Outcome::Skipped) => counts.2 += 1,
                Some(Outcome::Failed) => counts.3 += 1,
                None => {}
            }
        }
        counts
    }
}

pub struct Walk<'a> {
    tree: &'a ProvenanceTree,
    queue: VecDeque<NodeId>,
}

impl Iterator for Walk<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.queue.pop_front()?;
        self.queue.extend(self.tree.get(id).children.iter().copied());
        Some(id)
    }
}
