//! Fetch/crawl worker loop for one repository
//!
//! Breadth-first over an explicit queue. Every dequeued item becomes a
//! provenance node, claims its local path in the dedup cache, then resolves
//! to `Saved`, `Cached`, `Skipped` or `Failed`. Only cancellation and local
//! I/O errors abort the crawl; HTTP failures are per-item.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde_json::Value;

use bbarchive_core::{ApiClient, write_atomic};

use crate::dedup::{DedupCache, Visit};
use crate::error::CrawlError;
use crate::extract::{Extractor, next_page};
use crate::locator::Locator;
use crate::paths::ArchiveLayout;
use crate::provenance::{NodeId, NodeKind, Outcome, ProvenanceNode, ProvenanceTree};
use crate::report::ProgressSender;
use crate::rules::RuleSet;
use crate::stats::RepoStats;

/// `owner/slug` of a repository on the source host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    pub owner: String,
    pub slug: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            slug: slug.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.slug)
    }

    /// Endpoint of the repository object, relative to the API base
    pub fn endpoint(&self) -> String {
        format!("repositories/{}/{}", self.owner, self.slug)
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.slug)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    FetchJson,
    DownloadFile,
}

#[derive(Debug)]
struct Task {
    kind: TaskKind,
    url: String,
    parent: Option<NodeId>,
}

/// A finished crawl: the provenance tree and its counters.
#[derive(Debug)]
pub struct RepoCrawl {
    pub tree: ProvenanceTree,
    pub stats: RepoStats,
}

/// Crawl `repository` to completion starting from its repository object.
pub fn crawl_repository(
    client: &mut ApiClient,
    layout: &ArchiveLayout,
    progress: &ProgressSender,
    repository: &Repository,
) -> Result<RepoCrawl, CrawlError> {
    // Escaped identifiers in fixed templates.
    let extractor = Extractor::bitbucket(&layout.api_base, &repository.owner, &repository.slug)
        .expect("extraction patterns are built from escaped input");
    let mut crawl = Crawl {
        client,
        layout,
        progress,
        repository,
        rules: RuleSet::bitbucket(&repository.owner, &repository.slug),
        extractor,
        tree: ProvenanceTree::new(),
        dedup: DedupCache::new(),
        queue: VecDeque::new(),
        stats: RepoStats::default(),
    };
    crawl.queue.push_back(Task {
        kind: TaskKind::FetchJson,
        url: format!("{}{}", layout.api_base, repository.endpoint()),
        parent: None,
    });
    crawl.run()?;

    let Crawl { tree, stats, .. } = crawl;
    Ok(RepoCrawl { tree, stats })
}

struct Crawl<'a> {
    client: &'a mut ApiClient,
    layout: &'a ArchiveLayout,
    progress: &'a ProgressSender,
    repository: &'a Repository,
    rules: RuleSet,
    extractor: Extractor,
    tree: ProvenanceTree,
    dedup: DedupCache,
    queue: VecDeque<Task>,
    stats: RepoStats,
}

impl Crawl<'_> {
    fn run(&mut self) -> Result<(), CrawlError> {
        let name = self.repository.full_name();
        while let Some(task) = self.queue.pop_front() {
            self.client.cancel_token().check()?;
            self.progress.transient(format!(
                "{name}: {} done, {} queued | {}",
                self.tree.len(),
                self.queue.len(),
                self.short_url(&task.url)
            ));
            match task.kind {
                TaskKind::FetchJson => self.fetch_json(task)?,
                TaskKind::DownloadFile => self.download_file(task)?,
            }
        }
        self.progress.flush(format!(
            "{name}: crawled {} items ({} failed)",
            self.tree.len(),
            self.stats.failed
        ));
        Ok(())
    }

    fn fetch_json(&mut self, task: Task) -> Result<(), CrawlError> {
        let Some(locator) = Locator::from_url(&task.url, &self.layout.api_base) else {
            let id = self.tree.add(
                task.parent,
                ProvenanceNode::new(NodeKind::Json, &task.url, &task.url, PathBuf::new()),
            );
            self.fail(id, "not under the API base");
            return Ok(());
        };
        let rewritten = self.rules.rewrite(&locator);
        let rewritten_url = rewritten.to_url(&self.layout.api_base);
        let local = self.layout.json_path(&rewritten);
        let id = self.tree.add(
            task.parent,
            ProvenanceNode::new(NodeKind::Json, &task.url, &rewritten_url, local.clone()),
        );
        if let Visit::Repeat(_) = self.dedup.visit(&local, id) {
            self.skip(id);
            return Ok(());
        }

        let (body, outcome) = if local.is_file() {
            let body = std::fs::read_to_string(&local).map_err(|e| CrawlError::io(&local, e))?;
            (body, Outcome::Cached)
        } else {
            self.stats.requests += 1;
            let response = match self.client.get(&rewritten_url) {
                Ok(r) => r,
                Err(e) if e.is_cancelled() => return Err(CrawlError::Cancelled),
                Err(e) => {
                    self.fail(id, &e.to_string());
                    return Ok(());
                }
            };
            if !response.is_success() {
                self.fail(id, &format!("HTTP {}", response.status));
                return Ok(());
            }
            (response.body, Outcome::Saved)
        };

        let doc: Value = match serde_json::from_str(&body) {
            Ok(doc) => doc,
            Err(e) => {
                self.fail(id, &format!("not a JSON document ({e})"));
                return Ok(());
            }
        };
        if outcome == Outcome::Saved {
            write_atomic(&local, body.as_bytes()).map_err(|e| CrawlError::io(&local, e))?;
            self.stats.saved += 1;
        } else {
            self.stats.cached += 1;
        }
        self.tree.get_mut(id).outcome = Some(outcome);

        self.discover(id, task.parent, &body, &doc);
        Ok(())
    }

    /// Enqueue the next page (as a sibling), media and API links (as children).
    fn discover(&mut self, id: NodeId, parent: Option<NodeId>, body: &str, doc: &Value) {
        let next = next_page(doc);
        if let Some(next) = next {
            self.queue.push_back(Task {
                kind: TaskKind::FetchJson,
                url: next.to_string(),
                parent,
            });
        }

        let media = self.extractor.media_urls(body);
        for url in &media {
            self.queue.push_back(Task {
                kind: TaskKind::DownloadFile,
                url: url.clone(),
                parent: Some(id),
            });
        }

        let api_base = &self.layout.api_base;
        for link in self.extractor.api_links(body) {
            if let Some(changes) = self.extractor.issue_changes_link(&link) {
                self.queue.push_back(Task {
                    kind: TaskKind::FetchJson,
                    url: format!("{api_base}{changes}"),
                    parent: Some(id),
                });
            }
            let url = format!("{api_base}{link}");
            // Attachments are both API links and media; download once.
            if media.contains(&url) || next == Some(url.as_str()) {
                continue;
            }
            if self.rules.should_ignore(&Locator::from_reference(&link).endpoint) {
                continue;
            }
            self.queue.push_back(Task {
                kind: TaskKind::FetchJson,
                url,
                parent: Some(id),
            });
        }
    }

    fn download_file(&mut self, task: Task) -> Result<(), CrawlError> {
        let local = self.layout.media_path(&task.url);
        let id = self.tree.add(
            task.parent,
            ProvenanceNode::new(NodeKind::Media, &task.url, &task.url, local.clone()),
        );
        if let Visit::Repeat(_) = self.dedup.visit(&local, id) {
            self.skip(id);
            return Ok(());
        }
        if local.is_file() {
            self.stats.cached += 1;
            self.tree.get_mut(id).outcome = Some(Outcome::Cached);
            return Ok(());
        }

        self.stats.requests += 1;
        let authenticated = task.url.starts_with(&self.layout.api_base);
        match self.client.download(&task.url, &local, authenticated) {
            Ok(bytes) => {
                self.stats.downloaded += 1;
                self.stats.bytes += bytes;
                self.tree.get_mut(id).outcome = Some(Outcome::Saved);
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(CrawlError::Cancelled),
            Err(e) => {
                self.fail(id, &e.to_string());
                Ok(())
            }
        }
    }

    fn skip(&mut self, id: NodeId) {
        let node = self.tree.get_mut(id);
        node.already_processed = true;
        node.outcome = Some(Outcome::Skipped);
        self.stats.skipped += 1;
    }

    fn fail(&mut self, id: NodeId, reason: &str) {
        let node = self.tree.get_mut(id);
        node.outcome = Some(Outcome::Failed);
        let url = node.rewritten_url.clone();
        self.stats.failed += 1;
        self.progress.permanent(
            log::Level::Warn,
            format!("{}: {reason} for {}", self.repository.full_name(), self.short_url(&url)),
        );
    }

    fn short_url<'u>(&self, url: &'u str) -> &'u str {
        url.strip_prefix(self.layout.api_base.as_str()).unwrap_or(url)
    }
}
