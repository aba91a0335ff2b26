//! bbarchive crawler - archives a Bitbucket API object graph to disk
//!
//! Rule-driven breadth-first crawl per repository, with a provenance tree
//! that the relativization pass uses to publish the archive with relative
//! links. Repositories are spread over one worker thread per credential.

pub mod config;
pub mod crawl;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod index;
pub mod locator;
pub mod paths;
pub mod pool;
pub mod provenance;
pub mod relativize;
pub mod report;
pub mod repos;
pub mod rules;
pub mod run_state;
pub mod runner;
pub mod stats;

// Re-exports
pub use config::Config;
pub use crawl::{RepoCrawl, Repository, crawl_repository};
pub use error::CrawlError;
pub use locator::{Locator, Params};
pub use paths::ArchiveLayout;
pub use provenance::{NodeId, NodeKind, Outcome, ProvenanceNode, ProvenanceTree};
pub use rules::{IgnoreRule, RewriteRule, RuleSet, rewrite_params, should_ignore};
pub use run_state::RunState;
pub use runner::run;
pub use stats::{RepoStats, RunSummary};
