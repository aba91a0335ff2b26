//! Archive run configuration (plain struct, built by the CLI from TOML)

use std::path::PathBuf;
use std::time::Duration;

use bbarchive_core::{Auth, RetryPolicy};

use crate::paths::ArchiveLayout;

pub const DEFAULT_API_BASE: &str = "https://api.bitbucket.org/2.0/";
pub const DEFAULT_WEB_BASE: &str = "https://bitbucket.org/";

/// How long each worker gets to stop after cancellation
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration for an archive run
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub api_base: String,
    pub web_base: String,
    pub owner: String,
    /// Repository slugs to archive
    pub repositories: Vec<String>,
    /// Restrict `repos` listings to this project key
    pub project_key: Option<String>,
    pub credentials: Vec<Auth>,
    /// Literal old → new replacements applied to published documents
    pub url_rewrites: Vec<(String, String)>,
    pub retry: RetryPolicy,
    pub join_timeout: Duration,
    /// Forget earlier completions and redo every repository
    pub fresh: bool,
}

impl Config {
    pub fn new(project_dir: impl Into<PathBuf>, owner: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            web_base: DEFAULT_WEB_BASE.to_string(),
            owner: owner.into(),
            repositories: Vec::new(),
            project_key: None,
            credentials: Vec::new(),
            url_rewrites: Vec::new(),
            retry: RetryPolicy::default(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            fresh: false,
        }
    }

    /// Raw API responses and media
    pub fn archive_root(&self) -> PathBuf {
        self.project_dir.join("bitbucket_data_raw")
    }

    /// Static site root
    pub fn publish_root(&self) -> PathBuf {
        self.project_dir.join("gh-pages")
    }

    pub fn publish_data_dir(&self) -> PathBuf {
        self.publish_root().join("data")
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.project_dir.join("run_state.json")
    }

    pub fn layout(&self) -> ArchiveLayout {
        ArchiveLayout {
            api_base: self.api_base.clone(),
            archive_root: self.archive_root(),
            publish_data: self.publish_data_dir(),
        }
    }
}
