//! Crawler error type

use std::path::PathBuf;

use bbarchive_core::{Cancelled, FetchError};

/// Error that aborts one repository's crawl or relativization.
///
/// Per-item HTTP failures never surface here; they become `Failed` nodes.
#[derive(Debug)]
pub enum CrawlError {
    Cancelled,
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Fetch(FetchError),
}

impl std::fmt::Display for CrawlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Io { path, source } => write!(f, "IO at {}: {source}", path.display()),
            Self::Fetch(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CrawlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cancelled => None,
            Self::Io { source, .. } => Some(source),
            Self::Fetch(e) => Some(e),
        }
    }
}

impl From<FetchError> for CrawlError {
    fn from(e: FetchError) -> Self {
        if e.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Fetch(e)
        }
    }
}

impl From<Cancelled> for CrawlError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl CrawlError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
