//! Mapping remote URLs onto the archive and publish layouts

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::locator::{Locator, encode_params};

/// Parameters dropped from file names; `next` links already carry them.
pub const PATH_STRIPPED_PARAMS: &[&str] = &["pagelen"];

/// Characters illegal in file names on common filesystems
const ILLEGAL: &[char] = &['?', ':', '\\', '*', '<', '>', '"', '|'];

/// Where structured pages and media land, and where they are published.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    pub api_base: String,
    /// Raw archive root (`<project>/bitbucket_data_raw`)
    pub archive_root: PathBuf,
    /// Publish data dir (`<publish>/data`)
    pub publish_data: PathBuf,
}

impl ArchiveLayout {
    /// `<archive-root>/<endpoint>[_<simplified-query>].json`
    pub fn json_path(&self, locator: &Locator) -> PathBuf {
        let simplified = locator.without(PATH_STRIPPED_PARAMS);
        let query = encode_params(&simplified.params);
        let mut name = sanitize(&simplified.endpoint);
        if !query.is_empty() {
            name.push('_');
            name.push_str(&sanitize(&query));
        }
        name.push_str(".json");
        join_safe(&self.archive_root, &name)
    }

    /// `<archive-root>/<host/path of url>` for binary media
    pub fn media_path(&self, url: &str) -> PathBuf {
        let mut rest = url.replace("%2F", "").replace("%2f", "");
        rest = decode(&rest);
        for prefix in [self.api_base.as_str(), "https://", "http://"] {
            if let Some(stripped) = rest.strip_prefix(prefix) {
                rest = stripped.to_string();
                break;
            }
        }
        join_safe(&self.archive_root, &strip_illegal(&rest))
    }

    /// Mirror of an archived file under the publish data dir
    pub fn publish_path(&self, local: &Path) -> Option<PathBuf> {
        local
            .strip_prefix(&self.archive_root)
            .ok()
            .map(|rel| self.publish_data.join(rel))
    }

    /// Link text used inside published documents: `data/<relative path>`
    pub fn relative_link(&self, local: &Path) -> Option<String> {
        let rel = local.strip_prefix(&self.archive_root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("data/{}", parts.join("/")))
    }
}

/// Remove encoded separators, percent-decode, drop illegal characters.
pub fn sanitize(raw: &str) -> String {
    strip_illegal(&decode(&raw.replace("%2F", "").replace("%2f", "")))
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn strip_illegal(s: &str) -> String {
    s.chars().filter(|c| !ILLEGAL.contains(c)).collect()
}

/// Join `/`-separated `rel` below `root`, never escaping it.
fn join_safe(root: &Path, rel: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in rel.split('/') {
        match segment {
            "" | "." | ".." => continue,
            s => path.push(s),
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ArchiveLayout {
        ArchiveLayout {
            api_base: "https://api.bitbucket.org/2.0/".into(),
            archive_root: PathBuf::from("/arch"),
            publish_data: PathBuf::from("/pub/data"),
        }
    }

    #[test]
    fn json_path_without_query() {
        let loc = Locator::from_reference("repositories/o/r");
        assert_eq!(layout().json_path(&loc), PathBuf::from("/arch/repositories/o/r.json"));
    }

    #[test]
    fn json_path_strips_pagelen_keeps_page() {
        let loc = Locator::from_reference("repositories/o/r/issues?pagelen=100&page=2");
        assert_eq!(
            layout().json_path(&loc),
            PathBuf::from("/arch/repositories/o/r/issues_page=2.json")
        );
        let first = Locator::from_reference("repositories/o/r/issues?pagelen=100");
        assert_eq!(
            layout().json_path(&first),
            PathBuf::from("/arch/repositories/o/r/issues.json")
        );
    }

    #[test]
    fn json_path_sanitizes_query() {
        let loc = Locator::from_reference("repositories/o?q=scm%3D%22hg%22");
        assert_eq!(
            layout().json_path(&loc),
            PathBuf::from("/arch/repositories/o_q=scm=hg.json")
        );
    }

    #[test]
    fn media_path_strips_scheme_and_illegal_chars() {
        assert_eq!(
            layout().media_path("https://secure.gravatar.com/avatar/abc?d=identicon&s=32"),
            PathBuf::from("/arch/secure.gravatar.com/avatar/abcd=identicon&s=32")
        );
        assert_eq!(
            layout().media_path(
                "https://api.bitbucket.org/2.0/repositories/o/r/issues/3/attachments/my%20file.txt"
            ),
            PathBuf::from("/arch/repositories/o/r/issues/3/attachments/my file.txt")
        );
    }

    #[test]
    fn media_path_drops_encoded_separators_and_traversal() {
        assert_eq!(
            layout().media_path("https://bytebucket.org/o/r/raw/a%2Fb/../../x.png"),
            PathBuf::from("/arch/bytebucket.org/o/r/raw/ab/x.png")
        );
    }

    #[test]
    fn publish_and_link_paths() {
        let local = PathBuf::from("/arch/repositories/o/r/issues_page=2.json");
        assert_eq!(
            layout().publish_path(&local),
            Some(PathBuf::from("/pub/data/repositories/o/r/issues_page=2.json"))
        );
        assert_eq!(
            layout().relative_link(&local).as_deref(),
            Some("data/repositories/o/r/issues_page=2.json")
        );
        assert_eq!(layout().relative_link(Path::new("/elsewhere/x")), None);
    }
}
