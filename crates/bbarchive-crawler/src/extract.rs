//! Content extraction: media URLs, same-origin API links, next-page links

use regex::Regex;
use serde_json::Value;

/// Per-repository scanner over raw JSON text.
#[derive(Debug, Clone)]
pub struct Extractor {
    media: Vec<Regex>,
    api_link: Regex,
    issue: Regex,
}

impl Extractor {
    /// Patterns for Bitbucket payloads of `owner/repo` under `api_base`.
    pub fn bitbucket(api_base: &str, owner: &str, repo: &str) -> Result<Self, regex::Error> {
        let base = regex::escape(api_base);
        let scope = format!("repositories/{}/{}", regex::escape(owner), regex::escape(repo));
        let media = [
            // Inline images live inside HTML-in-JSON and end with an escaped quote.
            r#""(https://bitbucket\.org/repo/[a-zA-Z0-9]+/images/.+?)\\""#.to_string(),
            r#""(https://pf-emoji-service--cdn\.[a-zA-Z0-9\-]+\.prod\.public\.atl-paas\.net/.+?)\\""#
                .to_string(),
            r#""(https://secure\.gravatar\.com/avatar/.+?)""#.to_string(),
            r#""(https://bytebucket\.org/.+?)""#.to_string(),
            format!(r#""({base}{scope}/issues/\d+/attachments/.+?)""#),
        ]
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            media,
            api_link: Regex::new(&format!(r#""{base}([^"\\\s]*)""#))?,
            issue: Regex::new(&format!(r"^{scope}/issues/\d+$"))?,
        })
    }

    /// Downloadable media URLs, in order of first appearance, without repeats.
    pub fn media_urls(&self, text: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();
        for re in &self.media {
            for caps in re.captures_iter(text) {
                if let Some(m) = caps.get(1) {
                    found.push((m.start(), m.as_str().to_string()));
                }
            }
        }
        found.sort_by_key(|(pos, _)| *pos);
        dedup_in_order(found.into_iter().map(|(_, url)| url))
    }

    /// Same-origin API references, relative to the API base, without repeats.
    pub fn api_links(&self, text: &str) -> Vec<String> {
        dedup_in_order(
            self.api_link
                .captures_iter(text)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty()),
        )
    }

    /// Issue change history does not self-link from its issue.
    pub fn issue_changes_link(&self, reference: &str) -> Option<String> {
        self.issue
            .is_match(reference)
            .then(|| format!("{reference}/changes"))
    }
}

/// The `next` continuation of a paginated page, if any
pub fn next_page(doc: &Value) -> Option<&str> {
    doc.get("next").and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn dedup_in_order(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = rustc_hash::FxHashSet::default();
    items.filter(|s| seen.insert(s.clone())).collect()
}
