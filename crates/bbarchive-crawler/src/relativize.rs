//! Relativization walker: mirror an archived repository into the publish
//! tree with internal links rewritten to relative `data/...` paths.

use std::borrow::Cow;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use bbarchive_core::{CancelToken, write_atomic};

use crate::error::CrawlError;
use crate::paths::ArchiveLayout;
use crate::provenance::{NodeKind, ProvenanceTree};
use crate::stats::RepoStats;

static ESCAPED_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?:\\/\\/[^"\s]*"#).expect("static pattern"));

static OBFUSCATED_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href=\\"((?:&#\d+;|[^"\\&])+)\\""#).expect("static pattern")
});

static HTML_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(\d+);").expect("static pattern"));

/// Links to sibling repositories on the web host, rewritten to site routes.
#[derive(Debug, Clone)]
pub struct CrossLinks {
    owner: String,
    pattern: Option<Regex>,
}

impl CrossLinks {
    /// `others` are the slugs of the other repositories in this archive.
    pub fn new<'s>(web_base: &str, owner: &str, others: impl IntoIterator<Item = &'s str>) -> Self {
        let mut slugs: Vec<&str> = others.into_iter().filter(|s| !s.is_empty()).collect();
        slugs.sort_by_key(|s| std::cmp::Reverse(s.len()));
        let pattern = (!slugs.is_empty()).then(|| {
            let alternatives: Vec<String> = slugs.iter().map(|s| regex::escape(s)).collect();
            let source = format!(
                r#"{}{}/({})([/"\\)#?\s]|$)"#,
                regex::escape(web_base),
                regex::escape(owner),
                alternatives.join("|")
            );
            Regex::new(&source).expect("cross-link pattern is built from escaped input")
        });
        Self {
            owner: owner.to_string(),
            pattern,
        }
    }

    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        match &self.pattern {
            Some(re) => re.replace_all(text, |caps: &Captures| {
                format!("#!/{}/{}{}", self.owner, &caps[1], &caps[2])
            }),
            None => Cow::Borrowed(text),
        }
    }
}

/// `https:\/\/host\/path` inside JSON strings → `https://host/path`
pub fn fix_escaped_links(text: &str) -> Cow<'_, str> {
    ESCAPED_LINK.replace_all(text, |caps: &Captures| caps[0].replace(r"\/", "/"))
}

/// `href=\"&#109;&#97;...\"` → `href=\"mailto:...\"`
pub fn decode_mailto_links(text: &str) -> Cow<'_, str> {
    OBFUSCATED_HREF.replace_all(text, |caps: &Captures| {
        let raw = &caps[1];
        let decoded = HTML_ENTITY.replace_all(raw, |e: &Captures| {
            e[1].parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| e[0].to_string())
        });
        if raw.contains("&#") && decoded.starts_with("mailto:") {
            format!(r#"href=\"{decoded}\""#)
        } else {
            caps[0].to_string()
        }
    })
}

/// Replace `absolute` with `relative` in its quoted, escaped-quoted and
/// markdown-image forms.
pub fn replace_link(text: &str, absolute: &str, relative: &str) -> String {
    text.replace(&format!("\"{absolute}\""), &format!("\"{relative}\""))
        .replace(&format!("\\\"{absolute}\\\""), &format!("\\\"{relative}\\\""))
        .replace(&format!("![]({absolute})"), &format!("![]({relative})"))
}

pub struct Relativizer<'a> {
    layout: &'a ArchiveLayout,
    cross_links: CrossLinks,
    url_rewrites: Vec<(String, String)>,
    cancel: &'a CancelToken,
}

impl<'a> Relativizer<'a> {
    pub fn new(
        layout: &'a ArchiveLayout,
        cross_links: CrossLinks,
        url_rewrites: &[(String, String)],
        cancel: &'a CancelToken,
    ) -> Self {
        let mut url_rewrites = url_rewrites.to_vec();
        url_rewrites.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            layout,
            cross_links,
            url_rewrites,
            cancel,
        }
    }

    /// Walk `tree` breadth-first and publish every first-visit node.
    pub fn run(&self, tree: &ProvenanceTree, stats: &mut RepoStats) -> Result<(), CrawlError> {
        for id in tree.walk() {
            self.cancel.check()?;
            let node = tree.get(id);
            if node.already_processed {
                continue;
            }
            let Some(target) = self.layout.publish_path(&node.local_path) else {
                continue;
            };
            if target.exists() || !node.local_path.is_file() {
                continue;
            }

            match node.kind {
                NodeKind::Json => {
                    let text = std::fs::read_to_string(&node.local_path)
                        .map_err(|e| CrawlError::io(&node.local_path, e))?;
                    let children = node.children().iter().map(|&c| {
                        let child = tree.get(c);
                        (child.absolute_url.as_str(), child.local_path.as_path())
                    });
                    let (rewritten, gaps) = self.rewrite_document(&text, children);
                    write_atomic(&target, rewritten.as_bytes())
                        .map_err(|e| CrawlError::io(&target, e))?;
                    stats.relativized += 1;
                    stats.gaps += gaps;
                }
                NodeKind::Media => {
                    copy_file(&node.local_path, &target)?;
                    stats.copied += 1;
                }
            }
        }
        Ok(())
    }

    /// Rewrite one document; returns the text and the number of children
    /// left absolute because nothing was archived for them.
    pub fn rewrite_document<'c>(
        &self,
        text: &str,
        children: impl IntoIterator<Item = (&'c str, &'c Path)>,
    ) -> (String, usize) {
        let mut out = fix_escaped_links(text).into_owned();
        out = decode_mailto_links(&out).into_owned();

        let mut gaps = 0;
        for (absolute, local) in children {
            match self.layout.relative_link(local).filter(|_| local.is_file()) {
                Some(relative) => out = replace_link(&out, absolute, &relative),
                None => gaps += 1,
            }
        }

        out = self.cross_links.apply(&out).into_owned();
        for (from, to) in &self.url_rewrites {
            if out.contains(from.as_str()) {
                out = out.replace(from.as_str(), to);
            }
        }
        (out, gaps)
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<(), CrawlError> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CrawlError::io(parent, e))?;
    }
    std::fs::copy(from, to).map_err(|e| CrawlError::io(to, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB: &str = "https://bitbucket.org/";

    fn layout(dir: &Path) -> ArchiveLayout {
        ArchiveLayout {
            api_base: "https://host/api/".into(),
            archive_root: dir.join("raw"),
            publish_data: dir.join("pub/data"),
        }
    }

    #[test]
    fn replaces_all_three_forms() {
        let text = r#"{"a": "https://host/api/child", "html": "<img src=\"https://host/api/child\">", "md": "![](https://host/api/child)", "longer": "https://host/api/child/2"}"#;
        let out = replace_link(text, "https://host/api/child", "data/child.json");
        assert!(out.contains(r#""a": "data/child.json""#));
        assert!(out.contains(r#"<img src=\"data/child.json\">"#));
        assert!(out.contains("![](data/child.json)"));
        assert!(out.contains("https://host/api/child/2"));
        assert!(!out.contains("\"https://host/api/child\""));
    }

    #[test]
    fn escaped_links_unescaped() {
        let text = r#"{"u": "https:\/\/bitbucket.org\/o\/r", "path": "a\/b"}"#;
        assert_eq!(
            fix_escaped_links(text),
            r#"{"u": "https://bitbucket.org/o/r", "path": "a\/b"}"#
        );
    }

    #[test]
    fn obfuscated_mailto_decoded() {
        let text = r#"<a href=\"&#109;&#97;&#105;&#108;&#116;&#111;&#58;&#97;&#64;b.c\">x</a>"#;
        assert_eq!(decode_mailto_links(text), r#"<a href=\"mailto:a@b.c\">x</a>"#);
        let plain = r#"<a href=\"https://x\">x</a>"#;
        assert_eq!(decode_mailto_links(plain), plain);
    }

    #[test]
    fn cross_links_only_for_other_repositories() {
        let links = CrossLinks::new(WEB, "o", ["lib", "lib-extra"]);
        let text = r#"see "https://bitbucket.org/o/lib/issues/3" and "https://bitbucket.org/o/lib-extra" and "https://bitbucket.org/o/library""#;
        assert_eq!(
            links.apply(text),
            r##"see "#!/o/lib/issues/3" and "#!/o/lib-extra" and "https://bitbucket.org/o/library""##
        );
        let none = CrossLinks::new(WEB, "o", std::iter::empty());
        assert_eq!(none.apply(text), text);
    }

    #[test]
    fn operator_rewrites_longest_first() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let cancel = CancelToken::new();
        let rewrites = vec![
            ("https://x.org/".to_string(), "https://y.org/".to_string()),
            ("https://x.org/special".to_string(), "/local/special".to_string()),
        ];
        let r = Relativizer::new(&layout, CrossLinks::new(WEB, "o", std::iter::empty()), &rewrites, &cancel);
        let (out, gaps) = r.rewrite_document(
            r#"["https://x.org/special/1", "https://x.org/other"]"#,
            std::iter::empty(),
        );
        assert_eq!(out, r#"["/local/special/1", "https://y.org/other"]"#);
        assert_eq!(gaps, 0);
    }

    #[test]
    fn missing_child_counts_as_gap() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let cancel = CancelToken::new();
        let r = Relativizer::new(&layout, CrossLinks::new(WEB, "o", std::iter::empty()), &[], &cancel);
        let missing = layout.archive_root.join("missing.png");
        let (out, gaps) = r.rewrite_document(
            r#"{"img": "https://host/api/missing.png"}"#,
            [("https://host/api/missing.png", missing.as_path())],
        );
        assert_eq!(gaps, 1);
        assert!(out.contains("https://host/api/missing.png"));
    }

    #[test]
    fn publishes_tree_once() {
        use crate::provenance::{ProvenanceNode, ProvenanceTree};

        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let root_path = layout.archive_root.join("root.json");
        let child_path = layout.archive_root.join("child.json");
        let media_path = layout.archive_root.join("img/a.png");
        std::fs::create_dir_all(media_path.parent().unwrap()).unwrap();
        std::fs::write(
            &root_path,
            r#"{"child": "https://host/api/child", "html": "<img src=\"https://host/api/img/a.png\">"}"#,
        )
        .unwrap();
        std::fs::write(&child_path, r#"{"back": "https://host/api/root"}"#).unwrap();
        std::fs::write(&media_path, b"\x89PNG").unwrap();

        let mut tree = ProvenanceTree::new();
        let root = tree.add(
            None,
            ProvenanceNode::new(NodeKind::Json, "https://host/api/root", "https://host/api/root", root_path),
        );
        tree.add(
            Some(root),
            ProvenanceNode::new(NodeKind::Json, "https://host/api/child", "https://host/api/child", child_path),
        );
        tree.add(
            Some(root),
            ProvenanceNode::new(NodeKind::Media, "https://host/api/img/a.png", "https://host/api/img/a.png", media_path),
        );
        let dup = tree.add(
            Some(root),
            ProvenanceNode::new(
                NodeKind::Json,
                "https://host/api/child",
                "https://host/api/child",
                layout.archive_root.join("child.json"),
            ),
        );
        tree.get_mut(dup).already_processed = true;

        let cancel = CancelToken::new();
        let r = Relativizer::new(&layout, CrossLinks::new(WEB, "o", std::iter::empty()), &[], &cancel);
        let mut stats = RepoStats::default();
        r.run(&tree, &mut stats).unwrap();

        let published = std::fs::read_to_string(layout.publish_data.join("root.json")).unwrap();
        assert!(published.contains(r#""child": "data/child.json""#));
        assert!(published.contains(r#"<img src=\"data/img/a.png\">"#));
        assert!(!published.contains("https://host/api/child"));
        assert_eq!(
            std::fs::read(layout.publish_data.join("img/a.png")).unwrap(),
            b"\x89PNG"
        );
        assert_eq!(stats.relativized, 2);
        assert_eq!(stats.copied, 1);

        // Second pass: targets exist, nothing rewritten
        let mut again = RepoStats::default();
        r.run(&tree, &mut again).unwrap();
        assert_eq!(again, RepoStats::default());
    }

    #[test]
    fn cancelled_walk_stops() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut tree = ProvenanceTree::new();
        tree.add(
            None,
            crate::provenance::ProvenanceNode::new(NodeKind::Json, "u", "u", layout.archive_root.join("x.json")),
        );
        let r = Relativizer::new(&layout, CrossLinks::new(WEB, "o", std::iter::empty()), &[], &cancel);
        let err = r.run(&tree, &mut RepoStats::default()).unwrap_err();
        assert!(err.is_cancelled());
    }
}
