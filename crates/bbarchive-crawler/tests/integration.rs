//! Integration tests for bbarchive-crawler
//!
//! A local httpmock server stands in for the API: one repository root, an
//! issue list paginated over three pages, three issues with change history,
//! and one attachment referenced by two issues.

use std::path::Path;
use std::time::Duration;

use bbarchive_core::{
    ApiClient, Auth, CancelToken, ProgressContext, RetryPolicy, cleanup_partial_downloads,
};
use bbarchive_crawler::pool::{PoolConfig, WorkerSettings, run_pool};
use bbarchive_crawler::relativize::{CrossLinks, Relativizer};
use bbarchive_crawler::report::ProgressSender;
use bbarchive_crawler::{
    ArchiveLayout, NodeKind, Outcome, ProvenanceTree, RepoStats, Repository, RunState,
    crawl_repository,
};
use httpmock::{Method::GET, Mock, MockServer};
use tempfile::TempDir;

const WEB_BASE: &str = "https://bitbucket.org/";

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        short_delay: Duration::from_millis(5),
        long_unit: Duration::from_millis(10),
        escalate_every: 5,
    }
}

fn client() -> ApiClient {
    ApiClient::new(Auth::Anonymous, CancelToken::new()).with_retry_policy(fast_policy())
}

fn layout(server: &MockServer, dir: &Path) -> ArchiveLayout {
    ArchiveLayout {
        api_base: server.url("/2.0/"),
        archive_root: dir.join("bitbucket_data_raw"),
        publish_data: dir.join("gh-pages/data"),
    }
}

struct RepoMocks<'a> {
    root: Mock<'a>,
    pages: Vec<Mock<'a>>,
    issues: Vec<Mock<'a>>,
    changes: Vec<Mock<'a>>,
    attachment: Mock<'a>,
}

/// Serve repository `o/<slug>`; `root_extra` is spliced into the root object.
fn mount_repo<'a>(server: &'a MockServer, slug: &str, root_extra: &str) -> RepoMocks<'a> {
    let base = server.url("/2.0/");
    let repo = format!("repositories/o/{slug}");
    let attachment_url = format!("{base}{repo}/issues/1/attachments/shot.png");

    let root = server.mock(|when, then| {
        when.method(GET).path(format!("/2.0/{repo}"));
        then.status(200).body(format!(
            r#"{{"slug": "{slug}", "links": {{"self": {{"href": "{base}{repo}"}},
               "issues": {{"href": "{base}{repo}/issues"}}}}{root_extra}}}"#
        ));
    });

    let page_issues: [&[u32]; 3] = [&[1, 2], &[3], &[]];
    let pages = (1..=3)
        .map(|page| {
            let values: Vec<String> = page_issues[page - 1]
                .iter()
                .map(|id| format!(r#"{{"id": {id}, "links": {{"self": {{"href": "{base}{repo}/issues/{id}"}}}}}}"#))
                .collect();
            let next = if page < 3 {
                format!(r#", "next": "{base}{repo}/issues?page={}&pagelen=100""#, page + 1)
            } else {
                String::new()
            };
            let body = format!(r#"{{"values": [{}]{next}}}"#, values.join(", "));
            server.mock(|when, then| {
                when.method(GET)
                    .path(format!("/2.0/{repo}/issues"))
                    .query_param("page", page.to_string())
                    .query_param("pagelen", "100");
                then.status(200).body(body);
            })
        })
        .collect();

    let issues = (1..=3)
        .map(|id| {
            let extra = if id < 3 {
                format!(r#", "attachment": "{attachment_url}""#)
            } else {
                String::new()
            };
            let body = format!(
                r#"{{"id": {id}, "links": {{"self": {{"href": "{base}{repo}/issues/{id}"}}}}{extra}}}"#
            );
            server.mock(|when, then| {
                when.method(GET).path(format!("/2.0/{repo}/issues/{id}"));
                then.status(200).body(body);
            })
        })
        .collect();

    let changes = (1..=3)
        .map(|id| {
            server.mock(|when, then| {
                when.method(GET)
                    .path(format!("/2.0/{repo}/issues/{id}/changes"))
                    .query_param("pagelen", "100");
                then.status(200).body(r#"{"values": []}"#);
            })
        })
        .collect();

    let attachment = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/2.0/{repo}/issues/1/attachments/shot.png"));
        then.status(200).body(b"\x89PNG-bytes".to_vec());
    });

    RepoMocks {
        root,
        pages,
        issues,
        changes,
        attachment,
    }
}

fn assert_hits(mocks: &RepoMocks<'_>, n: usize) {
    mocks.root.assert_hits(n);
    for m in mocks.pages.iter().chain(&mocks.issues).chain(&mocks.changes) {
        m.assert_hits(n);
    }
    mocks.attachment.assert_hits(n);
}

fn crawl(layout: &ArchiveLayout, slug: &str) -> bbarchive_crawler::RepoCrawl {
    crawl_repository(
        &mut client(),
        layout,
        &ProgressSender::detached(0),
        &Repository::new("o", slug),
    )
    .expect("crawl succeeds")
}

fn file_name(tree: &ProvenanceTree, id: bbarchive_crawler::NodeId) -> String {
    tree.get(id)
        .local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[test]
fn full_crawl_writes_every_distinct_path_once() {
    let server = MockServer::start();
    let mocks = mount_repo(&server, "r", "");
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());

    let result = crawl(&layout, "r");

    assert_hits(&mocks, 1);
    let raw = &layout.archive_root;
    assert!(raw.join("repositories/o/r.json").is_file());
    for page in 1..=3 {
        assert!(raw.join(format!("repositories/o/r/issues_page={page}.json")).is_file());
    }
    for id in 1..=3 {
        assert!(raw.join(format!("repositories/o/r/issues/{id}.json")).is_file());
        assert!(raw.join(format!("repositories/o/r/issues/{id}/changes.json")).is_file());
    }
    assert_eq!(
        std::fs::read(raw.join("repositories/o/r/issues/1/attachments/shot.png")).unwrap(),
        b"\x89PNG-bytes"
    );
    assert_eq!(result.stats.saved, 10);
    assert_eq!(result.stats.downloaded, 1);
    assert_eq!(result.stats.failed, 0);
    assert_eq!(result.stats.requests, 11);
}

#[test]
fn pagination_pages_are_siblings() {
    let server = MockServer::start();
    let _mocks = mount_repo(&server, "r", "");
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());

    let result = crawl(&layout, "r");
    let tree = &result.tree;
    let root = tree.roots()[0];

    let pages: Vec<String> = tree
        .get(root)
        .children()
        .iter()
        .map(|&c| file_name(tree, c))
        .filter(|name| name.starts_with("issues_page="))
        .collect();
    assert_eq!(
        pages,
        vec!["issues_page=1.json", "issues_page=2.json", "issues_page=3.json"]
    );

    // No page hangs below another page
    for (_, node) in tree.iter() {
        if file_name_of(&node.local_path).starts_with("issues_page=") {
            assert!(node
                .children()
                .iter()
                .all(|&c| !file_name(tree, c).starts_with("issues_page=")));
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[test]
fn shared_resources_fetched_once_with_one_entry_per_reference() {
    let server = MockServer::start();
    let mocks = mount_repo(&server, "r", "");
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());

    let result = crawl(&layout, "r");
    let tree = &result.tree;

    let attachment_nodes: Vec<_> = tree
        .iter()
        .filter(|(_, n)| n.kind == NodeKind::Media)
        .collect();
    assert_eq!(attachment_nodes.len(), 2);
    assert_eq!(attachment_nodes[0].1.outcome, Some(Outcome::Saved));
    assert!(!attachment_nodes[0].1.already_processed);
    assert_eq!(attachment_nodes[1].1.outcome, Some(Outcome::Skipped));
    assert!(attachment_nodes[1].1.already_processed);
    mocks.attachment.assert_hits(1);

    // Only first visits carry children; every issue is referenced twice
    // (list page + its own self link).
    let issue1: Vec<_> = tree
        .iter()
        .filter(|(_, n)| n.local_path.ends_with("repositories/o/r/issues/1.json"))
        .collect();
    assert!(issue1.len() >= 2);
    let with_children = issue1.iter().filter(|(_, n)| !n.children().is_empty()).count();
    assert_eq!(with_children, 1);
    for (_, node) in tree.iter().filter(|(_, n)| n.already_processed) {
        assert!(node.children().is_empty());
    }

    let mut distinct: Vec<_> = tree
        .iter()
        .filter(|(_, n)| n.outcome == Some(Outcome::Saved))
        .map(|(_, n)| n.local_path.clone())
        .collect();
    let saved = distinct.len();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), saved);
    assert_eq!(saved, result.stats.requests);
}

#[test]
fn second_crawl_makes_no_requests_and_no_writes() {
    let server = MockServer::start();
    let mocks = mount_repo(&server, "r", "");
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());

    let first = crawl(&layout, "r");
    let root_file = layout.archive_root.join("repositories/o/r.json");
    let before = std::fs::metadata(&root_file).unwrap().modified().unwrap();

    let second = crawl(&layout, "r");

    assert_hits(&mocks, 1);
    assert_eq!(second.stats.requests, 0);
    assert_eq!(second.stats.saved, 0);
    assert_eq!(second.stats.downloaded, 0);
    assert_eq!(second.stats.cached, first.stats.saved + first.stats.downloaded);
    assert_eq!(second.tree.len(), first.tree.len());
    assert!(second
        .tree
        .iter()
        .all(|(_, n)| matches!(n.outcome, Some(Outcome::Cached | Outcome::Skipped))));
    assert_eq!(std::fs::metadata(&root_file).unwrap().modified().unwrap(), before);
}

#[test]
fn cancelled_crawl_resumes_without_refetching() {
    let server = MockServer::start();
    let mut mocks = mount_repo(&server, "r", "");
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());

    // Page 2 is rate limited; cancel on the first retry.
    mocks.pages[1].delete();
    let mut limited = server.mock(|when, then| {
        when.method(GET)
            .path("/2.0/repositories/o/r/issues")
            .query_param("page", "2");
        then.status(429);
    });
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let mut client = ApiClient::new(Auth::Anonymous, cancel)
        .with_retry_policy(fast_policy())
        .with_status_hook(move |_| trigger.cancel());
    let err = crawl_repository(
        &mut client,
        &layout,
        &ProgressSender::detached(0),
        &Repository::new("o", "r"),
    )
    .unwrap_err();
    assert!(err.is_cancelled());
    assert!(layout.archive_root.join("repositories/o/r/issues_page=1.json").is_file());
    assert!(!layout.archive_root.join("repositories/o/r/issues_page=2.json").exists());

    limited.delete();
    let page2 = server.mock(|when, then| {
        when.method(GET)
            .path("/2.0/repositories/o/r/issues")
            .query_param("page", "2");
        then.status(200).body("{\"values\": []}");
    });
    mocks.pages.remove(1);

    let resumed = crawl(&layout, "r");
    mocks.root.assert_hits(1);
    mocks.pages[0].assert_hits(1);
    page2.assert_hits(1);
    assert_eq!(resumed.stats.failed, 0);
    assert!(resumed.stats.cached >= 2);
}

#[test]
fn relativized_documents_link_locally() {
    let server = MockServer::start();
    let _mocks = mount_repo(&server, "r", "");
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());
    let base = server.url("/2.0/");

    let result = crawl(&layout, "r");
    let cancel = CancelToken::new();
    let relativizer = Relativizer::new(
        &layout,
        CrossLinks::new(WEB_BASE, "o", std::iter::empty()),
        &[],
        &cancel,
    );
    let mut stats = RepoStats::default();
    relativizer.run(&result.tree, &mut stats).unwrap();

    let published_root =
        std::fs::read_to_string(layout.publish_data.join("repositories/o/r.json")).unwrap();
    assert!(published_root.contains(r#""href": "data/repositories/o/r/issues_page=1.json""#));
    assert!(published_root.contains(r#""href": "data/repositories/o/r.json""#));
    assert!(!published_root.contains(&format!("\"{base}repositories/o/r/issues\"")));

    let published_issue =
        std::fs::read_to_string(layout.publish_data.join("repositories/o/r/issues/2.json")).unwrap();
    assert!(published_issue
        .contains(r#""attachment": "data/repositories/o/r/issues/1/attachments/shot.png""#));
    assert!(layout
        .publish_data
        .join("repositories/o/r/issues/1/attachments/shot.png")
        .is_file());

    assert_eq!(stats.copied, 1);
    assert_eq!(stats.relativized, 10);
    assert_eq!(stats.gaps, 0);
}

/// Serve a single-document repository `o/<slug>` whose root object carries
/// `fields(attachment_url)` and one issue attachment called `name`.
fn mount_attachment_repo<'a>(
    server: &'a MockServer,
    slug: &str,
    name: &str,
    fields: impl Fn(&str) -> String,
) -> (Mock<'a>, Mock<'a>) {
    let repo = format!("repositories/o/{slug}");
    let attachment_url = server.url(format!("/2.0/{repo}/issues/1/attachments/{name}"));
    let body = format!(r#"{{"slug": "{slug}", {}}}"#, fields(&attachment_url));
    let root = server.mock(|when, then| {
        when.method(GET).path(format!("/2.0/{repo}"));
        then.status(200).body(body);
    });
    let attachment = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/2.0/{repo}/issues/1/attachments/{name}"));
        then.status(200).body(b"attachment-bytes".to_vec());
    });
    (root, attachment)
}

#[test]
fn temp_named_attachments_survive_startup_cleanup() {
    let server = MockServer::start();
    let (root, attachment) = mount_attachment_repo(&server, "t", "notes.tmp", |url| {
        format!(r#""attachment": "{url}""#)
    });
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());

    let first = crawl(&layout, "t");
    assert_eq!(first.stats.requests, 2);
    let archived = layout
        .archive_root
        .join("repositories/o/t/issues/1/attachments/notes.tmp");
    assert!(archived.is_file());

    assert_eq!(cleanup_partial_downloads(&layout.archive_root).unwrap(), 0);
    assert!(archived.is_file());

    let second = crawl(&layout, "t");
    assert_eq!(second.stats.requests, 0);
    root.assert_hits(1);
    attachment.assert_hits(1);
}

#[test]
fn published_document_has_no_absolute_child_links() {
    let server = MockServer::start();
    let (_root, _attachment) = mount_attachment_repo(&server, "t", "shot.png", |url| {
        let escaped = url.replace('/', r"\/");
        format!(
            r#""attachment": "{url}", "content": {{"html": "<p><img src=\"{escaped}\"></p>", "raw": "see ![]({url})"}}"#
        )
    });
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());
    let absolute = server.url("/2.0/repositories/o/t/issues/1/attachments/shot.png");

    let result = crawl(&layout, "t");
    assert_eq!(result.stats.downloaded, 1);
    let raw = std::fs::read_to_string(layout.archive_root.join("repositories/o/t.json")).unwrap();
    assert!(raw.contains(&absolute.replace('/', r"\/")));

    let cancel = CancelToken::new();
    let relativizer = Relativizer::new(
        &layout,
        CrossLinks::new(WEB_BASE, "o", std::iter::empty()),
        &[],
        &cancel,
    );
    let mut stats = RepoStats::default();
    relativizer.run(&result.tree, &mut stats).unwrap();

    let published =
        std::fs::read_to_string(layout.publish_data.join("repositories/o/t.json")).unwrap();
    let relative = "data/repositories/o/t/issues/1/attachments/shot.png";
    assert!(published.contains(&format!(r#""attachment": "{relative}""#)));
    assert!(published.contains(&format!(r#"<img src=\"{relative}\">"#)));
    assert!(published.contains(&format!("![]({relative})")));
    assert!(!published.contains(&absolute));
    assert!(!published.contains(&absolute.replace('/', r"\/")));
    assert!(!published.contains(&server.url("/2.0/")));
    assert_eq!(stats.gaps, 0);
    assert_eq!(stats.copied, 1);
}

#[test]
fn pool_archives_repositories_and_persists_completion() {
    let server = MockServer::start();
    let _r = mount_repo(
        &server,
        "r",
        r#", "website": "https://bitbucket.org/o/s/wiki""#,
    );
    let _s = mount_repo(&server, "s", "");
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());
    let state_path = dir.path().join("run_state.json");

    let config = PoolConfig {
        workers: WorkerSettings {
            layout: layout.clone(),
            web_base: WEB_BASE.to_string(),
            archive_slugs: vec!["r".into(), "s".into()],
            url_rewrites: Vec::new(),
            retry: fast_policy(),
        },
        run_state_path: state_path.clone(),
        join_timeout: Duration::from_secs(5),
    };
    let repos = vec![Repository::new("o", "r"), Repository::new("o", "s")];
    let mut state = RunState::default();
    let summary = run_pool(
        &repos,
        &[Auth::Anonymous, Auth::Anonymous],
        &config,
        &mut state,
        &ProgressContext::hidden(),
        &CancelToken::new(),
    )
    .unwrap();

    assert!(!summary.cancelled);
    assert_eq!(summary.completed.len(), 2);
    assert!(summary.failed.is_empty());
    assert!(state.is_complete("r") && state.is_complete("s"));
    let persisted = RunState::load(&state_path).unwrap();
    assert!(persisted.is_complete("r") && persisted.is_complete("s"));

    let published_r =
        std::fs::read_to_string(layout.publish_data.join("repositories/o/r.json")).unwrap();
    assert!(published_r.contains(r##""website": "#!/o/s/wiki""##));
}

#[test]
fn cancelled_pool_marks_nothing_complete() {
    let server = MockServer::start();
    let mocks = mount_repo(&server, "r", "");
    let dir = TempDir::new().unwrap();
    let layout = layout(&server, dir.path());
    let state_path = dir.path().join("run_state.json");
    let config = PoolConfig {
        workers: WorkerSettings {
            layout,
            web_base: WEB_BASE.to_string(),
            archive_slugs: vec!["r".into()],
            url_rewrites: Vec::new(),
            retry: fast_policy(),
        },
        run_state_path: state_path.clone(),
        join_timeout: Duration::from_secs(5),
    };
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut state = RunState::default();
    let summary = run_pool(
        &[Repository::new("o", "r")],
        &[Auth::Anonymous],
        &config,
        &mut state,
        &ProgressContext::hidden(),
        &cancel,
    )
    .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.abandoned_workers, 0);
    assert!(summary.completed.is_empty());
    assert!(!state.is_complete("r"));
    assert!(!state_path.exists());
    mocks.root.assert_hits(0);
}
