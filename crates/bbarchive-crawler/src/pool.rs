//! Credential worker pool
//!
//! One named OS thread per credential, each with a fixed round-robin share
//! of the repositories. Workers talk to the coordinator only through the
//! progress channel; the coordinator persists completions as they arrive.
//!
//! Shutdown is best-effort: after cancellation each worker gets a bounded
//! join window and stragglers are abandoned to the process exit.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;

use bbarchive_core::{ApiClient, Auth, CancelToken, ProgressContext, RetryPolicy};

use crate::crawl::{Repository, crawl_repository};
use crate::error::CrawlError;
use crate::paths::ArchiveLayout;
use crate::relativize::{CrossLinks, Relativizer};
use crate::report::{Line, ProgressMsg, ProgressSender, Reporter};
use crate::run_state::RunState;
use crate::stats::{RepoStats, RunSummary};

/// Channel poll interval of the coordinator
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Everything a worker needs besides its credential and repositories.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub layout: ArchiveLayout,
    pub web_base: String,
    /// Slugs of every repository in the archive (for cross links)
    pub archive_slugs: Vec<String>,
    pub url_rewrites: Vec<(String, String)>,
    pub retry: RetryPolicy,
}

/// Coordinator-side settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: WorkerSettings,
    pub run_state_path: PathBuf,
    pub join_timeout: Duration,
}

/// Round-robin split of `items` into `buckets` lists.
pub fn partition<T: Clone>(items: &[T], buckets: usize) -> Vec<Vec<T>> {
    let mut out = vec![Vec::new(); buckets.max(1)];
    let n = out.len();
    for (i, item) in items.iter().enumerate() {
        out[i % n].push(item.clone());
    }
    out
}

/// Crawl then relativize one repository.
pub fn archive_repository(
    client: &mut ApiClient,
    settings: &WorkerSettings,
    progress: &ProgressSender,
    repository: &Repository,
) -> Result<RepoStats, CrawlError> {
    let crawl = crawl_repository(client, &settings.layout, progress, repository)?;
    let mut stats = crawl.stats;

    progress.flush(format!("{repository}: relativizing {} nodes", crawl.tree.len()));
    let cross_links = CrossLinks::new(
        &settings.web_base,
        &repository.owner,
        settings
            .archive_slugs
            .iter()
            .map(String::as_str)
            .filter(|slug| *slug != repository.slug),
    );
    let relativizer = Relativizer::new(
        &settings.layout,
        cross_links,
        &settings.url_rewrites,
        client.cancel_token(),
    );
    relativizer.run(&crawl.tree, &mut stats)?;
    Ok(stats)
}

fn worker_main(
    auth: Auth,
    repositories: Vec<Repository>,
    settings: WorkerSettings,
    progress: ProgressSender,
    cancel: CancelToken,
) {
    let hook = progress.clone();
    let mut client = ApiClient::new(auth, cancel.clone())
        .with_retry_policy(settings.retry)
        .with_status_hook(move |line| hook.transient(line.to_string()));

    for repository in &repositories {
        if cancel.is_cancelled() {
            break;
        }
        match archive_repository(&mut client, &settings, &progress, repository) {
            Ok(stats) => progress.repository_complete(&repository.slug, stats),
            Err(CrawlError::Cancelled) => {
                progress.permanent(
                    log::Level::Warn,
                    format!("{repository}: cancelled, will be redone on the next run"),
                );
                break;
            }
            Err(e) => progress.repository_failed(&repository.slug, e.to_string()),
        }
    }
    progress.flush("idle");
}

/// Run the pool over `repositories` and block until every worker is done
/// or cancellation has been handled.
pub fn run_pool(
    repositories: &[Repository],
    credentials: &[Auth],
    config: &PoolConfig,
    run_state: &mut RunState,
    progress: &ProgressContext,
    cancel: &CancelToken,
) -> anyhow::Result<RunSummary> {
    anyhow::ensure!(!credentials.is_empty(), "No credentials to run workers with");
    let shares = partition(repositories, credentials.len());

    let (tx, rx) = mpsc::channel();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    for (index, (auth, share)) in credentials.iter().zip(shares).enumerate() {
        if share.is_empty() {
            continue;
        }
        log::debug!("worker-{index}: {} repositories", share.len());
        let auth = auth.clone();
        let settings = config.workers.clone();
        let sender = ProgressSender::new(index, tx.clone());
        let cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(move || worker_main(auth, share, settings, sender, cancel))
            .with_context(|| format!("Failed to spawn worker-{index}"))?;
        handles.push(handle);
    }
    drop(tx);

    let mut coordinator = Coordinator {
        reporter: Reporter::new(progress, credentials.len()),
        run_state,
        state_path: &config.run_state_path,
        summary: RunSummary::default(),
    };

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(msg) => coordinator.handle(msg),
            Err(RecvTimeoutError::Timeout) => coordinator.reporter.tick(),
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if cancel.is_cancelled() {
            coordinator.summary.cancelled = true;
            break;
        }
    }

    if coordinator.summary.cancelled {
        log::warn!("Cancellation requested, waiting for workers to stop");
        for handle in handles {
            let deadline = Instant::now() + config.join_timeout;
            if coordinator.wait_for(&handle, &rx, deadline) {
                let _ = handle.join();
            } else {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                log::warn!("{name} did not stop in time, abandoning it");
                coordinator.summary.abandoned_workers += 1;
            }
        }
        // Late completions from workers that did stop
        while let Ok(msg) = rx.try_recv() {
            coordinator.handle(msg);
        }
    } else {
        for handle in handles {
            if handle.join().is_err() {
                log::error!("A worker thread panicked");
            }
        }
    }

    coordinator.reporter.finish();
    Ok(coordinator.summary)
}

struct Coordinator<'a> {
    reporter: Reporter,
    run_state: &'a mut RunState,
    state_path: &'a std::path::Path,
    summary: RunSummary,
}

impl Coordinator<'_> {
    fn handle(&mut self, msg: ProgressMsg) {
        match msg {
            ProgressMsg::Status {
                worker,
                text,
                line,
                force,
            } => self.reporter.status(worker, text, line, force),
            ProgressMsg::RepositoryComplete {
                worker,
                repository,
                stats,
            } => {
                self.run_state.mark_complete(repository.clone(), Utc::now());
                if let Err(e) = self.run_state.save(self.state_path) {
                    log::error!("Cannot persist completion of {repository}: {e:#}");
                }
                self.reporter.status(
                    worker,
                    format!("{repository}: complete ({})", stats.brief()),
                    Line::Permanent(log::Level::Info),
                    true,
                );
                self.summary.completed.push((repository, stats));
            }
            ProgressMsg::RepositoryFailed {
                worker,
                repository,
                error,
            } => {
                self.reporter.status(
                    worker,
                    format!("{repository}: failed: {error}"),
                    Line::Permanent(log::Level::Error),
                    true,
                );
                self.summary.failed.push((repository, error));
            }
        }
    }

    /// Drain messages until `handle` finishes or `deadline` passes.
    fn wait_for(
        &mut self,
        handle: &JoinHandle<()>,
        rx: &Receiver<ProgressMsg>,
        deadline: Instant,
    ) -> bool {
        while !handle.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                Ok(msg) => self.handle(msg),
                Err(RecvTimeoutError::Timeout) => {}
                // All senders gone: the thread is exiting.
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        true
    }
}
