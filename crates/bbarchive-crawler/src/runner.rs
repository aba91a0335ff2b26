//! Main execution logic for an archive run

use anyhow::Context;

use bbarchive_core::{Auth, CancelToken, SharedProgress, cleanup_partial_downloads};

use crate::config::Config;
use crate::crawl::Repository;
use crate::index::{build_index, write_index};
use crate::pool::{PoolConfig, WorkerSettings, run_pool};
use crate::repos::verify_credentials;
use crate::run_state::RunState;
use crate::stats::RunSummary;

/// Archive every configured repository not yet marked complete.
pub fn run(config: &Config, progress: SharedProgress, cancel: &CancelToken) -> anyhow::Result<RunSummary> {
    let archive_root = config.archive_root();
    std::fs::create_dir_all(&archive_root).context("Cannot create archive directory")?;
    std::fs::create_dir_all(config.publish_data_dir()).context("Cannot create publish directory")?;

    log::info!(
        "bbarchive starting: owner={}, repositories={}, credentials={}",
        config.owner,
        config.repositories.len(),
        config.credentials.len()
    );

    let removed = cleanup_partial_downloads(&archive_root).context("Failed to clean stale partial files")?;
    if removed > 0 {
        log::info!("Removed {removed} stale partial files");
    }

    let state_path = config.run_state_path();
    let mut run_state = RunState::load(&state_path)?;
    if config.fresh && !run_state.completed.is_empty() {
        log::info!("Fresh run: forgetting {} completed repositories", run_state.completed.len());
        run_state.clear();
        run_state.save(&state_path)?;
    }

    let mut summary = RunSummary::default();
    let pending: Vec<Repository> = config
        .repositories
        .iter()
        .filter(|slug| !run_state.is_complete(slug))
        .map(|slug| Repository::new(&config.owner, slug))
        .collect();
    summary.already_complete = config.repositories.len() - pending.len();

    if pending.is_empty() {
        log::info!("All repositories already complete");
    } else {
        let credentials = usable_credentials(config, cancel)?;
        let Some(credentials) = credentials else {
            summary.cancelled = true;
            return Ok(summary);
        };

        let pool_config = PoolConfig {
            workers: WorkerSettings {
                layout: config.layout(),
                web_base: config.web_base.clone(),
                archive_slugs: config.repositories.clone(),
                url_rewrites: config.url_rewrites.clone(),
                retry: config.retry,
            },
            run_state_path: state_path,
            join_timeout: config.join_timeout,
        };
        let pooled = run_pool(&pending, &credentials, &pool_config, &mut run_state, &progress, cancel)?;
        summary.completed = pooled.completed;
        summary.failed = pooled.failed;
        summary.cancelled = pooled.cancelled;
        summary.abandoned_workers = pooled.abandoned_workers;
    }

    let index = build_index(
        &config.owner,
        config
            .repositories
            .iter()
            .map(String::as_str)
            .filter(|slug| run_state.is_complete(slug)),
    );
    write_index(&config.publish_root(), &index)?;

    Ok(summary)
}

/// Verified credentials, or `None` if cancelled while checking.
fn usable_credentials(config: &Config, cancel: &CancelToken) -> anyhow::Result<Option<Vec<Auth>>> {
    if config.credentials.is_empty() {
        log::warn!("No credentials configured, crawling anonymously with one worker");
        return Ok(Some(vec![Auth::Anonymous]));
    }
    match verify_credentials(&config.credentials, &config.api_base, config.retry, cancel) {
        Ok(valid) => {
            anyhow::ensure!(!valid.is_empty(), "None of the configured credentials were accepted");
            Ok(Some(valid))
        }
        Err(e) if e.is_cancelled() => Ok(None),
        Err(e) => Err(e).context("Credential verification failed"),
    }
}
