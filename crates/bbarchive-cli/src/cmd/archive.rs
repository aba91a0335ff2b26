//! `bbarchive archive` - crawl, relativize and index every repository

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use bbarchive_core::{CancelToken, SharedProgress, install_signal_handlers};

use crate::config::Config;

/// Exit status of a run interrupted by SIGINT/SIGTERM
const EXIT_CANCELLED: u8 = 130;

#[derive(Args, Debug)]
pub struct ArchiveArgs {
    /// Forget completed repositories and archive all of them again
    #[arg(long)]
    pub fresh: bool,

    /// Project directory (overrides [project] path)
    #[arg(short, long)]
    pub project: Option<PathBuf>,
}

pub fn run(args: ArchiveArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let mut archive = config.archive_config()?;
    if let Some(dir) = args.project {
        archive.project_dir = dir;
    }
    archive.fresh = args.fresh;
    anyhow::ensure!(
        !archive.repositories.is_empty(),
        "No repositories configured ([source] repositories)"
    );

    let cancel = CancelToken::new();
    install_signal_handlers(&cancel).context("Failed to install signal handlers")?;

    let summary = bbarchive_crawler::run(&archive, progress.clone(), &cancel)?;

    if progress.is_tty() {
        summary.print();
    } else {
        summary.log();
    }

    if summary.cancelled {
        if summary.abandoned_workers > 0 {
            log::warn!(
                "{} workers did not stop in time and were abandoned",
                summary.abandoned_workers
            );
        }
        log::warn!("Interrupted, rerun to resume");
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    if !summary.failed.is_empty() {
        log::error!("{} repositories failed", summary.failed.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
