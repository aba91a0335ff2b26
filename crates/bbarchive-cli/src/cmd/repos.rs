//! `bbarchive repos` - list the owner's Mercurial repositories

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use bbarchive_core::{ApiClient, Auth, CancelToken, install_signal_handlers};
use bbarchive_crawler::repos::{RepositoryInfo, list_repositories};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct ReposArgs {
    /// Only repositories in this project (overrides [source] project)
    #[arg(short, long)]
    pub project: Option<String>,

    /// Print slugs one per line, ready for the config file
    #[arg(long)]
    pub plain: bool,
}

pub fn run(args: ReposArgs, config: &Config) -> Result<()> {
    let archive = config.archive_config()?;
    let project_key = args.project.or(archive.project_key.clone());

    let cancel = CancelToken::new();
    install_signal_handlers(&cancel).context("Failed to install signal handlers")?;

    let auth = archive.credentials.first().cloned().unwrap_or(Auth::Anonymous);
    let mut client = ApiClient::new(auth, cancel).with_retry_policy(archive.retry);
    let mut repos = list_repositories(
        &mut client,
        &archive.api_base,
        &archive.owner,
        project_key.as_deref(),
    )?;
    repos.sort_by(|a, b| a.slug.cmp(&b.slug));

    if args.plain {
        for repo in &repos {
            println!("{}", repo.slug);
        }
        return Ok(());
    }

    if repos.is_empty() {
        eprintln!("No Mercurial repositories found for {}.", archive.owner);
        return Ok(());
    }
    println!("{}", format_table(&repos, &archive.repositories));
    Ok(())
}

fn format_table(repos: &[RepositoryInfo], configured: &[String]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Slug").fg(Color::Cyan),
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Project").fg(Color::Cyan),
            Cell::new("Private").fg(Color::Cyan),
            Cell::new("Updated").fg(Color::Cyan),
            Cell::new("Configured").fg(Color::Cyan),
        ]);

    for repo in repos {
        let configured = configured.iter().any(|s| *s == repo.slug);
        table.add_row(vec![
            Cell::new(&repo.slug),
            Cell::new(&repo.name),
            Cell::new(repo.project.as_ref().map_or("-", |p| p.key.as_str())),
            Cell::new(if repo.is_private { "yes" } else { "no" }),
            Cell::new(
                repo.updated_on
                    .as_deref()
                    .and_then(|s| s.get(..10))
                    .unwrap_or("-"),
            ),
            if configured {
                Cell::new("yes").fg(Color::Green)
            } else {
                Cell::new("no")
            },
        ]);
    }
    format!("\n{table}")
}
