//! bbarchive - archive Mercurial repositories' API data from Bitbucket
//!
//! Crawls issues, pull requests, wiki and metadata of each configured
//! repository into a raw archive and a relativized static-site copy.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "bbarchive")]
#[command(about = "Archive Bitbucket repository data as a browsable static site")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./bbarchive.toml or ~/.config/bbarchive/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Read timeout in seconds for stall detection
    #[arg(long, global = true)]
    read_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl and publish every configured repository
    Archive(cmd::archive::ArchiveArgs),
    /// List the owner's Mercurial repositories
    Repos(cmd::repos::ReposArgs),
    /// Show which repositories are complete
    Status,
    /// Show current configuration
    Config,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let progress = Arc::new(bbarchive_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, worker lines show activity
    //   non-TTY: info unless --debug or --quiet
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { cli.quiet };
    bbarchive_core::init_logging(quiet, cli.debug, multi);

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    if let Some(secs) = cli.read_timeout {
        config.http.read_timeout = secs;
    }
    bbarchive_core::set_http_config(config.http.http_config());

    match cli.command {
        Command::Archive(args) => cmd::archive::run(args, &config, &progress),
        Command::Repos(args) => cmd::repos::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Status => cmd::status::run(&config).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec![
                "Project directory",
                &config.project.path.display().to_string(),
            ]);
            table.add_row(vec!["API base URL", &config.source.api_base]);
            table.add_row(vec!["Web base URL", &config.source.web_base]);
            table.add_row(vec![
                "Owner",
                if config.source.owner.is_empty() {
                    "not set"
                } else {
                    config.source.owner.as_str()
                },
            ]);
            table.add_row(vec![
                "Repositories",
                &config.source.repositories.len().to_string(),
            ]);
            table.add_row(vec![
                "Project key",
                config.source.project.as_deref().unwrap_or("any"),
            ]);
            let credentials = match config.auths() {
                Ok(auths) => auths
                    .iter()
                    .map(|a| format!("{a:?}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("invalid: {e:#}"),
            };
            table.add_row(vec![
                "Credentials",
                if credentials.is_empty() {
                    "none (anonymous)"
                } else {
                    credentials.as_str()
                },
            ]);
            table.add_row(vec![
                "URL rewrites",
                &config.url_rewrites.len().to_string(),
            ]);
            table.add_row(vec![
                "Backoff",
                &format!(
                    "{}s, every {} failures {}s x n",
                    config.http.short_backoff_secs,
                    config.http.escalate_every,
                    config.http.long_backoff_secs
                ),
            ]);
            table.add_row(vec![
                "Read timeout",
                &format!("{}s", config.http.read_timeout),
            ]);
            table.add_row(vec![
                "Join timeout",
                &format!("{}s", config.http.join_timeout),
            ]);

            eprintln!("\n{table}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
