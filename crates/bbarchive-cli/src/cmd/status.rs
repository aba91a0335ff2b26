//! `bbarchive status` - completion state of configured repositories

use anyhow::Result;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use bbarchive_crawler::RunState;

use crate::config::Config;

pub fn run(config: &Config) -> Result<()> {
    let archive = config.archive_config()?;
    let state = RunState::load(&archive.run_state_path())?;

    if archive.repositories.is_empty() {
        eprintln!("No repositories configured.");
        return Ok(());
    }
    println!("{}", format_table(&archive.repositories, &state));
    Ok(())
}

fn format_table(repositories: &[String], state: &RunState) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Repository").fg(Color::Cyan),
            Cell::new("State").fg(Color::Cyan),
            Cell::new("Completed").fg(Color::Cyan),
        ]);

    let mut done = 0;
    for slug in repositories {
        match state.completed_at(slug) {
            Some(at) => {
                done += 1;
                table.add_row(vec![
                    Cell::new(slug),
                    Cell::new("complete").fg(Color::Green),
                    Cell::new(at.format("%Y-%m-%d %H:%M UTC")),
                ]);
            }
            None => {
                table.add_row(vec![
                    Cell::new(slug),
                    Cell::new("pending").fg(Color::Yellow),
                    Cell::new("-"),
                ]);
            }
        }
    }
    format!(
        "\n{table}\n{done}/{} repositories complete",
        repositories.len()
    )
}
