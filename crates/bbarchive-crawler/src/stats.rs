//! Per-repository counters and the end-of-run summary table

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use bbarchive_core::fmt_num;

/// Counters for one repository (crawl + relativization).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStats {
    /// JSON pages fetched and written
    pub saved: usize,
    /// Items already on disk from an earlier run
    pub cached: usize,
    /// Repeat references within this run
    pub skipped: usize,
    /// Permanent per-item failures
    pub failed: usize,
    /// Media files fetched
    pub downloaded: usize,
    pub bytes: u64,
    /// HTTP requests issued (including failed ones)
    pub requests: usize,
    /// JSON documents rewritten into the publish tree
    pub relativized: usize,
    /// Binary files copied into the publish tree
    pub copied: usize,
    /// Child links left absolute because the child was never archived
    pub gaps: usize,
}

impl RepoStats {
    pub fn merge(&mut self, other: &RepoStats) {
        self.saved += other.saved;
        self.cached += other.cached;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.downloaded += other.downloaded;
        self.bytes += other.bytes;
        self.requests += other.requests;
        self.relativized += other.relativized;
        self.copied += other.copied;
        self.gaps += other.gaps;
    }

    /// One-line form for permanent progress lines
    pub fn brief(&self) -> String {
        format!(
            "{} saved, {} cached, {} skipped, {} failed, {} downloaded",
            fmt_num(self.saved),
            fmt_num(self.cached),
            fmt_num(self.skipped),
            fmt_num(self.failed),
            fmt_num(self.downloaded)
        )
    }
}

/// Result of one `archive` run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<(String, RepoStats)>,
    pub failed: Vec<(String, String)>,
    /// Repositories skipped because an earlier run completed them
    pub already_complete: usize,
    pub cancelled: bool,
    /// Worker threads that did not stop within the join window
    pub abandoned_workers: usize,
}

impl RunSummary {
    pub fn totals(&self) -> RepoStats {
        let mut total = RepoStats::default();
        for (_, stats) in &self.completed {
            total.merge(stats);
        }
        total
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Repository")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Saved").fg(Color::Cyan),
                Cell::new("Cached").fg(Color::Cyan),
                Cell::new("Skipped").fg(Color::Cyan),
                Cell::new("Failed").fg(Color::Cyan),
                Cell::new("Downloaded").fg(Color::Cyan),
                Cell::new("Relativized").fg(Color::Cyan),
                Cell::new("Copied").fg(Color::Cyan),
            ]);

        for (name, stats) in &self.completed {
            table.add_row(stats_row(Cell::new(name), stats));
        }
        for (name, error) in &self.failed {
            table.add_row(vec![
                Cell::new(name).fg(Color::Red),
                Cell::new(error).fg(Color::Red),
            ]);
        }
        if self.completed.len() > 1 {
            table.add_row(stats_row(
                Cell::new("total").add_attribute(comfy_table::Attribute::Bold),
                &self.totals(),
            ));
        }

        let mut out = format!("\n{table}");
        if self.already_complete > 0 {
            out.push_str(&format!(
                "\n{} repositories already complete (use --fresh to redo)",
                self.already_complete
            ));
        }
        out
    }

    pub fn print(&self) {
        println!("{}", self.format_table());
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        let total = self.totals();
        log::info!(
            "Archive run: {} repositories complete, {} failed, {} already complete; {}",
            self.completed.len(),
            self.failed.len(),
            self.already_complete,
            total.brief()
        );
    }
}

fn stats_row(label: Cell, stats: &RepoStats) -> Vec<Cell> {
    vec![
        label,
        Cell::new(fmt_num(stats.saved)),
        Cell::new(fmt_num(stats.cached)),
        Cell::new(fmt_num(stats.skipped)),
        Cell::new(fmt_num(stats.failed)),
        Cell::new(fmt_num(stats.downloaded)),
        Cell::new(fmt_num(stats.relativized)),
        Cell::new(fmt_num(stats.copied)),
    ]
}
