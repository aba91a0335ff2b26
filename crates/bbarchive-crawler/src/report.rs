//! Progress channel between credential workers and the coordinator
//!
//! Workers only ever send; the coordinator owns the terminal. Transient
//! status lines overwrite the worker's slot in the status block and are
//! redrawn at most [`REDRAW_HZ`] times per second; permanent lines are
//! emitted as log records immediately.

use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use bbarchive_core::ProgressContext;
use bbarchive_core::progress::REDRAW_HZ;

use crate::stats::RepoStats;

/// How a status line is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// Overwrites the worker's previous status
    Transient,
    /// Durable log line at the given level
    Permanent(log::Level),
}

#[derive(Debug)]
pub enum ProgressMsg {
    Status {
        worker: usize,
        text: String,
        line: Line,
        force: bool,
    },
    RepositoryComplete {
        worker: usize,
        repository: String,
        stats: RepoStats,
    },
    RepositoryFailed {
        worker: usize,
        repository: String,
        error: String,
    },
}

/// A worker's end of the progress channel.
///
/// Send errors are ignored: a closed channel means the coordinator is gone
/// and the process is shutting down.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    worker: usize,
    tx: Sender<ProgressMsg>,
}

impl ProgressSender {
    pub fn new(worker: usize, tx: Sender<ProgressMsg>) -> Self {
        Self { worker, tx }
    }

    /// Sender whose messages go nowhere
    pub fn detached(worker: usize) -> Self {
        let (tx, _) = std::sync::mpsc::channel();
        Self { worker, tx }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn transient(&self, text: impl Into<String>) {
        self.status(text.into(), Line::Transient, false);
    }

    /// Transient line that bypasses the redraw throttle
    pub fn flush(&self, text: impl Into<String>) {
        self.status(text.into(), Line::Transient, true);
    }

    pub fn permanent(&self, level: log::Level, text: impl Into<String>) {
        self.status(text.into(), Line::Permanent(level), false);
    }

    pub fn repository_complete(&self, repository: impl Into<String>, stats: RepoStats) {
        let _ = self.tx.send(ProgressMsg::RepositoryComplete {
            worker: self.worker,
            repository: repository.into(),
            stats,
        });
    }

    pub fn repository_failed(&self, repository: impl Into<String>, error: impl Into<String>) {
        let _ = self.tx.send(ProgressMsg::RepositoryFailed {
            worker: self.worker,
            repository: repository.into(),
            error: error.into(),
        });
    }

    fn status(&self, text: String, line: Line, force: bool) {
        let _ = self.tx.send(ProgressMsg::Status {
            worker: self.worker,
            text,
            line,
            force,
        });
    }
}

/// Latest status per worker plus redraw throttling.
#[derive(Debug)]
pub struct StatusBoard {
    lines: Vec<String>,
    dirty: bool,
    last_draw: Option<Instant>,
    min_interval: Duration,
}

impl StatusBoard {
    pub fn new(workers: usize, hz: u8) -> Self {
        Self {
            lines: vec![String::new(); workers],
            dirty: false,
            last_draw: None,
            min_interval: Duration::from_millis(1000 / u64::from(hz.max(1))),
        }
    }

    pub fn update(&mut self, worker: usize, text: String) {
        if worker >= self.lines.len() {
            self.lines.resize(worker + 1, String::new());
        }
        if self.lines[worker] != text {
            self.lines[worker] = text;
            self.dirty = true;
        }
    }

    /// Whether the block should be redrawn at `now`; records the draw if so.
    pub fn take_redraw(&mut self, now: Instant, force: bool) -> bool {
        if !self.dirty && !force {
            return false;
        }
        let due = self
            .last_draw
            .map_or(true, |last| now.duration_since(last) >= self.min_interval);
        if force || due {
            self.last_draw = Some(now);
            self.dirty = false;
            true
        } else {
            false
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Coordinator-side renderer of the multi-worker status block.
pub struct Reporter {
    board: StatusBoard,
    bars: Vec<ProgressBar>,
    is_tty: bool,
}

impl Reporter {
    pub fn new(progress: &ProgressContext, workers: usize) -> Self {
        Self {
            board: StatusBoard::new(workers, REDRAW_HZ),
            bars: (0..workers).map(|i| progress.worker_line(i)).collect(),
            is_tty: progress.is_tty(),
        }
    }

    pub fn status(&mut self, worker: usize, text: String, line: Line, force: bool) {
        match line {
            Line::Transient => {
                if !self.is_tty {
                    log::debug!("[worker-{worker}] {text}");
                }
                self.board.update(worker, text);
                self.redraw(force);
            }
            Line::Permanent(level) => {
                log::log!(level, "{text}");
                self.redraw(true);
            }
        }
    }

    /// Flush a deferred redraw (called on channel poll timeouts).
    pub fn tick(&mut self) {
        self.redraw(false);
    }

    pub fn finish(&self) {
        for bar in &self.bars {
            bar.finish_and_clear();
        }
    }

    fn redraw(&mut self, force: bool) {
        if !self.board.take_redraw(Instant::now(), force) {
            return;
        }
        for (bar, line) in self.bars.iter().zip(self.board.lines()) {
            bar.set_message(line.clone());
        }
    }
}
