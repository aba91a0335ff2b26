//! Terminal rendering for the multi-worker status block.
//!
//! TTY mode: one indicatif line per worker, drawn at most ~4 times a second.
//! Non-TTY mode: hidden lines; permanent lines go through `log`.

use std::io::IsTerminal;
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Redraw ceiling for the status block
pub const REDRAW_HZ: u8 = 4;

fn worker_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:<12.cyan.bold} {wide_msg}").expect("invalid template")
}

/// Central progress context managing the worker status lines.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        let is_tty = std::io::stderr().is_terminal();
        let target = if is_tty {
            ProgressDrawTarget::stderr_with_hz(REDRAW_HZ)
        } else {
            ProgressDrawTarget::hidden()
        };
        Self {
            multi: MultiProgress::with_draw_target(target),
            is_tty,
        }
    }

    /// Context that never draws (tests, piped output).
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            is_tty: false,
        }
    }

    /// Status line for one worker. Hidden when not on a TTY.
    pub fn worker_line(&self, index: usize) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(worker_style());
        pb.set_prefix(format!("worker {index}"));
        pb
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

/// `1234567` → `"1,234,567"`
pub fn fmt_num(n: usize) -> String {
    let digits = n.to_string();
    let head = digits.len() % 3;
    let mut out = String::from(&digits[..head]);
    for group in digits.as_bytes()[head..].chunks(3) {
        if !out.is_empty() {
            out.push(',');
        }
        // ASCII digits
        out.push_str(std::str::from_utf8(group).unwrap_or_default());
    }
    out
}
