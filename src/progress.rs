//! Progress display for generation runs
//!
//! [`ProgressDisplay`] consumes [`ProgressInfo`] samples. On an interactive
//! terminal it redraws an `indicatif` bar in place; otherwise it logs a line
//! through `tracing` each time progress crosses another 5 % step, so log files
//! stay short.

use crate::types::{ProgressCallback, ProgressInfo};
use crate::utils::format_bytes;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Percentage between two log lines in non-interactive mode
const LOG_STEP: f32 = 5.0;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} {msg}";

/// Renders progress samples as a bar or as log lines
pub struct ProgressDisplay {
    bar: Option<ProgressBar>,
    last_step: Mutex<Option<u32>>,
}

impl ProgressDisplay {
    /// Create a display, drawing a bar when `interactive`
    pub fn new(interactive: bool) -> Self {
        let bar = interactive.then(|| {
            let style = ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            let bar = ProgressBar::new(0);
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(200));
            bar
        });

        Self {
            bar,
            last_step: Mutex::new(None),
        }
    }

    /// Create a display which draws a bar if stderr is a terminal
    pub fn for_stderr() -> Self {
        Self::new(std::io::stderr().is_terminal())
    }

    /// Render one sample
    pub fn update(&self, info: &ProgressInfo) {
        match &self.bar {
            Some(bar) => {
                bar.set_length(info.total_bytes);
                bar.set_position(info.bytes_processed);
                bar.set_message(status_line(info));
            }
            None => {
                if let Some(step) = self.crossed_step(info) {
                    info!("{} {}% - {}", info.operation, step, status_line(info));
                }
            }
        }
    }

    /// Remove the bar from the terminal
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    /// Wrap the display into a callback for a generator
    pub fn callback(self: &Arc<Self>) -> ProgressCallback {
        let display = Arc::clone(self);
        Arc::new(move |info: ProgressInfo| display.update(&info))
    }

    /// The new step if `info` reaches a step not logged before
    fn crossed_step(&self, info: &ProgressInfo) -> Option<u32> {
        let percentage = info.percentage()?;
        let step = ((percentage / LOG_STEP).floor() * LOG_STEP) as u32;

        let mut last = self.last_step.lock();
        if last.is_some_and(|last| step <= last) {
            return None;
        }
        *last = Some(step);
        Some(step)
    }
}

/// One-line summary of nodes, throughput and remaining time
fn status_line(info: &ProgressInfo) -> String {
    let mut line = format!("{}/{} nodes", info.processed, info.total);
    if let Some(rate) = info.bytes_per_second() {
        line.push_str(&format!(", {}/s", format_bytes(rate as u64)));
    }
    if let Some(eta) = info.eta() {
        line.push_str(&format!(", ETA {}", humantime::format_duration(eta)));
    }
    line
}
