//! Terminal progress bar

use super::{ProgressEvent, ProgressHandler};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Renders one bar over all targets of a run on stderr
#[derive(Debug)]
pub struct ProgressBarHandler {
    bar: ProgressBar,
}

impl ProgressBarHandler {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }

    /// Only draws when stderr is a terminal
    pub fn is_supported() -> bool {
        atty::is(atty::Stream::Stderr)
    }

    #[cfg(test)]
    fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for ProgressBarHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler for ProgressBarHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { targets, .. } => {
                self.bar.set_length(*targets as u64);
                self.bar.set_position(0);
            }
            ProgressEvent::TargetGenerating { id } => {
                self.bar.set_message(format!("generating {id}"));
            }
            ProgressEvent::TargetBuilding { id } => {
                self.bar.set_message(format!("building {id}"));
            }
            ProgressEvent::TargetCached { .. }
            | ProgressEvent::TargetSucceeded { .. }
            | ProgressEvent::TargetSkipped { .. } => self.bar.inc(1),
            ProgressEvent::TargetFailed { id, cause } => {
                self.bar.println(format!("✗ {id}: {cause}"));
                self.bar.inc(1);
            }
            ProgressEvent::CancellationRequested => {
                self.bar.set_message("cancelling");
            }
            ProgressEvent::RunCompleted { .. } => self.bar.finish_and_clear(),
        }
    }
}
