//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { targets, workers } => {
                info!(targets, workers, "Starting build run");
            }
            ProgressEvent::TargetCached { id } => {
                info!(kernel = %id, "Using cached artifact");
            }
            ProgressEvent::TargetGenerating { id } => {
                debug!(kernel = %id, "Generating sources");
            }
            ProgressEvent::TargetBuilding { id } => {
                debug!(kernel = %id, "Running native build");
            }
            ProgressEvent::TargetSucceeded { id, duration } => {
                info!(
                    kernel = %id,
                    duration_ms = duration.as_millis(),
                    "Target built"
                );
            }
            ProgressEvent::TargetFailed { id, cause } => {
                warn!(kernel = %id, cause = %cause, "Target failed");
            }
            ProgressEvent::TargetSkipped { id } => {
                info!(kernel = %id, "Target skipped");
            }
            ProgressEvent::CancellationRequested => {
                warn!("Cancellation requested; waiting for running targets");
            }
            ProgressEvent::RunCompleted {
                succeeded,
                cached,
                failed,
                skipped,
                duration,
            } => {
                if *failed > 0 {
                    warn!(
                        succeeded,
                        cached,
                        failed,
                        skipped,
                        total_time_ms = duration.as_millis(),
                        "Build run finished with failures"
                    );
                } else {
                    info!(
                        succeeded,
                        cached,
                        skipped,
                        total_time_ms = duration.as_millis(),
                        "Build run complete"
                    );
                }
            }
        }
    }
}
