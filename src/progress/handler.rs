//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while a build run progresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Scheduling is about to start
    RunStarted { targets: usize, workers: usize },

    /// Served from the artifact cache
    TargetCached { id: String },

    /// Rendering sources
    TargetGenerating { id: String },

    /// Native build running
    TargetBuilding { id: String },

    TargetSucceeded { id: String, duration: Duration },

    TargetFailed { id: String, cause: String },

    /// Not started because the run was cancelled
    TargetSkipped { id: String },

    /// No further targets will be scheduled
    CancellationRequested,

    RunCompleted {
        succeeded: usize,
        cached: usize,
        failed: usize,
        skipped: usize,
        duration: Duration,
    },
}

impl ProgressEvent {
    /// Target the event concerns, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            ProgressEvent::TargetCached { id }
            | ProgressEvent::TargetGenerating { id }
            | ProgressEvent::TargetBuilding { id }
            | ProgressEvent::TargetSucceeded { id, .. }
            | ProgressEvent::TargetFailed { id, .. }
            | ProgressEvent::TargetSkipped { id } => Some(id),
            _ => None,
        }
    }
}

/// Trait for handling progress events during a build run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
