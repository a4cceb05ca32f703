//! Progress reporting for build runs

mod bar;
mod handler;
mod logging;
mod recording;

pub use bar::ProgressBarHandler;
pub use handler::{NoOpHandler, ProgressEvent, ProgressHandler};
pub use logging::LoggingHandler;
pub use recording::RecordingHandler;
