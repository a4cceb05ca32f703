//! Utility modules for etch
//!
//! - Structured logging setup and configuration
//! - Subprocess invocation with timeouts and captured output
//! - Staging/promotion filesystem helpers
//! - Naming helpers used by templates and reports

pub mod fs;
pub mod logging;
pub mod naming;
pub mod process;

pub use logging::{init_default, init_from_env, init_logging, LoggingConfig};
pub use process::{run_tool, ProcessError, ToolInvocation, ToolOutput};
