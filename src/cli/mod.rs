pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{BuildArgs, CacheCommand, CliArgs, Commands, ConfigCommand, GraphArgs};
pub use output::{OutputFormat, OutputFormatter};
