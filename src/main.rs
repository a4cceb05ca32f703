use etch::cli::commands::{CliArgs, Commands};
use etch::cli::handlers::{
    handle_build, handle_cache, handle_config, handle_graph, handle_toolchain,
};
use etch::util::logging::{init_logging, parse_level, LoggingConfig};
use etch::{EtchConfig, VERSION};

use clap::Parser;
use std::env;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("etch v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Build(build_args) => handle_build(build_args, args.quiet).await,
        Commands::Graph(graph_args) => handle_graph(graph_args).await,
        Commands::Toolchain => handle_toolchain().await,
        Commands::Config { command } => handle_config(command).await,
        Commands::Cache { command } => handle_cache(command).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        configured_level()
    };

    let use_json = env::var("ETCH_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    init_logging(LoggingConfig {
        level,
        use_json,
        include_thread_ids: args.verbose,
        ..Default::default()
    });
}

/// Level from the layered config; an unreadable config is reported later by
/// the command handler, so fall back to the environment here
fn configured_level() -> Level {
    match EtchConfig::load() {
        Ok(config) => config.effective_log_level(),
        Err(_) => {
            let level_str = env::var("ETCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            parse_level(&level_str)
        }
    }
}
