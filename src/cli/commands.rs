use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Kernel build orchestration for embedded AI/ML targets
#[derive(Parser, Debug)]
#[command(
    name = "etch",
    about = "Kernel build orchestration for embedded AI/ML targets",
    version,
    author,
    long_about = "etch turns declarative kernel specs into board-targeted native artifacts. \
                  It resolves parameters, renders sources from templates, and builds every \
                  kernel in dependency order with a content-addressed artifact cache."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build kernels",
        long_about = "Resolves the kernel specs, then generates and builds the requested \
                      targets and their dependencies.\n\n\
                      Examples:\n  \
                      etch build\n  \
                      etch build kernels/conv.yaml -t conv2d\n  \
                      etch build -j 8 --no-cache --format json"
    )]
    Build(BuildArgs),

    #[command(
        about = "Print the build order",
        long_about = "Resolves the kernel specs and prints the targets in the order they \
                      would be built. Fails on dependency cycles."
    )]
    Graph(GraphArgs),

    #[command(about = "Resolve and print the external toolchain")]
    Toolchain,

    #[command(about = "Inspect or change configuration")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    #[command(about = "Manage the artifact cache")]
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(
        value_name = "SPEC_FILES",
        help = "Kernel spec files or directories (defaults to workspace.kernel_dirs)"
    )]
    pub spec_files: Vec<PathBuf>,

    #[arg(
        short = 't',
        long = "target",
        value_name = "TARGET",
        help = "Build only this target and its dependencies (repeatable)"
    )]
    pub targets: Vec<String>,

    #[arg(
        short = 'j',
        long,
        value_name = "N",
        help = "Maximum concurrent targets (0 = available parallelism)"
    )]
    pub jobs: Option<usize>,

    #[arg(long, value_name = "SECONDS", help = "Timeout for each external tool invocation")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Disable the artifact cache")]
    pub no_cache: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Report format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct GraphArgs {
    #[arg(value_name = "SPEC_FILES", help = "Kernel spec files or directories")]
    pub spec_files: Vec<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    #[command(about = "Print the effective configuration")]
    Show,

    #[command(about = "Write the default configuration to a file")]
    Init {
        #[arg(long, help = "Write the global file instead of ./etch.yaml")]
        global: bool,
    },

    #[command(about = "Set one value in ./etch.yaml, e.g. `pipeline.max_workers 4`")]
    Set { key: String, value: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    #[command(about = "Remove every cache entry")]
    Clear,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_default_build_args() {
        let args = CliArgs::parse_from(["etch", "build"]);
        match args.command {
            Commands::Build(build) => {
                assert!(build.spec_files.is_empty());
                assert!(build.targets.is_empty());
                assert_eq!(build.format, OutputFormatArg::Human);
                assert!(build.jobs.is_none());
                assert!(build.timeout.is_none());
                assert!(!build.no_cache);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_build_with_targets_and_options() {
        let args = CliArgs::parse_from([
            "etch",
            "build",
            "kernels/",
            "-t",
            "conv2d",
            "--target",
            "relu",
            "-j",
            "4",
            "--timeout",
            "30",
            "--no-cache",
            "-f",
            "json",
        ]);
        match args.command {
            Commands::Build(build) => {
                assert_eq!(build.spec_files, vec![PathBuf::from("kernels/")]);
                assert_eq!(build.targets, vec!["conv2d", "relu"]);
                assert_eq!(build.jobs, Some(4));
                assert_eq!(build.timeout, Some(30));
                assert!(build.no_cache);
                assert_eq!(build.format, OutputFormatArg::Json);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_config_subcommands() {
        let args = CliArgs::parse_from(["etch", "config", "set", "pipeline.max_workers", "4"]);
        match args.command {
            Commands::Config {
                command: ConfigCommand::Set { key, value },
            } => {
                assert_eq!(key, "pipeline.max_workers");
                assert_eq!(value, "4");
            }
            _ => panic!("Expected config set"),
        }

        let args = CliArgs::parse_from(["etch", "config", "init", "--global"]);
        assert!(matches!(
            args.command,
            Commands::Config {
                command: ConfigCommand::Init { global: true }
            }
        ));
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["etch", "-v", "toolchain"]);
        assert!(args.verbose);
        assert!(matches!(args.command, Commands::Toolchain));

        let args = CliArgs::parse_from(["etch", "graph", "--log-level", "trace"]);
        assert_eq!(args.log_level.as_deref(), Some("trace"));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(CliArgs::try_parse_from(["etch", "-q", "-v", "toolchain"]).is_err());
    }
}
