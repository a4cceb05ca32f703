//! Subcommand handlers
//!
//! Each handler returns the process exit code: 0 on success, 1 when a
//! requested target fails, 2 for configuration and toolchain errors.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::commands::{BuildArgs, CacheCommand, ConfigCommand, GraphArgs};
use super::output::{OutputFormat, OutputFormatter};
use crate::bsp::{BspProvider, CommandBspProvider, StaticBspProvider};
use crate::cache::ArtifactCache;
use crate::codegen::{CodeGenerator, TemplateRegistry};
use crate::config::{ConfigScope, EtchConfig, LOCAL_CONFIG_FILE};
use crate::error::{EtchError, SpecError};
use crate::graph::DependencyGraph;
use crate::pipeline::{BuildOrchestrator, CmakeNinjaBuilder, PipelineContext};
use crate::progress::{LoggingHandler, NoOpHandler, ProgressBarHandler, ProgressHandler};
use crate::spec::{discover_spec_files, load_spec_files, SpecResolver};
use crate::toolchain::{SystemProbe, ToolchainInfo, ToolchainLocator};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIGURATION: i32 = 2;

/// Configuration and toolchain errors map to 2, everything else to 1
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EtchError>() {
        Some(
            EtchError::Config(_)
            | EtchError::Spec(_)
            | EtchError::Graph(_)
            | EtchError::Toolchain(_),
        ) => EXIT_CONFIGURATION,
        None => EXIT_FAILURE,
    }
}

fn report_error(err: anyhow::Error) -> i32 {
    error!("{:#}", err);
    exit_code_for(&err)
}

fn load_config() -> Result<EtchConfig> {
    let config = EtchConfig::load()
        .map_err(EtchError::from)
        .context("Failed to load configuration")?;
    config
        .validate()
        .map_err(EtchError::from)
        .context("Invalid configuration")?;
    Ok(config)
}

/// Spec files named on the command line, or everything under `kernel_dirs`
fn collect_spec_files(args: &[PathBuf], config: &EtchConfig) -> Vec<PathBuf> {
    let inputs = if args.is_empty() {
        config.workspace.kernel_dirs.clone()
    } else {
        args.to_vec()
    };

    let (files, dirs): (Vec<PathBuf>, Vec<PathBuf>) =
        inputs.into_iter().partition(|p| !p.is_dir());
    let mut all = files;
    all.extend(discover_spec_files(&dirs));
    all
}

fn template_registry(config: &EtchConfig) -> Result<TemplateRegistry, EtchError> {
    let mut registry = TemplateRegistry::with_builtins();
    if let Some(dir) = config.workspace.templates_dir.as_deref().filter(|d| d.is_dir()) {
        let loaded = registry.load_dir(dir).map_err(|e| SpecError::Load {
            path: dir.to_path_buf(),
            reason: format!("failed to load templates: {e}"),
        })?;
        debug!(dir = %dir.display(), templates = loaded, "Loaded templates");
    }
    Ok(registry)
}

/// Loads, resolves and orders the kernel specs
fn load_graph(
    spec_args: &[PathBuf],
    config: &EtchConfig,
) -> Result<(DependencyGraph, Arc<TemplateRegistry>), EtchError> {
    let registry = Arc::new(template_registry(config)?);

    let files = collect_spec_files(spec_args, config);
    if files.is_empty() {
        return Err(SpecError::Load {
            path: spec_args
                .first()
                .cloned()
                .unwrap_or_else(|| PathBuf::from(".")),
            reason: "no kernel spec files found".to_string(),
        }
        .into());
    }
    debug!(files = files.len(), "Loading kernel specs");

    let raw = load_spec_files(&files)?;
    let specs = SpecResolver::new(&registry, &config.workspace.build_dir).resolve(raw)?;
    let graph = DependencyGraph::build(specs)?;
    Ok((graph, registry))
}

async fn resolve_toolchain(config: &EtchConfig) -> Result<ToolchainInfo, EtchError> {
    let requirements = config.tool_requirements()?;
    let probe = Arc::new(SystemProbe::new(config.tool_search_dirs()));
    Ok(ToolchainLocator::new(probe).resolve(&requirements).await?)
}

fn progress_handler(quiet: bool) -> Arc<dyn ProgressHandler> {
    if quiet {
        Arc::new(NoOpHandler)
    } else if ProgressBarHandler::is_supported() {
        Arc::new(ProgressBarHandler::new())
    } else {
        Arc::new(LoggingHandler)
    }
}

/// Flips the returned receiver to `true` on Ctrl-C
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing running targets");
            let _ = tx.send(true);
        }
    });
    rx
}

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    match run_build(args, quiet).await {
        Ok(code) => code,
        Err(e) => report_error(e),
    }
}

async fn run_build(args: &BuildArgs, quiet: bool) -> Result<i32> {
    let mut config = load_config()?;
    if let Some(jobs) = args.jobs {
        config.pipeline.max_workers = jobs;
    }
    if let Some(timeout) = args.timeout {
        config.pipeline.step_timeout_secs = timeout;
    }
    if args.no_cache {
        debug!("Caching disabled");
        config.enable_caching = false;
    }
    config
        .validate()
        .map_err(EtchError::from)
        .context("Invalid command-line options")?;

    let (graph, registry) =
        load_graph(&args.spec_files, &config).context("Failed to resolve kernel specs")?;
    info!(kernels = graph.len(), "Kernel specs resolved");

    let toolchain = Arc::new(
        resolve_toolchain(&config)
            .await
            .context("Failed to resolve toolchain")?,
    );

    let pipeline_config = config.pipeline_config();
    let bsp: Arc<dyn BspProvider> =
        match CommandBspProvider::from_toolchain(&toolchain, pipeline_config.step_timeout) {
            Some(provider) => Arc::new(provider),
            None => {
                warn!("No BSP generator resolved; every board will fail");
                Arc::new(StaticBspProvider::new())
            }
        };

    let build_dir = pipeline_config.build_dir.clone();
    let ctx = PipelineContext::new(
        Arc::new(CodeGenerator::new(registry)),
        bsp,
        Arc::new(CmakeNinjaBuilder::new()),
        toolchain,
        pipeline_config,
    )
    .with_cache(Arc::new(ArtifactCache::new(config.cache_dir())))
    .with_progress(progress_handler(quiet));

    let orchestrator = BuildOrchestrator::new(Arc::new(ctx));
    let report = orchestrator
        .run(&graph, &args.targets, cancel_on_ctrl_c())
        .await
        .map_err(EtchError::from)
        .context("Failed to schedule build")?;

    let formatter = OutputFormatter::new(args.format.into());
    let rendered = formatter.format_report(&report, &build_dir)?;
    print!("{}", rendered);

    Ok(if report.success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

pub async fn handle_graph(args: &GraphArgs) -> i32 {
    let result = load_config().and_then(|config| {
        let (graph, _) =
            load_graph(&args.spec_files, &config).context("Failed to resolve kernel specs")?;
        OutputFormatter::new(OutputFormat::Human).format_graph(&graph)
    });

    match result {
        Ok(text) => {
            print!("{}", text);
            EXIT_SUCCESS
        }
        Err(e) => report_error(e),
    }
}

pub async fn handle_toolchain() -> i32 {
    match toolchain_report().await {
        Ok(text) => {
            print!("{}", text);
            EXIT_SUCCESS
        }
        Err(e) => report_error(e),
    }
}

async fn toolchain_report() -> Result<String> {
    let config = load_config()?;
    let toolchain = resolve_toolchain(&config)
        .await
        .context("Failed to resolve toolchain")?;
    OutputFormatter::new(OutputFormat::Human).format_toolchain(&toolchain)
}

pub async fn handle_config(command: &ConfigCommand) -> i32 {
    let result: Result<String> = match command {
        ConfigCommand::Show => load_config().map(|config| config.to_string()),
        ConfigCommand::Init { global } => {
            let scope = if *global {
                ConfigScope::Global
            } else {
                ConfigScope::Local
            };
            EtchConfig::default()
                .save(scope)
                .map(|path| format!("Wrote default configuration to {}\n", path.display()))
                .map_err(EtchError::from)
                .context("Failed to write configuration")
        }
        ConfigCommand::Set { key, value } => set_local(key, value),
    };

    match result {
        Ok(text) => {
            print!("{}", text);
            EXIT_SUCCESS
        }
        Err(e) => report_error(e),
    }
}

/// Applies one setting to `./etch.yaml` without persisting global or
/// environment values into it
fn set_local(key: &str, value: &str) -> Result<String> {
    let local = Path::new(LOCAL_CONFIG_FILE);
    let mut config = EtchConfig::load_layers(&[Some(local)])
        .map_err(EtchError::from)
        .with_context(|| format!("Failed to read {}", local.display()))?;
    config
        .set(key, value)
        .map_err(EtchError::from)
        .with_context(|| format!("Failed to set {}", key))?;
    config
        .validate()
        .map_err(EtchError::from)
        .context("Invalid configuration")?;
    let path = config
        .save(ConfigScope::Local)
        .map_err(EtchError::from)
        .context("Failed to write configuration")?;
    Ok(format!("Set {} = {} in {}\n", key, value, path.display()))
}

pub async fn handle_cache(command: &CacheCommand) -> i32 {
    let result = match command {
        CacheCommand::Clear => load_config().and_then(|config| {
            let cache = ArtifactCache::new(config.cache_dir());
            let removed = cache
                .clear()
                .with_context(|| format!("Failed to clear {}", cache.root().display()))?;
            Ok(format!(
                "Removed {} cache entr{} from {}\n",
                removed,
                if removed == 1 { "y" } else { "ies" },
                cache.root().display()
            ))
        }),
    };

    match result {
        Ok(text) => {
            print!("{}", text);
            EXIT_SUCCESS
        }
        Err(e) => report_error(e),
    }
}
