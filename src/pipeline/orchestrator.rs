//! Concurrent build scheduling
//!
//! A single coordinator owns every target's state. It keeps a ready queue in
//! topological order and hands at most `max_workers` targets at a time to a
//! [`JoinSet`]. Tasks only report back; all state transitions, failure
//! propagation and progress bookkeeping happen in the coordinator, so a
//! target is dispatched at most once per run.
//!
//! Board metadata is part of every fingerprint, so each board in the run is
//! resolved once before scheduling starts.

use super::context::PipelineContext;
use super::fingerprint::{board_digest, fingerprint_graph};
use super::native::NativeBuildRequest;
use super::report::{BuildReport, FailureCause, TargetOutcome};
use super::target::{BuildTarget, TargetStatus};
use crate::bsp::BoardMetadata;
use crate::cache::CacheMetadata;
use crate::codegen::{DependencyOutput, GenerationRequest, RenderContext};
use crate::error::{BspGenerationError, BuildError, GraphError};
use crate::graph::DependencyGraph;
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::spec::KernelSpec;
use crate::util::fs::{copy_dir_all, promote_dir};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

type BoardResult = Result<Arc<BoardMetadata>, BspGenerationError>;

/// Everything a target task needs, owned so it can move into the task
struct TargetJob {
    spec: KernelSpec,
    fingerprint: String,
    dependencies: Vec<DependencyOutput>,
    board: BoardResult,
}

enum TargetSuccess {
    Built(PathBuf),
    Cached(PathBuf),
}

type TaskResult = (usize, Result<TargetSuccess, FailureCause>, Duration);

struct TargetState {
    target: BuildTarget,
    cause: Option<FailureCause>,
    duration: Duration,
}

pub struct BuildOrchestrator {
    ctx: Arc<PipelineContext>,
}

impl BuildOrchestrator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Builds the requested targets and their dependencies
    ///
    /// An empty `requested` list builds the whole graph. Only an unknown
    /// target id is an error; target failures are reported in the
    /// [`BuildReport`]. Flipping `cancel` to `true` stops scheduling; running
    /// targets finish and everything not yet started is reported skipped.
    pub async fn run(
        &self,
        graph: &DependencyGraph,
        requested: &[String],
        cancel: watch::Receiver<bool>,
    ) -> Result<BuildReport, GraphError> {
        let start = Instant::now();
        let closure = if requested.is_empty() {
            (0..graph.len()).collect::<BTreeSet<_>>()
        } else {
            graph.ancestors_closure(requested)?
        };
        let requested_nodes: BTreeSet<usize> = if requested.is_empty() {
            closure.clone()
        } else {
            requested.iter().filter_map(|id| graph.index_of(id)).collect()
        };

        let boards = self.resolve_boards(graph, &closure).await;
        let digests: HashMap<String, String> = boards
            .iter()
            .filter_map(|(id, board)| Some((id.clone(), board_digest(board.as_ref().ok()?))))
            .collect();
        let fingerprints = fingerprint_graph(graph, self.ctx.generator.as_ref(), &digests);
        let workers = self.ctx.config.effective_workers();

        info!(
            targets = closure.len(),
            workers,
            build_dir = %self.ctx.config.build_dir().display(),
            "Scheduling build"
        );
        self.ctx.progress.on_progress(&ProgressEvent::RunStarted {
            targets: closure.len(),
            workers,
        });

        let mut run = RunState::new(graph, &closure, &requested_nodes, &fingerprints);

        let mut cancel = cancel;
        let mut watching = true;
        let mut cancelled = *cancel.borrow();
        if cancelled {
            self.ctx.progress.on_progress(&ProgressEvent::CancellationRequested);
        }

        let mut tasks: JoinSet<TaskResult> = JoinSet::new();

        loop {
            if !cancelled {
                while tasks.len() < workers {
                    let Some(node) = run.pop_ready() else { break };
                    let spec = graph.spec(node);
                    let board = boards.get(&spec.board).cloned().unwrap_or_else(|| {
                        Err(BspGenerationError {
                            board: spec.board.clone(),
                            reason: "board metadata was not resolved".to_string(),
                        })
                    });
                    let job = TargetJob {
                        spec: spec.clone(),
                        fingerprint: fingerprints[node].clone(),
                        dependencies: run.dependency_outputs(node),
                        board,
                    };
                    run.mark_started(node);
                    self.dispatch(&mut tasks, node, job);
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((node, result, elapsed))) => {
                        run.complete(node, result, elapsed, self.ctx.progress.as_ref());
                    }
                    Some(Err(e)) => warn!(error = %e, "Target task aborted"),
                    None => break,
                },
                changed = cancel.changed(), if watching => match changed {
                    Ok(()) => {
                        if *cancel.borrow() && !cancelled {
                            cancelled = true;
                            warn!(running = tasks.len(), "Cancellation requested");
                            self.ctx.progress.on_progress(&ProgressEvent::CancellationRequested);
                        }
                    }
                    Err(_) => watching = false,
                },
            }
        }

        run.skip_unstarted(self.ctx.progress.as_ref());
        let report = BuildReport::new(run.outcomes(), start.elapsed(), cancelled);

        self.ctx.progress.on_progress(&ProgressEvent::RunCompleted {
            succeeded: report.succeeded().len(),
            cached: report.skipped_cached().len(),
            failed: report.failed().len(),
            skipped: report.skipped().len(),
            duration: report.duration(),
        });

        Ok(report)
    }

    /// Queries the BSP provider once for every board used in `closure`
    async fn resolve_boards(
        &self,
        graph: &DependencyGraph,
        closure: &BTreeSet<usize>,
    ) -> HashMap<String, BoardResult> {
        let names: BTreeSet<&str> = closure
            .iter()
            .map(|&n| graph.spec(n).board.as_str())
            .collect();

        let mut queries = JoinSet::new();
        for name in names {
            let ctx = self.ctx.clone();
            let board = name.to_string();
            queries.spawn(async move {
                let result = ctx.bsp.metadata(&board).await.map(Arc::new);
                (board, result)
            });
        }

        let mut boards = HashMap::new();
        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok((board, result)) => {
                    match &result {
                        Ok(_) => debug!(board = %board, "Board metadata resolved"),
                        Err(e) => warn!(board = %board, error = %e, "Board metadata unavailable"),
                    }
                    boards.insert(board, result);
                }
                Err(e) => warn!(error = %e, "Board metadata query aborted"),
            }
        }
        boards
    }

    fn dispatch(&self, tasks: &mut JoinSet<TaskResult>, node: usize, job: TargetJob) {
        let ctx = self.ctx.clone();
        tasks.spawn(async move {
            let started = Instant::now();
            let id = job.spec.id.clone();
            // Inner task so a panic still maps back to its node.
            let result = match tokio::spawn(execute_target(ctx, job)).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(kernel = %id, error = %e, "Target task panicked");
                    Err(FailureCause::Build {
                        message: format!("target task failed: {e}"),
                        diagnostics: None,
                    })
                }
            };
            (node, result, started.elapsed())
        });
    }
}

/// Coordinator-side bookkeeping for one run
struct RunState<'g> {
    graph: &'g DependencyGraph,
    /// Topological position of each node, for queue ordering
    position: Vec<usize>,
    closure: &'g BTreeSet<usize>,
    states: HashMap<usize, TargetState>,
    remaining: HashMap<usize, usize>,
    ready: BTreeSet<(usize, usize)>,
}

impl<'g> RunState<'g> {
    fn new(
        graph: &'g DependencyGraph,
        closure: &'g BTreeSet<usize>,
        requested: &BTreeSet<usize>,
        fingerprints: &[String],
    ) -> Self {
        let mut position = vec![0; graph.len()];
        for (pos, &node) in graph.topological_order().iter().enumerate() {
            position[node] = pos;
        }

        let mut states = HashMap::new();
        let mut remaining = HashMap::new();
        let mut ready = BTreeSet::new();
        for &node in closure {
            let spec = graph.spec(node);
            states.insert(
                node,
                TargetState {
                    target: BuildTarget::new(
                        node,
                        &spec.id,
                        &fingerprints[node],
                        requested.contains(&node),
                    ),
                    cause: None,
                    duration: Duration::ZERO,
                },
            );
            let deps = graph.dependencies(node).len();
            remaining.insert(node, deps);
            if deps == 0 {
                ready.insert((position[node], node));
            }
        }

        Self {
            graph,
            position,
            closure,
            states,
            remaining,
            ready,
        }
    }

    fn status(&self, node: usize) -> Option<TargetStatus> {
        self.states.get(&node).map(|s| s.target.status)
    }

    fn pop_ready(&mut self) -> Option<usize> {
        while let Some((_, node)) = self.ready.pop_first() {
            if self.status(node) == Some(TargetStatus::Pending) {
                return Some(node);
            }
        }
        None
    }

    fn mark_started(&mut self, node: usize) {
        if let Some(state) = self.states.get_mut(&node) {
            state.target.status = TargetStatus::Generating;
        }
    }

    fn dependency_outputs(&self, node: usize) -> Vec<DependencyOutput> {
        self.graph
            .dependencies(node)
            .iter()
            .filter_map(|d| self.states.get(d))
            .map(|s| DependencyOutput {
                id: s.target.id.clone(),
                output: s
                    .target
                    .output
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                fingerprint: s.target.fingerprint.clone(),
            })
            .collect()
    }

    fn complete(
        &mut self,
        node: usize,
        result: Result<TargetSuccess, FailureCause>,
        elapsed: Duration,
        progress: &dyn ProgressHandler,
    ) {
        let Some(state) = self.states.get_mut(&node) else {
            return;
        };
        state.duration = elapsed;
        let id = state.target.id.clone();

        match result {
            Ok(success) => {
                let (status, output) = match success {
                    TargetSuccess::Built(output) => (TargetStatus::Succeeded, output),
                    TargetSuccess::Cached(output) => (TargetStatus::SkippedCached, output),
                };
                state.target.status = status;
                state.target.output = Some(output);
                if status == TargetStatus::Succeeded {
                    progress.on_progress(&ProgressEvent::TargetSucceeded {
                        id,
                        duration: elapsed,
                    });
                }
                self.release_dependents(node);
            }
            Err(cause) => {
                warn!(kernel = %id, cause = %cause, "Target failed");
                progress.on_progress(&ProgressEvent::TargetFailed {
                    id,
                    cause: cause.to_string(),
                });
                state.target.status = TargetStatus::Failed;
                state.cause = Some(cause);
                self.propagate_failure(node, progress);
            }
        }
    }

    fn release_dependents(&mut self, node: usize) {
        let graph = self.graph;
        for &dependent in graph.dependents(node) {
            if !self.closure.contains(&dependent) {
                continue;
            }
            let Some(count) = self.remaining.get_mut(&dependent) else {
                continue;
            };
            *count = count.saturating_sub(1);
            let unblocked = *count == 0;
            if unblocked && self.status(dependent) == Some(TargetStatus::Pending) {
                self.ready.insert((self.position[dependent], dependent));
            }
        }
    }

    /// Fails every pending transitive dependent of `node` without running it
    fn propagate_failure(&mut self, node: usize, progress: &dyn ProgressHandler) {
        let graph = self.graph;
        let mut queue = BTreeSet::from([(self.position[node], node)]);

        while let Some((_, failed)) = queue.pop_first() {
            let Some(state) = self.states.get(&failed) else {
                continue;
            };
            let chain: Vec<String> = std::iter::once(state.target.id.clone())
                .chain(
                    state
                        .cause
                        .as_ref()
                        .map(|c| c.chain().to_vec())
                        .unwrap_or_default(),
                )
                .collect();

            for &dependent in graph.dependents(failed) {
                if self.status(dependent) != Some(TargetStatus::Pending) {
                    continue;
                }
                if let Some(dep_state) = self.states.get_mut(&dependent) {
                    let cause = FailureCause::DependencyFailed {
                        chain: chain.clone(),
                    };
                    debug!(kernel = %dep_state.target.id, cause = %cause, "Dependency failed");
                    progress.on_progress(&ProgressEvent::TargetFailed {
                        id: dep_state.target.id.clone(),
                        cause: cause.to_string(),
                    });
                    dep_state.target.status = TargetStatus::Failed;
                    dep_state.cause = Some(cause);
                    queue.insert((self.position[dependent], dependent));
                }
            }
        }
    }

    fn skip_unstarted(&mut self, progress: &dyn ProgressHandler) {
        let graph = self.graph;
        for &node in graph.topological_order() {
            if let Some(state) = self.states.get_mut(&node) {
                if !state.target.status.is_terminal() {
                    state.target.status = TargetStatus::Skipped;
                    progress.on_progress(&ProgressEvent::TargetSkipped {
                        id: state.target.id.clone(),
                    });
                }
            }
        }
    }

    fn outcomes(mut self) -> Vec<TargetOutcome> {
        let graph = self.graph;
        graph
            .topological_order()
            .iter()
            .filter_map(|node| self.states.remove(node))
            .map(|s| TargetOutcome {
                id: s.target.id,
                fingerprint: s.target.fingerprint,
                status: s.target.status,
                requested: s.target.requested,
                output: s.target.output,
                cause: s.cause,
                duration_ms: s.duration.as_millis() as u64,
            })
            .collect()
    }
}

async fn execute_target(
    ctx: Arc<PipelineContext>,
    job: TargetJob,
) -> Result<TargetSuccess, FailureCause> {
    let id = job.spec.id.clone();
    let output_dir = ctx.config.output_dir(&id);
    let staging = ctx.config.staging_dir(&id, &job.fingerprint);

    let board = job.board.map_err(|e| FailureCause::Bsp {
        board: e.board,
        message: e.reason,
    })?;

    if let Some(cache) = ctx.active_cache() {
        match cache.lookup(&job.fingerprint, &ctx.toolchain) {
            Ok(Some(entry)) => {
                match restore_cached(&entry.artifact_dir, &staging, &output_dir).await {
                    Ok(()) => {
                        debug!(kernel = %id, fingerprint = %job.fingerprint, "Cache hit");
                        ctx.progress
                            .on_progress(&ProgressEvent::TargetCached { id: id.clone() });
                        return Ok(TargetSuccess::Cached(output_dir));
                    }
                    Err(e) => {
                        warn!(kernel = %id, error = %e, "Failed to restore cached artifact; rebuilding")
                    }
                }
            }
            Ok(None) => debug!(kernel = %id, fingerprint = %job.fingerprint, "Cache miss"),
            Err(e) => warn!(kernel = %id, error = %e, "Cache lookup failed; rebuilding"),
        }
    }

    ctx.progress
        .on_progress(&ProgressEvent::TargetGenerating { id: id.clone() });
    let context = RenderContext::for_target(
        &job.spec,
        &job.fingerprint,
        &board,
        &job.dependencies,
        &ctx.toolchain,
    );
    let source_dir = staging.join("src");
    let generated = {
        let ctx = ctx.clone();
        let spec = job.spec.clone();
        let root = source_dir.clone();
        tokio::task::spawn_blocking(move || {
            ctx.generator.render(&GenerationRequest {
                spec: &spec,
                context: &context,
                output_root: &root,
            })
        })
        .await
        .map_err(|e| FailureCause::Generation {
            message: format!("generation task failed: {e}"),
        })?
        .map_err(|e| FailureCause::Generation {
            message: e.to_string(),
        })?
    };
    debug!(kernel = %id, files = generated.files.len(), "Sources staged");

    ctx.progress
        .on_progress(&ProgressEvent::TargetBuilding { id: id.clone() });
    let build_dir = staging.join("build");
    let install_dir = staging.join("install");
    let request = NativeBuildRequest {
        kernel_id: &id,
        board: &job.spec.board,
        source_dir: &source_dir,
        build_dir: &build_dir,
        install_dir: &install_dir,
        toolchain: &ctx.toolchain,
        timeout: ctx.config.step_timeout,
    };
    let built = ctx
        .builder
        .build(&request)
        .await
        .map_err(|e| FailureCause::Build {
            message: e.to_string(),
            diagnostics: e.diagnostics().map(str::to_string),
        })?;

    promote_dir(&built.install_dir, &output_dir).map_err(|e| {
        let err = BuildError::Promotion {
            path: output_dir.clone(),
            reason: e.to_string(),
        };
        FailureCause::Build {
            message: err.to_string(),
            diagnostics: None,
        }
    })?;

    if let Some(cache) = ctx.active_cache() {
        let metadata = CacheMetadata::new(&job.fingerprint, &id, &ctx.toolchain);
        if let Err(e) = cache.store(&job.fingerprint, &output_dir, metadata).await {
            warn!(kernel = %id, error = %e, "Failed to store artifact in cache");
        }
    }

    if let Err(e) = fs::remove_dir_all(&staging) {
        debug!(kernel = %id, error = %e, "Failed to remove staging directory");
    }

    Ok(TargetSuccess::Built(output_dir))
}

/// Copies a cached artifact through staging into its final location
async fn restore_cached(artifact: &Path, staging: &Path, output: &Path) -> io::Result<()> {
    let artifact = artifact.to_path_buf();
    let staged = staging.join("cached");
    let output = output.to_path_buf();
    let staging = staging.to_path_buf();

    tokio::task::spawn_blocking(move || {
        if staged.exists() {
            fs::remove_dir_all(&staged)?;
        }
        copy_dir_all(&artifact, &staged)?;
        promote_dir(&staged, &output)?;
        let _ = fs::remove_dir_all(&staging);
        Ok(())
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::StaticBspProvider;
    use crate::codegen::{CodeGenerator, TemplateRegistry};
    use crate::pipeline::{MockNativeBuilder, PipelineConfig};
    use crate::progress::RecordingHandler;
    use crate::spec::{RawKernelSpec, SpecResolver};
    use crate::toolchain::ToolchainInfo;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        builder: Arc<MockNativeBuilder>,
        progress: Arc<RecordingHandler>,
        orchestrator: BuildOrchestrator,
        graph: DependencyGraph,
    }

    fn fixture(raw: Vec<RawKernelSpec>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(TemplateRegistry::with_builtins());
        let specs = SpecResolver::new(&registry, temp.path()).resolve(raw).unwrap();
        let graph = DependencyGraph::build(specs).unwrap();

        let builder = Arc::new(MockNativeBuilder::new());
        let progress = Arc::new(RecordingHandler::new());
        let ctx = PipelineContext::new(
            Arc::new(CodeGenerator::new(registry)),
            Arc::new(
                StaticBspProvider::new()
                    .with_board(BoardMetadata::new("stm32h7", "armv7e-m", "cortex-m7")),
            ),
            builder.clone(),
            Arc::new(ToolchainInfo::new(Vec::new(), Vec::new())),
            PipelineConfig::new(temp.path()).with_max_workers(2).with_caching(false),
        )
        .with_progress(progress.clone());

        Fixture {
            _temp: temp,
            builder,
            progress,
            orchestrator: BuildOrchestrator::new(Arc::new(ctx)),
            graph,
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_builds_in_dependency_order() {
        let f = fixture(vec![
            RawKernelSpec::new("top", "stm32h7").with_dependency("mid"),
            RawKernelSpec::new("mid", "stm32h7").with_dependency("base"),
            RawKernelSpec::new("base", "stm32h7"),
        ]);

        let report = f.orchestrator.run(&f.graph, &[], no_cancel()).await.unwrap();

        assert!(report.success());
        assert_eq!(f.builder.calls(), vec!["base", "mid", "top"]);
        let ids: Vec<_> = report.targets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["base", "mid", "top"]);
        let out = report.outcome("top").unwrap().output.clone().unwrap();
        assert!(out.join("lib").join("libtop.a").exists());
    }

    #[tokio::test]
    async fn test_requested_subset_builds_only_closure() {
        let f = fixture(vec![
            RawKernelSpec::new("a", "stm32h7"),
            RawKernelSpec::new("b", "stm32h7").with_dependency("a"),
            RawKernelSpec::new("c", "stm32h7"),
        ]);

        let report = f
            .orchestrator
            .run(&f.graph, &["b".to_string()], no_cancel())
            .await
            .unwrap();

        assert_eq!(report.targets.len(), 2);
        assert!(report.outcome("c").is_none());
        assert!(report.outcome("b").unwrap().requested);
        assert!(!report.outcome("a").unwrap().requested);
    }

    #[tokio::test]
    async fn test_unknown_requested_target() {
        let f = fixture(vec![RawKernelSpec::new("a", "stm32h7")]);
        let err = f
            .orchestrator
            .run(&f.graph, &["zzz".to_string()], no_cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownTarget { .. }));
    }

    #[tokio::test]
    async fn test_unknown_board_fails_before_generation() {
        let f = fixture(vec![
            RawKernelSpec::new("a", "esp32"),
            RawKernelSpec::new("b", "stm32h7").with_dependency("a"),
        ]);

        let report = f.orchestrator.run(&f.graph, &[], no_cancel()).await.unwrap();

        assert!(!report.success());
        assert!(matches!(
            report.outcome("a").unwrap().cause,
            Some(FailureCause::Bsp { .. })
        ));
        assert!(f.builder.calls().is_empty());
        assert!(f
            .progress
            .events_for("a")
            .iter()
            .all(|e| !matches!(e, ProgressEvent::TargetGenerating { .. })));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_skips_everything() {
        let f = fixture(vec![RawKernelSpec::new("a", "stm32h7")]);
        let (_tx, rx) = watch::channel(true);

        let report = f.orchestrator.run(&f.graph, &[], rx).await.unwrap();

        assert!(report.cancelled);
        assert!(report.success());
        assert_eq!(report.skipped(), vec!["a"]);
        assert!(f.builder.calls().is_empty());
    }
}
