//! Native build execution
//!
//! [`CmakeNinjaBuilder`] configures the generated project with the resolved
//! build generator and then runs the executor's `install` target, leaving the
//! finished artifact in the request's install directory.

use crate::error::BuildError;
use crate::toolchain::{ResolvedTool, ToolRole, ToolchainInfo};
use crate::util::process::{run_tool, ProcessError, ToolInvocation, ToolOutput};
use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug)]
pub struct NativeBuildRequest<'a> {
    pub kernel_id: &'a str,
    pub board: &'a str,
    /// Generated sources, containing the build descriptor
    pub source_dir: &'a Path,
    /// Scratch directory for the native build
    pub build_dir: &'a Path,
    /// Where the build installs the final artifact
    pub install_dir: &'a Path,
    pub toolchain: &'a ToolchainInfo,
    /// Per external invocation
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBuildOutput {
    pub install_dir: PathBuf,
    /// Combined tool output of every step
    pub log: String,
}

#[async_trait]
pub trait NativeBuilder: Send + Sync {
    async fn build(&self, request: &NativeBuildRequest<'_>) -> Result<NativeBuildOutput, BuildError>;
}

/// `cmake -G Ninja` followed by `ninja install`
#[derive(Debug, Default, Clone, Copy)]
pub struct CmakeNinjaBuilder;

impl CmakeNinjaBuilder {
    pub fn new() -> Self {
        Self
    }

    fn tool<'t>(toolchain: &'t ToolchainInfo, role: ToolRole) -> Result<&'t ResolvedTool, BuildError> {
        toolchain.by_role(role).ok_or_else(|| BuildError::Spawn {
            step: role.to_string(),
            reason: format!("no {role} tool was resolved"),
        })
    }

    async fn step(
        name: &str,
        invocation: ToolInvocation,
        log: &mut String,
    ) -> Result<ToolOutput, BuildError> {
        let output = run_tool(&invocation).await.map_err(|e| match e {
            ProcessError::Timeout { timeout, .. } => BuildError::Timeout {
                step: name.to_string(),
                seconds: timeout.as_secs(),
            },
            ProcessError::Spawn { source, .. } => BuildError::Spawn {
                step: name.to_string(),
                reason: source.to_string(),
            },
        })?;

        log.push_str(&output.diagnostics());
        if !output.success() {
            return Err(BuildError::Failed {
                step: name.to_string(),
                exit_code: output.exit_code,
                diagnostics: output.diagnostics(),
            });
        }
        debug!(step = name, duration_ms = output.duration.as_millis(), "Build step finished");
        Ok(output)
    }
}

fn define(name: &str, value: impl AsRef<Path>) -> OsString {
    let mut arg = OsString::from(format!("-D{name}="));
    arg.push(value.as_ref().as_os_str());
    arg
}

#[async_trait]
impl NativeBuilder for CmakeNinjaBuilder {
    async fn build(&self, request: &NativeBuildRequest<'_>) -> Result<NativeBuildOutput, BuildError> {
        let generator = Self::tool(request.toolchain, ToolRole::Generator)?;
        let executor = Self::tool(request.toolchain, ToolRole::Executor)?;
        let compiler = Self::tool(request.toolchain, ToolRole::Compiler)?;
        let search_path = request.toolchain.env_path();
        let mut log = String::new();

        info!(kernel = request.kernel_id, board = request.board, "Configuring native build");

        let configure = ToolInvocation::new(&generator.path, request.timeout)
            .arg("-S")
            .arg(request.source_dir)
            .arg("-B")
            .arg(request.build_dir)
            .args(["-G", "Ninja"])
            .arg(define("CMAKE_MAKE_PROGRAM", &executor.path))
            .arg(define("CMAKE_C_COMPILER", &compiler.path))
            .arg(define("CMAKE_INSTALL_PREFIX", request.install_dir))
            .arg(format!("-DETCH_BOARD={}", request.board))
            .arg("-DCMAKE_BUILD_TYPE=Release")
            .isolated_path(search_path.clone());
        Self::step(&generator.name, configure, &mut log).await?;

        let install = ToolInvocation::new(&executor.path, request.timeout)
            .arg("-C")
            .arg(request.build_dir)
            .arg("install")
            .isolated_path(search_path);
        Self::step(&executor.name, install, &mut log).await?;

        Ok(NativeBuildOutput {
            install_dir: request.install_dir.to_path_buf(),
            log,
        })
    }
}

/// Scripted outcome for one kernel
#[derive(Debug, Clone)]
enum MockBehavior {
    Fail { diagnostics: String },
    Delay(Duration),
}

/// In-process builder for tests: writes a fake archive, records calls, and
/// can be told to fail or stall specific kernels
#[derive(Debug, Default)]
pub struct MockNativeBuilder {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    default_delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockNativeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every build without a specific behavior
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn fail_kernel(&self, id: &str, diagnostics: &str) {
        self.set(id, MockBehavior::Fail {
            diagnostics: diagnostics.to_string(),
        });
    }

    /// Makes one kernel's build take `delay`, still bounded by the step timeout
    pub fn delay_kernel(&self, id: &str, delay: Duration) {
        self.set(id, MockBehavior::Delay(delay));
    }

    fn set(&self, id: &str, behavior: MockBehavior) {
        if let Ok(mut behaviors) = self.behaviors.lock() {
            behaviors.insert(id.to_string(), behavior);
        }
    }

    /// Kernel ids in the order their builds started
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, id: &str) -> usize {
        self.calls().iter().filter(|c| *c == id).count()
    }

    /// Highest number of builds observed running at once
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate(&self, request: &NativeBuildRequest<'_>) -> Result<NativeBuildOutput, BuildError> {
        let behavior = self
            .behaviors
            .lock()
            .ok()
            .and_then(|b| b.get(request.kernel_id).cloned());

        let delay = match behavior {
            Some(MockBehavior::Fail { diagnostics }) => {
                return Err(BuildError::Failed {
                    step: "ninja".to_string(),
                    exit_code: Some(1),
                    diagnostics,
                })
            }
            Some(MockBehavior::Delay(delay)) => delay,
            None => self.default_delay,
        };

        if !delay.is_zero() && tokio::time::timeout(request.timeout, tokio::time::sleep(delay)).await.is_err() {
            return Err(BuildError::Timeout {
                step: "ninja".to_string(),
                seconds: request.timeout.as_secs(),
            });
        }

        let sources = std::fs::read_dir(request.source_dir)
            .map(|entries| entries.count())
            .map_err(|e| BuildError::Failed {
                step: "cmake".to_string(),
                exit_code: Some(1),
                diagnostics: format!("{}: {e}", request.source_dir.display()),
            })?;

        let lib = request.install_dir.join("lib");
        std::fs::create_dir_all(&lib)
            .and_then(|_| {
                std::fs::write(
                    lib.join(format!("lib{}.a", request.kernel_id)),
                    format!("{} {} {}\n", request.kernel_id, request.board, sources),
                )
            })
            .map_err(|e| BuildError::Failed {
                step: "ninja".to_string(),
                exit_code: Some(1),
                diagnostics: e.to_string(),
            })?;

        Ok(NativeBuildOutput {
            install_dir: request.install_dir.to_path_buf(),
            log: format!("built {}\n", request.kernel_id),
        })
    }
}

#[async_trait]
impl NativeBuilder for MockNativeBuilder {
    async fn build(&self, request: &NativeBuildRequest<'_>) -> Result<NativeBuildOutput, BuildError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.kernel_id.to_string());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.simulate(request).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
