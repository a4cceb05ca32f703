//! Explicit subprocess invocation
//!
//! Every external tool (version probes, BSP generator, cmake, ninja) goes
//! through [`run_tool`]: arguments are passed as a vector, stdout/stderr are
//! captured, and the call is bounded by a timeout. When a search path is
//! supplied the child environment is cleared and only `PATH` is set, so tool
//! behaviour depends on the resolved toolchain rather than on shell state.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} timed out after {}s", program.display(), timeout.as_secs())]
    Timeout { program: PathBuf, timeout: Duration },
}

/// A fully specified tool invocation
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// When set, the environment is cleared and `PATH` is set to this value
    pub search_path: Option<OsString>,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            search_path: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn isolated_path(mut self, search_path: OsString) -> Self {
        self.search_path = Some(search_path);
        self
    }

    /// Program name as shown in logs and error messages
    pub fn display_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, verbatim
    pub fn diagnostics(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}{}", self.stdout, self.stderr),
        }
    }
}

/// Runs a tool to completion, killing it if the timeout elapses
pub async fn run_tool(invocation: &ToolInvocation) -> Result<ToolOutput, ProcessError> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &invocation.cwd {
        cmd.current_dir(dir);
    }
    if let Some(path) = &invocation.search_path {
        cmd.env_clear();
        cmd.env("PATH", path);
    }

    debug!(
        program = %invocation.program.display(),
        args = ?invocation.args,
        timeout_secs = invocation.timeout.as_secs(),
        "Running tool"
    );

    let start = Instant::now();
    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: invocation.program.clone(),
        source,
    })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ProcessError::Spawn {
                program: invocation.program.clone(),
                source,
            })
        }
        Err(_) => {
            return Err(ProcessError::Timeout {
                program: invocation.program.clone(),
                timeout: invocation.timeout,
            })
        }
    };

    let result = ToolOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration: start.elapsed(),
    };

    trace!(
        program = %invocation.program.display(),
        exit_code = ?result.exit_code,
        duration_ms = result.duration.as_millis(),
        "Tool finished"
    );

    Ok(result)
}
