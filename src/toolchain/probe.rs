use crate::util::process::{run_tool, ToolInvocation};
use async_trait::async_trait;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Locates executables and queries their version output
#[async_trait]
pub trait ToolProbe: Send + Sync {
    /// Resolves a bare program name or an explicit path to an executable
    fn locate(&self, program: &Path) -> Option<PathBuf>;

    /// Output of `<tool> --version`, or a reason the query failed
    async fn version_output(&self, path: &Path) -> Result<String, String>;

    /// Directories searched by `locate`, in priority order
    fn search_dirs(&self) -> Vec<PathBuf>;
}

/// Probes the real system
pub struct SystemProbe {
    search_dirs: Vec<PathBuf>,
    timeout: Duration,
}

impl SystemProbe {
    /// Searches `preferred` first, then every entry of `PATH`
    pub fn new(preferred: Vec<PathBuf>) -> Self {
        let mut search_dirs = preferred;
        if let Some(path) = env::var_os("PATH") {
            search_dirs.extend(env::split_paths(&path));
        }
        Self {
            search_dirs,
            timeout: VERSION_QUERY_TIMEOUT,
        }
    }

    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            timeout: VERSION_QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[async_trait]
impl ToolProbe for SystemProbe {
    fn locate(&self, program: &Path) -> Option<PathBuf> {
        if program.components().count() > 1 || program.is_absolute() {
            return is_executable(program).then(|| program.to_path_buf());
        }

        self.search_dirs.iter().find_map(|dir| {
            let candidate = dir.join(program);
            if is_executable(&candidate) {
                return Some(candidate);
            }
            if cfg!(windows) {
                let exe = candidate.with_extension("exe");
                if is_executable(&exe) {
                    return Some(exe);
                }
            }
            None
        })
    }

    async fn version_output(&self, path: &Path) -> Result<String, String> {
        let invocation = ToolInvocation::new(path, self.timeout).arg("--version");
        let output = run_tool(&invocation).await.map_err(|e| e.to_string())?;
        if output.success() {
            Ok(output.diagnostics())
        } else {
            Err(format!(
                "`--version` exited with {:?}: {}",
                output.exit_code,
                output.diagnostics().trim()
            ))
        }
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        self.search_dirs.clone()
    }
}

/// Fixed tool environment for tests
pub struct MockProbe {
    tools: Mutex<HashMap<String, Result<String, String>>>,
}

impl MockProbe {
    pub const BIN_DIR: &'static str = "/mock/bin";

    pub fn new() -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a tool that answers `--version` with `output`
    pub fn with_tool(self, name: &str, output: &str) -> Self {
        self.set_tool(name, Ok(output.to_string()));
        self
    }

    /// Registers a tool that exists but fails its version query
    pub fn with_broken_tool(self, name: &str, reason: &str) -> Self {
        self.set_tool(name, Err(reason.to_string()));
        self
    }

    /// Replaces (or adds) a tool's `--version` answer
    pub fn set_tool(&self, name: &str, output: Result<String, String>) {
        if let Ok(mut tools) = self.tools.lock() {
            tools.insert(name.to_string(), output);
        }
    }

    fn name_of(path: &Path) -> Option<String> {
        path.file_name().map(|n| n.to_string_lossy().into_owned())
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProbe for MockProbe {
    fn locate(&self, program: &Path) -> Option<PathBuf> {
        let name = Self::name_of(program)?;
        let tools = self.tools.lock().ok()?;
        tools
            .contains_key(&name)
            .then(|| Path::new(Self::BIN_DIR).join(name))
    }

    async fn version_output(&self, path: &Path) -> Result<String, String> {
        let name = Self::name_of(path).ok_or_else(|| "no file name".to_string())?;
        let tools = self.tools.lock().map_err(|e| e.to_string())?;
        tools
            .get(&name)
            .cloned()
            .unwrap_or_else(|| Err(format!("{} not installed", name)))
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        vec![PathBuf::from(Self::BIN_DIR)]
    }
}
