//! External toolchain resolution
//!
//! The pipeline depends on four external tools, one per [`ToolRole`]. At the
//! start of every run the [`ToolchainLocator`] finds each one, asks it for its
//! version and checks that against a minimum. The result is an immutable
//! [`ToolchainInfo`] that is passed explicitly to everything that spawns a
//! tool. It is never stored globally or persisted.

mod locator;
mod probe;
mod version;

pub use locator::ToolchainLocator;
pub use probe::{MockProbe, SystemProbe, ToolProbe};
pub use version::{extract_version, parse_version_lenient};

use crate::error::ToolchainError;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// What a tool is used for in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolRole {
    /// C/C++ compiler frontend handed to the build generator
    Compiler,
    /// Build generator (configures the cross-compilation project)
    Generator,
    /// Build executor (runs the generated build)
    Executor,
    /// Board support package metadata generator
    Bsp,
}

impl ToolRole {
    pub const ALL: [ToolRole; 4] = [
        ToolRole::Compiler,
        ToolRole::Generator,
        ToolRole::Executor,
        ToolRole::Bsp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolRole::Compiler => "compiler",
            ToolRole::Generator => "generator",
            ToolRole::Executor => "executor",
            ToolRole::Bsp => "bsp",
        }
    }
}

impl fmt::Display for ToolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool that must be present at or above a minimum version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequirement {
    pub name: String,
    pub role: ToolRole,
    /// Program name to search for, or an explicit path
    pub program: PathBuf,
    pub min_version: Version,
}

impl ToolRequirement {
    pub fn new(
        name: &str,
        role: ToolRole,
        program: impl AsRef<Path>,
        min_version: &str,
    ) -> Result<Self, ToolchainError> {
        let min_version =
            parse_version_lenient(min_version).ok_or_else(|| ToolchainError::InvalidRequirement {
                tool: name.to_string(),
                version: min_version.to_string(),
            })?;
        Ok(Self {
            name: name.to_string(),
            role,
            program: program.as_ref().to_path_buf(),
            min_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTool {
    pub name: String,
    pub role: ToolRole,
    pub path: PathBuf,
    pub version: Version,
}

/// Resolved binaries and versions for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainInfo {
    tools: Vec<ResolvedTool>,
    search_path: Vec<PathBuf>,
}

impl ToolchainInfo {
    pub fn new(tools: Vec<ResolvedTool>, search_dirs: Vec<PathBuf>) -> Self {
        // Resolved tool directories come first so a child process that looks
        // up a sibling tool by name finds the same installation.
        let mut search_path: Vec<PathBuf> = Vec::new();
        for dir in tools
            .iter()
            .filter_map(|t| t.path.parent().map(Path::to_path_buf))
            .chain(search_dirs)
        {
            if !dir.as_os_str().is_empty() && !search_path.contains(&dir) {
                search_path.push(dir);
            }
        }
        Self { tools, search_path }
    }

    pub fn tools(&self) -> &[ResolvedTool] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn by_role(&self, role: ToolRole) -> Option<&ResolvedTool> {
        self.tools.iter().find(|t| t.role == role)
    }

    /// Tool name → version string, as recorded in cache metadata
    pub fn versions(&self) -> BTreeMap<String, String> {
        self.tools
            .iter()
            .map(|t| (t.name.clone(), t.version.to_string()))
            .collect()
    }

    /// `PATH` value for child processes
    pub fn env_path(&self) -> OsString {
        std::env::join_paths(&self.search_path).unwrap_or_default()
    }
}
