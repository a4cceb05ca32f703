//! Error taxonomy for the build pipeline
//!
//! Errors fall into two groups:
//!
//! - **Run-fatal** errors abort before anything is scheduled:
//!   [`SpecError`] and [`GraphError`] (configuration problems) and
//!   [`ToolchainError`] (nothing can be built without the tools).
//! - **Target-scoped** errors only fail one target and its dependents:
//!   [`GenerationError`], [`BuildError`], [`BspGenerationError`].
//!
//! [`CacheError`] is never fatal; callers log it and fall back to rebuilding.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while resolving required external tools
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("required tool '{tool}' is unavailable: {reason}")]
    ToolchainUnavailable { tool: String, reason: String },

    #[error("tool '{tool}' reports version {found}, but at least {required} is required")]
    ToolchainVersionMismatch {
        tool: String,
        found: semver::Version,
        required: semver::Version,
    },

    #[error("could not determine the version of '{tool}' from its output: {output:?}")]
    UnparsableVersion { tool: String, output: String },

    #[error("invalid minimum version '{version}' declared for tool '{tool}'")]
    InvalidRequirement { tool: String, version: String },
}

/// Errors raised while validating and expanding kernel specifications
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("kernel spec #{index} has an empty identifier")]
    EmptyKernelId { index: usize },

    #[error("kernel identifier '{id}' is invalid (allowed: letters, digits, '_' and '-')")]
    InvalidKernelId { id: String },

    #[error("duplicate kernel identifier '{id}'")]
    DuplicateKernelId { id: String },

    #[error("kernel '{kernel}' uses unknown template '{template}'")]
    UnknownTemplate { kernel: String, template: String },

    #[error("kernel '{kernel}' depends on unknown kernel '{dependency}'")]
    UnknownDependency { kernel: String, dependency: String },

    #[error("kernel '{kernel}' references unknown parameter '{parameter}' of kernel '{target}'")]
    UnknownParameter {
        kernel: String,
        target: String,
        parameter: String,
    },

    #[error("malformed reference '{reference}' in parameter '{parameter}' of kernel '{kernel}'")]
    MalformedReference {
        kernel: String,
        parameter: String,
        reference: String,
    },

    #[error("cyclic parameter reference: {}", chain.join(" -> "))]
    CyclicParameterReference { chain: Vec<String> },

    #[error("failed to load kernel specs from {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },
}

/// Errors raised while building the dependency graph
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("kernel '{kernel}' depends on unknown kernel '{dependency}'")]
    UnknownDependency { kernel: String, dependency: String },

    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("requested target '{id}' is not defined")]
    UnknownTarget { id: String },
}

/// BSP metadata could not be produced for a board
#[derive(Debug, Clone, Error)]
#[error("BSP generation failed for board '{board}': {reason}")]
pub struct BspGenerationError {
    pub board: String,
    pub reason: String,
}

/// Errors raised while rendering templates for one target
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("unknown template '{template}'")]
    UnknownTemplate { template: String },

    #[error("template '{template}': variable '{variable}' {reason}")]
    TemplateRender {
        template: String,
        variable: String,
        reason: String,
    },

    #[error("failed to write generated file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors raised by the native build of one target
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{step} exited with {}", exit_code.map(|c| format!("status {c}")).unwrap_or_else(|| "a signal".to_string()))]
    Failed {
        step: String,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("{step} timed out after {seconds}s")]
    Timeout { step: String, seconds: u64 },

    #[error("failed to start {step}: {reason}")]
    Spawn { step: String, reason: String },

    #[error("failed to promote artifacts to {}: {reason}", path.display())]
    Promotion { path: PathBuf, reason: String },
}

impl BuildError {
    /// Captured tool output, verbatim, when the tool got far enough to produce any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            BuildError::Failed { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

/// Errors raised by the artifact cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt cache metadata at {}: {reason}", path.display())]
    Metadata { path: PathBuf, reason: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Run-fatal errors, reported before any target is scheduled
#[derive(Debug, Error)]
pub enum EtchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("configuration error: {0}")]
    Spec(#[from] SpecError),

    #[error("configuration error: {0}")]
    Graph(#[from] GraphError),

    #[error("toolchain error: {0}")]
    Toolchain(#[from] ToolchainError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_message_names_everything() {
        let err = ToolchainError::ToolchainVersionMismatch {
            tool: "cmake".to_string(),
            found: semver::Version::new(1, 2, 0),
            required: semver::Version::new(2, 0, 0),
        };
        let msg = err.to_string();
        assert!(msg.contains("cmake"));
        assert!(msg.contains("1.2.0"));
        assert!(msg.contains("2.0.0"));
    }

    #[test]
    fn test_cycle_message() {
        let err = GraphError::DependencyCycle {
            cycle: vec!["A".into(), "B".into(), "C".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: A -> B -> C -> A");
    }

    #[test]
    fn test_build_error_display() {
        let err = BuildError::Failed {
            step: "ninja".to_string(),
            exit_code: Some(2),
            diagnostics: "error: undefined symbol".to_string(),
        };
        assert_eq!(err.to_string(), "ninja exited with status 2");
        assert_eq!(err.diagnostics(), Some("error: undefined symbol"));

        let killed = BuildError::Failed {
            step: "ninja".to_string(),
            exit_code: None,
            diagnostics: String::new(),
        };
        assert_eq!(killed.to_string(), "ninja exited with a signal");
    }
}
