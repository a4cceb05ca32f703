use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of one build target within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetStatus {
    Pending,
    Generating,
    Building,
    Succeeded,
    Failed,
    /// Served from the artifact cache
    SkippedCached,
    /// Never started because the run was cancelled
    Skipped,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Generating => "generating",
            TargetStatus::Building => "building",
            TargetStatus::Succeeded => "succeeded",
            TargetStatus::Failed => "failed",
            TargetStatus::SkippedCached => "skipped-cached",
            TargetStatus::Skipped => "skipped",
        }
    }

    /// Dependents may start once a dependency reaches one of these
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, TargetStatus::Succeeded | TargetStatus::SkippedCached)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TargetStatus::Succeeded
                | TargetStatus::Failed
                | TargetStatus::SkippedCached
                | TargetStatus::Skipped
        )
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kernel spec scheduled for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    /// Node index in the dependency graph
    pub node: usize,
    pub id: String,
    pub fingerprint: String,
    pub status: TargetStatus,
    pub output: Option<PathBuf>,
    /// Named explicitly (or implicitly, when no targets were named)
    pub requested: bool,
}

impl BuildTarget {
    pub fn new(node: usize, id: &str, fingerprint: &str, requested: bool) -> Self {
        Self {
            node,
            id: id.to_string(),
            fingerprint: fingerprint.to_string(),
            status: TargetStatus::Pending,
            output: None,
            requested,
        }
    }
}
