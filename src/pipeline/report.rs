use super::target::TargetStatus;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Why a target failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// A dependency failed; `chain` runs from the nearest failed dependency
    /// back to the root cause
    DependencyFailed { chain: Vec<String> },
    Bsp { board: String, message: String },
    Generation { message: String },
    Build {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        diagnostics: Option<String>,
    },
}

impl FailureCause {
    /// The failed ancestor chain this cause passes on to dependents
    pub fn chain(&self) -> &[String] {
        match self {
            FailureCause::DependencyFailed { chain } => chain,
            _ => &[],
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::DependencyFailed { chain } => {
                write!(f, "dependency failed: {}", chain.join(" <- "))
            }
            FailureCause::Bsp { board, message } => {
                write!(f, "BSP metadata for '{board}' unavailable: {message}")
            }
            FailureCause::Generation { message } => write!(f, "generation failed: {message}"),
            FailureCause::Build { message, .. } => write!(f, "build failed: {message}"),
        }
    }
}

/// Final state of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    pub id: String,
    pub fingerprint: String,
    pub status: TargetStatus,
    pub requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
    pub duration_ms: u64,
}

/// Aggregate result of a run, outcomes in topological order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub success: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub targets: Vec<TargetOutcome>,
}

impl BuildReport {
    pub fn new(targets: Vec<TargetOutcome>, duration: Duration, cancelled: bool) -> Self {
        let success = !targets
            .iter()
            .any(|t| t.requested && t.status == TargetStatus::Failed);
        Self {
            success,
            cancelled,
            duration_ms: duration.as_millis() as u64,
            targets,
        }
    }

    /// False iff a requested target failed
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn outcome(&self, id: &str) -> Option<&TargetOutcome> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<TargetStatus> {
        self.outcome(id).map(|t| t.status)
    }

    pub fn with_status(&self, status: TargetStatus) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.id.as_str())
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.with_status(TargetStatus::Succeeded)
    }

    pub fn skipped_cached(&self) -> Vec<&str> {
        self.with_status(TargetStatus::SkippedCached)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.with_status(TargetStatus::Skipped)
    }

    pub fn failed(&self) -> Vec<(&str, &FailureCause)> {
        self.targets
            .iter()
            .filter_map(|t| match (&t.status, &t.cause) {
                (TargetStatus::Failed, Some(cause)) => Some((t.id.as_str(), cause)),
                _ => None,
            })
            .collect()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}
