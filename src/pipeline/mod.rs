//! Build pipeline: fingerprinting, scheduling and native builds

pub mod config;
pub mod context;
pub mod fingerprint;
pub mod native;
pub mod orchestrator;
pub mod report;
pub mod target;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use fingerprint::{board_digest, compute_fingerprint, fingerprint_graph};
pub use native::{
    CmakeNinjaBuilder, MockNativeBuilder, NativeBuildOutput, NativeBuildRequest, NativeBuilder,
};
pub use orchestrator::BuildOrchestrator;
pub use report::{BuildReport, FailureCause, TargetOutcome};
pub use target::{BuildTarget, TargetStatus};
