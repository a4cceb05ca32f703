//! etch - kernel build orchestration for embedded AI/ML targets
//!
//! etch takes declarative kernel specifications, resolves their parameters
//! and cross-kernel references, renders board-specific sources from
//! templates and drives a native CMake/Ninja build for every kernel in
//! dependency order. Artifacts are stored in a content-addressed cache so
//! unchanged kernels are never rebuilt.
//!
//! # Core Concepts
//!
//! - **Kernel spec**: an id, a target board, a template and parameters.
//!   Parameters may reference other kernels with `${id.output}` or
//!   `${id.params.name}`.
//! - **Fingerprint**: SHA-256 over a target's inputs and its dependencies'
//!   fingerprints; the cache key.
//! - **Toolchain**: the external tools (cmake, ninja, compiler, BSP generator)
//!   resolved and version-checked before anything runs.
//!
//! # Example Usage
//!
//! ```ignore
//! use etch::bsp::StaticBspProvider;
//! use etch::codegen::{CodeGenerator, TemplateRegistry};
//! use etch::graph::DependencyGraph;
//! use etch::pipeline::{BuildOrchestrator, CmakeNinjaBuilder, PipelineConfig, PipelineContext};
//! use etch::spec::{RawKernelSpec, SpecResolver};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(TemplateRegistry::with_builtins());
//! let specs = SpecResolver::new(&registry, "build").resolve(vec![
//!     RawKernelSpec::new("gemm", "stm32h7").with_param("tile", "32"),
//! ])?;
//! let graph = DependencyGraph::build(specs)?;
//!
//! let ctx = PipelineContext::new(
//!     Arc::new(CodeGenerator::new(registry)),
//!     Arc::new(StaticBspProvider::new()),
//!     Arc::new(CmakeNinjaBuilder::new()),
//!     toolchain,
//!     PipelineConfig::new("build"),
//! );
//! let report = BuildOrchestrator::new(Arc::new(ctx))
//!     .run(&graph, &[], cancel)
//!     .await?;
//! ```
//!
//! # Project Structure
//!
//! - [`toolchain`]: locating and version-checking external tools
//! - [`spec`]: loading, validating and expanding kernel specs
//! - [`codegen`]: templates and source rendering
//! - [`bsp`]: board support metadata
//! - [`graph`]: dependency graph and build order
//! - [`pipeline`]: fingerprints, scheduling and native builds
//! - [`cache`]: content-addressed artifact cache

pub mod bsp;
pub mod cache;
pub mod cli;
pub mod codegen;
pub mod config;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod progress;
pub mod spec;
pub mod toolchain;
pub mod util;

pub use config::{ConfigError, EtchConfig};
pub use error::{
    BspGenerationError, BuildError, CacheError, EtchError, GenerationError, GraphError, SpecError,
    ToolchainError,
};
pub use pipeline::{BuildOrchestrator, BuildReport, PipelineConfig, PipelineContext};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_etch() {
        assert_eq!(NAME, "etch");
    }
}
