//! Pipeline context for managing dependencies

use std::sync::Arc;

use crate::bsp::BspProvider;
use crate::cache::ArtifactCache;
use crate::codegen::SourceGenerator;
use crate::progress::{NoOpHandler, ProgressHandler};
use crate::toolchain::ToolchainInfo;

use super::config::PipelineConfig;
use super::native::NativeBuilder;

/// Context that owns all long-lived pipeline dependencies
pub struct PipelineContext {
    /// Renders kernel sources into staging
    pub generator: Arc<dyn SourceGenerator>,

    /// Board support metadata
    pub bsp: Arc<dyn BspProvider>,

    /// Native build executor
    pub builder: Arc<dyn NativeBuilder>,

    /// Tools resolved before the run
    pub toolchain: Arc<ToolchainInfo>,

    /// Pipeline configuration
    pub config: PipelineConfig,

    /// Consulted only when `config.caching` is set
    pub cache: Option<Arc<ArtifactCache>>,

    pub progress: Arc<dyn ProgressHandler>,
}

impl PipelineContext {
    /// Create a new pipeline context without a cache
    pub fn new(
        generator: Arc<dyn SourceGenerator>,
        bsp: Arc<dyn BspProvider>,
        builder: Arc<dyn NativeBuilder>,
        toolchain: Arc<ToolchainInfo>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            bsp,
            builder,
            toolchain,
            config,
            cache: None,
            progress: Arc::new(NoOpHandler),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// The cache, if caching is enabled for this run
    pub fn active_cache(&self) -> Option<&ArtifactCache> {
        if self.config.caching {
            self.cache.as_deref()
        } else {
            None
        }
    }
}
