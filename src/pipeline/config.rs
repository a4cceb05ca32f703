use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);
const FINGERPRINT_PREFIX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub build_dir: PathBuf,
    /// Concurrent targets; 0 picks the available parallelism
    pub max_workers: usize,
    /// Upper bound for every external tool invocation
    pub step_timeout: Duration,
    pub caching: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("./build"),
            max_workers: 0,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            caching: true,
        }
    }
}

impl PipelineConfig {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    pub fn effective_workers(&self) -> usize {
        if self.max_workers > 0 {
            return self.max_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Final artifact location of a kernel
    pub fn output_dir(&self, id: &str) -> PathBuf {
        self.build_dir.join("out").join(id)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.build_dir.join("staging")
    }

    /// Private working directory of one target build
    pub fn staging_dir(&self, id: &str, fingerprint: &str) -> PathBuf {
        let prefix = fingerprint.get(..FINGERPRINT_PREFIX_LEN).unwrap_or(fingerprint);
        self.staging_root().join(format!("{id}-{prefix}"))
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }
}
