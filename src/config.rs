//! Configuration management for etch
//!
//! Settings are layered; later sources override earlier ones:
//!
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/etch/config.yaml`
//! 3. Project config: `./etch.yaml`
//! 4. `ETCH_*` environment variables
//!
//! YAML layers are deep-merged, so a project file that only sets
//! `workspace.build_dir` keeps every other workspace setting from the layers
//! below it. Missing files are skipped; `etch config init` writes one.
//!
//! # Environment Variables
//!
//! - `ETCH_LOG_LEVEL`: trace|debug|info|warn|error - default: "info"
//! - `ETCH_DEBUG`: true|false, raises logging to at least debug - default: "false"
//! - `ETCH_ENABLE_CACHING`: true|false - default: "true"
//! - `ETCH_INSTALL_DIR`: private tool install dir; its `bin/` is searched first
//! - `ETCH_BUILD_DIR`: build directory - default: "./build"
//! - `ETCH_CACHE_DIR`: artifact cache - default: "<build_dir>/cache"
//! - `ETCH_MAX_WORKERS`: parallel targets, 0 = CPU count - default: "0"
//! - `ETCH_STEP_TIMEOUT`: seconds per external tool invocation - default: "600"
//!
//! # Example
//!
//! ```no_run
//! use etch::EtchConfig;
//!
//! let config = EtchConfig::load().expect("invalid configuration");
//! config.validate().expect("invalid configuration");
//! println!("{}", config);
//! ```

use crate::pipeline::PipelineConfig;
use crate::toolchain::{parse_version_lenient, ToolRequirement, ToolRole};
use crate::util::logging::parse_level;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, Level};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 600;
const MAX_STEP_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Project-local configuration file name
pub const LOCAL_CONFIG_FILE: &str = "etch.yaml";

const CONFIG_HEADER: &str = "# Etch Configuration\n# Generated automatically - edit as needed\n";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {}: {error}", path.display())]
    Yaml { path: PathBuf, error: String },

    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

/// Where `save` writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    Global,
    Local,
}

/// An external tool the pipeline requires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPath {
    pub name: String,
    pub role: ToolRole,
    /// Bare program name (searched for) or an explicit path
    pub path: PathBuf,
    pub min_version: String,
}

impl ToolPath {
    fn new(name: &str, role: ToolRole, min_version: &str) -> Self {
        Self {
            name: name.to_string(),
            role,
            path: PathBuf::from(name),
            min_version: min_version.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub build_dir: PathBuf,
    /// Directories searched for kernel spec files
    pub kernel_dirs: Vec<PathBuf>,
    /// Artifact cache location; defaults to `<build_dir>/cache`
    pub cache_dir: Option<PathBuf>,
    /// Extra templates loaded on top of the built-in ones
    pub templates_dir: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("./build"),
            kernel_dirs: vec![
                PathBuf::from("kernel"),
                PathBuf::from("kernels"),
                PathBuf::from("ml_import"),
            ],
            cache_dir: None,
            templates_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum targets processed concurrently; 0 picks the CPU count
    pub max_workers: usize,
    pub step_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_workers: 0,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
        }
    }
}

/// Main configuration structure for etch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtchConfig {
    pub debug: bool,
    pub log_level: String,
    pub enable_caching: bool,
    /// Private install location; `<install_dir>/bin` is searched before `PATH`
    pub install_dir: PathBuf,
    pub tools: Vec<ToolPath>,
    pub workspace: WorkspaceConfig,
    pub pipeline: PipelineSettings,
}

impl Default for EtchConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            enable_caching: true,
            install_dir: dirs::data_dir()
                .unwrap_or_else(env::temp_dir)
                .join("etch"),
            tools: vec![
                ToolPath::new("cmake", ToolRole::Generator, "3.20.0"),
                ToolPath::new("ninja", ToolRole::Executor, "1.10.0"),
                ToolPath::new("clang", ToolRole::Compiler, "14.0.0"),
                ToolPath::new("etch-bsp", ToolRole::Bsp, "0.1.0"),
            ],
            workspace: WorkspaceConfig::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

/// `<config dir>/etch/config.yaml`
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("etch").join("config.yaml"))
}

impl EtchConfig {
    /// Loads defaults, the global and local files, then the environment
    pub fn load() -> Result<Self, ConfigError> {
        let global = global_config_path();
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        let mut config = Self::load_layers(&[global.as_deref(), Some(local.as_path())])?;
        config.apply_env()?;
        Ok(config)
    }

    /// Loads defaults overlaid with each existing YAML file, in order
    pub fn load_layers(layers: &[Option<&Path>]) -> Result<Self, ConfigError> {
        let mut merged = serde_yaml::to_value(Self::default()).map_err(|e| ConfigError::Yaml {
            path: PathBuf::from("<defaults>"),
            error: e.to_string(),
        })?;

        for path in layers.iter().flatten() {
            if !path.exists() {
                debug!(path = %path.display(), "Config layer not found, skipping");
                continue;
            }
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let overlay: Value = serde_yaml::from_str(&text).map_err(|e| ConfigError::Yaml {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
            // An empty file parses as null
            if !overlay.is_null() {
                merge_yaml(&mut merged, overlay);
                debug!(path = %path.display(), "Loaded config layer");
            }
        }

        serde_yaml::from_value(merged).map_err(|e| ConfigError::Yaml {
            path: layers
                .iter()
                .flatten()
                .last()
                .map(|p| p.to_path_buf())
                .unwrap_or_default(),
            error: e.to_string(),
        })
    }

    /// Applies `ETCH_*` overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = env::var("ETCH_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        if let Some(debug) = env_parse::<bool>("ETCH_DEBUG")? {
            self.debug = debug;
        }
        if let Some(caching) = env_parse::<bool>("ETCH_ENABLE_CACHING")? {
            self.enable_caching = caching;
        }
        if let Ok(dir) = env::var("ETCH_INSTALL_DIR") {
            self.install_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("ETCH_BUILD_DIR") {
            self.workspace.build_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("ETCH_CACHE_DIR") {
            self.workspace.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(workers) = env_parse::<usize>("ETCH_MAX_WORKERS")? {
            self.pipeline.max_workers = workers;
        }
        if let Some(timeout) = env_parse::<u64>("ETCH_STEP_TIMEOUT")? {
            self.pipeline.step_timeout_secs = timeout;
        }
        Ok(())
    }

    /// Log level used when no command-line flag sets one
    pub fn effective_log_level(&self) -> Level {
        let level = parse_level(&self.log_level);
        if self.debug && level != Level::TRACE {
            Level::DEBUG
        } else {
            level
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        if self.pipeline.step_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Step timeout must be at least 1 second".to_string(),
            ));
        }
        if self.pipeline.step_timeout_secs > MAX_STEP_TIMEOUT_SECS {
            return Err(ConfigError::ValidationFailed(
                "Step timeout cannot exceed 24 hours".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "Tool entries must have a name".to_string(),
                ));
            }
            if !names.insert(tool.name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Tool '{}' is listed more than once",
                    tool.name
                )));
            }
            if parse_version_lenient(&tool.min_version).is_none() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Tool '{}' has invalid min_version '{}'",
                    tool.name, tool.min_version
                )));
            }
        }

        for role in ToolRole::ALL {
            if !self.tools.iter().any(|t| t.role == role) {
                return Err(ConfigError::ValidationFailed(format!(
                    "No tool configured for role '{}'",
                    role
                )));
            }
        }

        Ok(())
    }

    /// Requirements handed to the toolchain locator
    pub fn tool_requirements(&self) -> Result<Vec<ToolRequirement>, ConfigError> {
        self.tools
            .iter()
            .map(|tool| {
                ToolRequirement::new(&tool.name, tool.role, &tool.path, &tool.min_version).map_err(
                    |e| ConfigError::ParseError {
                        field: format!("tools.{}.min_version", tool.name),
                        error: e.to_string(),
                    },
                )
            })
            .collect()
    }

    /// Directories searched for tools before `PATH`
    pub fn tool_search_dirs(&self) -> Vec<PathBuf> {
        vec![self.install_dir.join("bin")]
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.workspace
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.workspace.build_dir.join("cache"))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new(self.workspace.build_dir.clone())
            .with_max_workers(self.pipeline.max_workers)
            .with_step_timeout(Duration::from_secs(self.pipeline.step_timeout_secs))
            .with_caching(self.enable_caching)
    }

    /// Writes the settings as YAML to the given scope's file
    pub fn save(&self, scope: ConfigScope) -> Result<PathBuf, ConfigError> {
        let path = match scope {
            ConfigScope::Global => global_config_path().ok_or(ConfigError::NoConfigDir)?,
            ConfigScope::Local => PathBuf::from(LOCAL_CONFIG_FILE),
        };
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_yaml::to_string(self).map_err(|e| ConfigError::Yaml {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let contents = format!("{}# File: {}\n\n{}", CONFIG_HEADER, path.display(), body);
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Updates one setting by dotted key, e.g. `pipeline.max_workers`
    ///
    /// The value is parsed as a YAML scalar and the result is re-validated
    /// through deserialization, so type errors are reported rather than stored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut tree = serde_yaml::to_value(&*self).map_err(|e| ConfigError::ParseError {
            field: key.to_string(),
            error: e.to_string(),
        })?;

        let mut cursor = &mut tree;
        for segment in key.split('.') {
            cursor = cursor
                .as_mapping_mut()
                .and_then(|m| m.get_mut(segment))
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        *cursor = serde_yaml::from_str(value).map_err(|e| ConfigError::ParseError {
            field: key.to_string(),
            error: e.to_string(),
        })?;

        *self = serde_yaml::from_value(tree).map_err(|e| ConfigError::ParseError {
            field: key.to_string(),
            error: e.to_string(),
        })?;
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::ParseError {
                field: key.to_string(),
                error: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            merge_mapping(base_map, overlay_map);
        }
        (base, overlay) => *base = overlay,
    }
}

fn merge_mapping(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => merge_yaml(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

impl fmt::Display for EtchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Etch Configuration:")?;
        writeln!(f, "  Debug: {}", self.debug)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        writeln!(f, "  Caching: {}", self.enable_caching)?;
        writeln!(f, "  Install Dir: {}", self.install_dir.display())?;
        writeln!(f, "  Build Dir: {}", self.workspace.build_dir.display())?;
        writeln!(f, "  Cache Dir: {}", self.cache_dir().display())?;
        writeln!(f, "  Max Workers: {}", self.pipeline.max_workers)?;
        writeln!(f, "  Step Timeout: {}s", self.pipeline.step_timeout_secs)?;
        writeln!(f, "  Tools:")?;
        for tool in &self.tools {
            writeln!(
                f,
                "    {} ({}): {} >= {}",
                tool.name,
                tool.role,
                tool.path.display(),
                tool.min_version
            )?;
        }
        Ok(())
    }
}
