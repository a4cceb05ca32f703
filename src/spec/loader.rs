use super::RawKernelSpec;
use crate::error::SpecError;
use ignore::WalkBuilder;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Parses one YAML document: a single kernel mapping, or `{ kernels: [...] }`
pub fn parse_spec_document(content: &str) -> Result<Vec<RawKernelSpec>, String> {
    let value: Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Mapping(ref map) if map.contains_key("kernels") => {
            let kernels = map.get("kernels").cloned().unwrap_or(Value::Null);
            if kernels.is_null() {
                return Ok(Vec::new());
            }
            serde_yaml::from_value(kernels).map_err(|e| e.to_string())
        }
        Value::Mapping(_) => serde_yaml::from_value(value)
            .map(|spec| vec![spec])
            .map_err(|e| e.to_string()),
        _ => Err("expected a kernel mapping or a `kernels` list".to_string()),
    }
}

/// Loads kernel specs from files, concatenated in the order given
pub fn load_spec_files(paths: &[PathBuf]) -> Result<Vec<RawKernelSpec>, SpecError> {
    let mut specs = Vec::new();
    for path in paths {
        let content = fs::read_to_string(path).map_err(|e| SpecError::Load {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let loaded = parse_spec_document(&content).map_err(|reason| SpecError::Load {
            path: path.clone(),
            reason,
        })?;
        debug!(path = %path.display(), kernels = loaded.len(), "Loaded spec file");
        specs.extend(loaded);
    }
    Ok(specs)
}

fn is_spec_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Finds `*.yaml` / `*.yml` files under the given directories, sorted by
/// path. Directories that do not exist are skipped.
pub fn discover_spec_files(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for dir in dirs.iter().filter(|d| d.is_dir()) {
        for result in WalkBuilder::new(dir)
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .build()
        {
            let entry = match result {
                Ok(e) => e,
                Err(err) => {
                    warn!(error = %err, "Failed to read directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().is_some_and(|t| t.is_file()) && is_spec_file(path) {
                files.push(path.to_path_buf());
            }
        }
    }

    files.sort();
    files.dedup();
    debug!(count = files.len(), "Discovered spec files");
    files
}
