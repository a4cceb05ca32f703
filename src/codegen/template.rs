use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Id of the template shipped with etch
pub const BUILTIN_CMAKE_KERNEL: &str = "cmake-kernel";

const TEMPLATE_SUFFIX: &str = ".tmpl";
const VERSION_FILE: &str = "VERSION";

const CMAKE_LISTS: &str = r#"cmake_minimum_required(VERSION 3.20)
project({{ kernel.name }} LANGUAGES C)

set(ETCH_BOARD "{{ board.id }}" CACHE STRING "Target board")
set(ETCH_DEPENDENCY_INCLUDES "{{ kernel.dependency_includes }}")

add_library({{ kernel.name }} STATIC src/{{ kernel.name }}.c)
target_include_directories({{ kernel.name }} PUBLIC ${CMAKE_CURRENT_SOURCE_DIR}/include)
if(ETCH_DEPENDENCY_INCLUDES)
  target_include_directories({{ kernel.name }} PRIVATE ${ETCH_DEPENDENCY_INCLUDES})
endif()

install(TARGETS {{ kernel.name }} ARCHIVE DESTINATION lib)
install(DIRECTORY include/ DESTINATION include)
"#;

const HEADER: &str = r#"/* Generated by etch for {{ board.id }} ({{ board.arch }}, {{ board.cpu }}). Do not edit. */
#ifndef {{ kernel.name | upper }}_H
#define {{ kernel.name | upper }}_H

#include <stddef.h>
#include <stdint.h>

/* Board memory map */
{{ board.memory_map }}
/* Board peripherals */
{{ board.peripheral_defines }}
{{ board.define_block }}
/* Kernel parameters */
{{ kernel.param_defines }}
extern const char {{ kernel.name }}_fingerprint[];

int {{ kernel.name }}_run(const void *input, void *output, size_t len);

#endif /* {{ kernel.name | upper }}_H */
"#;

const SOURCE: &str = r#"/* Generated by etch. Do not edit. */
#include "{{ kernel.name }}.h"

#include <string.h>

const char {{ kernel.name }}_fingerprint[] = "{{ kernel.fingerprint }}";

int {{ kernel.name }}_run(const void *input, void *output, size_t len)
{
    if (input == NULL || output == NULL) {
        return -1;
    }
    memmove(output, input, len);
    return 0;
}
"#;

/// A named set of file templates; both paths and contents are templated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: String,
    /// Changes whenever the template's files change
    pub version: String,
    /// Relative path template → content template, sorted by path
    pub files: BTreeMap<String, String>,
}

impl Template {
    /// Creates a template versioned by a hash of its files
    pub fn new(id: &str, files: BTreeMap<String, String>) -> Self {
        let version = content_hash(&files);
        Self {
            id: id.to_string(),
            version,
            files,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    fn cmake_kernel() -> Self {
        let files = BTreeMap::from([
            ("CMakeLists.txt".to_string(), CMAKE_LISTS.to_string()),
            (
                "include/{{ kernel.name }}.h".to_string(),
                HEADER.to_string(),
            ),
            ("src/{{ kernel.name }}.c".to_string(), SOURCE.to_string()),
        ]);
        Self::new(BUILTIN_CMAKE_KERNEL, files)
    }
}

fn content_hash(files: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, content) in files {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(content.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("sha256-{}", &digest[..16])
}

/// Template id → template
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Template::cmake_kernel());
        registry
    }

    /// Adds or replaces a template
    pub fn register(&mut self, template: Template) {
        debug!(template = %template.id, version = %template.version, "Registered template");
        self.templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// Loads every sub-directory of `dir` as a template named after it.
    ///
    /// A `.tmpl` suffix is stripped from file names. A `VERSION` file at the
    /// template root sets the version; otherwise the content hash is used.
    pub fn load_dir(&mut self, dir: &Path) -> io::Result<usize> {
        let mut entries: Vec<_> = fs::read_dir(dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|e| e.path().is_dir())
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut loaded = 0;
        for entry in entries {
            let id = entry.file_name().to_string_lossy().into_owned();
            let root = entry.path();

            let mut files = BTreeMap::new();
            collect_files(&root, &root, &mut files)?;
            let explicit_version = files.remove(VERSION_FILE);

            let mut template = Template::new(&id, files);
            if let Some(version) = explicit_version {
                let version = version.trim();
                if !version.is_empty() {
                    template = template.with_version(version);
                }
            }
            self.register(template);
            loaded += 1;
        }

        info!(dir = %dir.display(), templates = loaded, "Loaded templates");
        Ok(loaded)
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut BTreeMap<String, String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, files)?;
            continue;
        }

        let rel = path
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let mut key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if let Some(stripped) = key.strip_suffix(TEMPLATE_SUFFIX) {
            key = stripped.to_string();
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
        })?;
        files.insert(key, content);
    }
    Ok(())
}
