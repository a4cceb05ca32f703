//! Source generation from templates
//!
//! [`CodeGenerator`] renders a [`Template`] against a closed
//! [`RenderContext`]. Every placeholder in every file is checked before the
//! first byte is written, so a bad template never leaves half a source tree
//! behind. Output goes to a caller-provided staging directory only.

mod context;
mod engine;
mod template;

pub use context::{DependencyOutput, RenderContext};
pub use template::{Template, TemplateRegistry, BUILTIN_CMAKE_KERNEL};

use crate::error::GenerationError;
use crate::spec::KernelSpec;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Everything needed to render one target
#[derive(Debug)]
pub struct GenerationRequest<'a> {
    pub spec: &'a KernelSpec,
    pub context: &'a RenderContext,
    /// Staging directory that receives the rendered tree
    pub output_root: &'a Path,
}

/// A rendered source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSources {
    pub root: PathBuf,
    /// Relative paths, in the order written
    pub files: Vec<PathBuf>,
    pub template: String,
    pub template_version: String,
}

/// Renders kernel sources
pub trait SourceGenerator: Send + Sync {
    /// Version token of a template; `None` if the template is unknown
    fn template_version(&self, template: &str) -> Option<String>;

    fn render(&self, request: &GenerationRequest<'_>) -> Result<GeneratedSources, GenerationError>;
}

pub struct CodeGenerator {
    registry: Arc<TemplateRegistry>,
}

impl CodeGenerator {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }
}

fn render_error(template: &str, failure: engine::RenderFailure) -> GenerationError {
    GenerationError::TemplateRender {
        template: template.to_string(),
        variable: failure.variable,
        reason: failure.reason,
    }
}

/// Rendered paths must stay inside the output root
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

impl SourceGenerator for CodeGenerator {
    fn template_version(&self, template: &str) -> Option<String> {
        self.registry.get(template).map(|t| t.version.clone())
    }

    fn render(&self, request: &GenerationRequest<'_>) -> Result<GeneratedSources, GenerationError> {
        let template_id = &request.spec.template;
        let template =
            self.registry
                .get(template_id)
                .ok_or_else(|| GenerationError::UnknownTemplate {
                    template: template_id.clone(),
                })?;

        for (path, content) in &template.files {
            engine::check(path, request.context).map_err(|f| render_error(template_id, f))?;
            engine::check(content, request.context).map_err(|f| render_error(template_id, f))?;
        }

        let mut rendered: Vec<(PathBuf, String)> = Vec::with_capacity(template.files.len());
        for (path, content) in &template.files {
            let rel = PathBuf::from(
                engine::render(path, request.context).map_err(|f| render_error(template_id, f))?,
            );
            if !is_contained(&rel) {
                return Err(GenerationError::TemplateRender {
                    template: template_id.clone(),
                    variable: path.clone(),
                    reason: format!("renders to unsafe path '{}'", rel.display()),
                });
            }
            let body =
                engine::render(content, request.context).map_err(|f| render_error(template_id, f))?;
            rendered.push((rel, body));
        }
        rendered.sort_by(|a, b| a.0.cmp(&b.0));

        let root = request.output_root;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| GenerationError::Io { path, source }
        };
        if root.exists() {
            fs::remove_dir_all(root).map_err(io_err(root))?;
        }
        fs::create_dir_all(root).map_err(io_err(root))?;

        let mut files = Vec::with_capacity(rendered.len());
        for (rel, body) in rendered {
            let dest = root.join(&rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            fs::write(&dest, body).map_err(io_err(&dest))?;
            files.push(rel);
        }

        debug!(
            kernel = %request.spec.id,
            template = %template_id,
            files = files.len(),
            root = %root.display(),
            "Generated sources"
        );

        Ok(GeneratedSources {
            root: root.to_path_buf(),
            files,
            template: template_id.clone(),
            template_version: template.version.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::BoardMetadata;
    use crate::toolchain::ToolchainInfo;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn spec(template: &str) -> KernelSpec {
        KernelSpec {
            id: "conv2d".to_string(),
            board: "stm32h7".to_string(),
            template: template.to_string(),
            params: vec![("tile".to_string(), "8".to_string())],
            dependencies: vec![],
            declaration_index: 0,
        }
    }

    fn context(spec: &KernelSpec) -> RenderContext {
        let board = BoardMetadata::new("stm32h7", "armv7e-m", "cortex-m7")
            .with_memory("FLASH", 0x0800_0000, 0x20_0000);
        RenderContext::for_target(spec, "00ff", &board, &[], &ToolchainInfo::new(vec![], vec![]))
    }

    fn generator_with(template: Template) -> CodeGenerator {
        let mut registry = TemplateRegistry::with_builtins();
        registry.register(template);
        CodeGenerator::new(Arc::new(registry))
    }

    fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut out = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.insert(path.strip_prefix(root).unwrap().to_path_buf(), fs::read(&path).unwrap());
                }
            }
        }
        out
    }

    #[test]
    fn test_renders_builtin_template() {
        let dir = TempDir::new().unwrap();
        let spec = spec(BUILTIN_CMAKE_KERNEL);
        let ctx = context(&spec);
        let generator = CodeGenerator::new(Arc::new(TemplateRegistry::with_builtins()));
        let root = dir.path().join("src");

        let sources = generator
            .render(&GenerationRequest {
                spec: &spec,
                context: &ctx,
                output_root: &root,
            })
            .unwrap();

        assert_eq!(
            sources.files,
            vec![
                PathBuf::from("CMakeLists.txt"),
                PathBuf::from("include/conv2d.h"),
                PathBuf::from("src/conv2d.c"),
            ]
        );
        let header = fs::read_to_string(root.join("include/conv2d.h")).unwrap();
        assert!(header.contains("#ifndef CONV2D_H"));
        assert!(header.contains("#define CONV2D_TILE 8"));
        assert!(header.contains("BOARD_MEM_FLASH_ORIGIN 0x08000000u"));
        let cmake = fs::read_to_string(root.join("CMakeLists.txt")).unwrap();
        assert!(cmake.contains("install(TARGETS conv2d"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let spec = spec(BUILTIN_CMAKE_KERNEL);
        let ctx = context(&spec);
        let generator = CodeGenerator::new(Arc::new(TemplateRegistry::with_builtins()));

        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        for dir in [&first, &second] {
            generator
                .render(&GenerationRequest {
                    spec: &spec,
                    context: &ctx,
                    output_root: dir.path(),
                })
                .unwrap();
        }

        assert_eq!(read_tree(first.path()), read_tree(second.path()));
    }

    #[test]
    fn test_missing_variable_writes_nothing() {
        let template = Template::new(
            "partial",
            BTreeMap::from([
                ("a.c".to_string(), "{{ kernel.id }}".to_string()),
                ("b.c".to_string(), "{{ param.undefined }}".to_string()),
            ]),
        );
        let generator = generator_with(template);
        let spec = spec("partial");
        let ctx = context(&spec);
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");

        let err = generator
            .render(&GenerationRequest {
                spec: &spec,
                context: &ctx,
                output_root: &root,
            })
            .unwrap_err();

        match err {
            GenerationError::TemplateRender {
                template, variable, ..
            } => {
                assert_eq!(template, "partial");
                assert_eq!(variable, "param.undefined");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!root.exists());
    }

    #[test]
    fn test_malformed_placeholder_writes_nothing() {
        let template = Template::new(
            "chained",
            BTreeMap::from([(
                "kernel.c".to_string(),
                "int {{ kernel.id | upper | lower }} = {{ param.tile size }};".to_string(),
            )]),
        );
        let generator = generator_with(template);
        let spec = spec("chained");
        let ctx = context(&spec);
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");

        let err = generator
            .render(&GenerationRequest {
                spec: &spec,
                context: &ctx,
                output_root: &root,
            })
            .unwrap_err();

        match err {
            GenerationError::TemplateRender {
                template,
                variable,
                reason,
            } => {
                assert_eq!(template, "chained");
                assert_eq!(variable, "{{ kernel.id | upper | lower }}");
                assert_eq!(reason, "malformed placeholder");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!root.exists());
    }

    #[test]
    fn test_unknown_template() {
        let generator = CodeGenerator::new(Arc::new(TemplateRegistry::new()));
        let spec = spec("gone");
        let ctx = RenderContext::new();
        let dir = TempDir::new().unwrap();

        let err = generator
            .render(&GenerationRequest {
                spec: &spec,
                context: &ctx,
                output_root: dir.path(),
            })
            .unwrap_err();
        assert!(matches!(err, GenerationError::UnknownTemplate { template } if template == "gone"));
        assert_eq!(generator.template_version("gone"), None);
    }

    #[test]
    fn test_path_escape_rejected() {
        let template = Template::new(
            "escape",
            BTreeMap::from([("{{ param.tile }}/../../evil.c".to_string(), String::new())]),
        );
        let generator = generator_with(template);
        let spec = spec("escape");
        let ctx = context(&spec);
        let dir = TempDir::new().unwrap();

        let err = generator
            .render(&GenerationRequest {
                spec: &spec,
                context: &ctx,
                output_root: &dir.path().join("src"),
            })
            .unwrap_err();
        assert!(matches!(err, GenerationError::TemplateRender { .. }));
    }

    #[test]
    fn test_rerender_replaces_stale_files() {
        let spec = spec(BUILTIN_CMAKE_KERNEL);
        let ctx = context(&spec);
        let generator = CodeGenerator::new(Arc::new(TemplateRegistry::with_builtins()));
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("stale.txt"), "old").unwrap();

        generator
            .render(&GenerationRequest {
                spec: &spec,
                context: &ctx,
                output_root: dir.path(),
            })
            .unwrap();
        assert!(!dir.path().join("stale.txt").exists());
    }
}
