use crate::bsp::BoardMetadata;
use crate::spec::KernelSpec;
use crate::toolchain::ToolchainInfo;
use crate::util::naming::{c_ident, snake_to_pascal};
use serde::Serialize;
use std::collections::BTreeMap;

/// The closed set of variables a template may reference for one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderContext {
    values: BTreeMap<String, String>,
}

/// A finished dependency, as seen by its dependents' templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyOutput {
    pub id: String,
    pub output: String,
    pub fingerprint: String,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the full context for one target
    ///
    /// Keys: `kernel.*`, `param.*`, `dep.<id>.output|fingerprint`, `board.*`
    /// and `toolchain.<name>.version`.
    pub fn for_target(
        spec: &KernelSpec,
        fingerprint: &str,
        board: &BoardMetadata,
        dependencies: &[DependencyOutput],
        toolchain: &ToolchainInfo,
    ) -> Self {
        let mut ctx = Self::new();
        ctx.insert("kernel.id", &spec.id);
        ctx.insert("kernel.name", &c_ident(&spec.id));
        ctx.insert("kernel.type_name", &snake_to_pascal(&c_ident(&spec.id)));
        ctx.insert("kernel.board", &spec.board);
        ctx.insert("kernel.template", &spec.template);
        ctx.insert("kernel.fingerprint", fingerprint);
        ctx.insert(
            "kernel.dependencies",
            &spec.dependencies.join(";"),
        );

        let mut param_defines = String::new();
        for (name, value) in &spec.params {
            ctx.insert(&format!("param.{name}"), value);
            param_defines.push_str(&format!(
                "#define {}_{} {}\n",
                c_ident(&spec.id).to_uppercase(),
                c_ident(name).to_uppercase(),
                value
            ));
        }
        ctx.insert("kernel.param_defines", &param_defines);

        let mut include_dirs = Vec::new();
        for dep in dependencies {
            ctx.insert(&format!("dep.{}.output", dep.id), &dep.output);
            ctx.insert(&format!("dep.{}.fingerprint", dep.id), &dep.fingerprint);
            include_dirs.push(format!("{}/include", dep.output));
        }
        ctx.insert("kernel.dependency_includes", &include_dirs.join(";"));

        for (key, value) in board.context_entries() {
            ctx.insert(&key, &value);
        }

        for tool in toolchain.tools() {
            ctx.insert(
                &format!("toolchain.{}.version", tool.name),
                &tool.version.to_string(),
            );
        }

        ctx
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::{ResolvedTool, ToolRole};
    use semver::Version;
    use std::path::PathBuf;

    #[test]
    fn test_for_target_keys() {
        let spec = KernelSpec {
            id: "fused-gemm".to_string(),
            board: "stm32h7".to_string(),
            template: "cmake-kernel".to_string(),
            params: vec![("tile".to_string(), "16".to_string())],
            dependencies: vec!["norm".to_string()],
            declaration_index: 0,
        };
        let board = BoardMetadata::new("stm32h7", "armv7e-m", "cortex-m7");
        let deps = vec![DependencyOutput {
            id: "norm".to_string(),
            output: "/b/out/norm".to_string(),
            fingerprint: "ab12".to_string(),
        }];
        let toolchain = ToolchainInfo::new(
            vec![ResolvedTool {
                name: "cmake".to_string(),
                role: ToolRole::Generator,
                path: PathBuf::from("/usr/bin/cmake"),
                version: Version::new(3, 28, 1),
            }],
            vec![],
        );

        let ctx = RenderContext::for_target(&spec, "ffee", &board, &deps, &toolchain);

        assert_eq!(ctx.get("kernel.name"), Some("fused_gemm"));
        assert_eq!(ctx.get("kernel.type_name"), Some("FusedGemm"));
        assert_eq!(ctx.get("param.tile"), Some("16"));
        assert_eq!(ctx.get("kernel.param_defines"), Some("#define FUSED_GEMM_TILE 16\n"));
        assert_eq!(ctx.get("dep.norm.output"), Some("/b/out/norm"));
        assert_eq!(ctx.get("dep.norm.fingerprint"), Some("ab12"));
        assert_eq!(ctx.get("kernel.dependency_includes"), Some("/b/out/norm/include"));
        assert_eq!(ctx.get("board.cpu"), Some("cortex-m7"));
        assert_eq!(ctx.get("toolchain.cmake.version"), Some("3.28.1"));
        assert!(!ctx.contains("param.missing"));
    }
}
