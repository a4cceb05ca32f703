use super::{extract_version, ResolvedTool, ToolProbe, ToolRequirement, ToolchainInfo};
use crate::error::ToolchainError;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves tool requirements against a [`ToolProbe`]
pub struct ToolchainLocator {
    probe: Arc<dyn ToolProbe>,
}

impl ToolchainLocator {
    pub fn new(probe: Arc<dyn ToolProbe>) -> Self {
        Self { probe }
    }

    /// Locates and version-checks every requirement, failing on the first
    /// tool that is missing, unreadable or too old
    pub async fn resolve(
        &self,
        requirements: &[ToolRequirement],
    ) -> Result<ToolchainInfo, ToolchainError> {
        let mut tools = Vec::with_capacity(requirements.len());

        for req in requirements {
            tools.push(self.resolve_one(req).await?);
        }

        info!(
            tools = tools.len(),
            "Toolchain resolved: {}",
            tools
                .iter()
                .map(|t| format!("{} {}", t.name, t.version))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(ToolchainInfo::new(tools, self.probe.search_dirs()))
    }

    async fn resolve_one(&self, req: &ToolRequirement) -> Result<ResolvedTool, ToolchainError> {
        let path = self.probe.locate(&req.program).ok_or_else(|| {
            ToolchainError::ToolchainUnavailable {
                tool: req.name.clone(),
                reason: format!("`{}` not found in search path", req.program.display()),
            }
        })?;
        debug!(tool = %req.name, path = %path.display(), "Located tool");

        let output = self
            .probe
            .version_output(&path)
            .await
            .map_err(|reason| ToolchainError::ToolchainUnavailable {
                tool: req.name.clone(),
                reason,
            })?;

        let version =
            extract_version(&output).ok_or_else(|| ToolchainError::UnparsableVersion {
                tool: req.name.clone(),
                output: output.trim().to_string(),
            })?;

        if version < req.min_version {
            return Err(ToolchainError::ToolchainVersionMismatch {
                tool: req.name.clone(),
                found: version,
                required: req.min_version.clone(),
            });
        }

        Ok(ResolvedTool {
            name: req.name.clone(),
            role: req.role,
            path,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::{MockProbe, ToolRole};
    use semver::Version;
    use std::path::PathBuf;

    fn requirements() -> Vec<ToolRequirement> {
        vec![
            ToolRequirement::new("cmake", ToolRole::Generator, "cmake", "3.20.0").unwrap(),
            ToolRequirement::new("ninja", ToolRole::Executor, "ninja", "1.10.0").unwrap(),
        ]
    }

    #[tokio::test]
    async fn test_resolves_all_tools() {
        let probe = MockProbe::new()
            .with_tool("cmake", "cmake version 3.28.1")
            .with_tool("ninja", "1.11.1");
        let locator = ToolchainLocator::new(Arc::new(probe));

        let info = locator.resolve(&requirements()).await.unwrap();

        assert_eq!(info.tools().len(), 2);
        let ninja = info.get("ninja").unwrap();
        assert_eq!(ninja.version, Version::new(1, 11, 1));
        assert_eq!(ninja.path, PathBuf::from("/mock/bin/ninja"));
        assert_eq!(ninja.role, ToolRole::Executor);
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() {
        let probe = MockProbe::new().with_tool("cmake", "cmake version 3.28.1");
        let locator = ToolchainLocator::new(Arc::new(probe));

        let err = locator.resolve(&requirements()).await.unwrap_err();
        match err {
            ToolchainError::ToolchainUnavailable { tool, .. } => assert_eq!(tool, "ninja"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_version_query_is_unavailable() {
        let probe = MockProbe::new()
            .with_tool("cmake", "cmake version 3.28.1")
            .with_broken_tool("ninja", "permission denied");
        let locator = ToolchainLocator::new(Arc::new(probe));

        let err = locator.resolve(&requirements()).await.unwrap_err();
        assert!(matches!(
            err,
            ToolchainError::ToolchainUnavailable { ref reason, .. } if reason == "permission denied"
        ));
    }

    #[tokio::test]
    async fn test_old_tool_is_version_mismatch() {
        let probe = MockProbe::new().with_tool("etch-bsp", "etch-bsp 1.2.0");
        let locator = ToolchainLocator::new(Arc::new(probe));
        let reqs = vec![ToolRequirement::new("etch-bsp", ToolRole::Bsp, "etch-bsp", "2.0.0").unwrap()];

        let err = locator.resolve(&reqs).await.unwrap_err();
        match &err {
            ToolchainError::ToolchainVersionMismatch {
                tool,
                found,
                required,
            } => {
                assert_eq!(tool, "etch-bsp");
                assert_eq!(*found, Version::new(1, 2, 0));
                assert_eq!(*required, Version::new(2, 0, 0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("etch-bsp"));
        assert!(message.contains("1.2.0"));
        assert!(message.contains("2.0.0"));
    }

    #[tokio::test]
    async fn test_exact_minimum_is_accepted() {
        let probe = MockProbe::new().with_tool("ninja", "1.10.0");
        let locator = ToolchainLocator::new(Arc::new(probe));
        let reqs = vec![ToolRequirement::new("ninja", ToolRole::Executor, "ninja", "1.10").unwrap()];

        assert!(locator.resolve(&reqs).await.is_ok());
    }

    #[tokio::test]
    async fn test_unparsable_version_output() {
        let probe = MockProbe::new().with_tool("ninja", "ninja (development build)");
        let locator = ToolchainLocator::new(Arc::new(probe));
        let reqs = vec![ToolRequirement::new("ninja", ToolRole::Executor, "ninja", "1.10").unwrap()];

        let err = locator.resolve(&reqs).await.unwrap_err();
        assert!(matches!(err, ToolchainError::UnparsableVersion { .. }));
    }
}
