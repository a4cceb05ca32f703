use super::{BoardMetadata, BspProvider};
use crate::error::BspGenerationError;
use crate::toolchain::{ToolRole, ToolchainInfo};
use crate::util::process::{run_tool, ToolInvocation};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Runs `<bsp tool> --board <id> --format json` and parses its output
#[derive(Debug, Clone)]
pub struct CommandBspProvider {
    program: PathBuf,
    search_path: Option<OsString>,
    timeout: Duration,
}

impl CommandBspProvider {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            search_path: None,
            timeout,
        }
    }

    /// Uses the toolchain's resolved BSP generator and search path
    pub fn from_toolchain(toolchain: &ToolchainInfo, timeout: Duration) -> Option<Self> {
        let tool = toolchain.by_role(ToolRole::Bsp)?;
        Some(Self::new(&tool.path, timeout).with_search_path(toolchain.env_path()))
    }

    pub fn with_search_path(mut self, search_path: OsString) -> Self {
        self.search_path = Some(search_path);
        self
    }

    fn fail(board: &str, reason: impl Into<String>) -> BspGenerationError {
        BspGenerationError {
            board: board.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl BspProvider for CommandBspProvider {
    async fn metadata(&self, board: &str) -> Result<BoardMetadata, BspGenerationError> {
        let mut invocation = ToolInvocation::new(&self.program, self.timeout).args([
            "--board", board, "--format", "json",
        ]);
        if let Some(path) = &self.search_path {
            invocation = invocation.isolated_path(path.clone());
        }

        let output = run_tool(&invocation)
            .await
            .map_err(|e| Self::fail(board, e.to_string()))?;

        if !output.success() {
            return Err(Self::fail(
                board,
                format!(
                    "{} exited with {:?}: {}",
                    invocation.display_name(),
                    output.exit_code,
                    output.stderr.trim()
                ),
            ));
        }

        let metadata: BoardMetadata = serde_json::from_str(&output.stdout)
            .map_err(|e| Self::fail(board, format!("invalid metadata JSON: {e}")))?;

        if metadata.board != board {
            return Err(Self::fail(
                board,
                format!("generator answered for board '{}'", metadata.board),
            ));
        }

        debug!(
            board,
            regions = metadata.memory.len(),
            peripherals = metadata.peripherals.len(),
            "Loaded BSP metadata"
        );
        Ok(metadata)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn fake_bsp(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("etch-bsp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_parses_generator_output() {
        let dir = TempDir::new().unwrap();
        let tool = fake_bsp(
            dir.path(),
            r#"[ "$1" = "--board" ] || exit 9
echo "{\"board\": \"$2\", \"arch\": \"armv7e-m\", \"cpu\": \"cortex-m7\"}""#,
        );

        let provider = CommandBspProvider::new(tool, Duration::from_secs(5));
        let meta = provider.metadata("stm32h7").await.unwrap();
        assert_eq!(meta.board, "stm32h7");
        assert_eq!(meta.cpu, "cortex-m7");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let tool = fake_bsp(dir.path(), "echo 'no such board' >&2; exit 4");

        let err = CommandBspProvider::new(tool, Duration::from_secs(5))
            .metadata("nrf52")
            .await
            .unwrap_err();
        assert_eq!(err.board, "nrf52");
        assert!(err.reason.contains("no such board"));
    }

    #[tokio::test]
    async fn test_bad_json_and_board_mismatch() {
        let dir = TempDir::new().unwrap();
        let tool = fake_bsp(dir.path(), "echo 'not json'");
        let err = CommandBspProvider::new(&tool, Duration::from_secs(5))
            .metadata("rp2040")
            .await
            .unwrap_err();
        assert!(err.reason.contains("invalid metadata JSON"));

        let other = TempDir::new().unwrap();
        let tool = fake_bsp(other.path(), r#"echo '{"board": "esp32", "arch": "xtensa"}'"#);
        let err = CommandBspProvider::new(&tool, Duration::from_secs(5))
            .metadata("rp2040")
            .await
            .unwrap_err();
        assert!(err.reason.contains("esp32"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let tool = fake_bsp(dir.path(), "sleep 5");
        let err = CommandBspProvider::new(tool, Duration::from_millis(100))
            .metadata("rp2040")
            .await
            .unwrap_err();
        assert!(err.reason.contains("timed out"));
    }
}
