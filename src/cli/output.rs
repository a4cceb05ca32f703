//! Output formatting for multiple formats
//!
//! Build reports, build orders and toolchains render as JSON, YAML or
//! human-readable text. Paths inside the build directory are shown relative
//! to it.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::graph::DependencyGraph;
use crate::pipeline::{BuildReport, FailureCause, TargetStatus};
use crate::toolchain::ToolchainInfo;
use crate::util::naming::safe_relative_path;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format
    Yaml,
    /// Human-readable formatted text
    Human,
}

#[derive(Serialize)]
struct GraphEntry<'a> {
    id: &'a str,
    board: &'a str,
    template: &'a str,
    dependencies: Vec<&'a str>,
}

#[derive(Serialize)]
struct ToolEntry<'a> {
    name: &'a str,
    role: &'a str,
    path: &'a Path,
    version: String,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a build report; output paths are shown relative to `build_dir`
    pub fn format_report(&self, report: &BuildReport, build_dir: &Path) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(report).context("Failed to serialize report to YAML")
            }
            OutputFormat::Human => Ok(format_report_human(report, build_dir)),
        }
    }

    pub fn format_graph(&self, graph: &DependencyGraph) -> Result<String> {
        let entries: Vec<GraphEntry<'_>> = graph
            .topological_order()
            .iter()
            .map(|&node| {
                let spec = graph.spec(node);
                GraphEntry {
                    id: &spec.id,
                    board: &spec.board,
                    template: &spec.template,
                    dependencies: graph
                        .dependencies(node)
                        .iter()
                        .map(|&d| graph.spec(d).id.as_str())
                        .collect(),
                }
            })
            .collect();

        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&entries).context("Failed to serialize graph to JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(&entries).context("Failed to serialize graph to YAML")
            }
            OutputFormat::Human => {
                let mut output = String::new();
                for (i, entry) in entries.iter().enumerate() {
                    output.push_str(&format!("{:>3}. {} [{}]", i + 1, entry.id, entry.board));
                    if !entry.dependencies.is_empty() {
                        output.push_str(&format!(" <- {}", entry.dependencies.join(", ")));
                    }
                    output.push('\n');
                }
                Ok(output)
            }
        }
    }

    pub fn format_toolchain(&self, toolchain: &ToolchainInfo) -> Result<String> {
        let entries: Vec<ToolEntry<'_>> = toolchain
            .tools()
            .iter()
            .map(|tool| ToolEntry {
                name: &tool.name,
                role: tool.role.as_str(),
                path: &tool.path,
                version: tool.version.to_string(),
            })
            .collect();

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&entries)
                .context("Failed to serialize toolchain to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(&entries).context("Failed to serialize toolchain to YAML")
            }
            OutputFormat::Human => {
                let mut output = String::from("Toolchain\n");
                output.push_str(RULE);
                output.push_str("\n\n");
                for entry in &entries {
                    output.push_str(&format!(
                        "\u{2713} {:<10} {:<10} {:<10} {}\n",
                        entry.name,
                        entry.role,
                        entry.version,
                        entry.path.display()
                    ));
                }
                Ok(output)
            }
        }
    }
}

fn status_symbol(status: TargetStatus) -> &'static str {
    match status {
        TargetStatus::Succeeded => "\u{2713}",
        TargetStatus::SkippedCached => "\u{21BA}",
        TargetStatus::Failed => "\u{2717}",
        _ => "-",
    }
}

fn format_report_human(report: &BuildReport, build_dir: &Path) -> String {
    let mut output = String::new();

    if report.success() {
        output.push_str("\u{2713} Build Succeeded\n");
    } else {
        output.push_str("\u{2717} Build Failed\n");
    }
    output.push_str(RULE);
    output.push_str("\n\n");

    for target in &report.targets {
        output.push_str(&format!(
            "{} {:<24} {:<15}",
            status_symbol(target.status),
            target.id,
            target.status
        ));
        if let Some(path) = &target.output {
            output.push_str(&format!(
                " {}",
                safe_relative_path(path, build_dir).display()
            ));
        }
        output.push('\n');

        if let Some(cause) = &target.cause {
            output.push_str(&format!("  \u{2514}\u{2500} {}\n", cause));
            if let FailureCause::Build {
                diagnostics: Some(diagnostics),
                ..
            } = cause
            {
                for line in diagnostics.lines() {
                    output.push_str(&format!("     | {}\n", line));
                }
            }
        }
    }

    output.push_str(&format!(
        "\nSucceeded: {}  Cached: {}  Failed: {}  Skipped: {}\n",
        report.succeeded().len(),
        report.skipped_cached().len(),
        report.failed().len(),
        report.skipped().len()
    ));
    if report.cancelled {
        output.push_str("\u{26A0} Run was cancelled\n");
    }
    output.push_str(&format!("Finished in {}ms\n", report.duration_ms));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TargetOutcome;
    use std::path::PathBuf;
    use std::time::Duration;

    fn outcome(id: &str, status: TargetStatus, cause: Option<FailureCause>) -> TargetOutcome {
        TargetOutcome {
            id: id.to_string(),
            fingerprint: "ab".repeat(32),
            status,
            requested: true,
            output: (status == TargetStatus::Succeeded)
                .then(|| PathBuf::from(format!("/work/build/out/{id}"))),
            cause,
            duration_ms: 5,
        }
    }

    fn report() -> BuildReport {
        BuildReport::new(
            vec![
                outcome("gemm", TargetStatus::Succeeded, None),
                outcome(
                    "attn",
                    TargetStatus::Failed,
                    Some(FailureCause::Build {
                        message: "ninja exited with status 1".to_string(),
                        diagnostics: Some("attn.c:3: error: expected ';'".to_string()),
                    }),
                ),
            ],
            Duration::from_millis(42),
            false,
        )
    }

    #[test]
    fn test_human_report() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let text = formatter
            .format_report(&report(), Path::new("/work/build"))
            .unwrap();

        assert!(text.contains("Build Failed"));
        assert!(text.contains("out/gemm"));
        assert!(!text.contains("/work/build/out/gemm"));
        assert!(text.contains("| attn.c:3: error: expected ';'"));
        assert!(text.contains("Succeeded: 1  Cached: 0  Failed: 1  Skipped: 0"));
    }

    #[test]
    fn test_json_report() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let text = formatter
            .format_report(&report(), Path::new("/work/build"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["targets"][0]["status"], "succeeded");
        assert_eq!(value["targets"][1]["cause"]["kind"], "build");
    }

    #[test]
    fn test_yaml_report() {
        let formatter = OutputFormatter::new(OutputFormat::Yaml);
        let text = formatter
            .format_report(&report(), Path::new("/work/build"))
            .unwrap();
        assert!(text.contains("status: failed"));
    }
}
