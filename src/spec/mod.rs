//! Kernel specifications
//!
//! A [`RawKernelSpec`] is what a user (or an ML front end) writes. The
//! [`SpecResolver`] validates a whole set of them and expands parameter
//! references, producing immutable [`KernelSpec`]s in declaration order.

mod loader;
mod reference;
mod resolver;

pub use loader::{discover_spec_files, load_spec_files, parse_spec_document};
pub use resolver::SpecResolver;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Template used when a spec does not name one
pub const DEFAULT_TEMPLATE: &str = "cmake-kernel";

/// A kernel generation request as written in a spec file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawKernelSpec {
    pub id: String,
    pub board: String,
    #[serde(default = "default_template")]
    pub template: String,
    /// Ordered parameters; values may contain `${...}` references
    #[serde(default, deserialize_with = "deserialize_params")]
    pub params: Vec<(String, String)>,
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn deserialize_params<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = Option::<serde_yaml::Mapping>::deserialize(deserializer)?;
    let mut params = Vec::new();
    for (key, value) in mapping.into_iter().flatten() {
        let key = match key {
            Value::String(s) => s,
            other => return Err(de::Error::custom(format!("parameter name {other:?} is not a string"))),
        };
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            _ => {
                return Err(de::Error::custom(format!(
                    "parameter '{key}' must be a string, number or boolean"
                )))
            }
        };
        params.push((key, value));
    }
    Ok(params)
}

impl RawKernelSpec {
    pub fn new(id: &str, board: &str) -> Self {
        Self {
            id: id.to_string(),
            board: board.to_string(),
            template: default_template(),
            params: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = template.to_string();
        self
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_dependency(mut self, id: &str) -> Self {
        self.dependencies.push(id.to_string());
        self
    }
}

/// A validated kernel spec with every parameter reference expanded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelSpec {
    pub id: String,
    pub board: String,
    pub template: String,
    pub params: Vec<(String, String)>,
    /// Declared dependencies followed by those implied by `${id.output}`
    pub dependencies: Vec<String>,
    /// Position in the resolver input; used to break ordering ties
    pub declaration_index: usize,
}

impl KernelSpec {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Kernel identifiers: non-empty, ASCII letters, digits, `_` and `-`
pub fn is_valid_kernel_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_stringifies_scalars_in_order() {
        let yaml = r#"
id: conv2d
board: stm32h7
params:
  tile: 16
  fused: true
  dtype: int8
  bias:
"#;
        let spec: RawKernelSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.template, DEFAULT_TEMPLATE);
        assert_eq!(
            spec.params,
            vec![
                ("tile".to_string(), "16".to_string()),
                ("fused".to_string(), "true".to_string()),
                ("dtype".to_string(), "int8".to_string()),
                ("bias".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_deserialize_rejects_nested_param() {
        let yaml = "id: a\nboard: b\nparams:\n  shape: [1, 2]\n";
        let err = serde_yaml::from_str::<RawKernelSpec>(yaml).unwrap_err();
        assert!(err.to_string().contains("shape"));
    }

    #[test]
    fn test_depends_on_alias() {
        let yaml = "id: a\nboard: b\ndepends_on: [c, d]\n";
        let spec: RawKernelSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.dependencies, vec!["c", "d"]);
    }

    #[test]
    fn test_kernel_id_validation() {
        assert!(is_valid_kernel_id("matmul_int8-v2"));
        assert!(!is_valid_kernel_id(""));
        assert!(!is_valid_kernel_id("has space"));
        assert!(!is_valid_kernel_id("dotted.name"));
    }
}
