use super::reference::{self, Segment};
use super::{is_valid_kernel_id, KernelSpec, RawKernelSpec};
use crate::codegen::TemplateRegistry;
use crate::error::SpecError;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A parsed reference, pointing at kernels and parameters by index
#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Output(usize),
    Param(ParamKey),
}

/// (kernel index, parameter index)
type ParamKey = (usize, usize);

/// Validates raw kernel specs and expands their parameter references
pub struct SpecResolver<'a> {
    templates: &'a TemplateRegistry,
    build_dir: PathBuf,
}

impl<'a> SpecResolver<'a> {
    pub fn new(templates: &'a TemplateRegistry, build_dir: impl AsRef<Path>) -> Self {
        Self {
            templates,
            build_dir: build_dir.as_ref().to_path_buf(),
        }
    }

    /// Final output directory of a kernel, as substituted for `${<id>.output}`
    pub fn output_dir(&self, id: &str) -> PathBuf {
        self.build_dir.join("out").join(id)
    }

    /// Validates the whole set (fail-fast, in declaration order) and returns
    /// the specs in the same order with parameters expanded.
    pub fn resolve(&self, raw: Vec<RawKernelSpec>) -> Result<Vec<KernelSpec>, SpecError> {
        let index = self.validate(&raw)?;
        let parts = parse_params(&raw, &index)?;
        let outputs: Vec<String> = raw
            .iter()
            .map(|spec| self.output_dir(&spec.id).to_string_lossy().into_owned())
            .collect();
        let mut expanded = expand_all(&raw, &parts, &outputs)?;

        let implicit: Vec<Vec<String>> = parts
            .iter()
            .map(|params| {
                params
                    .iter()
                    .flatten()
                    .filter_map(|part| match part {
                        Part::Output(target) => Some(raw[*target].id.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .collect();

        let mut specs = Vec::with_capacity(raw.len());
        for ((k, spec), implied) in raw.into_iter().enumerate().zip(implicit) {
            let mut dependencies: Vec<String> = Vec::new();
            for dep in spec.dependencies.into_iter().chain(implied) {
                if !dependencies.contains(&dep) {
                    dependencies.push(dep);
                }
            }

            let params = spec
                .params
                .into_iter()
                .enumerate()
                .map(|(p, (name, _))| {
                    let value = expanded.remove(&(k, p)).unwrap_or_default();
                    (name, value)
                })
                .collect();

            specs.push(KernelSpec {
                id: spec.id,
                board: spec.board,
                template: spec.template,
                params,
                dependencies,
                declaration_index: k,
            });
        }

        debug!(kernels = specs.len(), "Resolved kernel specs");
        Ok(specs)
    }

    fn validate(&self, raw: &[RawKernelSpec]) -> Result<HashMap<String, usize>, SpecError> {
        for (i, spec) in raw.iter().enumerate() {
            if spec.id.is_empty() {
                return Err(SpecError::EmptyKernelId { index: i });
            }
            if !is_valid_kernel_id(&spec.id) {
                return Err(SpecError::InvalidKernelId {
                    id: spec.id.clone(),
                });
            }
        }

        let mut index = HashMap::with_capacity(raw.len());
        for (i, spec) in raw.iter().enumerate() {
            if index.insert(spec.id.clone(), i).is_some() {
                return Err(SpecError::DuplicateKernelId {
                    id: spec.id.clone(),
                });
            }
        }

        if let Some(spec) = raw.iter().find(|s| !self.templates.contains(&s.template)) {
            return Err(SpecError::UnknownTemplate {
                kernel: spec.id.clone(),
                template: spec.template.clone(),
            });
        }

        for spec in raw {
            if let Some(missing) = spec.dependencies.iter().find(|d| !index.contains_key(*d)) {
                return Err(SpecError::UnknownDependency {
                    kernel: spec.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        Ok(index)
    }
}

fn parse_params(
    raw: &[RawKernelSpec],
    index: &HashMap<String, usize>,
) -> Result<Vec<Vec<Vec<Part>>>, SpecError> {
    let lookup = |from: &str, target: &str| {
        index
            .get(target)
            .copied()
            .ok_or_else(|| SpecError::UnknownDependency {
                kernel: from.to_string(),
                dependency: target.to_string(),
            })
    };

    let mut all = Vec::with_capacity(raw.len());
    for spec in raw {
        let mut per_param = Vec::with_capacity(spec.params.len());
        for (name, value) in &spec.params {
            let segments =
                reference::parse(value).map_err(|reference| SpecError::MalformedReference {
                    kernel: spec.id.clone(),
                    parameter: name.clone(),
                    reference,
                })?;

            let mut parts = Vec::with_capacity(segments.len());
            for segment in segments {
                parts.push(match segment {
                    Segment::Literal(text) => Part::Literal(text),
                    Segment::Output { kernel } => Part::Output(lookup(&spec.id, &kernel)?),
                    Segment::Param {
                        kernel,
                        name: param,
                    } => {
                        let target = lookup(&spec.id, &kernel)?;
                        let p = raw[target]
                            .params
                            .iter()
                            .position(|(n, _)| *n == param)
                            .ok_or_else(|| SpecError::UnknownParameter {
                                kernel: spec.id.clone(),
                                target: kernel.clone(),
                                parameter: param.clone(),
                            })?;
                        Part::Param((target, p))
                    }
                });
            }
            per_param.push(parts);
        }
        all.push(per_param);
    }
    Ok(all)
}

struct Frame {
    key: ParamKey,
    next: usize,
    value: String,
}

fn describe(raw: &[RawKernelSpec], (k, p): ParamKey) -> String {
    format!("{}.params.{}", raw[k].id, raw[k].params[p].0)
}

/// Expands every parameter exactly once. Works off an explicit stack of
/// partially built values; a key met again while still on the stack is a cycle.
fn expand_all(
    raw: &[RawKernelSpec],
    parts: &[Vec<Vec<Part>>],
    outputs: &[String],
) -> Result<HashMap<ParamKey, String>, SpecError> {
    let mut done: HashMap<ParamKey, String> = HashMap::new();
    let mut in_progress: HashSet<ParamKey> = HashSet::new();

    for (k, params) in parts.iter().enumerate() {
        for p in 0..params.len() {
            if done.contains_key(&(k, p)) {
                continue;
            }

            let mut stack = vec![Frame {
                key: (k, p),
                next: 0,
                value: String::new(),
            }];
            in_progress.insert((k, p));

            while let Some(top) = stack.last() {
                let (key, next) = (top.key, top.next);
                let current = &parts[key.0][key.1];

                if next == current.len() {
                    if let Some(frame) = stack.pop() {
                        in_progress.remove(&frame.key);
                        if let Some(parent) = stack.last_mut() {
                            parent.value.push_str(&frame.value);
                            parent.next += 1;
                        }
                        done.insert(frame.key, frame.value);
                    }
                    continue;
                }

                let text = match &current[next] {
                    Part::Literal(text) => text.clone(),
                    Part::Output(target) => outputs[*target].clone(),
                    Part::Param(referenced) => {
                        if let Some(value) = done.get(referenced) {
                            value.clone()
                        } else if in_progress.contains(referenced) {
                            let start = stack
                                .iter()
                                .position(|f| f.key == *referenced)
                                .unwrap_or(0);
                            let mut chain: Vec<String> =
                                stack[start..].iter().map(|f| describe(raw, f.key)).collect();
                            chain.push(describe(raw, *referenced));
                            return Err(SpecError::CyclicParameterReference { chain });
                        } else {
                            in_progress.insert(*referenced);
                            stack.push(Frame {
                                key: *referenced,
                                next: 0,
                                value: String::new(),
                            });
                            continue;
                        }
                    }
                };

                if let Some(top) = stack.last_mut() {
                    top.value.push_str(&text);
                    top.next += 1;
                }
            }
        }
    }

    Ok(done)
}
