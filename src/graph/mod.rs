//! Kernel dependency graph
//!
//! Nodes are resolved kernel specs; an edge points from a dependent to its
//! dependency. Cycles are rejected up front with the offending path, and the
//! topological order breaks ties by declaration order so runs are repeatable.

use crate::error::GraphError;
use crate::spec::KernelSpec;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    specs: Vec<KernelSpec>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    pub fn build(mut specs: Vec<KernelSpec>) -> Result<Self, GraphError> {
        specs.sort_by_key(|s| s.declaration_index);

        let index: HashMap<String, usize> = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        let mut dependencies = vec![Vec::new(); specs.len()];
        let mut dependents = vec![Vec::new(); specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.dependencies {
                let &d = index.get(dep).ok_or_else(|| GraphError::UnknownDependency {
                    kernel: spec.id.clone(),
                    dependency: dep.clone(),
                })?;
                if !dependencies[i].contains(&d) {
                    dependencies[i].push(d);
                    dependents[d].push(i);
                }
            }
        }

        let mut graph = Self {
            specs,
            index,
            dependencies,
            dependents,
            order: Vec::new(),
        };
        graph.check_acyclic()?;
        graph.order = graph.topological_sort();

        debug!(
            nodes = graph.specs.len(),
            order = ?graph.ordered_ids(),
            "Built dependency graph"
        );
        Ok(graph)
    }

    /// Depth-first search from each node in declaration order, following
    /// dependencies in declared order.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut marks = vec![Mark::Unvisited; self.specs.len()];

        for root in 0..self.specs.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }

            // (node, next dependency to visit)
            let mut path: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::InProgress;

            while let Some(top) = path.last_mut() {
                let node = top.0;
                let Some(&dep) = self.dependencies[node].get(top.1) else {
                    marks[node] = Mark::Done;
                    path.pop();
                    continue;
                };
                top.1 += 1;

                match marks[dep] {
                    Mark::Done => {}
                    Mark::Unvisited => {
                        marks[dep] = Mark::InProgress;
                        path.push((dep, 0));
                    }
                    Mark::InProgress => {
                        let start = path.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..]
                            .iter()
                            .map(|(n, _)| self.specs[*n].id.clone())
                            .collect();
                        cycle.push(self.specs[dep].id.clone());
                        return Err(GraphError::DependencyCycle { cycle });
                    }
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm; the ready set is ordered by declaration index
    fn topological_sort(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.specs.len());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        order
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[KernelSpec] {
        &self.specs
    }

    pub fn spec(&self, node: usize) -> &KernelSpec {
        &self.specs[node]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Node indices, dependencies first
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    pub fn ordered_ids(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.specs[i].id.as_str()).collect()
    }

    pub fn dependencies(&self, node: usize) -> &[usize] {
        &self.dependencies[node]
    }

    pub fn dependents(&self, node: usize) -> &[usize] {
        &self.dependents[node]
    }

    /// The requested targets plus everything they transitively depend on
    pub fn ancestors_closure(&self, ids: &[String]) -> Result<BTreeSet<usize>, GraphError> {
        let mut closure = BTreeSet::new();
        let mut stack = Vec::with_capacity(ids.len());
        for id in ids {
            let node = self
                .index_of(id)
                .ok_or_else(|| GraphError::UnknownTarget { id: id.clone() })?;
            stack.push(node);
        }

        while let Some(node) = stack.pop() {
            if closure.insert(node) {
                stack.extend(self.dependencies[node].iter().copied());
            }
        }
        Ok(closure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, index: usize, deps: &[&str]) -> KernelSpec {
        KernelSpec {
            id: id.to_string(),
            board: "b".to_string(),
            template: "cmake-kernel".to_string(),
            params: vec![],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            declaration_index: index,
        }
    }

    fn assert_edges_respected(graph: &DependencyGraph) {
        let position: HashMap<usize, usize> = graph
            .topological_order()
            .iter()
            .enumerate()
            .map(|(pos, &node)| (node, pos))
            .collect();
        for node in 0..graph.len() {
            for &dep in graph.dependencies(node) {
                assert!(position[&dep] < position[&node]);
            }
        }
    }

    #[test]
    fn test_linear_chain() {
        let graph = DependencyGraph::build(vec![
            spec("app", 0, &["lib"]),
            spec("lib", 1, &["core"]),
            spec("core", 2, &[]),
        ])
        .unwrap();

        assert_eq!(graph.ordered_ids(), vec!["core", "lib", "app"]);
        assert_edges_respected(&graph);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let graph = DependencyGraph::build(vec![
            spec("z", 0, &[]),
            spec("top", 1, &["m", "a"]),
            spec("m", 2, &[]),
            spec("a", 3, &[]),
        ])
        .unwrap();

        assert_eq!(graph.ordered_ids(), vec!["z", "m", "a", "top"]);
    }

    #[test]
    fn test_diamond() {
        let graph = DependencyGraph::build(vec![
            spec("app", 0, &["left", "right"]),
            spec("left", 1, &["base"]),
            spec("right", 2, &["base"]),
            spec("base", 3, &[]),
        ])
        .unwrap();

        assert_eq!(graph.ordered_ids(), vec!["base", "left", "right", "app"]);
        assert_edges_respected(&graph);
        let base = graph.index_of("base").unwrap();
        assert_eq!(graph.dependents(base).len(), 2);
    }

    #[test]
    fn test_cycle_is_named_in_traversal_order() {
        let err = DependencyGraph::build(vec![
            spec("A", 0, &["B"]),
            spec("B", 1, &["C"]),
            spec("C", 2, &["A"]),
        ])
        .unwrap_err();

        match err {
            GraphError::DependencyCycle { cycle } => assert_eq!(cycle, vec!["A", "B", "C", "A"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cycle_not_including_root() {
        let err = DependencyGraph::build(vec![
            spec("entry", 0, &["x"]),
            spec("x", 1, &["y"]),
            spec("y", 2, &["x"]),
        ])
        .unwrap_err();

        assert!(matches!(err, GraphError::DependencyCycle { cycle } if cycle == vec!["x", "y", "x"]));
    }

    #[test]
    fn test_self_dependency() {
        let err = DependencyGraph::build(vec![spec("solo", 0, &["solo"])]).unwrap_err();
        assert!(matches!(err, GraphError::DependencyCycle { cycle } if cycle == vec!["solo", "solo"]));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = DependencyGraph::build(vec![spec("p", 0, &["q"])]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn test_ancestors_closure() {
        let graph = DependencyGraph::build(vec![
            spec("app", 0, &["lib"]),
            spec("lib", 1, &["core"]),
            spec("core", 2, &[]),
            spec("other", 3, &[]),
        ])
        .unwrap();

        let closure = graph.ancestors_closure(&["lib".to_string()]).unwrap();
        let ids: BTreeSet<&str> = closure.iter().map(|&i| graph.spec(i).id.as_str()).collect();
        assert_eq!(ids, BTreeSet::from(["lib", "core"]));

        let err = graph.ancestors_closure(&["ghost".to_string()]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownTarget { id } if id == "ghost"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::build(vec![]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.topological_order().is_empty());
    }
}
