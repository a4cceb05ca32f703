//! Target fingerprints
//!
//! A fingerprint is the SHA-256 of a canonical JSON document describing every
//! input of a target: the spec, the template version, a digest of the board
//! metadata and the fingerprints of its dependencies. Changing anything
//! upstream therefore changes every fingerprint downstream of it.

use crate::bsp::BoardMetadata;
use crate::codegen::SourceGenerator;
use crate::graph::DependencyGraph;
use crate::spec::KernelSpec;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const SCHEMA: &str = "etch-fingerprint/2";
const UNKNOWN_TEMPLATE_VERSION: &str = "unknown";
const UNRESOLVED_BOARD: &str = "unresolved";

#[derive(Serialize)]
struct FingerprintInput<'a> {
    schema: &'static str,
    id: &'a str,
    board: &'a str,
    template: &'a str,
    template_version: &'a str,
    board_digest: &'a str,
    params: &'a [(String, String)],
    dependencies: Vec<(&'a str, &'a str)>,
}

/// SHA-256 of the board metadata's canonical JSON
pub fn board_digest(metadata: &BoardMetadata) -> String {
    // Vec and BTreeMap fields serialize in a fixed order.
    let canonical = serde_json::to_vec(metadata).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// Fingerprint of one spec given its board digest and its dependencies'
/// `(id, fingerprint)` pairs
pub fn compute_fingerprint(
    spec: &KernelSpec,
    template_version: &str,
    board_digest: &str,
    dependencies: &[(String, String)],
) -> String {
    let mut deps: Vec<(&str, &str)> = dependencies
        .iter()
        .map(|(id, fp)| (id.as_str(), fp.as_str()))
        .collect();
    deps.sort();

    let input = FingerprintInput {
        schema: SCHEMA,
        id: &spec.id,
        board: &spec.board,
        template: &spec.template,
        template_version,
        board_digest,
        params: &spec.params,
        dependencies: deps,
    };

    // Serializing plain strings and tuples cannot fail.
    let canonical = serde_json::to_vec(&input).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// Fingerprints for every node, indexed like the graph's specs
///
/// `boards` maps a board id to its [`board_digest`]; boards without metadata
/// hash as unresolved.
pub fn fingerprint_graph(
    graph: &DependencyGraph,
    generator: &dyn SourceGenerator,
    boards: &HashMap<String, String>,
) -> Vec<String> {
    let mut fingerprints = vec![String::new(); graph.len()];

    for &node in graph.topological_order() {
        let spec = graph.spec(node);
        let version = generator
            .template_version(&spec.template)
            .unwrap_or_else(|| UNKNOWN_TEMPLATE_VERSION.to_string());
        let board = boards
            .get(&spec.board)
            .map(String::as_str)
            .unwrap_or(UNRESOLVED_BOARD);
        let deps: Vec<(String, String)> = graph
            .dependencies(node)
            .iter()
            .map(|&d| (graph.spec(d).id.clone(), fingerprints[d].clone()))
            .collect();
        fingerprints[node] = compute_fingerprint(spec, &version, board, &deps);
    }

    fingerprints
}
