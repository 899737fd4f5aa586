use std::collections::HashSet;

use serde::Serialize;

use crate::types::WorkflowDocument;

/// Outcome of checking a candidate document before it leaves the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Check structural soundness. Every violation is collected; nothing
/// short-circuits.
pub fn validate(doc: &WorkflowDocument) -> ValidationReport {
    let mut errors = Vec::new();

    if doc.id.is_empty() {
        errors.push("workflow_id is required and must be a non-empty string".to_string());
    }

    if doc.name.is_empty() {
        errors.push("name is required and must be a non-empty string".to_string());
    }

    if doc.nodes.is_empty() {
        errors.push("workflow must have at least one node".to_string());
    }

    for (index, node) in doc.nodes.iter().enumerate() {
        if node.id.is_empty() {
            errors.push(format!("Node at index {} must have an id", index));
        }
        if node.agent_type.is_empty() {
            errors.push(format!("Node at index {} must have an agent_type", index));
        }
        if !node.position.is_finite() {
            errors.push(format!(
                "Node at index {} must have valid position coordinates",
                index
            ));
        }
    }

    for (index, conn) in doc.connections.iter().enumerate() {
        if conn.source_id.is_empty() {
            errors.push(format!("Connection at index {} must have a source_id", index));
        }
        if conn.target_id.is_empty() {
            errors.push(format!("Connection at index {} must have a target_id", index));
        }
    }

    ValidationReport::from_errors(errors)
}

/// Connections whose endpoints are not nodes of the document.
///
/// Advisory only: `validate` does not include these, so documents the
/// backend has always accepted keep being accepted.
pub fn dangling_connections(doc: &WorkflowDocument) -> Vec<String> {
    let ids: HashSet<&str> = doc.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut problems = Vec::new();
    for (index, conn) in doc.connections.iter().enumerate() {
        if !conn.source_id.is_empty() && !ids.contains(conn.source_id.as_str()) {
            problems.push(format!(
                "Connection at index {} references unknown source node {}",
                index, conn.source_id
            ));
        }
        if !conn.target_id.is_empty() && !ids.contains(conn.target_id.as_str()) {
            problems.push(format!(
                "Connection at index {} references unknown target node {}",
                index, conn.target_id
            ));
        }
    }
    problems
}

/// Node ids that occur more than once, in order of first repetition.
///
/// Not part of `validate`; the graph model refuses to load such a
/// document because it cannot tell the nodes apart.
pub fn duplicate_node_ids(doc: &WorkflowDocument) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for node in &doc.nodes {
        if !seen.insert(node.id.as_str()) && !duplicates.contains(&node.id) {
            duplicates.push(node.id.clone());
        }
    }
    duplicates
}
