//! Hierarchical → flat projection
//!
//! Nodes are emitted pre-order so every group precedes its contents; the
//! renderer requires a container to exist before anything is placed in it.
//!
//! Edges are flattened in two explicit passes:
//!
//! 1. Collect every edge from the top-level list and from each group's
//!    private list, remembering the owning scope and the edge's position in
//!    that scope's list.
//! 2. Validate the whole collection against the whole node set, then remove
//!    each rejected edge from the scope it came from.
//!
//! Removal uses the recorded (scope, position) pair, so the hierarchical
//! graph never keeps an edge that the projection dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasEdge, CanvasEdgeData, CanvasNode, Extent, FlatGraph};
use crate::error::{GraphSyncError, Result};
use crate::index::NodeIndex;
use crate::types::{ScopePath, Subgraph, WorkflowEdge, WorkflowGraph, WorkflowNode};
use crate::validation::EdgeValidator;

/// Canvas record for one hierarchical node
pub fn to_canvas_node(node: &WorkflowNode, parent_id: Option<&str>) -> CanvasNode {
    CanvasNode {
        id: node.id.clone(),
        node_type: node.node_type.clone(),
        position: node.position,
        parent_id: parent_id.map(str::to_string),
        extent: parent_id.map(|_| Extent::Parent),
        measured: node.size,
        data: Some(node.shallow()),
    }
}

/// Canvas record for one hierarchical edge
pub fn to_canvas_edge(edge: &WorkflowEdge) -> CanvasEdge {
    CanvasEdge {
        id: edge.id.clone(),
        source: edge.from.clone(),
        target: edge.to.clone(),
        source_handle: edge.from_property.clone(),
        target_handle: edge.to_property.clone(),
        data: Some(CanvasEdgeData {
            kind: edge.kind().as_marker().to_string(),
            condition: edge.condition.clone(),
            weight: edge.weight,
            mode: edge.mode.clone(),
        }),
    }
}

/// Flatten nodes pre-order, tagging descendants with their parent group
///
/// Uses an explicit stack, so nesting depth is limited only by memory.
pub fn flatten_nodes(root_nodes: &[WorkflowNode]) -> Vec<CanvasNode> {
    let mut flat = Vec::new();
    let mut stack: Vec<(Option<&str>, std::slice::Iter<'_, WorkflowNode>)> = vec![(None, root_nodes.iter())];

    loop {
        let Some((parent, siblings)) = stack.last_mut() else {
            break;
        };
        let parent = *parent;
        match siblings.next() {
            Some(node) => {
                flat.push(to_canvas_node(node, parent));
                if let Some(sub) = &node.subgraph {
                    stack.push((Some(node.id.as_str()), sub.nodes.iter()));
                }
            }
            None => {
                stack.pop();
            }
        }
    }

    flat
}

/// An edge found during collection, with where it lives
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedEdge {
    /// Scope whose edge list owns the edge
    pub scope: ScopePath,
    /// Index in that scope's edge list
    pub position: usize,
    pub edge: WorkflowEdge,
}

/// Pass 1: every edge in the hierarchy, top level first, then groups pre-order
pub fn collect_edges(graph: &WorkflowGraph) -> Vec<CollectedEdge> {
    let mut collected = Vec::new();
    let mut pending: Vec<(ScopePath, &Subgraph)> = vec![(Vec::new(), &graph.root)];

    while let Some((path, scope)) = pending.pop() {
        collected.extend(scope.edges.iter().enumerate().map(|(position, edge)| CollectedEdge {
            scope: path.clone(),
            position,
            edge: edge.clone(),
        }));

        // Reverse so the first group is visited next
        for node in scope.nodes.iter().rev() {
            if let Some(sub) = &node.subgraph {
                let mut child_path = path.clone();
                child_path.push(node.id.clone());
                pending.push((child_path, sub));
            }
        }
    }

    collected
}

/// An edge removed during flattening
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunedEdge {
    pub edge: WorkflowEdge,
    pub scope: ScopePath,
    pub errors: Vec<String>,
}

/// Summary of the edges flattening had to drop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub removed: Vec<PrunedEdge>,
}

impl PruneReport {
    pub fn count(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    pub fn edge_ids(&self) -> Vec<String> {
        self.removed.iter().map(|p| p.edge.id.clone()).collect()
    }
}

/// Remove edges from their owning scopes by recorded position
///
/// Every scope is resolved before anything is removed; if one cannot be
/// found nothing is touched and `UnresolvedScope` is returned.
pub fn remove_from_scopes(graph: &mut WorkflowGraph, rejected: &[(ScopePath, usize)]) -> Result<()> {
    let mut by_scope: BTreeMap<&ScopePath, Vec<usize>> = BTreeMap::new();
    for (scope, position) in rejected {
        by_scope.entry(scope).or_default().push(*position);
    }

    let unresolved = by_scope.iter().find(|(scope, positions)| {
        !graph
            .scope(scope)
            .is_some_and(|s| positions.iter().all(|p| *p < s.edges.len()))
    });
    if let Some((scope, _)) = unresolved {
        return Err(GraphSyncError::UnresolvedScope(scope.to_vec()));
    }

    for (scope, mut positions) in by_scope {
        // Highest first so earlier positions stay valid
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();
        if let Some(s) = graph.scope_mut(scope) {
            for position in positions {
                s.edges.remove(position);
            }
        }
    }
    Ok(())
}

/// Flatten all edges, pruning invalid ones from the hierarchy as well
///
/// An edge is rejected when either endpoint is not a node of its own scope,
/// or when the validator rejects it against the full node and edge sets.
pub fn flatten_edges(graph: &mut WorkflowGraph, validator: &EdgeValidator<'_>) -> Result<(Vec<CanvasEdge>, PruneReport)> {
    let collected = collect_edges(graph);

    let (valid, report, rejected) = {
        let index = NodeIndex::build(graph)?;

        let mut in_scope = Vec::with_capacity(collected.len());
        let mut report = PruneReport::default();
        let mut rejected: Vec<(ScopePath, usize)> = Vec::new();
        for item in &collected {
            let outside: Vec<String> = [&item.edge.from, &item.edge.to]
                .into_iter()
                .filter(|id| index.contains(id) && index.scope_of(id) != Some(&item.scope))
                .map(|id| format!("Node '{}' is not in the same group as the edge", id))
                .collect();
            if outside.is_empty() {
                in_scope.push(item);
            } else {
                rejected.push((item.scope.clone(), item.position));
                report.removed.push(PrunedEdge {
                    edge: item.edge.clone(),
                    scope: item.scope.clone(),
                    errors: outside,
                });
            }
        }

        let candidates: Vec<WorkflowEdge> = in_scope.iter().map(|c| c.edge.clone()).collect();
        let batch = validator.validate_edges_detailed(&candidates, &index);
        for invalid in batch.invalid_edges {
            let origin = in_scope[invalid.index];
            rejected.push((origin.scope.clone(), origin.position));
            report.removed.push(PrunedEdge {
                edge: invalid.edge,
                scope: origin.scope.clone(),
                errors: invalid.errors,
            });
        }

        (batch.valid_edges, report, rejected)
    };

    if !report.is_empty() {
        // Collection and removal run on the same graph, so this only fails on a bug
        remove_from_scopes(graph, &rejected)?;
        log::warn!(
            "Removed {} invalid edge(s) while flattening: {:?}",
            report.count(),
            report.edge_ids()
        );
    }

    Ok((valid.iter().map(to_canvas_edge).collect(), report))
}

/// Output of a full flatten pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flattened {
    pub flat: FlatGraph,
    pub report: PruneReport,
}

/// Flatten a whole graph, pruning invalid edges from the hierarchy
pub fn flatten(graph: &mut WorkflowGraph, validator: &EdgeValidator<'_>) -> Result<Flattened> {
    let (edges, report) = flatten_edges(graph, validator)?;
    let nodes = flatten_nodes(&graph.root.nodes);
    log::debug!(
        "Flattened graph '{}': {} nodes, {} edges",
        graph.id,
        nodes.len(),
        edges.len()
    );
    Ok(Flattened {
        flat: FlatGraph::new(nodes, edges),
        report,
    })
}
