//! Flat → hierarchical reconstruction
//!
//! Canvas records carry the hierarchical state as an opaque payload;
//! reconstruction reads it back and never guesses. A record without a
//! payload is a producer bug and is reported as such.

use std::collections::{HashMap, HashSet};

use crate::canvas::{CanvasEdge, CanvasNode, FlatGraph};
use crate::error::{GraphSyncError, Result};
use crate::types::{EdgeKind, NodeId, Subgraph, WorkflowEdge, WorkflowGraph, WorkflowNode};

/// Hierarchical node carried by a canvas node
///
/// The canvas owns position and size, so those are taken from the canvas
/// record rather than from the payload.
pub fn reconstruct_node(flat: &CanvasNode) -> Result<WorkflowNode> {
    let payload = flat
        .data
        .as_ref()
        .ok_or_else(|| GraphSyncError::MissingPayload(flat.id.clone()))?;

    let mut node = payload.clone();
    node.id = flat.id.clone();
    node.position = flat.position;
    if let Some(measured) = flat.measured {
        node.size = Some(measured);
    }
    Ok(node)
}

/// Typed edge carried by a canvas edge
pub fn reconstruct_edge(flat: &CanvasEdge) -> Result<WorkflowEdge> {
    let data = flat
        .data
        .as_ref()
        .ok_or_else(|| GraphSyncError::MissingEdgeData(flat.id.clone()))?;

    match EdgeKind::from_marker(&data.kind) {
        Some(EdgeKind::Data) => {
            if flat.source_handle.is_none() && flat.target_handle.is_none() {
                return Err(GraphSyncError::DataEdgeWithoutPorts(flat.id.clone()));
            }
            Ok(WorkflowEdge {
                id: flat.id.clone(),
                from: flat.source.clone(),
                to: flat.target.clone(),
                from_property: flat.source_handle.clone(),
                to_property: flat.target_handle.clone(),
                condition: None,
                weight: data.weight,
                mode: data.mode.clone(),
            })
        }
        Some(EdgeKind::Control) => Ok(WorkflowEdge {
            condition: data.condition.clone(),
            ..WorkflowEdge::control(flat.source.clone(), flat.target.clone()).with_id(flat.id.clone())
        }),
        None => Err(GraphSyncError::UnknownEdgeKind {
            edge_id: flat.id.clone(),
            kind: data.kind.clone(),
        }),
    }
}

/// Reconstruct flat lists of hierarchical nodes and edges
pub fn reconstruct(flat_nodes: &[CanvasNode], flat_edges: &[CanvasEdge]) -> Result<(Vec<WorkflowNode>, Vec<WorkflowEdge>)> {
    let nodes = flat_nodes.iter().map(reconstruct_node).collect::<Result<Vec<_>>>()?;
    let edges = flat_edges.iter().map(reconstruct_edge).collect::<Result<Vec<_>>>()?;
    Ok((nodes, edges))
}

/// Rebuild the full hierarchy from a flat projection
///
/// Children are attached to their parent group in projection order, and
/// each edge goes to the scope both of its endpoints share.
pub fn reconstruct_graph(id: impl Into<String>, name: impl Into<String>, flat: &FlatGraph) -> Result<WorkflowGraph> {
    let (nodes, edges) = reconstruct(&flat.nodes, &flat.edges)?;

    let mut parent_of: HashMap<NodeId, Option<NodeId>> = HashMap::with_capacity(flat.nodes.len());
    for node in &flat.nodes {
        if parent_of.insert(node.id.clone(), node.parent_id.clone()).is_some() {
            return Err(GraphSyncError::DuplicateNodeId(node.id.clone()));
        }
    }
    for node in &flat.nodes {
        if let Some(parent) = &node.parent_id {
            if !parent_of.contains_key(parent) {
                return Err(GraphSyncError::UnknownParent {
                    node_id: node.id.clone(),
                    parent_id: parent.clone(),
                });
            }
        }
    }

    // Bucket children and edges by owning scope (None = root)
    let mut children: HashMap<Option<NodeId>, Vec<WorkflowNode>> = HashMap::new();
    for (node, canvas) in nodes.into_iter().zip(&flat.nodes) {
        children.entry(canvas.parent_id.clone()).or_default().push(node);
    }

    let mut scoped_edges: HashMap<Option<NodeId>, Vec<WorkflowEdge>> = HashMap::new();
    for edge in edges {
        let source_scope = parent_of.get(&edge.from);
        let target_scope = parent_of.get(&edge.to);
        match (source_scope, target_scope) {
            (Some(a), Some(b)) if a == b => {
                scoped_edges.entry(a.clone()).or_default().push(edge);
            }
            (Some(_), Some(_)) => {
                return Err(GraphSyncError::CrossScopeEdge {
                    edge_id: edge.id,
                    source_node: edge.from,
                    target_node: edge.to,
                });
            }
            // Dangling edges stay at the root; the next flatten prunes them
            _ => scoped_edges.entry(None).or_default().push(edge),
        }
    }

    let mut graph = WorkflowGraph::new(id, name);
    graph.root = Subgraph::new(
        children.remove(&None).unwrap_or_default(),
        scoped_edges.remove(&None).unwrap_or_default(),
    );

    // Attach bottom-up: deepest groups first so each group is complete
    // before it moves into its own parent's list.
    let mut pending: Vec<(usize, NodeId)> = flat
        .nodes
        .iter()
        .filter(|n| n.is_group() || children.contains_key(&Some(n.id.clone())))
        .map(|n| Ok((depth_of(&n.id, &parent_of)?, n.id.clone())))
        .collect::<Result<_>>()?;
    pending.sort_by(|a, b| b.0.cmp(&a.0));

    let mut finished: HashMap<NodeId, Subgraph> = HashMap::new();
    for (_, group_id) in pending {
        let key = Some(group_id.clone());
        let mut kids = children.remove(&key).unwrap_or_default();
        for kid in kids.iter_mut() {
            if let Some(sub) = finished.remove(&kid.id) {
                kid.subgraph = Some(sub);
            }
        }
        let edges = scoped_edges.remove(&key).unwrap_or_default();
        finished.insert(group_id, Subgraph::new(kids, edges));
    }

    for node in graph.root.nodes.iter_mut() {
        if let Some(sub) = finished.remove(&node.id) {
            node.subgraph = Some(sub);
        }
    }

    ensure_attached(&graph, &flat.nodes)?;
    Ok(graph)
}

/// Fail unless every canvas node made it into the rebuilt hierarchy
fn ensure_attached(graph: &WorkflowGraph, flat_nodes: &[CanvasNode]) -> Result<()> {
    if graph.node_count() == flat_nodes.len() {
        return Ok(());
    }
    let mut attached = HashSet::new();
    graph.walk(&mut |n| {
        attached.insert(n.id.as_str());
    });
    let detached: Vec<NodeId> = flat_nodes
        .iter()
        .filter(|n| !attached.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    Err(GraphSyncError::NodesDetached(detached))
}

/// Number of ancestors of `id`; fails when the parent chain loops
fn depth_of(id: &str, parent_of: &HashMap<NodeId, Option<NodeId>>) -> Result<usize> {
    let mut depth = 0;
    let mut current = parent_of.get(id).cloned().flatten();
    while let Some(parent) = current {
        depth += 1;
        if depth > parent_of.len() {
            return Err(GraphSyncError::ParentCycle(id.to_string()));
        }
        current = parent_of.get(&parent).cloned().flatten();
    }
    Ok(depth)
}
