//! Flat canvas projection consumed by the diagram renderer
//!
//! The renderer only knows a single-level list of nodes with explicit
//! parent references and a single list of edges. Each record carries an
//! opaque payload so it can be turned back into its hierarchical form.

use serde::{Deserialize, Serialize};

use crate::types::{EdgeId, NodeId, Position, Size, WorkflowNode};

/// Containment constraint for nested canvas nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extent {
    /// Must render fully inside the parent's bounds
    Parent,
}

/// A node as the renderer sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Relative to the parent when `parent_id` is set
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<Extent>,
    /// Size measured by the renderer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured: Option<Size>,
    /// The hierarchical node, with nested contents stripped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<WorkflowNode>,
}

impl CanvasNode {
    /// Canvas-only node with no workflow payload
    pub fn bare(id: impl Into<String>, node_type: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position,
            parent_id: None,
            extent: None,
            measured: None,
            data: None,
        }
    }

    /// Best known size: measured by the canvas, else stored on the payload
    pub fn known_size(&self) -> Option<Size> {
        self.measured
            .or_else(|| self.data.as_ref().and_then(|d| d.size))
    }

    pub fn is_group(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.is_group())
    }
}

/// Edge annotation carried through the renderer untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasEdgeData {
    /// Kind marker: "data" or "control"
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// An edge as the renderer sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<CanvasEdgeData>,
}

impl CanvasEdge {
    /// Kind marker, if annotated
    pub fn kind_marker(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.kind.as_str())
    }
}

/// The whole flat projection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatGraph {
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
}

impl FlatGraph {
    pub fn new(nodes: Vec<CanvasNode>, edges: Vec<CanvasEdge>) -> Self {
        Self { nodes, edges }
    }

    pub fn find_node(&self, id: &str) -> Option<&CanvasNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_edge(&self, id: &str) -> Option<&CanvasEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Position of a node in canvas coordinates (parent offsets summed)
    ///
    /// `None` when the node or one of its ancestors is missing, or when the
    /// parent chain loops.
    pub fn absolute_position(&self, id: &str) -> Option<Position> {
        let mut node = self.find_node(id)?;
        let mut position = node.position;
        let mut depth = 0;
        while let Some(parent_id) = &node.parent_id {
            depth += 1;
            if depth > self.nodes.len() {
                log::warn!("Parent cycle above canvas node '{}'", id);
                return None;
            }
            node = self.find_node(parent_id)?;
            position = position + node.position;
        }
        Some(position)
    }

    /// Ids of a node's descendants, in projection order
    pub fn descendants_of(&self, id: &str) -> Vec<NodeId> {
        let mut found: Vec<NodeId> = Vec::new();
        // Pre-order projection: parents always precede their children
        for node in &self.nodes {
            if let Some(parent) = &node.parent_id {
                if parent == id || found.contains(parent) {
                    found.push(node.id.clone());
                }
            }
        }
        found
    }
}
