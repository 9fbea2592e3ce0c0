//! Core types for hierarchical workflow graphs
//!
//! These types define the authoritative (hierarchical) representation:
//! nodes that may own a nested subgraph, edges scoped to the subgraph that
//! owns them, and the port data types used to validate connections.

use serde::{Deserialize, Serialize};

/// Unique identifier for a node (global across all nested groups)
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Unique identifier for a port on a node
pub type PortId = String;

/// Scope path: ids of the groups leading from the root to a subgraph.
/// The root scope is the empty path.
pub type ScopePath = Vec<NodeId>;

/// Generate a fresh edge id
pub fn new_edge_id() -> EdgeId {
    format!("edge-{}", uuid::Uuid::new_v4())
}

/// The data type of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDataType {
    /// Accepts any type
    Any,
    /// Text string
    String,
    /// Numeric value
    Number,
    /// Boolean value
    Boolean,
    /// JSON object
    Json,
    /// Prompt text (special string for LLM input)
    Prompt,
    /// Image data
    Image,
    /// Audio data
    Audio,
    /// Streaming data
    Stream,
    /// Document/text chunk
    Document,
    /// Embedding vector
    Embedding,
    /// Execution trigger (control flow only)
    Trigger,
}

impl PortDataType {
    /// Check if this type can connect to another type
    pub fn is_compatible_with(&self, other: &PortDataType) -> bool {
        if matches!(self, PortDataType::Any) || matches!(other, PortDataType::Any) {
            return true;
        }

        // Prompt and String are interchangeable
        if matches!(
            (self, other),
            (PortDataType::Prompt, PortDataType::String) | (PortDataType::String, PortDataType::Prompt)
        ) {
            return true;
        }

        self == other
    }
}

/// Position on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Rendered size of a node, as last measured by the canvas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Derived classification of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Carries a value from one port to another
    Data,
    /// Sequences execution, optionally guarded by a condition
    Control,
}

impl EdgeKind {
    /// Marker string carried by canvas edges
    pub fn as_marker(&self) -> &'static str {
        match self {
            EdgeKind::Data => "data",
            EdgeKind::Control => "control",
        }
    }

    /// Parse a canvas marker string
    pub fn from_marker(marker: &str) -> Option<EdgeKind> {
        match marker {
            "data" => Some(EdgeKind::Data),
            "control" => Some(EdgeKind::Control),
            _ => None,
        }
    }
}

/// An edge between two nodes of the same scope
///
/// Whether an edge is a data edge or a control edge is never stored; it is
/// derived from the presence of `from_property` / `to_property`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    /// Unique identifier for this edge (generated on load when empty)
    #[serde(default)]
    pub id: EdgeId,
    /// Source node ID
    pub from: NodeId,
    /// Target node ID
    pub to: NodeId,
    /// Source port (data edges only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_property: Option<PortId>,
    /// Target port (data edges only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_property: Option<PortId>,
    /// Guard expression (control edges only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Merge weight (data edges only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Merge mode (data edges only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl WorkflowEdge {
    /// Create a data edge between two ports
    pub fn data(
        from: impl Into<String>,
        from_property: impl Into<String>,
        to: impl Into<String>,
        to_property: impl Into<String>,
    ) -> Self {
        Self {
            id: new_edge_id(),
            from: from.into(),
            to: to.into(),
            from_property: Some(from_property.into()),
            to_property: Some(to_property.into()),
            condition: None,
            weight: None,
            mode: None,
        }
    }

    /// Create a control edge between two nodes
    pub fn control(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: new_edge_id(),
            from: from.into(),
            to: to.into(),
            from_property: None,
            to_property: None,
            condition: None,
            weight: None,
            mode: None,
        }
    }

    /// Replace the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Guard a control edge with a condition
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Set the merge weight of a data edge
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set the merge mode of a data edge
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Derived kind: any port mapping makes this a data edge
    pub fn kind(&self) -> EdgeKind {
        if self.from_property.is_some() || self.to_property.is_some() {
            EdgeKind::Data
        } else {
            EdgeKind::Control
        }
    }

    /// Identity used by the duplicate check
    pub fn connection_key(&self) -> (&str, &str, Option<&str>, Option<&str>) {
        (
            self.from.as_str(),
            self.to.as_str(),
            self.from_property.as_deref(),
            self.to_property.as_deref(),
        )
    }

    /// Check if this edge touches a node
    pub fn involves_node(&self, node_id: &str) -> bool {
        self.from == node_id || self.to == node_id
    }
}

/// A nested node/edge list: the root of a graph or the body of a group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subgraph {
    /// Nodes in this scope, in authoring order
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    /// Edges private to this scope
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl Subgraph {
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self { nodes, edges }
    }

    /// Find a direct child node by ID
    pub fn find_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a direct child node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Check if this scope directly contains a node
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |e| e.to == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Check whether an input port has an incoming edge in this scope
    pub fn is_input_connected(&self, node_id: &str, property: &str) -> bool {
        self.incoming_edges(node_id)
            .any(|e| e.to_property.as_deref() == Some(property))
    }

    /// Check whether an output port has an outgoing edge in this scope
    pub fn is_output_connected(&self, node_id: &str, property: &str) -> bool {
        self.outgoing_edges(node_id)
            .any(|e| e.from_property.as_deref() == Some(property))
    }
}

/// A node instance in the hierarchical graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    /// Unique identifier (global across the whole hierarchy)
    pub id: NodeId,
    /// Node type (references a registered descriptor)
    #[serde(rename = "type")]
    pub node_type: String,
    /// Position; relative to the parent group for nested nodes
    #[serde(default)]
    pub position: Position,
    /// Custom data/configuration for this instance
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    /// Last size reported by the canvas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    /// Nested nodes and private edges; present only on groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgraph: Option<Subgraph>,
}

impl WorkflowNode {
    /// Create a plain node at the origin
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position: Position::default(),
            data: serde_json::Value::Null,
            size: None,
            subgraph: None,
        }
    }

    /// Create a group node owning the given children and private edges
    pub fn group(
        id: impl Into<String>,
        node_type: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        edges: Vec<WorkflowEdge>,
    ) -> Self {
        Self {
            subgraph: Some(Subgraph::new(nodes, edges)),
            ..Self::new(id, node_type)
        }
    }

    /// Set the position
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    /// Set instance data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Set the last measured size
    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.size = Some(Size::new(width, height));
        self
    }

    /// Whether this node owns a nested subgraph
    pub fn is_group(&self) -> bool {
        self.subgraph.is_some()
    }

    /// Copy of this node with nested contents removed (group flag kept)
    pub fn shallow(&self) -> WorkflowNode {
        WorkflowNode {
            subgraph: self.subgraph.as_ref().map(|_| Subgraph::default()),
            ..self.clone()
        }
    }

    /// Visit this node and every descendant, pre-order
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a WorkflowNode)) {
        visit(self);
        if let Some(sub) = &self.subgraph {
            for child in &sub.nodes {
                child.walk(visit);
            }
        }
    }
}

/// A complete workflow graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// Unique identifier for this graph
    #[serde(default)]
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Top-level nodes and edges
    #[serde(flatten)]
    pub root: Subgraph,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            root: Subgraph::default(),
        }
    }

    /// Resolve a scope by path
    pub fn scope(&self, path: &[NodeId]) -> Option<&Subgraph> {
        let mut scope = &self.root;
        for group_id in path {
            scope = scope.find_node(group_id)?.subgraph.as_ref()?;
        }
        Some(scope)
    }

    /// Resolve a scope by path (mutable)
    pub fn scope_mut(&mut self, path: &[NodeId]) -> Option<&mut Subgraph> {
        let mut scope = &mut self.root;
        for group_id in path {
            scope = scope.find_node_mut(group_id)?.subgraph.as_mut()?;
        }
        Some(scope)
    }

    /// Visit every node in the hierarchy, pre-order
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a WorkflowNode)) {
        for node in &self.root.nodes {
            node.walk(visit);
        }
    }

    /// Total node count across all scopes
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    /// Total edge count across all scopes
    pub fn edge_count(&self) -> usize {
        fn count(scope: &Subgraph) -> usize {
            scope.edges.len()
                + scope
                    .nodes
                    .iter()
                    .filter_map(|n| n.subgraph.as_ref())
                    .map(count)
                    .sum::<usize>()
        }
        count(&self.root)
    }

    /// Give every edge without an id a fresh one
    ///
    /// Returns the number of ids generated.
    pub fn assign_missing_edge_ids(&mut self) -> usize {
        fn assign(scope: &mut Subgraph) -> usize {
            let mut generated = 0;
            for edge in scope.edges.iter_mut().filter(|e| e.id.is_empty()) {
                edge.id = new_edge_id();
                generated += 1;
            }
            for node in scope.nodes.iter_mut() {
                if let Some(sub) = node.subgraph.as_mut() {
                    generated += assign(sub);
                }
            }
            generated
        }
        assign(&mut self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_data_type_compatibility() {
        assert!(PortDataType::Any.is_compatible_with(&PortDataType::String));
        assert!(PortDataType::String.is_compatible_with(&PortDataType::Any));
        assert!(PortDataType::Prompt.is_compatible_with(&PortDataType::String));
        assert!(PortDataType::String.is_compatible_with(&PortDataType::Prompt));
        assert!(!PortDataType::Number.is_compatible_with(&PortDataType::String));
    }

    #[test]
    fn test_edge_kind_is_derived_from_properties() {
        let data = WorkflowEdge::data("a", "out", "b", "in");
        assert_eq!(data.kind(), EdgeKind::Data);

        let control = WorkflowEdge::control("a", "b");
        assert_eq!(control.kind(), EdgeKind::Control);

        let mut half = WorkflowEdge::control("a", "b");
        half.to_property = Some("in".to_string());
        assert_eq!(half.kind(), EdgeKind::Data);
    }

    #[test]
    fn test_edge_kind_markers() {
        assert_eq!(EdgeKind::from_marker("data"), Some(EdgeKind::Data));
        assert_eq!(EdgeKind::from_marker("control"), Some(EdgeKind::Control));
        assert_eq!(EdgeKind::from_marker("Data"), None);
        assert_eq!(EdgeKind::Control.as_marker(), "control");
    }

    #[test]
    fn test_deserialize_defaults() {
        let graph: WorkflowGraph = serde_json::from_value(serde_json::json!({
            "id": "wf",
            "nodes": [
                {"id": "a", "type": "text-input"},
                {"id": "g", "type": "group", "subgraph": {
                    "nodes": [{"id": "c", "type": "text-output", "position": {"x": 5.0, "y": 6.0}}]
                }}
            ],
            "edges": [{"from": "a", "to": "g", "toProperty": "text"}]
        }))
        .unwrap();

        assert_eq!(graph.root.nodes[0].position, Position::default());
        assert!(graph.root.nodes[1].is_group());
        assert!(graph.root.edges[0].id.is_empty());
        assert_eq!(graph.root.edges[0].kind(), EdgeKind::Data);
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_assign_missing_edge_ids_reaches_nested_scopes() {
        let mut inner = WorkflowEdge::control("c", "d");
        inner.id.clear();
        let mut outer = WorkflowEdge::control("a", "b");
        outer.id.clear();

        let mut graph = WorkflowGraph::new("wf", "Test");
        graph.root.nodes.push(WorkflowNode::new("a", "t"));
        graph.root.nodes.push(WorkflowNode::new("b", "t"));
        graph.root.nodes.push(WorkflowNode::group(
            "g",
            "group",
            vec![WorkflowNode::new("c", "t"), WorkflowNode::new("d", "t")],
            vec![inner, WorkflowEdge::control("d", "c").with_id("kept")],
        ));
        graph.root.edges.push(outer);

        assert_eq!(graph.assign_missing_edge_ids(), 2);
        assert!(!graph.root.edges[0].id.is_empty());
        let group = graph.scope(&["g".to_string()]).unwrap();
        assert!(group.edges[0].id.starts_with("edge-"));
        assert_eq!(group.edges[1].id, "kept");
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_scope_resolution() {
        let mut graph = WorkflowGraph::new("wf", "Test");
        graph.root.nodes.push(WorkflowNode::group(
            "g1",
            "group",
            vec![WorkflowNode::group("g2", "group", vec![WorkflowNode::new("x", "t")], vec![])],
            vec![],
        ));

        let path = vec!["g1".to_string(), "g2".to_string()];
        assert!(graph.scope(&path).unwrap().contains_node("x"));
        assert!(graph.scope(&["missing".to_string()]).is_none());

        graph.scope_mut(&path).unwrap().nodes.push(WorkflowNode::new("y", "t"));
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_shallow_keeps_group_flag() {
        let group = WorkflowNode::group("g", "group", vec![WorkflowNode::new("c", "t")], vec![]);
        let shallow = group.shallow();
        assert!(shallow.is_group());
        assert!(shallow.subgraph.unwrap().nodes.is_empty());
    }
}
