//! Fluent builder for hierarchical workflow graphs
//!
//! Provides a fluent API for constructing nested graphs programmatically.
//! Nodes and edges are added to the innermost open group.

use crate::types::{Subgraph, WorkflowEdge, WorkflowGraph, WorkflowNode};

/// Fluent builder for constructing workflow graphs
///
/// # Example
///
/// ```
/// use graph_sync::builder::WorkflowBuilder;
///
/// let graph = WorkflowBuilder::new("wf-1", "My Workflow")
///     .add_node("input-1", "text-input", (0.0, 0.0))
///     .with_data(serde_json::json!({"text": "Hello"}))
///     .begin_group("g", "group", (200.0, 0.0))
///     .add_node("inner", "text-output", (10.0, 10.0))
///     .end_group()
///     .add_control_edge("input-1", "g")
///     .build();
///
/// assert_eq!(graph.node_count(), 3);
/// ```
pub struct WorkflowBuilder {
    id: String,
    name: String,
    /// Open scopes: the root first, then each unfinished group
    scopes: Vec<(Option<WorkflowNode>, Subgraph)>,
    edge_counter: usize,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scopes: vec![(None, Subgraph::default())],
            edge_counter: 0,
        }
    }

    fn current(&mut self) -> &mut Subgraph {
        if self.scopes.is_empty() {
            self.scopes.push((None, Subgraph::default()));
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last].1
    }

    /// Add a node to the innermost open scope
    pub fn add_node(mut self, id: impl Into<String>, node_type: impl Into<String>, position: (f64, f64)) -> Self {
        let node = WorkflowNode::new(id, node_type).at(position.0, position.1);
        self.current().nodes.push(node);
        self
    }

    /// Set data on the most recently added node
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        if let Some(node) = self.current().nodes.last_mut() {
            node.data = data;
        }
        self
    }

    /// Open a group; following nodes and edges go inside it
    pub fn begin_group(mut self, id: impl Into<String>, node_type: impl Into<String>, position: (f64, f64)) -> Self {
        let group = WorkflowNode::new(id, node_type).at(position.0, position.1);
        self.scopes.push((Some(group), Subgraph::default()));
        self
    }

    /// Close the innermost group
    ///
    /// Does nothing when no group is open.
    pub fn end_group(mut self) -> Self {
        self.close_group();
        self
    }

    fn close_group(&mut self) -> bool {
        if self.scopes.len() < 2 {
            return false;
        }
        if let Some((Some(mut group), body)) = self.scopes.pop() {
            group.subgraph = Some(body);
            self.current().nodes.push(group);
        }
        true
    }

    /// Add a data edge (auto-generates edge ID)
    pub fn add_edge(
        mut self,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        self.edge_counter += 1;
        let edge = WorkflowEdge::data(source, source_port, target, target_port)
            .with_id(format!("edge-{}", self.edge_counter));
        self.current().edges.push(edge);
        self
    }

    /// Add a control edge (auto-generates edge ID)
    pub fn add_control_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edge_counter += 1;
        let edge = WorkflowEdge::control(source, target).with_id(format!("edge-{}", self.edge_counter));
        self.current().edges.push(edge);
        self
    }

    /// Add a prepared edge as-is
    pub fn add_edge_value(mut self, edge: WorkflowEdge) -> Self {
        self.current().edges.push(edge);
        self
    }

    /// Build the graph without validation, closing any open groups
    pub fn build(mut self) -> WorkflowGraph {
        while self.close_group() {}
        let mut graph = WorkflowGraph::new(self.id, self.name);
        if let Some((_, root)) = self.scopes.pop() {
            graph.root = root;
        }
        graph
    }
}
