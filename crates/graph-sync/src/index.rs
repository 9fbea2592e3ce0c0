//! Flat id → node arena over the whole hierarchy
//!
//! Node ids share one namespace across every nested group. The index is
//! built in one pre-order pass and gives constant-time lookup of a node,
//! its parent group, and the scope that owns it.

use std::collections::HashMap;

use crate::error::{GraphSyncError, Result};
use crate::types::{NodeId, ScopePath, Subgraph, WorkflowGraph, WorkflowNode};

/// One node's location in the hierarchy
#[derive(Debug, Clone)]
pub struct IndexedNode<'a> {
    pub node: &'a WorkflowNode,
    /// Groups leading from the root to the scope that owns this node
    pub scope: ScopePath,
}

impl<'a> IndexedNode<'a> {
    /// Id of the immediate parent group, if nested
    pub fn parent_id(&self) -> Option<&str> {
        self.scope.last().map(|s| s.as_str())
    }

    pub fn depth(&self) -> usize {
        self.scope.len()
    }
}

/// Borrowed arena of every node in a graph
#[derive(Debug, Clone, Default)]
pub struct NodeIndex<'a> {
    nodes: HashMap<&'a str, IndexedNode<'a>>,
    order: Vec<&'a str>,
}

impl<'a> NodeIndex<'a> {
    /// Index a whole graph, failing on duplicate node ids
    pub fn build(graph: &'a WorkflowGraph) -> Result<Self> {
        Self::from_scope(&graph.root)
    }

    /// Index a scope and everything nested in it
    pub fn from_scope(scope: &'a Subgraph) -> Result<Self> {
        let mut index = Self::default();
        let mut path = Vec::new();
        index.visit(scope, &mut path)?;
        Ok(index)
    }

    fn visit(&mut self, scope: &'a Subgraph, path: &mut ScopePath) -> Result<()> {
        for node in &scope.nodes {
            if self.nodes.contains_key(node.id.as_str()) {
                return Err(GraphSyncError::DuplicateNodeId(node.id.clone()));
            }
            self.nodes.insert(
                node.id.as_str(),
                IndexedNode {
                    node,
                    scope: path.clone(),
                },
            );
            self.order.push(node.id.as_str());

            if let Some(sub) = &node.subgraph {
                path.push(node.id.clone());
                self.visit(sub, path)?;
                path.pop();
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&IndexedNode<'a>> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: &str) -> Option<&'a WorkflowNode> {
        self.nodes.get(id).map(|n| n.node)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Scope that owns a node
    pub fn scope_of(&self, id: &str) -> Option<&ScopePath> {
        self.nodes.get(id).map(|n| &n.scope)
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).and_then(|n| n.parent_id())
    }

    /// Whether `ancestor` is `id` itself or one of its enclosing groups
    pub fn is_within(&self, id: &str, ancestor: &str) -> bool {
        id == ancestor
            || self
                .scope_of(id)
                .is_some_and(|scope| scope.iter().any(|g| g == ancestor))
    }

    /// Node ids in pre-order
    pub fn ids(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every id in the index, owned
    pub fn id_set(&self) -> std::collections::HashSet<NodeId> {
        self.order.iter().map(|id| id.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkflowNode;

    fn nested_graph() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("wf", "Nested");
        graph.root.nodes.push(WorkflowNode::new("a", "t"));
        graph.root.nodes.push(WorkflowNode::group(
            "g1",
            "group",
            vec![
                WorkflowNode::new("b", "t"),
                WorkflowNode::group("g2", "group", vec![WorkflowNode::new("c", "t")], vec![]),
            ],
            vec![],
        ));
        graph
    }

    #[test]
    fn test_index_records_scopes() {
        let graph = nested_graph();
        let index = NodeIndex::build(&graph).unwrap();

        assert_eq!(index.len(), 5);
        assert_eq!(index.ids().collect::<Vec<_>>(), vec!["a", "g1", "b", "g2", "c"]);
        assert!(index.scope_of("a").unwrap().is_empty());
        assert_eq!(index.parent_of("b"), Some("g1"));
        assert_eq!(index.scope_of("c").unwrap(), &vec!["g1".to_string(), "g2".to_string()]);
        assert_eq!(index.get("c").unwrap().depth(), 2);
        assert_eq!(index.node("c").unwrap().node_type, "t");
    }

    #[test]
    fn test_duplicate_id_across_scopes_rejected() {
        let mut graph = nested_graph();
        graph.scope_mut(&["g1".to_string()]).unwrap().nodes.push(WorkflowNode::new("a", "t"));

        let err = NodeIndex::build(&graph).unwrap_err();
        assert!(matches!(err, GraphSyncError::DuplicateNodeId(id) if id == "a"));
    }

    #[test]
    fn test_is_within() {
        let graph = nested_graph();
        let index = NodeIndex::build(&graph).unwrap();

        assert!(index.is_within("c", "g1"));
        assert!(index.is_within("c", "g2"));
        assert!(index.is_within("g1", "g1"));
        assert!(!index.is_within("a", "g1"));
        assert!(!index.is_within("missing", "g1"));
    }
}
