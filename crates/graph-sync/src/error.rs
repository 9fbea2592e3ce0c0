//! Error types for the graph sync engine

use thiserror::Error;

/// Result type alias using GraphSyncError
pub type Result<T> = std::result::Result<T, GraphSyncError>;

/// Errors that can occur while synchronizing the workflow graph
///
/// Everything here is structural: it means a producer upstream handed the
/// engine something it cannot interpret. Rejected edges during bulk import
/// are not errors; they show up in a `ValidationResult` or a `PruneReport`.
#[derive(Debug, Error)]
pub enum GraphSyncError {
    /// Node type was never registered
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Canvas node was never annotated with its workflow node
    #[error("Canvas node '{0}' carries no workflow payload")]
    MissingPayload(String),

    /// Canvas edge was never annotated with its edge data
    #[error("Canvas edge '{0}' carries no edge data")]
    MissingEdgeData(String),

    /// Canvas edge carries a kind marker this engine does not understand
    #[error("Canvas edge '{edge_id}' has unknown kind '{kind}'")]
    UnknownEdgeKind { edge_id: String, kind: String },

    /// Canvas edge is marked as a data edge but maps no ports
    #[error("Canvas edge '{0}' is marked as a data edge but has no handles")]
    DataEdgeWithoutPorts(String),

    /// The same node id appears twice in the hierarchy
    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    /// The same edge id appears twice in the hierarchy
    #[error("Duplicate edge id: {0}")]
    DuplicateEdgeId(String),

    /// Node id does not resolve anywhere in the hierarchy
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Node exists but owns no subgraph
    #[error("Node '{0}' is not a group")]
    NotAGroup(String),

    /// An operation needed at least one node
    #[error("No nodes selected")]
    EmptySelection,

    /// Selected nodes do not share one scope
    #[error("Selected nodes live in different groups: {}", .0.join(", "))]
    MixedScopeSelection(Vec<String>),

    /// Grouping would fold distinct connections onto one group port
    #[error(
        "Grouping would merge the {} connections of {}",
        .port.as_deref().unwrap_or("control"),
        .nodes.join(", ")
    )]
    PortCollision { port: Option<String>, nodes: Vec<String> },

    /// Canvas nodes name each other as parents
    #[error("Canvas node '{0}' is its own ancestor")]
    ParentCycle(String),

    /// Canvas nodes could not be placed in the rebuilt hierarchy
    #[error("{} canvas node(s) could not be attached: {}", .0.len(), .0.join(", "))]
    NodesDetached(Vec<String>),

    /// Pruning could not find the scope an edge was collected from
    #[error("Edge scope not found: /{}", .0.join("/"))]
    UnresolvedScope(Vec<String>),

    /// Canvas node references a parent that is not in the projection
    #[error("Canvas node '{node_id}' references unknown parent '{parent_id}'")]
    UnknownParent { node_id: String, parent_id: String },

    /// Edge endpoints live in different scopes
    #[error("Edge '{edge_id}' crosses a group boundary ({source_node} -> {target_node})")]
    CrossScopeEdge {
        edge_id: String,
        source_node: String,
        target_node: String,
    },

    /// Interactive edge creation was rejected by the validator
    #[error("Edge rejected: {}", .0.join("; "))]
    EdgeRejected(Vec<String>),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Configuration could not be read
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GraphSyncError {
    /// True for errors that indicate a bug in whoever produced the input
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            Self::EdgeRejected(_) | Self::Serialization(_) | Self::Compression(_) | Self::Config(_)
        )
    }
}
