//! Node type registry
//!
//! Maps node type strings to their metadata and to a factory that builds
//! fresh instances. The registry is the port/type source every other
//! component consults.
//!
//! # Usage
//!
//! ```ignore
//! use graph_sync::NodeRegistry;
//!
//! let mut registry = NodeRegistry::with_builtins();
//! registry.register_metadata(TextInput::descriptor());
//!
//! let ports = registry.resolve_ports_for_type("text-input")?;
//! let node = registry.resolve_type_constructor("text-input")?.create("in-1", Position::default());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::{DescriptorFn, NodeCategory, NodeMetadata, PortSource, Ports};
use crate::error::{GraphSyncError, Result};
use crate::types::{Position, Subgraph, WorkflowNode};

/// Builds new instances of one node type
pub trait NodeFactory: Send + Sync {
    fn create(&self, id: &str, position: Position) -> WorkflowNode;
}

/// Factory derived from metadata alone: an empty instance of the type,
/// with an empty subgraph when the type computes its ports
struct MetadataNodeFactory {
    node_type: String,
    is_group: bool,
}

impl NodeFactory for MetadataNodeFactory {
    fn create(&self, id: &str, position: Position) -> WorkflowNode {
        WorkflowNode {
            position,
            subgraph: self.is_group.then(Subgraph::default),
            ..WorkflowNode::new(id, self.node_type.clone())
        }
    }
}

/// Factory backed by a closure
pub struct FnNodeFactory<F>(pub F);

impl<F> NodeFactory for FnNodeFactory<F>
where
    F: Fn(&str, Position) -> WorkflowNode + Send + Sync,
{
    fn create(&self, id: &str, position: Position) -> WorkflowNode {
        (self.0)(id, position)
    }
}

/// A registration entry combining metadata with an optional factory
struct RegistryEntry {
    metadata: NodeMetadata,
    factory: Option<Arc<dyn NodeFactory>>,
}

/// Registry of node types
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = NodeRegistry::with_builtins();
/// registry.merge(plugin_registry);
/// ```
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry holding every descriptor submitted via `inventory`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in inventory::iter::<DescriptorFn> {
            registry.register_metadata((descriptor.0)());
        }
        log::debug!("Registered {} built-in node types", registry.entries.len());
        registry
    }

    /// Register a node type with metadata and a factory
    pub fn register(&mut self, metadata: NodeMetadata, factory: Arc<dyn NodeFactory>) {
        self.entries.insert(
            metadata.node_type.clone(),
            RegistryEntry {
                metadata,
                factory: Some(factory),
            },
        );
    }

    /// Register a node type with metadata only
    ///
    /// Instances are built by a default factory derived from the metadata.
    pub fn register_metadata(&mut self, metadata: NodeMetadata) {
        self.entries.insert(
            metadata.node_type.clone(),
            RegistryEntry {
                metadata,
                factory: None,
            },
        );
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<&NodeMetadata> {
        self.entries.get(node_type).map(|e| &e.metadata)
    }

    /// Get metadata, failing for unregistered types
    pub fn metadata(&self, node_type: &str) -> Result<&NodeMetadata> {
        self.get_metadata(node_type)
            .ok_or_else(|| GraphSyncError::UnknownNodeType(node_type.to_string()))
    }

    /// Ports declared for a type
    ///
    /// Types with computed ports resolve to no ports here; their ports only
    /// exist on an instance (see `PortResolver`).
    pub fn resolve_ports_for_type(&self, node_type: &str) -> Result<Ports> {
        match &self.metadata(node_type)?.ports {
            PortSource::Static { inputs, outputs } => Ok(Ports::new(inputs.clone(), outputs.clone())),
            PortSource::Computed => Ok(Ports::default()),
        }
    }

    /// Factory for a node type
    pub fn resolve_type_constructor(&self, node_type: &str) -> Result<Arc<dyn NodeFactory>> {
        let entry = self
            .entries
            .get(node_type)
            .ok_or_else(|| GraphSyncError::UnknownNodeType(node_type.to_string()))?;

        Ok(match &entry.factory {
            Some(factory) => factory.clone(),
            None => Arc::new(MetadataNodeFactory {
                node_type: entry.metadata.node_type.clone(),
                is_group: entry.metadata.has_computed_ports(),
            }),
        })
    }

    /// Get all registered metadata
    pub fn all_metadata(&self) -> Vec<&NodeMetadata> {
        self.entries.values().map(|e| &e.metadata).collect()
    }

    /// Get metadata grouped by category
    pub fn metadata_by_category(&self) -> HashMap<NodeCategory, Vec<&NodeMetadata>> {
        let mut grouped: HashMap<NodeCategory, Vec<&NodeMetadata>> = HashMap::new();
        for entry in self.entries.values() {
            grouped
                .entry(entry.metadata.category)
                .or_default()
                .push(&entry.metadata);
        }
        grouped
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    /// List all registered node type strings
    pub fn node_types(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same node_type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
