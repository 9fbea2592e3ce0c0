//! Node descriptor trait and metadata types
//!
//! A node type describes itself once (category, label, ports) and every
//! other component reads that description to validate connections.
//!
//! Port shape comes in two capabilities: most node types declare a static
//! port table, while group nodes compute their ports from their own nested
//! state. The capability is carried as data (`PortSource`) so the resolver
//! dispatches on it instead of on a type-name string.

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, PortDataType};

/// Type name of the built-in group node
pub const GROUP_NODE_TYPE: &str = "group";

/// Trait for node types that can describe their metadata
///
/// # Example
///
/// ```ignore
/// use graph_sync::{NodeDescriptor, NodeMetadata, PortMetadata, NodeCategory, PortDataType};
///
/// impl NodeDescriptor for TextInput {
///     fn descriptor() -> NodeMetadata {
///         NodeMetadata::with_ports(
///             "text-input",
///             NodeCategory::Input,
///             "Text Input",
///             vec![],
///             vec![PortMetadata::optional("text", "Text", PortDataType::String)],
///         )
///     }
/// }
/// ```
pub trait NodeDescriptor {
    /// Get the static metadata for this node type
    fn descriptor() -> NodeMetadata
    where
        Self: Sized;
}

/// Function pointer collected at link time via `inventory`
///
/// ```ignore
/// inventory::submit!(graph_sync::DescriptorFn(TextInput::descriptor));
/// ```
pub struct DescriptorFn(pub fn() -> NodeMetadata);

inventory::collect!(DescriptorFn);

/// Category of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Input nodes (user input, file input, etc.)
    Input,
    /// Output nodes (display, export, etc.)
    Output,
    /// Processing nodes
    Processing,
    /// Control flow nodes (conditionals, loops, etc.)
    Control,
    /// Containers for nested subgraphs
    Group,
}

/// Where a node type's ports come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PortSource {
    /// Ports declared once for the whole type
    Static {
        inputs: Vec<PortMetadata>,
        outputs: Vec<PortMetadata>,
    },
    /// Ports computed from the instance's nested subgraph
    Computed,
}

/// Complete metadata for a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    /// Unique type identifier (e.g., "text-input")
    pub node_type: String,
    /// Category for UI grouping
    pub category: NodeCategory,
    /// Human-readable label
    pub label: String,
    /// Description of what the node does
    #[serde(default)]
    pub description: String,
    /// Port capability
    pub ports: PortSource,
}

impl NodeMetadata {
    /// Metadata for a type with a static port table
    pub fn with_ports(
        node_type: impl Into<String>,
        category: NodeCategory,
        label: impl Into<String>,
        inputs: Vec<PortMetadata>,
        outputs: Vec<PortMetadata>,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            category,
            label: label.into(),
            description: String::new(),
            ports: PortSource::Static { inputs, outputs },
        }
    }

    /// Metadata for a type whose ports are computed per instance
    pub fn computed(
        node_type: impl Into<String>,
        category: NodeCategory,
        label: impl Into<String>,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            category,
            label: label.into(),
            description: String::new(),
            ports: PortSource::Computed,
        }
    }

    /// Add a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether ports depend on instance state
    pub fn has_computed_ports(&self) -> bool {
        matches!(self.ports, PortSource::Computed)
    }
}

/// Metadata for a port (input or output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMetadata {
    /// Property name (used as edge `fromProperty` / `toProperty`)
    pub id: String,
    /// Human-readable label
    pub label: String,
    /// Data type
    pub data_type: PortDataType,
    /// Whether this input is required
    pub required: bool,
    /// Whether multiple connections are allowed
    pub multiple: bool,
    /// For ports exposed by a group: the descendant that owns the port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_from: Option<NodeId>,
}

impl PortMetadata {
    /// Create a new port metadata
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        data_type: PortDataType,
        required: bool,
        multiple: bool,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            data_type,
            required,
            multiple,
            exposed_from: None,
        }
    }

    /// Create a required port
    pub fn required(id: impl Into<String>, label: impl Into<String>, data_type: PortDataType) -> Self {
        Self::new(id, label, data_type, true, false)
    }

    /// Create an optional port
    pub fn optional(id: impl Into<String>, label: impl Into<String>, data_type: PortDataType) -> Self {
        Self::new(id, label, data_type, false, false)
    }

    /// Set this port to accept multiple connections
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Mark this port as re-exposed from a group descendant
    pub fn exposed_from(mut self, node_id: impl Into<String>) -> Self {
        self.exposed_from = Some(node_id.into());
        self
    }
}

/// Resolved ports of a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ports {
    pub inputs: Vec<PortMetadata>,
    pub outputs: Vec<PortMetadata>,
}

impl Ports {
    pub fn new(inputs: Vec<PortMetadata>, outputs: Vec<PortMetadata>) -> Self {
        Self { inputs, outputs }
    }

    /// Find an input port by property name
    pub fn input(&self, property: &str) -> Option<&PortMetadata> {
        self.inputs.iter().find(|p| p.id == property)
    }

    /// Find an output port by property name
    pub fn output(&self, property: &str) -> Option<&PortMetadata> {
        self.outputs.iter().find(|p| p.id == property)
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

fn group_descriptor() -> NodeMetadata {
    NodeMetadata::computed(GROUP_NODE_TYPE, NodeCategory::Group, "Group")
        .with_description("Container whose ports are the unconnected ports of its contents")
}

inventory::submit!(DescriptorFn(group_descriptor));
