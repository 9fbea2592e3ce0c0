//! Port resolution for node types and live instances
//!
//! Static port tables come straight from the registry. Group nodes have no
//! table: their ports are the unconnected ports of their contents, computed
//! on every call from the group's current subgraph so they never go stale.

use crate::descriptor::{PortSource, Ports};
use crate::error::{GraphSyncError, Result};
use crate::registry::NodeRegistry;
use crate::types::{Subgraph, WorkflowNode};

/// What to resolve ports for
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    /// A bare type name; computed types resolve to no ports
    Type(&'a str),
    /// A live node, whose nested state feeds computed ports
    Instance(&'a WorkflowNode),
}

impl<'a> From<&'a WorkflowNode> for NodeRef<'a> {
    fn from(node: &'a WorkflowNode) -> Self {
        NodeRef::Instance(node)
    }
}

impl<'a> From<&'a str> for NodeRef<'a> {
    fn from(node_type: &'a str) -> Self {
        NodeRef::Type(node_type)
    }
}

/// Resolves ports against a registry
#[derive(Clone, Copy)]
pub struct PortResolver<'r> {
    registry: &'r NodeRegistry,
}

impl<'r> PortResolver<'r> {
    pub fn new(registry: &'r NodeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r NodeRegistry {
        self.registry
    }

    /// Resolve the ports of a type or instance
    ///
    /// Fails with `UnknownNodeType` when the type was never registered.
    pub fn resolve_ports<'a>(&self, node: impl Into<NodeRef<'a>>) -> Result<Ports> {
        match node.into() {
            NodeRef::Type(node_type) => self.registry.resolve_ports_for_type(node_type),
            NodeRef::Instance(node) => match &self.registry.metadata(&node.node_type)?.ports {
                PortSource::Static { inputs, outputs } => Ok(Ports::new(inputs.clone(), outputs.clone())),
                PortSource::Computed => Ok(node
                    .subgraph
                    .as_ref()
                    .map(|sub| self.exposed_ports(sub))
                    .unwrap_or_default()),
            },
        }
    }

    /// Like `resolve_ports`, but an unknown type degrades to no ports
    pub fn resolve_ports_or_empty<'a>(&self, node: impl Into<NodeRef<'a>>) -> Ports {
        match self.resolve_ports(node) {
            Ok(ports) => ports,
            Err(GraphSyncError::UnknownNodeType(node_type)) => {
                log::debug!("No ports for unregistered node type '{}'", node_type);
                Ports::default()
            }
            Err(e) => {
                log::warn!("Port resolution failed: {}", e);
                Ports::default()
            }
        }
    }

    /// Unconnected ports of everything inside a subgraph
    ///
    /// A child's port counts as connected when an edge of this subgraph
    /// touches it. Nested groups contribute their own exposed ports, filtered
    /// the same way, so only leaf ports ever surface.
    fn exposed_ports(&self, scope: &Subgraph) -> Ports {
        let mut exposed = Ports::default();

        for child in &scope.nodes {
            let child_ports = self.resolve_ports_or_empty(child);

            exposed.inputs.extend(
                child_ports
                    .inputs
                    .into_iter()
                    .filter(|p| !scope.is_input_connected(&child.id, &p.id))
                    .map(|p| match p.exposed_from {
                        Some(_) => p,
                        None => p.exposed_from(child.id.clone()),
                    }),
            );
            exposed.outputs.extend(
                child_ports
                    .outputs
                    .into_iter()
                    .filter(|p| !scope.is_output_connected(&child.id, &p.id))
                    .map(|p| match p.exposed_from {
                        Some(_) => p,
                        None => p.exposed_from(child.id.clone()),
                    }),
            );
        }

        exposed
    }
}
