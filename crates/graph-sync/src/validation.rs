//! Edge validation rule chain and graph-level checks
//!
//! Every path that creates an edge (interactive connect, import, paste,
//! flatten pruning) runs the candidate through a chain of independent rules.
//! All rules must pass; each failing rule contributes its own message.
//!
//! A rule that errors or panics is skipped: one broken rule must not stop
//! the user from making an otherwise reasonable edit.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::NodeIndex;
use crate::ports::PortResolver;
use crate::registry::NodeRegistry;
use crate::types::{Subgraph, WorkflowEdge, WorkflowGraph};

/// Everything a rule may look at besides the candidate
pub struct RuleContext<'c, 'a> {
    /// Every node the candidate may reference
    pub nodes: &'c NodeIndex<'a>,
    /// Edges that already exist
    pub edges: &'c [WorkflowEdge],
    /// Port lookup for multiplicity and type checks
    pub ports: PortResolver<'c>,
}

/// A named predicate over a candidate edge
pub trait EdgeRule {
    /// Stable rule name (used in logs)
    fn name(&self) -> &'static str;

    /// Human-readable reason reported when the rule fails
    fn message(&self, edge: &WorkflowEdge) -> String;

    /// Whether the candidate passes this rule
    fn check(&self, edge: &WorkflowEdge, ctx: &RuleContext<'_, '_>) -> Result<bool>;
}

/// Both endpoints resolve to known nodes
pub struct NodesExistRule;

impl EdgeRule for NodesExistRule {
    fn name(&self) -> &'static str {
        "nodes-exist"
    }

    fn message(&self, edge: &WorkflowEdge) -> String {
        format!("Edge references a missing node ({} -> {})", edge.from, edge.to)
    }

    fn check(&self, edge: &WorkflowEdge, ctx: &RuleContext<'_, '_>) -> Result<bool> {
        Ok(ctx.nodes.contains(&edge.from) && ctx.nodes.contains(&edge.to))
    }
}

/// An edge may not loop back onto its own node
pub struct NoSelfConnectionRule;

impl EdgeRule for NoSelfConnectionRule {
    fn name(&self) -> &'static str {
        "no-self-connection"
    }

    fn message(&self, edge: &WorkflowEdge) -> String {
        format!("Cannot connect node '{}' to itself", edge.from)
    }

    fn check(&self, edge: &WorkflowEdge, _ctx: &RuleContext<'_, '_>) -> Result<bool> {
        Ok(edge.from != edge.to)
    }
}

/// No two edges share `(from, to, fromProperty, toProperty)`
pub struct NoDuplicateRule;

impl EdgeRule for NoDuplicateRule {
    fn name(&self) -> &'static str {
        "no-duplicate"
    }

    fn message(&self, edge: &WorkflowEdge) -> String {
        format!("Connection {} -> {} already exists", edge.from, edge.to)
    }

    fn check(&self, edge: &WorkflowEdge, ctx: &RuleContext<'_, '_>) -> Result<bool> {
        let key = edge.connection_key();
        Ok(!ctx
            .edges
            .iter()
            .filter(|e| !is_same_edge(e, edge))
            .any(|e| e.connection_key() == key))
    }
}

/// A single-multiplicity input accepts at most one incoming edge
///
/// Ports that cannot be resolved are not enforced.
pub struct InputSingleConnectionRule;

impl EdgeRule for InputSingleConnectionRule {
    fn name(&self) -> &'static str {
        "input-single-connection"
    }

    fn message(&self, edge: &WorkflowEdge) -> String {
        format!(
            "Input '{}' on node '{}' already has a connection",
            edge.to_property.as_deref().unwrap_or_default(),
            edge.to
        )
    }

    fn check(&self, edge: &WorkflowEdge, ctx: &RuleContext<'_, '_>) -> Result<bool> {
        let Some(property) = edge.to_property.as_deref() else {
            return Ok(true);
        };
        let Some(target) = ctx.nodes.node(&edge.to) else {
            return Ok(true);
        };

        let ports = ctx.ports.resolve_ports_or_empty(target);
        let single = ports.input(property).is_some_and(|p| !p.multiple);
        if !single {
            return Ok(true);
        }

        Ok(!ctx.edges.iter().filter(|e| !is_same_edge(e, edge)).any(|e| {
            e.to == edge.to && e.to_property.as_deref() == Some(property)
        }))
    }
}

/// Both endpoints live in the same scope
pub struct SameScopeRule;

impl EdgeRule for SameScopeRule {
    fn name(&self) -> &'static str {
        "same-scope"
    }

    fn message(&self, edge: &WorkflowEdge) -> String {
        format!(
            "Nodes '{}' and '{}' are in different groups",
            edge.from, edge.to
        )
    }

    fn check(&self, edge: &WorkflowEdge, ctx: &RuleContext<'_, '_>) -> Result<bool> {
        match (ctx.nodes.scope_of(&edge.from), ctx.nodes.scope_of(&edge.to)) {
            (Some(a), Some(b)) => Ok(a == b),
            // Missing endpoints are reported by nodes-exist
            _ => Ok(true),
        }
    }
}

/// Source and target port types are compatible
pub struct PortTypesCompatibleRule;

impl EdgeRule for PortTypesCompatibleRule {
    fn name(&self) -> &'static str {
        "port-types-compatible"
    }

    fn message(&self, edge: &WorkflowEdge) -> String {
        format!(
            "Port '{}' on '{}' cannot feed port '{}' on '{}'",
            edge.from_property.as_deref().unwrap_or_default(),
            edge.from,
            edge.to_property.as_deref().unwrap_or_default(),
            edge.to
        )
    }

    fn check(&self, edge: &WorkflowEdge, ctx: &RuleContext<'_, '_>) -> Result<bool> {
        let (Some(from_prop), Some(to_prop)) = (edge.from_property.as_deref(), edge.to_property.as_deref()) else {
            return Ok(true);
        };
        let (Some(source), Some(target)) = (ctx.nodes.node(&edge.from), ctx.nodes.node(&edge.to)) else {
            return Ok(true);
        };

        let source_ports = ctx.ports.resolve_ports(source)?;
        let target_ports = ctx.ports.resolve_ports(target)?;
        match (source_ports.output(from_prop), target_ports.input(to_prop)) {
            (Some(out), Some(input)) => Ok(out.data_type.is_compatible_with(&input.data_type)),
            _ => Ok(true),
        }
    }
}

fn is_same_edge(existing: &WorkflowEdge, candidate: &WorkflowEdge) -> bool {
    !candidate.id.is_empty() && existing.id == candidate.id
}

/// Ordered list of rules evaluated as an AND chain
pub struct RuleSet {
    rules: Vec<Box<dyn EdgeRule>>,
}

impl RuleSet {
    /// No rules at all
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule
    pub fn with(mut self, rule: impl EdgeRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleSet {
    /// The built-in chain, cheapest checks first
    fn default() -> Self {
        Self::empty()
            .with(NodesExistRule)
            .with(NoSelfConnectionRule)
            .with(NoDuplicateRule)
            .with(InputSingleConnectionRule)
    }
}

/// Outcome of validating one edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// An edge rejected by batch validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidEdge {
    /// Position of the edge in the batch input
    pub index: usize,
    pub edge: WorkflowEdge,
    pub errors: Vec<String>,
}

/// Outcome of validating a batch of edges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchValidation {
    pub valid_edges: Vec<WorkflowEdge>,
    pub invalid_edges: Vec<InvalidEdge>,
}

/// Runs a rule set against candidate edges
pub struct EdgeValidator<'r> {
    ports: PortResolver<'r>,
    rules: RuleSet,
}

impl<'r> EdgeValidator<'r> {
    /// Validator with the built-in rule chain
    pub fn new(registry: &'r NodeRegistry) -> Self {
        Self::with_rules(registry, RuleSet::default())
    }

    pub fn with_rules(registry: &'r NodeRegistry, rules: RuleSet) -> Self {
        Self {
            ports: PortResolver::new(registry),
            rules,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Validate one candidate against existing nodes and edges
    pub fn validate_edge(
        &self,
        edge: &WorkflowEdge,
        nodes: &NodeIndex<'_>,
        edges: &[WorkflowEdge],
    ) -> ValidationResult {
        let ctx = RuleContext {
            nodes,
            edges,
            ports: self.ports,
        };

        let mut errors = Vec::new();
        for rule in &self.rules.rules {
            let outcome = catch_unwind(AssertUnwindSafe(|| rule.check(edge, &ctx)));
            match outcome {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => errors.push(rule.message(edge)),
                Ok(Err(e)) => {
                    log::warn!("Edge rule '{}' failed on edge '{}', skipping: {}", rule.name(), edge.id, e);
                }
                Err(_) => {
                    log::warn!("Edge rule '{}' panicked on edge '{}', skipping", rule.name(), edge.id);
                }
            }
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Validate a batch in order
    ///
    /// Each edge is checked against the edges accepted before it, so of two
    /// conflicting edges the first one wins.
    pub fn validate_edges_detailed(&self, edges: &[WorkflowEdge], nodes: &NodeIndex<'_>) -> BatchValidation {
        let mut batch = BatchValidation::default();
        for (index, edge) in edges.iter().enumerate() {
            let result = self.validate_edge(edge, nodes, &batch.valid_edges);
            if result.valid {
                batch.valid_edges.push(edge.clone());
            } else {
                batch.invalid_edges.push(InvalidEdge {
                    index,
                    edge: edge.clone(),
                    errors: result.errors,
                });
            }
        }
        batch
    }
}

/// Validate one edge with the built-in rules
pub fn validate_edge(
    edge: &WorkflowEdge,
    nodes: &NodeIndex<'_>,
    edges: &[WorkflowEdge],
    registry: &NodeRegistry,
) -> ValidationResult {
    EdgeValidator::new(registry).validate_edge(edge, nodes, edges)
}

/// Validate a batch of edges with the built-in rules
pub fn validate_edges_detailed(
    edges: &[WorkflowEdge],
    nodes: &NodeIndex<'_>,
    registry: &NodeRegistry,
) -> BatchValidation {
    EdgeValidator::new(registry).validate_edges_detailed(edges, nodes)
}

/// Structural problem found in a whole graph
#[derive(Debug, Clone, PartialEq)]
pub enum GraphIssue {
    /// A node id appears more than once in the hierarchy
    DuplicateNodeId { node_id: String },
    /// An edge id appears more than once in the hierarchy
    DuplicateEdgeId { edge_id: String },
    /// An edge references a node that is not in its scope
    UnknownNode { edge_id: String, node_id: String },
    /// A node has an unknown type (not in registry)
    UnknownNodeType { node_id: String, node_type: String },
}

impl GraphIssue {
    /// Issues that pruning cannot repair
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateNodeId { .. } | Self::DuplicateEdgeId { .. })
    }
}

impl std::fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateNodeId { node_id } => write!(f, "Duplicate node id '{}'", node_id),
            Self::DuplicateEdgeId { edge_id } => write!(f, "Duplicate edge id '{}'", edge_id),
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "Edge '{}' references unknown node '{}'", edge_id, node_id)
            }
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "Unknown node type '{}' for node '{}'", node_type, node_id)
            }
        }
    }
}

impl std::error::Error for GraphIssue {}

/// Check a whole graph for structural problems
///
/// Returns all issues found (not just the first). Pass a registry to also
/// report unregistered node types.
pub fn validate_workflow(graph: &WorkflowGraph, registry: Option<&NodeRegistry>) -> Vec<GraphIssue> {
    let mut issues = Vec::new();
    let mut node_ids = HashSet::new();
    let mut edge_ids = HashSet::new();
    check_scope(&graph.root, registry, &mut node_ids, &mut edge_ids, &mut issues);
    issues
}

fn check_scope<'g>(
    scope: &'g Subgraph,
    registry: Option<&NodeRegistry>,
    node_ids: &mut HashSet<&'g str>,
    edge_ids: &mut HashSet<&'g str>,
    issues: &mut Vec<GraphIssue>,
) {
    for node in &scope.nodes {
        if !node_ids.insert(node.id.as_str()) {
            issues.push(GraphIssue::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
        if let Some(reg) = registry {
            if !reg.has_node_type(&node.node_type) {
                issues.push(GraphIssue::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                });
            }
        }
    }

    for edge in &scope.edges {
        if !edge.id.is_empty() && !edge_ids.insert(edge.id.as_str()) {
            issues.push(GraphIssue::DuplicateEdgeId {
                edge_id: edge.id.clone(),
            });
        }
        for endpoint in [&edge.from, &edge.to] {
            if !scope.contains_node(endpoint) {
                issues.push(GraphIssue::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    for node in &scope.nodes {
        if let Some(sub) = &node.subgraph {
            check_scope(sub, registry, node_ids, edge_ids, issues);
        }
    }
}
