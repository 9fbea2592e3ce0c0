//! Sync engine: the single writer over the hierarchical graph
//!
//! The engine owns the authoritative hierarchical graph and keeps the flat
//! canvas projection, the clipboard and the undo history consistent with
//! it. Every edit follows the same path:
//!
//! 1. Apply the edit to a clone of the hierarchical graph
//! 2. Flatten the clone, pruning edges the validator rejects
//! 3. Swap the clone and its projection in together
//!
//! If any step fails, neither the graph nor the projection changes.
//! Commits made inside [`SyncEngine::batch`] share one history entry.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::canvas::{CanvasEdge, CanvasNode, FlatGraph};
use crate::clipboard::{new_node_id, Clipboard, ClipboardMode, ClipboardSnapshot, PasteResult};
use crate::config::SyncConfig;
use crate::descriptor::{PortMetadata, Ports};
use crate::error::{GraphSyncError, Result};
use crate::events::{EventSink, NullEventSink, ReplaceReason, SyncEvent};
use crate::flatten::{collect_edges, flatten, Flattened, PruneReport};
use crate::history::{HistoryFlags, HistoryManager};
use crate::index::NodeIndex;
use crate::ports::PortResolver;
use crate::reconstruct::{reconstruct_edge, reconstruct_graph};
use crate::registry::NodeRegistry;
use crate::types::{
    new_edge_id, EdgeId, NodeId, Position, ScopePath, Subgraph, WorkflowEdge, WorkflowGraph, WorkflowNode,
};
use crate::validation::{
    validate_workflow, EdgeValidator, GraphIssue, PortTypesCompatibleRule, RuleSet, SameScopeRule,
    ValidationResult,
};

/// Outcome of grouping a selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResult {
    pub group_id: NodeId,
    /// Edges between selected nodes, moved into the group
    pub internalized_edges: Vec<EdgeId>,
    /// Edges crossing the selection boundary, now attached to the group
    pub rerouted_edges: Vec<EdgeId>,
}

/// Outcome of dissolving a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UngroupResult {
    /// Former children, now in the group's own scope
    pub children: Vec<NodeId>,
    /// Edges on the group reattached to the child owning the port
    pub rerouted_edges: Vec<EdgeId>,
    /// Edges on the group with no child to reattach to
    pub dropped_edges: Vec<EdgeId>,
}

/// An edge crossing a selection boundary, before it is moved onto a group
struct Crossing {
    /// Selected endpoint the edge was attached to
    inner: NodeId,
    /// Endpoint left outside the group
    outer: NodeId,
    port: Option<String>,
    incoming: bool,
}

/// Synchronizes a hierarchical workflow graph with its canvas projection
pub struct SyncEngine {
    graph: WorkflowGraph,
    flat: FlatGraph,
    registry: NodeRegistry,
    config: SyncConfig,
    history: HistoryManager,
    clipboard: Clipboard,
    events: Box<dyn EventSink>,
    batch_depth: usize,
    batch_dirty: bool,
}

impl SyncEngine {
    /// Create an engine over an empty graph
    pub fn new(registry: NodeRegistry) -> Self {
        Self::with_config(registry, SyncConfig::default())
    }

    pub fn with_config(registry: NodeRegistry, config: SyncConfig) -> Self {
        Self {
            graph: WorkflowGraph::default(),
            flat: FlatGraph::default(),
            history: HistoryManager::new(config.history_size),
            clipboard: Clipboard::with_default_size(config.default_node_size),
            registry,
            config,
            events: Box::new(NullEventSink),
            batch_depth: 0,
            batch_dirty: false,
        }
    }

    /// Route engine events to `sink`
    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Box::new(sink);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The authoritative hierarchical graph
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// The current canvas projection
    pub fn flat(&self) -> &FlatGraph {
        &self.flat
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn clipboard(&self) -> Option<&ClipboardSnapshot> {
        self.clipboard.snapshot()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_flags(&self) -> HistoryFlags {
        self.history.flags()
    }

    /// Receiver notified whenever undo/redo availability changes
    pub fn subscribe_history(&self) -> watch::Receiver<HistoryFlags> {
        self.history.subscribe()
    }

    /// Serialize the hierarchical graph
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.graph)?)
    }

    // ------------------------------------------------------------------
    // Whole-graph replacement
    // ------------------------------------------------------------------

    /// Load a graph, repairing it and starting a fresh history
    ///
    /// Missing edge ids are generated. Duplicate node or edge ids cannot
    /// be repaired and fail the load; invalid edges are pruned and reported.
    pub fn load(&mut self, graph: WorkflowGraph) -> Result<PruneReport> {
        self.replace(graph, ReplaceReason::Load)
    }

    /// Parse and load a serialized graph
    pub fn load_json(&mut self, json: &str) -> Result<PruneReport> {
        let graph: WorkflowGraph = serde_json::from_str(json)?;
        self.load(graph)
    }

    /// Replace the graph with an empty one, keeping its id and name
    pub fn reset(&mut self) -> Result<()> {
        let empty = WorkflowGraph::new(self.graph.id.clone(), self.graph.name.clone());
        self.replace(empty, ReplaceReason::Reset).map(|_| ())
    }

    fn replace(&mut self, mut graph: WorkflowGraph, reason: ReplaceReason) -> Result<PruneReport> {
        let generated = graph.assign_missing_edge_ids();
        if generated > 0 {
            log::debug!("Generated {} missing edge id(s) for graph '{}'", generated, graph.id);
        }

        for issue in validate_workflow(&graph, Some(&self.registry)) {
            match issue {
                GraphIssue::DuplicateNodeId { node_id } => return Err(GraphSyncError::DuplicateNodeId(node_id)),
                GraphIssue::DuplicateEdgeId { edge_id } => return Err(GraphSyncError::DuplicateEdgeId(edge_id)),
                GraphIssue::UnknownNodeType { .. } => log::warn!("{}", issue),
                // Dangling edges are pruned by the flatten below
                GraphIssue::UnknownNode { .. } => {}
            }
        }

        let flattened = self.flatten_graph(&mut graph)?;

        let before = self.history.flags();
        self.history.clear();
        self.history.push(&flattened.flat)?;
        self.batch_dirty = false;

        self.graph = graph;
        self.flat = flattened.flat;

        log::info!(
            "Graph '{}' replaced ({:?}): {} nodes, {} edges",
            self.graph.id,
            reason,
            self.graph.node_count(),
            self.graph.edge_count()
        );
        self.emit(SyncEvent::GraphReplaced {
            graph_id: self.graph.id.clone(),
            reason,
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
        });
        self.emit_pruned(&flattened.report);
        self.emit_history(before);

        Ok(flattened.report)
    }

    // ------------------------------------------------------------------
    // Node edits
    // ------------------------------------------------------------------

    /// Insert a node at top level or inside the group `parent`
    pub fn add_node(&mut self, node: WorkflowNode, parent: Option<&str>) -> Result<NodeId> {
        let path = self.child_scope(parent)?;
        let id = node.id.clone();
        self.edit(|graph| {
            scope_at(graph, &path)?.nodes.push(node);
            Ok(())
        })?;
        log::debug!("Added node '{}'", id);
        Ok(id)
    }

    /// Build a fresh instance of a registered type and insert it
    pub fn create_node(&mut self, node_type: &str, position: Position, parent: Option<&str>) -> Result<NodeId> {
        let factory = self.registry.resolve_type_constructor(node_type)?;
        let node = factory.create(&new_node_id(), position);
        self.add_node(node, parent)
    }

    /// Remove nodes, their nested contents and every edge touching them
    ///
    /// Returns the number of nodes removed, descendants included.
    pub fn remove_nodes(&mut self, ids: &[NodeId]) -> Result<usize> {
        {
            let index = NodeIndex::build(&self.graph)?;
            if let Some(missing) = ids.iter().find(|id| !index.contains(id)) {
                return Err(GraphSyncError::NodeNotFound(missing.clone()));
            }
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let removed = self.edit(|graph| {
            let before = graph.node_count();
            remove_nodes_in(&mut graph.root, &doomed);
            Ok(before - graph.node_count())
        })?;
        log::debug!("Removed {} node(s)", removed);
        Ok(removed)
    }

    /// Move a node; the position is relative to its parent group
    pub fn move_node(&mut self, id: &str, position: Position) -> Result<()> {
        self.update_node(id, |node| node.position = position)
    }

    /// Replace a node's instance data
    pub fn set_node_data(&mut self, id: &str, data: serde_json::Value) -> Result<()> {
        self.update_node(id, |node| node.data = data)
    }

    fn update_node(&mut self, id: &str, update: impl FnOnce(&mut WorkflowNode)) -> Result<()> {
        let path = self.scope_of(id)?;
        self.edit(|graph| {
            let node = scope_at(graph, &path)?
                .find_node_mut(id)
                .ok_or_else(|| GraphSyncError::NodeNotFound(id.to_string()))?;
            update(node);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Edge edits
    // ------------------------------------------------------------------

    /// Validate an edge against the current graph without changing it
    ///
    /// Interactive checks also require both endpoints to share a scope.
    pub fn validate(&self, edge: &WorkflowEdge) -> Result<ValidationResult> {
        let index = NodeIndex::build(&self.graph)?;
        let existing: Vec<WorkflowEdge> = collect_edges(&self.graph).into_iter().map(|c| c.edge).collect();
        let validator = EdgeValidator::with_rules(&self.registry, self.rules(true));
        Ok(validator.validate_edge(edge, &index, &existing))
    }

    /// Add an edge to the scope its endpoints share
    ///
    /// Fails with `EdgeRejected` carrying every rule message when the
    /// validator refuses the edge.
    pub fn connect(&mut self, mut edge: WorkflowEdge) -> Result<EdgeId> {
        if edge.id.is_empty() {
            edge.id = new_edge_id();
        } else if collect_edges(&self.graph).iter().any(|c| c.edge.id == edge.id) {
            return Err(GraphSyncError::DuplicateEdgeId(edge.id));
        }

        let result = self.validate(&edge)?;
        if !result.valid {
            log::debug!("Rejected edge {} -> {}: {:?}", edge.from, edge.to, result.errors);
            return Err(GraphSyncError::EdgeRejected(result.errors));
        }

        let path = self.scope_of(&edge.from)?;
        let id = edge.id.clone();
        self.edit(|graph| {
            scope_at(graph, &path)?.edges.push(edge);
            Ok(())
        })?;
        Ok(id)
    }

    /// Add an edge drawn on the canvas
    pub fn connect_canvas(&mut self, edge: &CanvasEdge) -> Result<EdgeId> {
        let edge = reconstruct_edge(edge)?;
        self.connect(edge)
    }

    /// Remove edges by id from whichever scope owns them
    ///
    /// Unknown ids are ignored. Returns the number of edges removed.
    pub fn remove_edges(&mut self, ids: &[EdgeId]) -> Result<usize> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let present = collect_edges(&self.graph)
            .iter()
            .filter(|c| doomed.contains(c.edge.id.as_str()))
            .count();
        if present == 0 {
            return Ok(0);
        }

        self.edit(|graph| {
            remove_edges_in(&mut graph.root, &doomed);
            Ok(())
        })?;
        Ok(present)
    }

    /// Resolved ports of a node instance
    ///
    /// Group ports are computed from the group's current contents.
    pub fn ports(&self, node_id: &str) -> Result<Ports> {
        let index = NodeIndex::build(&self.graph)?;
        let node = index
            .node(node_id)
            .ok_or_else(|| GraphSyncError::NodeNotFound(node_id.to_string()))?;
        PortResolver::new(&self.registry).resolve_ports(node)
    }

    // ------------------------------------------------------------------
    // Grouping
    // ------------------------------------------------------------------

    /// Wrap nodes of one scope in a new group
    ///
    /// The group is placed at the top-left of the selection and children
    /// keep their on-screen placement. Edges between selected nodes move
    /// into the group; edges crossing the selection are reattached to the
    /// group itself, keeping their port names.
    ///
    /// Fails with `PortCollision` when a reattached edge would land on a
    /// group port that does not lead back to its original node, since the
    /// connection could then no longer be told apart from another one.
    pub fn group_nodes(&mut self, ids: &[NodeId]) -> Result<GroupResult> {
        let path = self.shared_scope(ids)?;
        let group_id = format!("group-{}", uuid::Uuid::new_v4());
        let group_type = self.config.group_node_type.clone();
        let selected: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let mut next = self.graph.clone();
        let scope = scope_at(&mut next, &path)?;
        let insert_at = scope
            .nodes
            .iter()
            .position(|n| selected.contains(n.id.as_str()))
            .unwrap_or(scope.nodes.len());

        let (mut inner, outer): (Vec<_>, Vec<_>) = std::mem::take(&mut scope.nodes)
            .into_iter()
            .partition(|n| selected.contains(n.id.as_str()));

        let origin = inner
            .iter()
            .map(|n| n.position)
            .reduce(|a, b| Position::new(a.x.min(b.x), a.y.min(b.y)))
            .unwrap_or_default();
        for node in inner.iter_mut() {
            node.position = node.position - origin;
        }

        let mut internal = Vec::new();
        let mut kept = Vec::new();
        let mut crossings = Vec::new();
        let mut result = GroupResult {
            group_id: group_id.clone(),
            internalized_edges: Vec::new(),
            rerouted_edges: Vec::new(),
        };
        for mut edge in std::mem::take(&mut scope.edges) {
            let from_inside = selected.contains(edge.from.as_str());
            let to_inside = selected.contains(edge.to.as_str());
            match (from_inside, to_inside) {
                (true, true) => {
                    result.internalized_edges.push(edge.id.clone());
                    internal.push(edge);
                }
                (true, false) => {
                    crossings.push(Crossing {
                        inner: std::mem::replace(&mut edge.from, group_id.clone()),
                        outer: edge.to.clone(),
                        port: edge.from_property.clone(),
                        incoming: false,
                    });
                    result.rerouted_edges.push(edge.id.clone());
                    kept.push(edge);
                }
                (false, true) => {
                    crossings.push(Crossing {
                        inner: std::mem::replace(&mut edge.to, group_id.clone()),
                        outer: edge.from.clone(),
                        port: edge.to_property.clone(),
                        incoming: true,
                    });
                    result.rerouted_edges.push(edge.id.clone());
                    kept.push(edge);
                }
                (false, false) => kept.push(edge),
            }
        }

        let group = WorkflowNode {
            position: origin,
            ..WorkflowNode::group(group_id.clone(), group_type, inner, internal)
        };
        scope.nodes = outer;
        scope.nodes.insert(insert_at.min(scope.nodes.len()), group);
        scope.edges = kept;

        self.check_crossings(&next, &group_id, &crossings)?;
        self.commit(next)?;

        log::debug!(
            "Grouped {} node(s) into '{}' ({} edge(s) rerouted)",
            ids.len(),
            result.group_id,
            result.rerouted_edges.len()
        );
        Ok(result)
    }

    /// Every reattached edge must stay traceable to its original node
    ///
    /// A data edge's port has to resolve on the new group to the node it
    /// came from. Control edges carry no port, so per outside node and
    /// direction they may only come from one selected node.
    fn check_crossings(&self, graph: &WorkflowGraph, group_id: &str, crossings: &[Crossing]) -> Result<()> {
        let index = NodeIndex::build(graph)?;
        let group = index
            .node(group_id)
            .ok_or_else(|| GraphSyncError::NodeNotFound(group_id.to_string()))?;
        let ports = PortResolver::new(&self.registry).resolve_ports_or_empty(group);
        let owner = |leaf: &str| direct_child_containing(&index, group_id, leaf);
        let inputs = port_owners(&ports.inputs, owner);
        let outputs = port_owners(&ports.outputs, owner);

        let mut control: HashMap<(&str, bool), &str> = HashMap::new();
        for crossing in crossings {
            match crossing.port.as_deref() {
                Some(port) => {
                    let owners = if crossing.incoming { &inputs } else { &outputs };
                    match owners.get(port) {
                        Some(owner) if *owner == crossing.inner => {}
                        other => {
                            let mut nodes = vec![crossing.inner.clone()];
                            nodes.extend(other.cloned());
                            return Err(GraphSyncError::PortCollision {
                                port: Some(port.to_string()),
                                nodes,
                            });
                        }
                    }
                }
                None => {
                    let key = (crossing.outer.as_str(), crossing.incoming);
                    match control.get(&key) {
                        Some(first) if *first != crossing.inner => {
                            return Err(GraphSyncError::PortCollision {
                                port: None,
                                nodes: vec![first.to_string(), crossing.inner.clone()],
                            });
                        }
                        Some(_) => {}
                        None => {
                            control.insert(key, crossing.inner.as_str());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Dissolve a group, moving its contents into the group's own scope
    ///
    /// Edges attached to the group's exposed ports are reattached to the
    /// child that owns the port; other edges on the group are dropped.
    pub fn ungroup(&mut self, group_id: &str) -> Result<UngroupResult> {
        let (path, inputs, outputs) = {
            let index = NodeIndex::build(&self.graph)?;
            let entry = index
                .get(group_id)
                .ok_or_else(|| GraphSyncError::NodeNotFound(group_id.to_string()))?;
            if !entry.node.is_group() {
                return Err(GraphSyncError::NotAGroup(group_id.to_string()));
            }
            let ports = PortResolver::new(&self.registry).resolve_ports_or_empty(entry.node);
            let owner = |leaf: &str| direct_child_containing(&index, group_id, leaf);
            let inputs = port_owners(&ports.inputs, owner);
            let outputs = port_owners(&ports.outputs, owner);
            (entry.scope.clone(), inputs, outputs)
        };

        let result = self.edit(|graph| {
            let scope = scope_at(graph, &path)?;
            let position = scope
                .nodes
                .iter()
                .position(|n| n.id == group_id)
                .ok_or_else(|| GraphSyncError::NodeNotFound(group_id.to_string()))?;
            let group = scope.nodes.remove(position);
            let body = group.subgraph.unwrap_or_default();

            let mut result = UngroupResult {
                children: body.nodes.iter().map(|n| n.id.clone()).collect(),
                rerouted_edges: Vec::new(),
                dropped_edges: Vec::new(),
            };

            let tail = scope.nodes.split_off(position);
            scope.nodes.extend(body.nodes.into_iter().map(|mut child| {
                child.position = group.position + child.position;
                child
            }));
            scope.nodes.extend(tail);

            let mut kept = Vec::with_capacity(scope.edges.len() + body.edges.len());
            for mut edge in std::mem::take(&mut scope.edges) {
                if !edge.involves_node(group_id) {
                    kept.push(edge);
                    continue;
                }
                let new_from = match (edge.from == group_id, edge.from_property.as_deref()) {
                    (false, _) => Some(edge.from.clone()),
                    (true, Some(port)) => outputs.get(port).cloned(),
                    (true, None) => None,
                };
                let new_to = match (edge.to == group_id, edge.to_property.as_deref()) {
                    (false, _) => Some(edge.to.clone()),
                    (true, Some(port)) => inputs.get(port).cloned(),
                    (true, None) => None,
                };
                match (new_from, new_to) {
                    (Some(from), Some(to)) => {
                        edge.from = from;
                        edge.to = to;
                        result.rerouted_edges.push(edge.id.clone());
                        kept.push(edge);
                    }
                    _ => result.dropped_edges.push(edge.id),
                }
            }
            kept.extend(body.edges);
            scope.edges = kept;
            Ok(result)
        })?;

        log::debug!(
            "Ungrouped '{}': {} child(ren), {} edge(s) rerouted, {} dropped",
            group_id,
            result.children.len(),
            result.rerouted_edges.len(),
            result.dropped_edges.len()
        );
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Clipboard
    // ------------------------------------------------------------------

    /// Copy nodes (and the contents of selected groups) to the clipboard
    ///
    /// Returns the number of nodes captured.
    pub fn copy(&mut self, ids: &[NodeId]) -> Result<usize> {
        let selected = self.capture(ids)?;
        let count = self.clipboard.copy(&selected, &self.flat.edges).nodes.len();
        self.emit(SyncEvent::ClipboardChanged {
            node_count: count,
            is_cut: false,
        });
        Ok(count)
    }

    /// Copy nodes to the clipboard and remove them from the graph
    pub fn cut(&mut self, ids: &[NodeId]) -> Result<usize> {
        let selected = self.capture(ids)?;
        let edges = self.flat.edges.clone();

        let mut clipboard = std::mem::take(&mut self.clipboard);
        let outcome = clipboard
            .cut(&selected, &edges, |doomed| self.remove_nodes(doomed).map(|_| ()))
            .map(|snapshot| snapshot.nodes.len());
        self.clipboard = clipboard;

        let count = outcome?;
        self.emit(SyncEvent::ClipboardChanged {
            node_count: count,
            is_cut: true,
        });
        Ok(count)
    }

    /// Paste the clipboard centered on `target` (canvas coordinates)
    ///
    /// Pasted selection roots land at top level. Returns `None` when the
    /// clipboard is empty.
    pub fn paste(&mut self, target: Position) -> Result<Option<PasteResult>> {
        let taken: HashSet<NodeId> = self.flat.nodes.iter().map(|n| n.id.clone()).collect();

        let mut clipboard = std::mem::take(&mut self.clipboard);
        let was_cut = clipboard.mode() == Some(ClipboardMode::Cut);
        let outcome = clipboard.paste(target, |id| taken.contains(id), |result| self.merge_pasted(result));
        let consumed = clipboard.is_empty();
        self.clipboard = clipboard;

        let pasted = outcome?;
        if let Some(result) = &pasted {
            log::debug!("Pasted {} node(s) and {} edge(s)", result.nodes.len(), result.edges.len());
            if was_cut && consumed {
                self.emit(SyncEvent::ClipboardChanged {
                    node_count: 0,
                    is_cut: true,
                });
            }
        }
        Ok(pasted)
    }

    /// Selected canvas nodes plus the descendants of selected groups
    ///
    /// Roots nested in an unselected group are given absolute positions.
    fn capture(&self, ids: &[NodeId]) -> Result<Vec<CanvasNode>> {
        let mut selected: HashSet<NodeId> = HashSet::new();
        for id in ids {
            if self.flat.find_node(id).is_none() {
                return Err(GraphSyncError::NodeNotFound(id.clone()));
            }
            selected.insert(id.clone());
            selected.extend(self.flat.descendants_of(id));
        }

        let mut nodes = Vec::with_capacity(selected.len());
        for node in self.flat.nodes.iter().filter(|n| selected.contains(&n.id)) {
            let mut node = node.clone();
            let nested_root = node.parent_id.as_ref().is_some_and(|p| !selected.contains(p));
            if nested_root {
                if let Some(absolute) = self.flat.absolute_position(&node.id) {
                    node.position = absolute;
                }
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    fn merge_pasted(&mut self, result: &PasteResult) -> Result<()> {
        let pasted = reconstruct_graph(
            String::new(),
            String::new(),
            &FlatGraph::new(result.nodes.clone(), result.edges.clone()),
        )?;
        self.edit(move |graph| {
            graph.root.nodes.extend(pasted.root.nodes);
            graph.root.edges.extend(pasted.root.edges);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Step back one history entry
    ///
    /// Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        if self.batch_depth > 0 {
            log::warn!("Undo requested inside a batch; ignoring");
            return Ok(false);
        }
        let before = self.history.flags();
        let Some(state) = self.history.undo() else {
            return Ok(false);
        };
        if let Err(e) = state.and_then(|flat| self.restore(flat, ReplaceReason::Undo)) {
            self.history.redo();
            return Err(e);
        }
        self.emit_history(before);
        Ok(true)
    }

    /// Step forward one history entry
    ///
    /// Returns false when there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool> {
        if self.batch_depth > 0 {
            log::warn!("Redo requested inside a batch; ignoring");
            return Ok(false);
        }
        let before = self.history.flags();
        let Some(state) = self.history.redo() else {
            return Ok(false);
        };
        if let Err(e) = state.and_then(|flat| self.restore(flat, ReplaceReason::Redo)) {
            self.history.undo();
            return Err(e);
        }
        self.emit_history(before);
        Ok(true)
    }

    /// Drop every history entry except the current state
    pub fn clear_history(&mut self) -> Result<()> {
        let before = self.history.flags();
        self.history.clear();
        self.history.push(&self.flat)?;
        self.emit_history(before);
        Ok(())
    }

    fn restore(&mut self, flat: FlatGraph, reason: ReplaceReason) -> Result<()> {
        let mut graph = reconstruct_graph(self.graph.id.clone(), self.graph.name.clone(), &flat)?;
        let flattened = self.flatten_graph(&mut graph)?;
        self.graph = graph;
        self.flat = flattened.flat;
        self.emit(SyncEvent::GraphReplaced {
            graph_id: self.graph.id.clone(),
            reason,
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
        });
        Ok(())
    }

    /// Run several edits as one history entry
    ///
    /// If `f` fails, every edit it made is rolled back.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let outermost = self.batch_depth == 0;
        let saved = outermost.then(|| (self.graph.clone(), self.flat.clone()));

        self.batch_depth += 1;
        let outcome = f(self);
        self.batch_depth -= 1;

        let Some((graph, flat)) = saved else {
            return outcome;
        };
        let dirty = std::mem::take(&mut self.batch_dirty);

        match outcome {
            Ok(value) => {
                if dirty {
                    let before = self.history.flags();
                    self.history.push(&self.flat)?;
                    self.emit_history(before);
                }
                Ok(value)
            }
            Err(e) => {
                if dirty {
                    log::debug!("Batch failed, rolling back: {}", e);
                    self.graph = graph;
                    self.flat = flat;
                    self.emit(SyncEvent::GraphCommitted {
                        graph_id: self.graph.id.clone(),
                        node_count: self.graph.node_count(),
                        edge_count: self.graph.edge_count(),
                    });
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Commit path
    // ------------------------------------------------------------------

    /// Apply `f` to a clone of the graph and commit the result
    fn edit<T>(&mut self, f: impl FnOnce(&mut WorkflowGraph) -> Result<T>) -> Result<T> {
        let mut next = self.graph.clone();
        let value = f(&mut next)?;
        self.commit(next)?;
        Ok(value)
    }

    fn commit(&mut self, mut next: WorkflowGraph) -> Result<PruneReport> {
        let flattened = self.flatten_graph(&mut next)?;

        let before = self.history.flags();
        if self.history.is_empty() {
            // First edit on a fresh engine: keep the starting state undoable
            self.history.push(&self.flat)?;
        }
        if self.batch_depth == 0 {
            self.history.push(&flattened.flat)?;
        } else {
            self.batch_dirty = true;
        }

        self.graph = next;
        self.flat = flattened.flat;

        self.emit(SyncEvent::GraphCommitted {
            graph_id: self.graph.id.clone(),
            node_count: self.flat.nodes.len(),
            edge_count: self.flat.edges.len(),
        });
        self.emit_pruned(&flattened.report);
        if self.batch_depth == 0 {
            self.emit_history(before);
        }
        Ok(flattened.report)
    }

    fn flatten_graph(&self, graph: &mut WorkflowGraph) -> Result<Flattened> {
        let validator = EdgeValidator::with_rules(&self.registry, self.rules(false));
        flatten(graph, &validator)
    }

    /// Rule chain; interactive edits also require a shared scope
    ///
    /// Flattening checks scope membership itself, per edge list.
    fn rules(&self, interactive: bool) -> RuleSet {
        let mut rules = RuleSet::default();
        if interactive {
            rules = rules.with(SameScopeRule);
        }
        if self.config.check_port_types {
            rules = rules.with(PortTypesCompatibleRule);
        }
        rules
    }

    // ------------------------------------------------------------------
    // Lookup helpers
    // ------------------------------------------------------------------

    fn scope_of(&self, id: &str) -> Result<ScopePath> {
        let index = NodeIndex::build(&self.graph)?;
        index
            .scope_of(id)
            .cloned()
            .ok_or_else(|| GraphSyncError::NodeNotFound(id.to_string()))
    }

    /// Scope holding the children of `parent` (the root for None)
    fn child_scope(&self, parent: Option<&str>) -> Result<ScopePath> {
        let Some(parent) = parent else {
            return Ok(Vec::new());
        };
        let index = NodeIndex::build(&self.graph)?;
        let entry = index
            .get(parent)
            .ok_or_else(|| GraphSyncError::NodeNotFound(parent.to_string()))?;
        if !entry.node.is_group() {
            return Err(GraphSyncError::NotAGroup(parent.to_string()));
        }
        let mut path = entry.scope.clone();
        path.push(parent.to_string());
        Ok(path)
    }

    fn shared_scope(&self, ids: &[NodeId]) -> Result<ScopePath> {
        let index = NodeIndex::build(&self.graph)?;
        let mut shared: Option<&ScopePath> = None;
        for id in ids {
            let scope = index
                .scope_of(id)
                .ok_or_else(|| GraphSyncError::NodeNotFound(id.clone()))?;
            match shared {
                None => shared = Some(scope),
                Some(first) if first != scope => {
                    return Err(GraphSyncError::MixedScopeSelection(ids.to_vec()));
                }
                Some(_) => {}
            }
        }
        shared.cloned().ok_or(GraphSyncError::EmptySelection)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.events.send(event) {
            log::warn!("Failed to deliver sync event: {}", e);
        }
    }

    fn emit_pruned(&self, report: &PruneReport) {
        if !report.is_empty() {
            self.emit(SyncEvent::EdgesPruned {
                count: report.count(),
                edge_ids: report.edge_ids(),
            });
        }
    }

    fn emit_history(&self, before: HistoryFlags) {
        let after = self.history.flags();
        if after != before {
            self.emit(SyncEvent::history(after));
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("graph_id", &self.graph.id)
            .field("nodes", &self.flat.nodes.len())
            .field("edges", &self.flat.edges.len())
            .field("history", &self.history)
            .field("batch_depth", &self.batch_depth)
            .finish()
    }
}

fn scope_at<'g>(graph: &'g mut WorkflowGraph, path: &[NodeId]) -> Result<&'g mut Subgraph> {
    graph
        .scope_mut(path)
        .ok_or_else(|| GraphSyncError::NodeNotFound(path.last().cloned().unwrap_or_default()))
}

fn remove_nodes_in(scope: &mut Subgraph, doomed: &HashSet<&str>) {
    scope.nodes.retain(|n| !doomed.contains(n.id.as_str()));
    scope
        .edges
        .retain(|e| !doomed.contains(e.from.as_str()) && !doomed.contains(e.to.as_str()));
    for node in scope.nodes.iter_mut() {
        if let Some(sub) = node.subgraph.as_mut() {
            remove_nodes_in(sub, doomed);
        }
    }
}

fn remove_edges_in(scope: &mut Subgraph, doomed: &HashSet<&str>) {
    scope.edges.retain(|e| !doomed.contains(e.id.as_str()));
    for node in scope.nodes.iter_mut() {
        if let Some(sub) = node.subgraph.as_mut() {
            remove_edges_in(sub, doomed);
        }
    }
}

/// The child of `group` that is or contains `leaf`
fn direct_child_containing(index: &NodeIndex<'_>, group: &str, leaf: &str) -> Option<NodeId> {
    let scope = index.scope_of(leaf)?;
    let at = scope.iter().position(|g| g == group)?;
    Some(scope.get(at + 1).cloned().unwrap_or_else(|| leaf.to_string()))
}

/// Port id → child owning it; the first port wins on a name collision
fn port_owners(
    ports: &[PortMetadata],
    owner: impl Fn(&str) -> Option<NodeId>,
) -> HashMap<String, NodeId> {
    let mut owners = HashMap::new();
    for port in ports {
        if let Some(child) = port.exposed_from.as_deref().and_then(&owner) {
            owners.entry(port.id.clone()).or_insert(child);
        }
    }
    owners
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::descriptor::{NodeCategory, NodeMetadata, PortMetadata, GROUP_NODE_TYPE};
    use crate::events::VecEventSink;
    use crate::types::{EdgeKind, PortDataType};

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::with_builtins();
        registry.register_metadata(NodeMetadata::with_ports(
            "emit",
            NodeCategory::Input,
            "Emit",
            vec![],
            vec![PortMetadata::optional("x", "X", PortDataType::String)],
        ));
        registry.register_metadata(NodeMetadata::with_ports(
            "take",
            NodeCategory::Output,
            "Take",
            vec![
                PortMetadata::required("y", "Y", PortDataType::String),
                PortMetadata::required("z", "Z", PortDataType::Number),
            ],
            vec![],
        ));
        registry
    }

    /// A(x) -> B(y) at top level; G contains C with nothing connected
    fn scenario() -> WorkflowGraph {
        WorkflowBuilder::new("wf", "Scenario")
            .add_node("A", "emit", (0.0, 0.0))
            .add_node("B", "take", (300.0, 0.0))
            .begin_group("G", GROUP_NODE_TYPE, (0.0, 300.0))
            .add_node("C", "take", (20.0, 40.0))
            .end_group()
            .add_edge("A", "x", "B", "y")
            .build()
    }

    fn engine() -> (SyncEngine, Arc<VecEventSink>) {
        let sink = Arc::new(VecEventSink::new());
        let mut engine = SyncEngine::new(registry()).with_event_sink(sink.clone());
        engine.load(scenario()).unwrap();
        sink.clear();
        (engine, sink)
    }

    fn flat_ids(engine: &SyncEngine) -> Vec<&str> {
        engine.flat().nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_scenario_projection_and_group_ports() {
        let (mut engine, _) = engine();
        assert_eq!(flat_ids(&engine), vec!["A", "B", "G", "C"]);
        assert_eq!(engine.flat().find_node("C").unwrap().parent_id.as_deref(), Some("G"));

        let ports = engine.ports("G").unwrap();
        let ids: Vec<_> = ports.inputs.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "z"]);
        assert!(ports.inputs.iter().all(|p| p.exposed_from.as_deref() == Some("C")));

        // A second edge into B.y is refused
        let err = engine.connect(WorkflowEdge::data("A", "x", "B", "y")).unwrap_err();
        assert!(matches!(err, GraphSyncError::EdgeRejected(_)));
        assert_eq!(engine.graph().edge_count(), 1);

        // A.x -> G.y is allowed: G exposes C's unconnected input
        engine.connect(WorkflowEdge::data("A", "x", "G", "y")).unwrap();
        assert_eq!(engine.flat().edges.len(), 2);
    }

    #[test]
    fn test_load_prunes_and_reports() {
        let sink = Arc::new(VecEventSink::new());
        let mut engine = SyncEngine::new(registry()).with_event_sink(sink.clone());
        let graph = WorkflowBuilder::new("wf", "Broken")
            .add_node("A", "emit", (0.0, 0.0))
            .add_node("B", "take", (0.0, 0.0))
            .add_edge("A", "x", "B", "y")
            .add_edge("A", "x", "B", "y")
            .add_control_edge("A", "ghost")
            .build();

        let report = engine.load(graph).unwrap();
        assert_eq!(report.count(), 2);
        assert_eq!(engine.graph().edge_count(), 1);
        assert!(!engine.can_undo());

        let events = sink.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::EdgesPruned { count: 2, .. })));
        assert!(matches!(
            events[0],
            SyncEvent::GraphReplaced {
                reason: ReplaceReason::Load,
                ..
            }
        ));
    }

    #[test]
    fn test_load_rejects_duplicate_ids() {
        let mut engine = SyncEngine::new(registry());
        engine.load(scenario()).unwrap();
        let before = engine.graph().clone();

        let mut broken = scenario();
        broken.scope_mut(&["G".to_string()]).unwrap().nodes.push(WorkflowNode::new("A", "emit"));
        assert!(matches!(engine.load(broken), Err(GraphSyncError::DuplicateNodeId(_))));
        assert_eq!(engine.graph(), &before);
    }

    #[test]
    fn test_load_json_assigns_edge_ids() {
        let mut engine = SyncEngine::new(registry());
        engine
            .load_json(
                &serde_json::json!({
                    "id": "wf",
                    "name": "From JSON",
                    "nodes": [{"id": "a", "type": "emit"}, {"id": "b", "type": "take"}],
                    "edges": [{"from": "a", "fromProperty": "x", "to": "b", "toProperty": "y"}]
                })
                .to_string(),
            )
            .unwrap();

        assert!(engine.flat().edges[0].id.starts_with("edge-"));
        let saved: WorkflowGraph = serde_json::from_str(&engine.to_json().unwrap()).unwrap();
        assert_eq!(&saved, engine.graph());
    }

    #[test]
    fn test_add_node_into_group_and_errors() {
        let (mut engine, _) = engine();
        engine.add_node(WorkflowNode::new("D", "emit"), Some("G")).unwrap();
        assert_eq!(engine.flat().find_node("D").unwrap().parent_id.as_deref(), Some("G"));

        assert!(matches!(
            engine.add_node(WorkflowNode::new("E", "emit"), Some("A")),
            Err(GraphSyncError::NotAGroup(_))
        ));
        assert!(matches!(
            engine.add_node(WorkflowNode::new("E", "emit"), Some("nope")),
            Err(GraphSyncError::NodeNotFound(_))
        ));
        // Reusing an id anywhere in the hierarchy fails and changes nothing
        let before = engine.flat().clone();
        assert!(matches!(
            engine.add_node(WorkflowNode::new("C", "emit"), None),
            Err(GraphSyncError::DuplicateNodeId(_))
        ));
        assert_eq!(engine.flat(), &before);
    }

    #[test]
    fn test_create_node_uses_registry_factory() {
        let (mut engine, _) = engine();
        let id = engine.create_node(GROUP_NODE_TYPE, Position::new(5.0, 5.0), None).unwrap();
        let node = engine.flat().find_node(&id).unwrap();
        assert!(node.is_group());
        assert_eq!(node.position, Position::new(5.0, 5.0));

        assert!(matches!(
            engine.create_node("unheard-of", Position::default(), None),
            Err(GraphSyncError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_remove_group_removes_subtree_and_edges() {
        let (mut engine, _) = engine();
        engine.connect(WorkflowEdge::data("A", "x", "G", "z")).unwrap();

        let removed = engine.remove_nodes(&["G".to_string()]).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(flat_ids(&engine), vec!["A", "B"]);
        assert_eq!(engine.graph().edge_count(), 1);

        assert!(matches!(
            engine.remove_nodes(&["G".to_string()]),
            Err(GraphSyncError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_move_and_update_node() {
        let (mut engine, _) = engine();
        engine.move_node("C", Position::new(1.0, 2.0)).unwrap();
        engine.set_node_data("C", serde_json::json!({"label": "inner"})).unwrap();

        let c = engine.flat().find_node("C").unwrap();
        assert_eq!(c.position, Position::new(1.0, 2.0));
        assert_eq!(c.data.as_ref().unwrap().data["label"], "inner");
        assert_eq!(engine.flat().absolute_position("C"), Some(Position::new(1.0, 302.0)));
    }

    #[test]
    fn test_connect_rejects_cross_scope() {
        let (mut engine, _) = engine();
        let err = engine.connect(WorkflowEdge::data("A", "x", "C", "z")).unwrap_err();
        match err {
            GraphSyncError::EdgeRejected(errors) => assert!(errors[0].contains("different groups")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_connect_canvas_and_remove_edges() {
        let (mut engine, _) = engine();
        let drawn = CanvasEdge {
            id: "drawn".to_string(),
            source: "B".to_string(),
            target: "G".to_string(),
            source_handle: None,
            target_handle: None,
            data: Some(crate::canvas::CanvasEdgeData {
                kind: "control".to_string(),
                condition: Some("done".to_string()),
                weight: None,
                mode: None,
            }),
        };
        let id = engine.connect_canvas(&drawn).unwrap();
        assert_eq!(id, "drawn");
        assert_eq!(engine.graph().root.edges[1].kind(), EdgeKind::Control);

        assert!(matches!(
            engine.connect_canvas(&drawn),
            Err(GraphSyncError::DuplicateEdgeId(_))
        ));

        assert_eq!(engine.remove_edges(&["drawn".to_string(), "nope".to_string()]).unwrap(), 1);
        assert_eq!(engine.remove_edges(&["nope".to_string()]).unwrap(), 0);
        assert_eq!(engine.graph().edge_count(), 1);
    }

    #[test]
    fn test_port_type_checks_are_opt_in() {
        let config = SyncConfig::default().with_port_type_checks();
        let mut engine = SyncEngine::with_config(registry(), config);
        engine.load(scenario()).unwrap();

        // String output into a Number input
        let result = engine.validate(&WorkflowEdge::data("A", "x", "B", "z")).unwrap();
        assert!(!result.valid);

        let (relaxed, _) = self::engine();
        assert!(relaxed.validate(&WorkflowEdge::data("A", "x", "B", "z")).unwrap().valid);
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let (mut engine, _) = engine();
        let loaded = engine.graph().clone();

        engine.move_node("A", Position::new(50.0, 50.0)).unwrap();
        engine.add_node(WorkflowNode::new("D", "emit"), Some("G")).unwrap();
        let edited = engine.graph().clone();

        assert!(engine.undo().unwrap());
        assert!(engine.undo().unwrap());
        assert_eq!(engine.graph(), &loaded);
        assert!(!engine.undo().unwrap());

        assert!(engine.redo().unwrap());
        assert!(engine.redo().unwrap());
        assert_eq!(engine.graph(), &edited);
        assert!(!engine.redo().unwrap());
    }

    #[test]
    fn test_edit_after_undo_truncates_redo() {
        let (mut engine, _) = engine();
        engine.move_node("A", Position::new(1.0, 1.0)).unwrap();
        engine.undo().unwrap();
        assert!(engine.can_redo());

        engine.move_node("B", Position::new(2.0, 2.0)).unwrap();
        assert!(!engine.can_redo());
    }

    #[test]
    fn test_history_events_and_watch() {
        let (mut engine, sink) = engine();
        let rx = engine.subscribe_history();

        engine.move_node("A", Position::new(1.0, 1.0)).unwrap();
        assert!(rx.borrow().can_undo);
        assert!(sink.events().contains(&SyncEvent::HistoryChanged {
            can_undo: true,
            can_redo: false
        }));

        engine.clear_history().unwrap();
        assert_eq!(*rx.borrow(), HistoryFlags::default());
    }

    #[test]
    fn test_batch_coalesces_history() {
        let (mut engine, _) = engine();
        let loaded = engine.graph().clone();

        engine
            .batch(|e| {
                e.move_node("A", Position::new(9.0, 9.0))?;
                e.add_node(WorkflowNode::new("D", "emit"), None)?;
                e.connect(WorkflowEdge::data("D", "x", "G", "y"))
            })
            .unwrap();
        assert_eq!(engine.graph().node_count(), 5);

        assert!(engine.undo().unwrap());
        assert_eq!(engine.graph(), &loaded);
        assert!(!engine.can_undo());
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let (mut engine, _) = engine();
        let loaded = engine.flat().clone();

        let result = engine.batch(|e| {
            e.move_node("A", Position::new(9.0, 9.0))?;
            e.move_node("missing", Position::default())
        });
        assert!(matches!(result, Err(GraphSyncError::NodeNotFound(_))));
        assert_eq!(engine.flat(), &loaded);
        assert!(!engine.can_undo());
    }

    #[test]
    fn test_copy_paste_group_subtree() {
        let (mut engine, _) = engine();
        engine.add_node(WorkflowNode::new("D", "emit"), Some("G")).unwrap();
        engine.connect(WorkflowEdge::data("D", "x", "C", "y")).unwrap();

        assert_eq!(engine.copy(&["G".to_string()]).unwrap(), 3);
        let pasted = engine.paste(Position::new(1000.0, 1000.0)).unwrap().unwrap();

        let new_group = &pasted.id_map["G"];
        let flat = engine.flat();
        assert_eq!(flat.descendants_of(new_group).len(), 2);
        assert_eq!(flat.edges.len(), 3);

        // Edge inside the copy links the copies, in the copied group's scope
        let inner = engine.graph().scope(&[new_group.clone()]).unwrap();
        assert_eq!(inner.edges.len(), 1);
        assert_eq!(inner.edges[0].from, pasted.id_map["D"]);
        assert_eq!(inner.edges[0].to, pasted.id_map["C"]);

        // Copy stays pasteable
        assert!(engine.paste(Position::default()).unwrap().is_some());
        assert_eq!(engine.graph().node_count(), 11);
    }

    #[test]
    fn test_copy_nested_node_pastes_at_top_level() {
        let (mut engine, _) = engine();
        engine.copy(&["C".to_string()]).unwrap();
        // Captured at its absolute position (20, 340)
        assert_eq!(engine.clipboard().unwrap().nodes[0].position, Position::new(20.0, 340.0));

        let pasted = engine.paste(Position::new(0.0, 0.0)).unwrap().unwrap();
        let copy = engine.flat().find_node(&pasted.nodes[0].id).unwrap();
        assert!(copy.parent_id.is_none());
        assert_eq!(copy.position, Position::new(-100.0, -50.0));
    }

    #[test]
    fn test_cut_paste_moves_nodes() {
        let (mut engine, sink) = engine();
        assert_eq!(engine.cut(&["A".to_string(), "B".to_string()]).unwrap(), 2);
        assert_eq!(flat_ids(&engine), vec!["G", "C"]);

        let pasted = engine.paste(Position::default()).unwrap().unwrap();
        assert_eq!(pasted.edges.len(), 1);
        assert_eq!(engine.graph().edge_count(), 1);
        assert!(engine.clipboard().is_none());
        assert!(engine.paste(Position::default()).unwrap().is_none());

        let clipboard_events = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::ClipboardChanged { .. }))
            .count();
        assert_eq!(clipboard_events, 2);
    }

    #[test]
    fn test_copy_unknown_node_fails() {
        let (mut engine, _) = engine();
        assert!(matches!(
            engine.copy(&["ghost".to_string()]),
            Err(GraphSyncError::NodeNotFound(_))
        ));
        assert!(engine.clipboard().is_none());
    }

    #[test]
    fn test_group_nodes_reroutes_boundary_edges() {
        let (mut engine, _) = engine();
        let result = engine.group_nodes(&["B".to_string()]).unwrap();

        assert_eq!(result.rerouted_edges.len(), 1);
        let edge = &engine.graph().root.edges[0];
        assert_eq!(edge.to, result.group_id);
        assert_eq!(edge.to_property.as_deref(), Some("y"));

        // B now lives in the new group, at its old on-screen spot
        let b = engine.flat().find_node("B").unwrap();
        assert_eq!(b.parent_id.as_ref(), Some(&result.group_id));
        assert_eq!(engine.flat().absolute_position("B"), Some(Position::new(300.0, 0.0)));

        // B.y stays exposed on the group, so the rerouted edge survives
        assert_eq!(engine.flat().edges.len(), 1);
    }

    /// A feeds the same input port on two siblings
    fn fan_out() -> WorkflowGraph {
        WorkflowBuilder::new("wf", "Fan out")
            .add_node("A", "emit", (0.0, 0.0))
            .add_node("B", "take", (300.0, 0.0))
            .add_node("C", "take", (300.0, 200.0))
            .add_edge("A", "x", "B", "y")
            .add_edge("A", "x", "C", "y")
            .build()
    }

    #[test]
    fn test_group_nodes_refuses_merging_shared_port() {
        let mut engine = SyncEngine::new(registry());
        engine.load(fan_out()).unwrap();
        let before = engine.flat().clone();

        let err = engine.group_nodes(&["B".to_string(), "C".to_string()]).unwrap_err();
        match err {
            GraphSyncError::PortCollision { port, nodes } => {
                assert_eq!(port.as_deref(), Some("y"));
                assert_eq!(nodes, vec!["C".to_string(), "B".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(engine.flat(), &before);
        assert_eq!(engine.graph().edge_count(), 2);
        assert!(!engine.can_undo());

        // Each sibling alone keeps its connection through group and ungroup
        let grouped = engine.group_nodes(&["C".to_string()]).unwrap();
        assert_eq!(engine.flat().edges.len(), 2);
        engine.ungroup(&grouped.group_id).unwrap();
        let mut ends: Vec<_> = engine
            .graph()
            .root
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        ends.sort();
        assert_eq!(ends, vec![("A", "B"), ("A", "C")]);
    }

    #[test]
    fn test_group_nodes_refuses_merging_control_edges() {
        let graph = WorkflowBuilder::new("wf", "Control fan out")
            .add_node("A", "emit", (0.0, 0.0))
            .add_node("B", "take", (300.0, 0.0))
            .add_node("C", "take", (300.0, 200.0))
            .add_control_edge("A", "B")
            .add_control_edge("A", "C")
            .build();
        let mut engine = SyncEngine::new(registry());
        engine.load(graph).unwrap();

        assert!(matches!(
            engine.group_nodes(&["B".to_string(), "C".to_string()]),
            Err(GraphSyncError::PortCollision { port: None, .. })
        ));
        assert_eq!(engine.graph().edge_count(), 2);
    }

    #[test]
    fn test_group_then_ungroup_restores_outgoing_edge() {
        let (mut engine, _) = engine();
        let original = engine.graph().root.edges.clone();

        let grouped = engine.group_nodes(&["A".to_string()]).unwrap();
        assert_eq!(engine.graph().root.edges[0].from, grouped.group_id);

        let result = engine.ungroup(&grouped.group_id).unwrap();
        assert_eq!(result.rerouted_edges, grouped.rerouted_edges);
        assert_eq!(engine.graph().root.edges, original);
    }

    #[test]
    fn test_group_nodes_requires_shared_scope() {
        let (mut engine, _) = engine();
        assert!(matches!(
            engine.group_nodes(&["A".to_string(), "C".to_string()]),
            Err(GraphSyncError::MixedScopeSelection(_))
        ));
        assert!(matches!(engine.group_nodes(&[]), Err(GraphSyncError::EmptySelection)));
    }

    #[test]
    fn test_ungroup_restores_edges_to_children() {
        let (mut engine, _) = engine();
        let grouped = engine.group_nodes(&["A".to_string(), "B".to_string()]).unwrap();
        assert_eq!(grouped.internalized_edges.len(), 1);

        engine.connect(WorkflowEdge::control("G", &grouped.group_id)).unwrap();
        let result = engine.ungroup(&grouped.group_id).unwrap();

        assert_eq!(result.children, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(result.dropped_edges.len(), 1);
        assert_eq!(engine.flat().find_node("A").unwrap().position, Position::new(0.0, 0.0));
        assert_eq!(engine.flat().find_node("B").unwrap().position, Position::new(300.0, 0.0));
        assert_eq!(engine.graph().root.edges.len(), 1);

        assert!(matches!(engine.ungroup("A"), Err(GraphSyncError::NotAGroup(_))));
    }

    #[test]
    fn test_ungroup_reroutes_exposed_ports() {
        let (mut engine, _) = engine();
        engine.connect(WorkflowEdge::data("A", "x", "G", "z")).unwrap();

        let result = engine.ungroup("G").unwrap();
        assert_eq!(result.rerouted_edges.len(), 1);
        let edge = engine
            .graph()
            .root
            .edges
            .iter()
            .find(|e| e.to == "C")
            .unwrap();
        assert_eq!(edge.to_property.as_deref(), Some("z"));
        assert_eq!(engine.flat().find_node("C").unwrap().position, Position::new(20.0, 340.0));
    }

    #[test]
    fn test_reset_keeps_identity() {
        let (mut engine, sink) = engine();
        engine.reset().unwrap();
        assert_eq!(engine.graph().id, "wf");
        assert!(engine.flat().nodes.is_empty());
        assert!(sink.events().iter().any(|e| matches!(
            e,
            SyncEvent::GraphReplaced {
                reason: ReplaceReason::Reset,
                ..
            }
        )));
    }

    #[test]
    fn test_history_bound_from_config() {
        let mut engine = SyncEngine::with_config(registry(), SyncConfig::default().with_history_size(3));
        engine.load(scenario()).unwrap();
        for i in 0..5 {
            engine.move_node("A", Position::new(i as f64, 0.0)).unwrap();
        }
        assert!(engine.undo().unwrap());
        assert!(engine.undo().unwrap());
        assert!(!engine.undo().unwrap());
        assert_eq!(engine.flat().find_node("A").unwrap().position, Position::new(2.0, 0.0));
    }
}
