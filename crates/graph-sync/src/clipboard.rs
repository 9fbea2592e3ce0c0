//! Copy, cut and paste of canvas selections
//!
//! A copy captures the selected canvas nodes, every edge whose endpoints
//! are both selected, and the bounding box of the selection. Pasting
//! re-centers the selection on a target point and hands out fresh ids so
//! the same snapshot can be pasted any number of times.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasEdge, CanvasNode};
use crate::error::Result;
use crate::types::{new_edge_id, NodeId, Position, Size};

/// Footprint assumed for nodes the canvas has not measured yet
pub const DEFAULT_NODE_SIZE: Size = Size {
    width: 200.0,
    height: 100.0,
};

/// Generate a fresh node id
pub fn new_node_id() -> NodeId {
    format!("node-{}", uuid::Uuid::new_v4())
}

/// Axis-aligned box around a set of nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Box covering every node, or None for an empty selection
    pub fn around<'a>(nodes: impl IntoIterator<Item = &'a CanvasNode>, default_size: Size) -> Option<Self> {
        let mut bounds: Option<BoundingBox> = None;
        for node in nodes {
            let size = node.known_size().unwrap_or(default_size);
            let (x, y) = (node.position.x, node.position.y);
            bounds = Some(match bounds {
                None => BoundingBox {
                    min_x: x,
                    min_y: y,
                    max_x: x + size.width,
                    max_y: y + size.height,
                },
                Some(b) => BoundingBox {
                    min_x: b.min_x.min(x),
                    min_y: b.min_y.min(y),
                    max_x: b.max_x.max(x + size.width),
                    max_y: b.max_y.max(y + size.height),
                },
            });
        }
        bounds
    }

    pub fn center(&self) -> Position {
        Position::new((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Captured selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardSnapshot {
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
    /// Bounds of the selection roots; None when nothing was selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
}

impl ClipboardSnapshot {
    /// Anchor used when pasting
    pub fn center(&self) -> Position {
        self.bounds.map(|b| b.center()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes whose parent is not part of the snapshot
    pub fn roots(&self) -> impl Iterator<Item = &CanvasNode> {
        self.nodes.iter().filter(|n| n.parent_id.is_none())
    }
}

/// Capture a selection with the default node footprint
pub fn copy(selected: &[CanvasNode], all_edges: &[CanvasEdge]) -> ClipboardSnapshot {
    copy_with_size(selected, all_edges, DEFAULT_NODE_SIZE)
}

/// Capture a selection
///
/// Nodes whose parent is also selected keep the parent link and their
/// parent-relative position. Every other node becomes a selection root:
/// its parent link is dropped and it contributes to the bounding box.
pub fn copy_with_size(selected: &[CanvasNode], all_edges: &[CanvasEdge], default_size: Size) -> ClipboardSnapshot {
    let ids: HashSet<&str> = selected.iter().map(|n| n.id.as_str()).collect();

    let nodes: Vec<CanvasNode> = selected
        .iter()
        .map(|node| {
            let mut node = node.clone();
            let parent_selected = node.parent_id.as_deref().is_some_and(|p| ids.contains(p));
            if !parent_selected {
                node.parent_id = None;
                node.extent = None;
            }
            node
        })
        .collect();

    let edges: Vec<CanvasEdge> = all_edges
        .iter()
        .filter(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()))
        .cloned()
        .collect();

    let bounds = BoundingBox::around(nodes.iter().filter(|n| n.parent_id.is_none()), default_size);

    log::debug!("Copied {} node(s) and {} edge(s)", nodes.len(), edges.len());
    ClipboardSnapshot { nodes, edges, bounds }
}

/// Nodes and edges produced by a paste, ready to merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteResult {
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
    /// Snapshot id → pasted id
    pub id_map: HashMap<NodeId, NodeId>,
}

impl PasteResult {
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }
}

/// Re-materialize a snapshot centered on `target`
///
/// Every node gets a fresh id not accepted by `is_taken`, and every edge a
/// fresh id with both endpoints remapped. Selection roots are offset from
/// the snapshot center; nested nodes keep their relative position.
pub fn paste(snapshot: &ClipboardSnapshot, target: Position, is_taken: impl Fn(&str) -> bool) -> PasteResult {
    let center = snapshot.center();

    let mut id_map: HashMap<NodeId, NodeId> = HashMap::with_capacity(snapshot.nodes.len());
    for node in &snapshot.nodes {
        let fresh = loop {
            let candidate = new_node_id();
            if !is_taken(&candidate) && !id_map.values().any(|v| v == &candidate) {
                break candidate;
            }
        };
        id_map.insert(node.id.clone(), fresh);
    }

    let nodes: Vec<CanvasNode> = snapshot
        .nodes
        .iter()
        .filter_map(|node| {
            let id = id_map.get(&node.id)?.clone();
            let mut pasted = node.clone();
            match node.parent_id.as_ref().and_then(|p| id_map.get(p)) {
                Some(parent) => pasted.parent_id = Some(parent.clone()),
                None => {
                    pasted.parent_id = None;
                    pasted.extent = None;
                    pasted.position = target + (node.position - center);
                }
            }
            if let Some(payload) = pasted.data.as_mut() {
                payload.id = id.clone();
                payload.position = pasted.position;
            }
            pasted.id = id;
            Some(pasted)
        })
        .collect();

    let edges: Vec<CanvasEdge> = snapshot
        .edges
        .iter()
        .filter_map(|edge| {
            let from = id_map.get(&edge.source)?;
            let to = id_map.get(&edge.target)?;
            Some(CanvasEdge {
                id: new_edge_id(),
                source: from.clone(),
                target: to.clone(),
                ..edge.clone()
            })
        })
        .collect();

    PasteResult { nodes, edges, id_map }
}

/// How the current clipboard contents were captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardMode {
    Copy,
    Cut,
}

/// Holds at most one snapshot between copy and paste
#[derive(Debug, Clone)]
pub struct Clipboard {
    contents: Option<(ClipboardSnapshot, ClipboardMode)>,
    default_size: Size,
}

impl Default for Clipboard {
    fn default() -> Self {
        Self::with_default_size(DEFAULT_NODE_SIZE)
    }
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clipboard assuming `default_size` for unmeasured nodes
    pub fn with_default_size(default_size: Size) -> Self {
        Self {
            contents: None,
            default_size,
        }
    }

    /// Capture a selection; the snapshot stays pasteable until replaced
    pub fn copy(&mut self, selected: &[CanvasNode], all_edges: &[CanvasEdge]) -> &ClipboardSnapshot {
        let snapshot = copy_with_size(selected, all_edges, self.default_size);
        self.store(snapshot, ClipboardMode::Copy)
    }

    /// Capture a selection and remove the originals through `remove`
    ///
    /// The clipboard is only filled once removal succeeded.
    pub fn cut(
        &mut self,
        selected: &[CanvasNode],
        all_edges: &[CanvasEdge],
        remove: impl FnOnce(&[NodeId]) -> Result<()>,
    ) -> Result<&ClipboardSnapshot> {
        let snapshot = copy_with_size(selected, all_edges, self.default_size);
        let ids: Vec<NodeId> = selected.iter().map(|n| n.id.clone()).collect();
        remove(&ids)?;
        Ok(self.store(snapshot, ClipboardMode::Cut))
    }

    /// Store an already captured snapshot
    pub fn store(&mut self, snapshot: ClipboardSnapshot, mode: ClipboardMode) -> &ClipboardSnapshot {
        &self.contents.insert((snapshot, mode)).0
    }

    /// Paste the current snapshot and commit it through `merge`
    ///
    /// Returns `Ok(None)` when the clipboard is empty. Cut contents are
    /// consumed by the first paste whose merge succeeds.
    pub fn paste(
        &mut self,
        target: Position,
        is_taken: impl Fn(&str) -> bool,
        merge: impl FnOnce(&PasteResult) -> Result<()>,
    ) -> Result<Option<PasteResult>> {
        let Some((snapshot, mode)) = &self.contents else {
            return Ok(None);
        };
        if snapshot.is_empty() {
            return Ok(None);
        }

        let result = paste(snapshot, target, is_taken);
        let mode = *mode;
        merge(&result)?;

        if mode == ClipboardMode::Cut {
            self.contents = None;
        }
        Ok(Some(result))
    }

    pub fn snapshot(&self) -> Option<&ClipboardSnapshot> {
        self.contents.as_ref().map(|(s, _)| s)
    }

    pub fn mode(&self) -> Option<ClipboardMode> {
        self.contents.as_ref().map(|(_, m)| *m)
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_none()
    }

    pub fn clear(&mut self) {
        self.contents = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasEdgeData;
    use crate::error::GraphSyncError;
    use crate::types::WorkflowNode;

    fn node(id: &str, x: f64, y: f64) -> CanvasNode {
        let mut node = CanvasNode::bare(id, "t", Position::new(x, y));
        node.data = Some(WorkflowNode::new(id, "t").at(x, y));
        node
    }

    fn child(id: &str, parent: &str, x: f64, y: f64) -> CanvasNode {
        let mut node = node(id, x, y);
        node.parent_id = Some(parent.to_string());
        node.extent = Some(crate::canvas::Extent::Parent);
        node
    }

    fn edge(id: &str, source: &str, target: &str) -> CanvasEdge {
        CanvasEdge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: Some("out".to_string()),
            target_handle: Some("in".to_string()),
            data: Some(CanvasEdgeData {
                kind: "data".to_string(),
                condition: None,
                weight: None,
                mode: None,
            }),
        }
    }

    #[test]
    fn test_bounding_box_uses_default_size() {
        let nodes = [node("a", 0.0, 0.0), node("b", 300.0, 100.0)];
        let bounds = BoundingBox::around(&nodes, DEFAULT_NODE_SIZE).unwrap();
        assert_eq!(bounds.max_x, 500.0);
        assert_eq!(bounds.max_y, 200.0);
        assert_eq!(bounds.center(), Position::new(250.0, 100.0));

        let mut measured = node("c", 0.0, 0.0);
        measured.measured = Some(Size::new(50.0, 20.0));
        let bounds = BoundingBox::around([&measured], DEFAULT_NODE_SIZE).unwrap();
        assert_eq!((bounds.width(), bounds.height()), (50.0, 20.0));

        assert!(BoundingBox::around(std::iter::empty::<&CanvasNode>(), DEFAULT_NODE_SIZE).is_none());
    }

    #[test]
    fn test_copy_keeps_internal_edges_only() {
        let nodes = [node("a", 0.0, 0.0), node("b", 10.0, 0.0), node("c", 20.0, 0.0)];
        let edges = [edge("ab", "a", "b"), edge("bc", "b", "c")];

        let snapshot = copy(&nodes[..2], &edges);
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.edges.len(), 1);
        assert_eq!(snapshot.edges[0].id, "ab");
    }

    #[test]
    fn test_copy_nested_selection() {
        let selected = [node("g", 100.0, 100.0), child("c", "g", 10.0, 10.0), child("x", "other", 0.0, 0.0)];
        let snapshot = copy(&selected, &[]);

        assert_eq!(snapshot.nodes[1].parent_id.as_deref(), Some("g"));
        assert_eq!(snapshot.nodes[1].position, Position::new(10.0, 10.0));
        // Parent not selected: becomes a root
        assert!(snapshot.nodes[2].parent_id.is_none());
        assert!(snapshot.nodes[2].extent.is_none());
        assert_eq!(snapshot.roots().count(), 2);
        // Child inside g does not widen the box
        assert_eq!(snapshot.bounds.unwrap().min_x, 0.0);
        assert_eq!(snapshot.bounds.unwrap().max_x, 300.0);
    }

    #[test]
    fn test_paste_preserves_topology() {
        let nodes = [node("a", 0.0, 0.0), node("b", 200.0, 0.0), node("c", 400.0, 0.0)];
        let edges = [edge("ab", "a", "b"), edge("bc", "b", "c"), edge("ca", "c", "a")];
        let snapshot = copy(&nodes, &edges);

        let pasted = paste(&snapshot, Position::new(1000.0, 1000.0), |_| false);
        assert_eq!(pasted.edges.len(), 3);
        for (original, copy) in edges.iter().zip(&pasted.edges) {
            assert_eq!(pasted.id_map[&original.source], copy.source);
            assert_eq!(pasted.id_map[&original.target], copy.target);
            assert_eq!(copy.source_handle, original.source_handle);
            assert_eq!(copy.kind_marker(), Some("data"));
        }
    }

    #[test]
    fn test_paste_ids_are_fresh() {
        let nodes = [node("a", 0.0, 0.0), node("b", 200.0, 0.0)];
        let edges = [edge("ab", "a", "b")];
        let snapshot = copy(&nodes, &edges);

        let first = paste(&snapshot, Position::default(), |id| id == "a" || id == "b");
        let second = paste(&snapshot, Position::default(), |id| first.id_map.values().any(|v| v == id));

        let mut seen: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        for id in first.node_ids().into_iter().chain(second.node_ids()) {
            assert!(seen.insert(id), "id reused");
        }
        assert_ne!(first.edges[0].id, "ab");
        assert_ne!(first.edges[0].id, second.edges[0].id);
        // Payload follows the canvas id
        assert_eq!(first.nodes[0].data.as_ref().unwrap().id, first.nodes[0].id);
    }

    #[test]
    fn test_paste_recenters_roots() {
        let selected = [node("a", 0.0, 0.0), node("g", 200.0, 100.0), child("c", "g", 15.0, 25.0)];
        let snapshot = copy(&selected, &[]);
        // Box (0,0)-(400,200), center (200,100)
        let pasted = paste(&snapshot, Position::new(500.0, 500.0), |_| false);

        assert_eq!(pasted.nodes[0].position, Position::new(300.0, 400.0));
        assert_eq!(pasted.nodes[1].position, Position::new(500.0, 500.0));
        assert_eq!(pasted.nodes[2].position, Position::new(15.0, 25.0));
        assert_eq!(pasted.nodes[2].parent_id.as_ref(), Some(&pasted.nodes[1].id));
    }

    #[test]
    fn test_copy_stays_reusable() {
        let mut clipboard = Clipboard::new();
        clipboard.copy(&[node("a", 0.0, 0.0)], &[]);

        for _ in 0..2 {
            let pasted = clipboard.paste(Position::default(), |_| false, |_| Ok(())).unwrap();
            assert!(pasted.is_some());
        }
        assert_eq!(clipboard.mode(), Some(ClipboardMode::Copy));
    }

    #[test]
    fn test_cut_is_consumed_by_first_paste() {
        let mut clipboard = Clipboard::new();
        let mut removed = Vec::new();
        clipboard
            .cut(&[node("a", 0.0, 0.0)], &[], |ids| {
                removed.extend_from_slice(ids);
                Ok(())
            })
            .unwrap();
        assert_eq!(removed, vec!["a".to_string()]);

        // Failed merge leaves the cut contents in place
        let failed = clipboard.paste(Position::default(), |_| false, |_| {
            Err(GraphSyncError::NodeNotFound("target".to_string()))
        });
        assert!(failed.is_err());
        assert!(!clipboard.is_empty());

        assert!(clipboard.paste(Position::default(), |_| false, |_| Ok(())).unwrap().is_some());
        assert!(clipboard.is_empty());
        assert!(clipboard.paste(Position::default(), |_| false, |_| Ok(())).unwrap().is_none());
    }

    #[test]
    fn test_failed_cut_keeps_clipboard_empty() {
        let mut clipboard = Clipboard::new();
        let result = clipboard.cut(&[node("a", 0.0, 0.0)], &[], |_| {
            Err(GraphSyncError::NodeNotFound("a".to_string()))
        });
        assert!(result.is_err());
        assert!(clipboard.is_empty());
    }
}
