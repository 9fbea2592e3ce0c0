//! Graph Sync - keeps a nested workflow graph and a flat canvas in step
//!
//! Workflows are authored as a hierarchy: group nodes own private subgraphs
//! of their own. The diagram renderer only understands one flat list of
//! nodes (with parent references) and one flat list of edges. This crate
//! owns the hierarchical graph and derives everything else from it:
//!
//! - Port resolution, including computed ports for groups
//! - Edge validation through an ordered, pluggable rule chain
//! - Flattening with pruning of edges the validator rejects
//! - Reconstruction of the hierarchy from a flat projection
//! - Clipboard copy, cut and paste with fresh ids
//! - Compressed snapshot-based undo/redo
//!
//! # Architecture
//!
//! - `SyncEngine`: Single writer; every edit is flattened and validated
//!   before it replaces the current graph
//! - `NodeRegistry`: Type metadata and factories, collected via `inventory`
//! - `EdgeValidator`: AND chain of `EdgeRule`s evaluated in order
//! - `HistoryManager`: Bounded, zstd-compressed snapshots of the projection
//! - `EventSink`: Generic change notifications (not tied to any UI)
//!
//! # Example
//!
//! ```
//! use graph_sync::{NodeRegistry, SyncEngine, WorkflowBuilder, WorkflowEdge};
//!
//! let graph = WorkflowBuilder::new("wf", "Example")
//!     .add_node("a", "group", (0.0, 0.0))
//!     .add_node("b", "group", (200.0, 0.0))
//!     .build();
//!
//! let mut engine = SyncEngine::new(NodeRegistry::with_builtins());
//! engine.load(graph).unwrap();
//! engine.connect(WorkflowEdge::control("a", "b")).unwrap();
//!
//! assert_eq!(engine.flat().edges.len(), 1);
//! assert!(engine.undo().unwrap());
//! assert!(engine.flat().edges.is_empty());
//! ```

pub mod builder;
pub mod canvas;
pub mod clipboard;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod events;
pub mod flatten;
pub mod history;
pub mod index;
pub mod ports;
pub mod reconstruct;
pub mod registry;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use canvas::{CanvasEdge, CanvasEdgeData, CanvasNode, Extent, FlatGraph};
pub use clipboard::{BoundingBox, Clipboard, ClipboardMode, ClipboardSnapshot, PasteResult};
pub use config::SyncConfig;
pub use descriptor::{
    DescriptorFn, NodeCategory, NodeDescriptor, NodeMetadata, PortMetadata, PortSource, Ports, GROUP_NODE_TYPE,
};
pub use engine::{GroupResult, SyncEngine, UngroupResult};
pub use error::{GraphSyncError, Result};
pub use events::{EventSink, NullEventSink, ReplaceReason, SyncEvent, VecEventSink};
pub use flatten::{flatten, Flattened, PruneReport};
pub use history::{HistoryFlags, HistoryManager};
pub use index::NodeIndex;
pub use ports::{NodeRef, PortResolver};
pub use reconstruct::{reconstruct, reconstruct_edge, reconstruct_graph, reconstruct_node};
pub use registry::{FnNodeFactory, NodeFactory, NodeRegistry};
pub use types::{
    EdgeId, EdgeKind, NodeId, PortDataType, PortId, Position, ScopePath, Size, Subgraph, WorkflowEdge,
    WorkflowGraph, WorkflowNode,
};
pub use validation::{
    validate_workflow, EdgeRule, EdgeValidator, GraphIssue, PortTypesCompatibleRule, RuleSet, SameScopeRule,
    ValidationResult,
};
