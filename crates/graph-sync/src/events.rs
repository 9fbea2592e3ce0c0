//! Event types for reporting graph changes
//!
//! Events are sent from the sync engine to the canvas (or any consumer)
//! to report commits, repairs, history movement and clipboard changes.

use serde::{Deserialize, Serialize};

use crate::history::HistoryFlags;

/// Trait for sending sync events
///
/// This abstracts over the transport mechanism (UI channel, mpsc, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: SyncEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Why the graph was replaced wholesale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceReason {
    Load,
    Reset,
    Undo,
    Redo,
}

/// Events emitted by the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// The whole graph was replaced
    #[serde(rename_all = "camelCase")]
    GraphReplaced {
        graph_id: String,
        reason: ReplaceReason,
        node_count: usize,
        edge_count: usize,
    },

    /// An edit was committed and the projection rebuilt
    #[serde(rename_all = "camelCase")]
    GraphCommitted {
        graph_id: String,
        node_count: usize,
        edge_count: usize,
    },

    /// Invalid edges were removed while rebuilding the projection
    #[serde(rename_all = "camelCase")]
    EdgesPruned { count: usize, edge_ids: Vec<String> },

    /// Undo/redo availability changed
    #[serde(rename_all = "camelCase")]
    HistoryChanged { can_undo: bool, can_redo: bool },

    /// Clipboard contents were replaced or consumed
    #[serde(rename_all = "camelCase")]
    ClipboardChanged { node_count: usize, is_cut: bool },
}

impl SyncEvent {
    /// Create a history event from the current flags
    pub fn history(flags: HistoryFlags) -> Self {
        Self::HistoryChanged {
            can_undo: flags.can_undo,
            can_redo: flags.can_redo,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: SyncEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<SyncEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: SyncEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError {
                message: "Event buffer poisoned".to_string(),
            })?
            .push(event);
        Ok(())
    }
}

/// Shared handle so tests can keep reading a sink the engine owns
impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn send(&self, event: SyncEvent) -> Result<(), EventError> {
        (**self).send(event)
    }
}
