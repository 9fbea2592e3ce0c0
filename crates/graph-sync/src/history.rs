//! Undo/redo history using compressed snapshots
//!
//! Every committed edit pushes a snapshot of the flat projection. Snapshots
//! are serialized and zstd-compressed, so entries never share state with
//! the live graph and a long history stays small.
//!
//! The log is linear: pushing after an undo discards everything ahead of
//! the current entry. When the log is full the oldest entry is evicted.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::canvas::FlatGraph;
use crate::error::{GraphSyncError, Result};

/// Default number of retained snapshots
pub const DEFAULT_HISTORY_SIZE: usize = 50;

const COMPRESSION_LEVEL: i32 = 3;

/// Observable undo/redo availability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFlags {
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Bounded linear history of flat graph snapshots
pub struct HistoryManager {
    /// Compressed snapshots (zstd)
    snapshots: VecDeque<Vec<u8>>,
    /// Index of the entry matching the live state
    current: usize,
    max_size: usize,
    flags: watch::Sender<HistoryFlags>,
}

impl HistoryManager {
    /// Create a history holding at most `max_size` snapshots
    pub fn new(max_size: usize) -> Self {
        let (flags, _) = watch::channel(HistoryFlags::default());
        Self {
            snapshots: VecDeque::new(),
            current: 0,
            max_size: max_size.max(1),
            flags,
        }
    }

    /// Record a new state
    ///
    /// Truncates any redo entries first.
    pub fn push(&mut self, state: &FlatGraph) -> Result<()> {
        let json = serde_json::to_vec(state)?;
        let compressed = zstd::encode_all(&json[..], COMPRESSION_LEVEL)
            .map_err(|e| GraphSyncError::Compression(e.to_string()))?;

        if !self.snapshots.is_empty() {
            self.snapshots.truncate(self.current + 1);
        }

        self.snapshots.push_back(compressed);
        self.current = self.snapshots.len() - 1;

        while self.snapshots.len() > self.max_size {
            self.snapshots.pop_front();
            self.current = self.current.saturating_sub(1);
        }

        self.publish();
        Ok(())
    }

    /// Step back one entry
    ///
    /// Returns the previous state, or None at the oldest entry.
    pub fn undo(&mut self) -> Option<Result<FlatGraph>> {
        if !self.can_undo() {
            return None;
        }
        self.current -= 1;
        self.publish();
        Some(self.decompress(self.current))
    }

    /// Step forward one entry
    ///
    /// Returns the next state, or None at the newest entry.
    pub fn redo(&mut self) -> Option<Result<FlatGraph>> {
        if !self.can_redo() {
            return None;
        }
        self.current += 1;
        self.publish();
        Some(self.decompress(self.current))
    }

    /// Snapshot at the current pointer
    pub fn current(&self) -> Option<Result<FlatGraph>> {
        if self.snapshots.is_empty() {
            None
        } else {
            Some(self.decompress(self.current))
        }
    }

    pub fn can_undo(&self) -> bool {
        self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.snapshots.len()
    }

    pub fn flags(&self) -> HistoryFlags {
        HistoryFlags {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
        }
    }

    /// Receiver notified whenever undo/redo availability changes
    pub fn subscribe(&self) -> watch::Receiver<HistoryFlags> {
        self.flags.subscribe()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.current = 0;
        self.publish();
    }

    /// Total compressed size of all snapshots in bytes
    pub fn compressed_size(&self) -> usize {
        self.snapshots.iter().map(|s| s.len()).sum()
    }

    fn publish(&self) {
        let flags = self.flags();
        // Only wake receivers on an actual change
        self.flags.send_if_modified(|current| {
            if *current == flags {
                false
            } else {
                *current = flags;
                true
            }
        });
    }

    fn decompress(&self, index: usize) -> Result<FlatGraph> {
        let compressed = self
            .snapshots
            .get(index)
            .ok_or_else(|| GraphSyncError::Compression(format!("No snapshot at index {}", index)))?;
        let json = zstd::decode_all(&compressed[..]).map_err(|e| GraphSyncError::Compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl std::fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryManager")
            .field("len", &self.snapshots.len())
            .field("current", &self.current)
            .field("max_size", &self.max_size)
            .finish()
    }
}
