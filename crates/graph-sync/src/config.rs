//! Configuration types for the sync engine

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clipboard::DEFAULT_NODE_SIZE;
use crate::descriptor::GROUP_NODE_TYPE;
use crate::error::{GraphSyncError, Result};
use crate::history::DEFAULT_HISTORY_SIZE;
use crate::types::Size;

/// Tunables for a [`SyncEngine`](crate::engine::SyncEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Maximum number of undo snapshots kept
    pub history_size: usize,
    /// Footprint used for unmeasured nodes when computing paste bounds
    pub default_node_size: Size,
    /// Node type created when grouping a selection
    pub group_node_type: String,
    /// Also reject data edges whose port types are incompatible
    pub check_port_types: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_HISTORY_SIZE,
            default_node_size: DEFAULT_NODE_SIZE,
            group_node_type: GROUP_NODE_TYPE.to_string(),
            check_port_types: false,
        }
    }
}

impl SyncConfig {
    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| GraphSyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }

    pub fn with_port_type_checks(mut self) -> Self {
        self.check_port_types = true;
        self
    }
}
