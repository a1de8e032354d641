//! Datapath Registry
//!
//! Set of switches currently connected to the controller.

use crate::protocol::{DatapathId, DatapathState, StateChange};
use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Live datapath set
pub struct DatapathRegistry {
    datapaths: RwLock<BTreeSet<DatapathId>>,
}

impl DatapathRegistry {
    pub fn new() -> Self {
        Self {
            datapaths: RwLock::new(BTreeSet::new()),
        }
    }

    /// Register a datapath. Returns false if it was already registered.
    pub fn register(&self, id: DatapathId) -> bool {
        let added = self.datapaths.write().insert(id);
        if added {
            tracing::debug!("register datapath: {:016x}", id);
        }
        added
    }

    /// Unregister a datapath. Returns false if it was not registered.
    pub fn unregister(&self, id: DatapathId) -> bool {
        let removed = self.datapaths.write().remove(&id);
        if removed {
            tracing::debug!("unregister datapath: {:016x}", id);
        }
        removed
    }

    /// Apply a connect/disconnect notification
    pub fn apply(&self, change: &StateChange) -> bool {
        match change.state {
            DatapathState::Connected => self.register(change.datapath_id),
            DatapathState::Disconnected => self.unregister(change.datapath_id),
        }
    }

    /// Snapshot of registered datapaths, ascending
    pub fn list(&self) -> Vec<DatapathId> {
        self.datapaths.read().iter().copied().collect()
    }

    pub fn contains(&self, id: DatapathId) -> bool {
        self.datapaths.read().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.datapaths.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapaths.read().is_empty()
    }
}

impl Default for DatapathRegistry {
    fn default() -> Self {
        Self::new()
    }
}
