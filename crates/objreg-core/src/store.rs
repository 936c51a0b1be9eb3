//! The indexed store: every live node, ordered by handle.
//!
//! [`NodeIndex`] is not synchronized on its own. The registry keeps it
//! behind the structural lock, and every insert, lookup and delete happens
//! with that lock held.

use std::collections::BTreeMap;
use std::sync::Arc;

use objreg_types::ObjectHandle;

use crate::error::{RegistryError, RegistryResult};
use crate::node::Node;

/// Balanced ordered map from handle to node.
#[derive(Debug, Default)]
pub(crate) struct NodeIndex {
    nodes: BTreeMap<ObjectHandle, Arc<Node>>,
}

impl NodeIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, node: Arc<Node>) -> RegistryResult<()> {
        if self.nodes.contains_key(&node.handle) {
            return Err(RegistryError::DuplicateObject(node.handle));
        }
        self.nodes.insert(node.handle, node);
        Ok(())
    }

    /// Insert a well-known root while the index is being built.
    pub(crate) fn insert_root(&mut self, node: Arc<Node>) {
        debug_assert!(node.handle.is_well_known());
        self.nodes.insert(node.handle, node);
    }

    pub(crate) fn find(&self, handle: ObjectHandle) -> Option<&Arc<Node>> {
        self.nodes.get(&handle)
    }

    pub(crate) fn contains(&self, handle: ObjectHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    pub(crate) fn delete(&mut self, handle: ObjectHandle) -> Option<Arc<Node>> {
        self.nodes.remove(&handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// All nodes in handle order.
    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values()
    }
}
