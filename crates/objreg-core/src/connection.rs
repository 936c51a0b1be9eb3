//! Per-node connection records.
//!
//! A connection is a named, directed link from the owning node (the source)
//! to another live node (the target). The target's incoming count is kept by
//! the registry, not by this set.
//!
//! ```compile_fail
//! use objreg_core::connection::{ConnectionRecord, ConnectionSet};
//! ```

use std::sync::Weak;

use objreg_types::ObjectHandle;

use crate::error::{Entity, RegistryError, RegistryResult};
use crate::node::Node;

/// One named link to another node.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionRecord {
    pub tag: String,
    pub target: ObjectHandle,
    pub(crate) target_node: Weak<Node>,
}

/// Insertion-ordered connections of a single node.
#[derive(Debug, Default)]
pub(crate) struct ConnectionSet {
    entries: Vec<ConnectionRecord>,
}

impl ConnectionSet {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.iter().any(|c| c.tag == tag)
    }

    pub fn add(&mut self, record: ConnectionRecord) -> RegistryResult<()> {
        if self.contains(&record.tag) {
            return Err(RegistryError::exists(Entity::Connection, &record.tag));
        }
        self.entries
            .try_reserve(1)
            .map_err(|_| RegistryError::OutOfMemory)?;
        self.entries.push(record);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&ConnectionRecord> {
        self.entries.iter().find(|c| c.tag == tag)
    }

    pub fn remove(&mut self, tag: &str) -> RegistryResult<ConnectionRecord> {
        let i = self
            .entries
            .iter()
            .position(|c| c.tag == tag)
            .ok_or_else(|| RegistryError::not_found(Entity::Connection, tag))?;
        Ok(self.entries.remove(i))
    }

    /// Tag of the `index`-th connection in insertion order.
    pub fn tag_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|c| c.tag.as_str())
    }

    pub fn first(&self) -> Option<&ConnectionRecord> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.entries.iter()
    }
}
