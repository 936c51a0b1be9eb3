//! Per-node attribute records.
//!
//! An [`AttributeSet`] keeps a node's attributes in insertion order. Tags are
//! unique within the set. The set performs no locking of its own; it lives
//! inside the owning node's state and is only touched under that node's lock.
//! It is internal to the crate; callers go through the registry:
//!
//! ```compile_fail
//! use objreg_core::attribute::AttributeSet;
//! ```

use bytes::Bytes;

use crate::error::{Entity, RegistryError, RegistryResult};

/// One named, typed payload attached to a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AttributeRecord {
    pub tag: String,
    pub type_tag: String,
    pub payload: Bytes,
}

impl AttributeRecord {
    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Copy a caller's payload into registry-owned storage.
pub(crate) fn copy_payload(payload: &[u8]) -> RegistryResult<Bytes> {
    let mut owned = Vec::new();
    owned
        .try_reserve_exact(payload.len())
        .map_err(|_| RegistryError::OutOfMemory)?;
    owned.extend_from_slice(payload);
    Ok(Bytes::from(owned))
}

/// Insertion-ordered attributes of a single node.
#[derive(Debug, Default)]
pub(crate) struct AttributeSet {
    entries: Vec<AttributeRecord>,
}

impl AttributeSet {
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

    fn position(&self, tag: &str) -> Option<usize> {
        self.entries.iter().position(|a| a.tag == tag)
    }

    /// Add a new attribute. Never replaces an existing one.
    pub fn add(&mut self, tag: &str, type_tag: &str, payload: &[u8]) -> RegistryResult<()> {
        if self.position(tag).is_some() {
            return Err(RegistryError::exists(Entity::Attribute, tag));
        }
        let payload = copy_payload(payload)?;
        self.entries
            .try_reserve(1)
            .map_err(|_| RegistryError::OutOfMemory)?;
        self.entries.push(AttributeRecord {
            tag: tag.to_string(),
            type_tag: type_tag.to_string(),
            payload,
        });
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&AttributeRecord> {
        self.position(tag).map(|i| &self.entries[i])
    }

    /// Replace the type and payload of an existing attribute.
    pub fn update(&mut self, tag: &str, type_tag: &str, payload: &[u8]) -> RegistryResult<()> {
        let i = self
            .position(tag)
            .ok_or_else(|| RegistryError::not_found(Entity::Attribute, tag))?;
        let payload = copy_payload(payload)?;
        let record = &mut self.entries[i];
        record.type_tag = type_tag.to_string();
        record.payload = payload;
        Ok(())
    }

    /// Replace only the payload, provided the record still holds exactly
    /// `current` under `type_tag`.
    ///
    /// Returns `false` without storing anything if the record was updated
    /// since `current` was read.
    pub fn replace_payload(
        &mut self,
        tag: &str,
        type_tag: &str,
        current: &Bytes,
        payload: Bytes,
    ) -> RegistryResult<bool> {
        let i = self
            .position(tag)
            .ok_or_else(|| RegistryError::not_found(Entity::Attribute, tag))?;
        let record = &mut self.entries[i];
        let unchanged = record.type_tag == type_tag
            && record.payload.len() == current.len()
            && record.payload.as_ptr() == current.as_ptr();
        if unchanged {
            record.payload = payload;
        }
        Ok(unchanged)
    }

    pub fn remove(&mut self, tag: &str) -> RegistryResult<AttributeRecord> {
        let i = self
            .position(tag)
            .ok_or_else(|| RegistryError::not_found(Entity::Attribute, tag))?;
        Ok(self.entries.remove(i))
    }

    /// Tag of the `index`-th attribute in insertion order.
    pub fn tag_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|a| a.tag.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeRecord> {
        self.entries.iter()
    }

    /// Remove every attribute, returning them in insertion order.
    pub fn take_all(&mut self) -> Vec<AttributeRecord> {
        std::mem::take(&mut self.entries)
    }
}
