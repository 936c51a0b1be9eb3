//! The introspection mirror capability.
//!
//! The registry reports every structural and attribute change to a
//! [`ProjectionSink`]. A sink is an observer: its failures are logged by the
//! registry and never undo the mutation that triggered them.
//!
//! Sinks are called while the affected node's lock is held (the parent's
//! lock for node publication), so events arrive in mutation order. A sink
//! must not call back into the registry from these callbacks.

use objreg_types::ObjectHandle;
use thiserror::Error;

/// Errors a sink may report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// The entry to attach to or remove does not exist in the mirror.
    #[error("no such entry: {0}")]
    Missing(String),

    /// An entry with this name already exists in the mirror.
    #[error("entry already exists: {0}")]
    Exists(String),

    /// The sink refused the event.
    #[error("projection rejected event: {0}")]
    Rejected(String),
}

/// A node appeared or disappeared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEvent {
    pub handle: ObjectHandle,
    pub tag: String,
    /// `None` only for the tree root.
    pub parent: Option<ObjectHandle>,
}

/// An attribute appeared or disappeared on `object`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeEvent {
    pub object: ObjectHandle,
    pub tag: String,
    pub type_tag: String,
}

/// A connection from `source` to `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkEvent {
    pub source: ObjectHandle,
    pub source_tag: String,
    pub tag: String,
    pub target: ObjectHandle,
}

impl LinkEvent {
    /// Name of the reciprocal entry published under the target.
    ///
    /// Built from the connection tag, the source tag and the source handle,
    /// so it can be found again on removal.
    pub fn backlink_name(&self) -> String {
        format!(
            "backlink-{}-from-{}-{}",
            self.tag, self.source_tag, self.source
        )
    }
}

/// An instance was linked to, or unlinked from, its type object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeLinkEvent {
    pub instance: ObjectHandle,
    pub instance_tag: String,
    pub type_handle: ObjectHandle,
    pub type_tag: String,
}

impl TypeLinkEvent {
    /// Name of the entry under the instance pointing at the type.
    pub fn type_link_name(&self) -> &str {
        &self.type_tag
    }

    /// Name of the entry under the type pointing at the instance.
    pub fn instance_link_name(&self) -> String {
        format!("inst_{}", self.instance_tag)
    }
}

/// Receiver of registry change events.
pub trait ProjectionSink: Send + Sync {
    fn publish_node(&self, event: &NodeEvent) -> Result<(), ProjectionError>;
    fn unpublish_node(&self, event: &NodeEvent) -> Result<(), ProjectionError>;

    fn publish_attribute(&self, event: &AttributeEvent) -> Result<(), ProjectionError>;
    fn unpublish_attribute(&self, event: &AttributeEvent) -> Result<(), ProjectionError>;

    /// Publish the forward link under the source and the back-link under the
    /// target.
    fn publish_connection(&self, event: &LinkEvent) -> Result<(), ProjectionError>;
    fn unpublish_connection(&self, event: &LinkEvent) -> Result<(), ProjectionError>;

    fn publish_type_link(&self, event: &TypeLinkEvent) -> Result<(), ProjectionError>;
    fn unpublish_type_link(&self, event: &TypeLinkEvent) -> Result<(), ProjectionError>;
}

/// A sink that discards every event. Used when the mirror is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProjection;

impl ProjectionSink for NullProjection {
    fn publish_node(&self, _event: &NodeEvent) -> Result<(), ProjectionError> {
        Ok(())
    }

    fn unpublish_node(&self, _event: &NodeEvent) -> Result<(), ProjectionError> {
        Ok(())
    }

    fn publish_attribute(&self, _event: &AttributeEvent) -> Result<(), ProjectionError> {
        Ok(())
    }

    fn unpublish_attribute(&self, _event: &AttributeEvent) -> Result<(), ProjectionError> {
        Ok(())
    }

    fn publish_connection(&self, _event: &LinkEvent) -> Result<(), ProjectionError> {
        Ok(())
    }

    fn unpublish_connection(&self, _event: &LinkEvent) -> Result<(), ProjectionError> {
        Ok(())
    }

    fn publish_type_link(&self, _event: &TypeLinkEvent) -> Result<(), ProjectionError> {
        Ok(())
    }

    fn unpublish_type_link(&self, _event: &TypeLinkEvent) -> Result<(), ProjectionError> {
        Ok(())
    }
}
