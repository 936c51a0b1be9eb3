//! The registry facade.
//!
//! [`Registry`] is the context object every operation goes through. It owns
//! the structural lock (guarding the handle index), the data-type table and
//! the projection sink.
//!
//! Lock order: the structural lock may be taken first and one node lock
//! after it. No operation takes the structural lock while holding a node
//! lock, and at most one node lock is held at a time.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use objreg_types::tag::truncate_to;
use objreg_types::{validate_tag, MemberKinds, ObjectHandle, MAX_TAG_LEN};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::connection::ConnectionRecord;
use crate::datatype::{DataType, DataTypeTable};
use crate::error::{Entity, ErrorKind, RegistryError, RegistryResult};
use crate::iterator::{Member, RegistryIterator};
use crate::node::{ActivePin, Node, TypeRef};
use crate::projection::{
    AttributeEvent, LinkEvent, NodeEvent, NullProjection, ProjectionError, ProjectionSink,
    TypeLinkEvent,
};
use crate::snapshot::{NodeSnapshot, RegistrySnapshot};
use crate::store::NodeIndex;

/// An attribute's type and a copy of its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeValue {
    pub type_tag: String,
    pub payload: Bytes,
}

impl AttributeValue {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Result of a buffer-oriented attribute read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeInfo {
    pub type_tag: String,
    /// Stored payload size. For a successful copy this many bytes were
    /// written to the front of the caller's buffer.
    pub size: usize,
}

/// Tag given to an object registered without one: the parent's tag,
/// shortened as needed, followed by the handle in hex.
pub fn synthesize_tag(parent_tag: &str, object: ObjectHandle) -> String {
    let hex = object.to_hex();
    let room = MAX_TAG_LEN.saturating_sub(hex.len());
    format!("{}{}", truncate_to(parent_tag, room), hex)
}

fn require(handle: ObjectHandle) -> RegistryResult<ObjectHandle> {
    Ok(handle.non_null()?)
}

/// A concurrent registry of objects, their attributes and connections.
pub struct Registry {
    structure: Mutex<NodeIndex>,
    data_types: DataTypeTable,
    sink: Arc<dyn ProjectionSink>,
    config: RegistryConfig,
}

impl Registry {
    /// Create a registry with the default configuration and no mirror.
    pub fn new() -> Self {
        Self::build(RegistryConfig::default(), Arc::new(NullProjection))
    }

    /// Create a registry with `config` and no mirror.
    pub fn with_config(config: RegistryConfig) -> RegistryResult<Self> {
        config.validate()?;
        Ok(Self::build(config, Arc::new(NullProjection)))
    }

    /// Create a registry that reports changes to `sink`.
    ///
    /// The sink is ignored when `config.projection.enabled` is `false`.
    pub fn with_projection(
        config: RegistryConfig,
        sink: Arc<dyn ProjectionSink>,
    ) -> RegistryResult<Self> {
        config.validate()?;
        let sink = if config.projection.enabled {
            sink
        } else {
            Arc::new(NullProjection)
        };
        Ok(Self::build(config, sink))
    }

    fn build(config: RegistryConfig, sink: Arc<dyn ProjectionSink>) -> Self {
        let registry = Self {
            structure: Mutex::new(NodeIndex::new()),
            data_types: DataTypeTable::new(),
            sink,
            config,
        };
        registry.install_roots();
        registry
    }

    fn install_roots(&self) {
        let root = Arc::new(Node::new(
            ObjectHandle::ROOT,
            self.config.root_tag.clone(),
            None,
            None,
        ));
        let mut index = self.index();
        let mut root_state = root.lock();
        self.report("publish node", self.sink.publish_node(&node_event(&root)));
        for (handle, tag) in [
            (ObjectHandle::TYPES, &self.config.types_tag),
            (ObjectHandle::INSTANCES, &self.config.instances_tag),
        ] {
            let node = Arc::new(Node::new(handle, tag.clone(), Some(&root), None));
            self.report("publish node", self.sink.publish_node(&node_event(&node)));
            root_state.children.push(Arc::clone(&node));
            index.insert_root(node);
        }
        drop(root_state);
        index.insert_root(root);
    }

    /// The configuration this registry was built with.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn index(&self) -> MutexGuard<'_, NodeIndex> {
        self.structure.lock().expect("structural lock poisoned")
    }

    fn report(&self, action: &str, result: Result<(), ProjectionError>) {
        if let Err(error) = result {
            warn!(action, %error, "projection update failed");
        }
    }

    /// Look `object` up and perform the entry report on it.
    fn enter(&self, object: ObjectHandle) -> RegistryResult<ActivePin> {
        let object = require(object)?;
        let index = self.index();
        let node = index.find(object).ok_or_else(|| {
            debug!(%object, "object not found");
            RegistryError::ObjectNotFound(object)
        })?;
        node.enter()
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Register `object` as a child of `parent`.
    ///
    /// Without a tag, one is synthesized from the parent's tag and the handle.
    pub fn add_object(
        &self,
        parent: ObjectHandle,
        tag: Option<&str>,
        object: ObjectHandle,
    ) -> RegistryResult<()> {
        self.add_instance(parent, None, tag, object)
    }

    /// Register `object` as a child of `parent`, optionally recording
    /// `type_object` as its type. The type object must be live.
    pub fn add_instance(
        &self,
        parent: ObjectHandle,
        type_object: Option<ObjectHandle>,
        tag: Option<&str>,
        object: ObjectHandle,
    ) -> RegistryResult<()> {
        let object = require(object)?;
        if let Some(tag) = tag {
            validate_tag(tag)?;
        }

        let parent_pin = self.enter(parent)?;
        let type_ref = match type_object {
            Some(handle) => {
                let type_pin = self.enter(handle)?;
                Some(TypeRef {
                    handle,
                    tag: type_pin.node().tag.clone(),
                })
            }
            None => None,
        };

        let parent_node = Arc::clone(parent_pin.node());
        let tag = match tag {
            Some(tag) => tag.to_string(),
            None => synthesize_tag(&parent_node.tag, object),
        };
        let node = Arc::new(Node::new(object, tag, Some(&parent_node), type_ref));

        let mut index = self.index();
        if index.contains(object) {
            debug!(%object, "duplicate object handle");
            return Err(RegistryError::DuplicateObject(object));
        }
        let mut parent_state = parent_node.lock();
        if parent_state.deletion_started {
            return Err(RegistryError::Cancelled(parent_node.handle));
        }
        if parent_state.child_by_tag(&node.tag).is_some() {
            return Err(RegistryError::exists(Entity::Object, &node.tag));
        }
        parent_state
            .children
            .try_reserve(1)
            .map_err(|_| RegistryError::OutOfMemory)?;
        index.insert(Arc::clone(&node))?;
        parent_state.children.push(Arc::clone(&node));

        self.report("publish node", self.sink.publish_node(&node_event(&node)));
        if let Some(event) = type_link_event(&node) {
            self.report("publish type link", self.sink.publish_type_link(&event));
        }
        debug!(%object, parent = %parent_node.handle, tag = %node.tag, "object added");
        Ok(())
    }

    /// Unregister `object`.
    ///
    /// Fails with `Busy` while the object has children, connections or
    /// incoming connections. Otherwise blocks until every operation already
    /// in progress on the object has finished, then unlinks it together with
    /// its attributes.
    pub fn remove_object(&self, object: ObjectHandle) -> RegistryResult<()> {
        let object = require(object)?;
        if object.is_well_known() {
            return Err(RegistryError::InvalidArgument(format!(
                "well-known object {object} cannot be removed"
            )));
        }

        let node = {
            let index = self.index();
            let node = index
                .find(object)
                .cloned()
                .ok_or(RegistryError::ObjectNotFound(object))?;
            node.begin_removal()?;
            node
        };

        node.wait_drained();

        {
            let mut state = node.lock();
            for record in state.attributes.take_all() {
                let event = AttributeEvent {
                    object,
                    tag: record.tag,
                    type_tag: record.type_tag,
                };
                self.report("unpublish attribute", self.sink.unpublish_attribute(&event));
            }
            if let Some(event) = type_link_event(&node) {
                self.report("unpublish type link", self.sink.unpublish_type_link(&event));
            }
        }

        match node.parent_node() {
            Some(parent) => {
                let mut parent_state = parent.lock();
                parent_state.children.retain(|c| !Arc::ptr_eq(c, &node));
                self.report("unpublish node", self.sink.unpublish_node(&node_event(&node)));
            }
            None => {
                self.report("unpublish node", self.sink.unpublish_node(&node_event(&node)));
            }
        }

        self.index().delete(object);
        node.finish_removal();
        debug!(%object, tag = %node.tag, "object removed");
        Ok(())
    }

    pub fn get_object_tag(&self, object: ObjectHandle) -> RegistryResult<String> {
        let pin = self.enter(object)?;
        Ok(pin.node().tag.clone())
    }

    /// Find the child of `parent` tagged `tag`.
    pub fn get_object(&self, parent: ObjectHandle, tag: &str) -> RegistryResult<ObjectHandle> {
        validate_tag(tag)?;
        let pin = self.enter(parent)?;
        let state = pin.node().lock();
        state
            .child_by_tag(tag)
            .map(|c| c.handle)
            .ok_or_else(|| RegistryError::not_found(Entity::Object, tag))
    }

    /// The parent of `object`. The tree root has none.
    pub fn get_object_parent(&self, object: ObjectHandle) -> RegistryResult<ObjectHandle> {
        let pin = self.enter(object)?;
        pin.node().parent_handle.ok_or_else(|| {
            RegistryError::InvalidArgument(format!("object {object} has no parent"))
        })
    }

    /// The type object `object` was registered against, if any.
    pub fn get_object_type(&self, object: ObjectHandle) -> RegistryResult<Option<ObjectHandle>> {
        let pin = self.enter(object)?;
        Ok(pin.node().type_ref.as_ref().map(|t| t.handle))
    }

    /// Returns `true` if `object` is registered (including objects whose
    /// removal is in progress).
    pub fn contains(&self, object: ObjectHandle) -> bool {
        self.index().contains(object)
    }

    /// Number of registered objects, including the well-known roots.
    pub fn len(&self) -> usize {
        self.index().len()
    }

    /// Returns `true` if only the well-known roots are registered.
    pub fn is_empty(&self) -> bool {
        self.index().nodes().all(|n| n.handle.is_well_known())
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    fn check_attribute_args(tag: &str, type_tag: &str, payload: &[u8]) -> RegistryResult<()> {
        validate_tag(tag)?;
        validate_tag(type_tag)?;
        if payload.is_empty() {
            return Err(RegistryError::InvalidArgument(format!(
                "attribute {tag:?} has an empty payload"
            )));
        }
        Ok(())
    }

    /// Attach a new attribute to `object`. The payload is copied.
    pub fn add_attribute(
        &self,
        object: ObjectHandle,
        tag: &str,
        type_tag: &str,
        payload: &[u8],
    ) -> RegistryResult<()> {
        Self::check_attribute_args(tag, type_tag, payload)?;
        let pin = self.enter(object)?;
        let node = pin.node();
        let mut state = node.lock();
        if state.deletion_started {
            return Err(RegistryError::Cancelled(node.handle));
        }
        state.attributes.add(tag, type_tag, payload)?;
        let event = AttributeEvent {
            object: node.handle,
            tag: tag.to_string(),
            type_tag: type_tag.to_string(),
        };
        self.report("publish attribute", self.sink.publish_attribute(&event));
        debug!(object = %node.handle, tag, type_tag, size = payload.len(), "attribute added");
        Ok(())
    }

    /// Replace the type and payload of an existing attribute.
    pub fn update_attribute(
        &self,
        object: ObjectHandle,
        tag: &str,
        type_tag: &str,
        payload: &[u8],
    ) -> RegistryResult<()> {
        Self::check_attribute_args(tag, type_tag, payload)?;
        let pin = self.enter(object)?;
        let node = pin.node();
        let mut state = node.lock();
        if state.deletion_started {
            return Err(RegistryError::Cancelled(node.handle));
        }
        let previous = state
            .attributes
            .get(tag)
            .map(|a| a.type_tag.clone())
            .ok_or_else(|| RegistryError::not_found(Entity::Attribute, tag))?;
        state.attributes.update(tag, type_tag, payload)?;
        if previous != type_tag {
            let old = AttributeEvent {
                object: node.handle,
                tag: tag.to_string(),
                type_tag: previous,
            };
            self.report("unpublish attribute", self.sink.unpublish_attribute(&old));
            let new = AttributeEvent {
                type_tag: type_tag.to_string(),
                ..old
            };
            self.report("publish attribute", self.sink.publish_attribute(&new));
        }
        debug!(object = %node.handle, tag, type_tag, size = payload.len(), "attribute updated");
        Ok(())
    }

    /// The type and a copy of the payload of an attribute.
    pub fn get_attribute(&self, object: ObjectHandle, tag: &str) -> RegistryResult<AttributeValue> {
        validate_tag(tag)?;
        let pin = self.enter(object)?;
        let state = pin.node().lock();
        let record = state
            .attributes
            .get(tag)
            .ok_or_else(|| RegistryError::not_found(Entity::Attribute, tag))?;
        Ok(AttributeValue {
            type_tag: record.type_tag.clone(),
            payload: record.payload.clone(),
        })
    }

    /// Copy an attribute's payload into `buffer`.
    ///
    /// With `None` only the size and type are returned. A buffer shorter
    /// than the payload fails with `InsufficientBuffer`, carrying the stored
    /// size; nothing is copied in that case.
    pub fn read_attribute(
        &self,
        object: ObjectHandle,
        tag: &str,
        buffer: Option<&mut [u8]>,
    ) -> RegistryResult<AttributeInfo> {
        validate_tag(tag)?;
        let pin = self.enter(object)?;
        let state = pin.node().lock();
        let record = state
            .attributes
            .get(tag)
            .ok_or_else(|| RegistryError::not_found(Entity::Attribute, tag))?;
        let size = record.size();
        if let Some(buffer) = buffer {
            if buffer.len() < size {
                return Err(RegistryError::InsufficientBuffer {
                    required: size,
                    provided: buffer.len(),
                });
            }
            buffer[..size].copy_from_slice(&record.payload);
        }
        Ok(AttributeInfo {
            type_tag: record.type_tag.clone(),
            size,
        })
    }

    pub fn remove_attribute(&self, object: ObjectHandle, tag: &str) -> RegistryResult<()> {
        validate_tag(tag)?;
        let pin = self.enter(object)?;
        let node = pin.node();
        let mut state = node.lock();
        let record = state.attributes.remove(tag)?;
        let event = AttributeEvent {
            object: node.handle,
            tag: record.tag,
            type_tag: record.type_tag,
        };
        self.report("unpublish attribute", self.sink.unpublish_attribute(&event));
        debug!(object = %node.handle, tag, "attribute removed");
        Ok(())
    }

    /// Render an attribute as text through its data type.
    pub fn format_attribute(&self, object: ObjectHandle, tag: &str) -> RegistryResult<String> {
        let value = self.get_attribute(object, tag)?;
        let def = self.data_types.get(&value.type_tag)?;
        def.format(object, &value.payload)
            .map_err(|source| RegistryError::DataType {
                tag: value.type_tag,
                source,
            })
    }

    /// Parse `text` into an attribute's payload through its data type.
    ///
    /// The payload keeps its size. The callback runs without any registry
    /// lock held; if the attribute is updated meanwhile, the parse is redone
    /// against the new value so a concurrent update is never overwritten
    /// with a stale one.
    pub fn parse_attribute(
        &self,
        object: ObjectHandle,
        tag: &str,
        text: &str,
    ) -> RegistryResult<()> {
        validate_tag(tag)?;
        let pin = self.enter(object)?;
        let node = pin.node();
        loop {
            let (type_tag, current) = {
                let state = node.lock();
                let record = state
                    .attributes
                    .get(tag)
                    .ok_or_else(|| RegistryError::not_found(Entity::Attribute, tag))?;
                (record.type_tag.clone(), record.payload.clone())
            };
            let def = self.data_types.get(&type_tag)?;
            let mut scratch = current.to_vec();
            def.parse(object, &mut scratch, text)
                .map_err(|source| RegistryError::DataType {
                    tag: type_tag.clone(),
                    source,
                })?;

            let mut state = node.lock();
            if state.deletion_started {
                return Err(RegistryError::Cancelled(node.handle));
            }
            if state
                .attributes
                .replace_payload(tag, &type_tag, &current, Bytes::from(scratch))?
            {
                debug!(object = %node.handle, tag, "attribute parsed from text");
                return Ok(());
            }
            debug!(object = %node.handle, tag, "attribute changed during parse, retrying");
        }
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Connect `object` to `target` under `tag`.
    ///
    /// The target's incoming count is raised for as long as the connection
    /// exists, which keeps both endpoints from being removed.
    pub fn add_connection(
        &self,
        object: ObjectHandle,
        tag: &str,
        target: ObjectHandle,
    ) -> RegistryResult<()> {
        validate_tag(tag)?;
        let target = require(target)?;
        let pin = self.enter(object)?;
        let source = pin.node();

        {
            let state = source.lock();
            if state.deletion_started {
                return Err(RegistryError::Cancelled(source.handle));
            }
            if state.connections.contains(tag) {
                return Err(RegistryError::exists(Entity::Connection, tag));
            }
        }

        let target_node = {
            let index = self.index();
            let node = index.find(target).cloned().ok_or_else(|| {
                debug!(%target, "connection target not found");
                RegistryError::ObjectNotFound(target)
            })?;
            node.acquire_incoming()?;
            node
        };

        let mut state = source.lock();
        let added = if state.deletion_started {
            Err(RegistryError::Cancelled(source.handle))
        } else {
            state.connections.add(ConnectionRecord {
                tag: tag.to_string(),
                target,
                target_node: Arc::downgrade(&target_node),
            })
        };
        if let Err(e) = added {
            drop(state);
            target_node.release_incoming();
            return Err(e);
        }
        let event = LinkEvent {
            source: source.handle,
            source_tag: source.tag.clone(),
            tag: tag.to_string(),
            target,
        };
        self.report("publish connection", self.sink.publish_connection(&event));
        debug!(object = %source.handle, tag, %target, "connection added");
        Ok(())
    }

    /// The target of the connection `tag` on `object`.
    pub fn get_connection(&self, object: ObjectHandle, tag: &str) -> RegistryResult<ObjectHandle> {
        validate_tag(tag)?;
        let pin = self.enter(object)?;
        let state = pin.node().lock();
        state
            .connections
            .get(tag)
            .map(|c| c.target)
            .ok_or_else(|| RegistryError::not_found(Entity::Connection, tag))
    }

    pub fn remove_connection(&self, object: ObjectHandle, tag: &str) -> RegistryResult<()> {
        validate_tag(tag)?;
        let pin = self.enter(object)?;
        let source = pin.node();
        let record = {
            let mut state = source.lock();
            let record = state.connections.remove(tag)?;
            let event = LinkEvent {
                source: source.handle,
                source_tag: source.tag.clone(),
                tag: record.tag.clone(),
                target: record.target,
            };
            self.report("unpublish connection", self.sink.unpublish_connection(&event));
            record
        };
        match record.target_node.upgrade() {
            Some(target) => target.release_incoming(),
            None => warn!(object = %source.handle, tag, target = %record.target, "connection target already gone"),
        }
        debug!(object = %source.handle, tag, target = %record.target, "connection removed");
        Ok(())
    }

    /// Number of connections currently targeting `object`.
    pub fn incoming_connections(&self, object: ObjectHandle) -> RegistryResult<usize> {
        let pin = self.enter(object)?;
        let incoming = pin.node().lock().incoming;
        Ok(incoming)
    }

    // ------------------------------------------------------------------
    // Data types
    // ------------------------------------------------------------------

    pub fn add_data_type(&self, tag: &str, def: Arc<dyn DataType>) -> RegistryResult<()> {
        self.data_types.add(tag, def)
    }

    pub fn get_data_type(&self, tag: &str) -> RegistryResult<Arc<dyn DataType>> {
        self.data_types.get(tag)
    }

    /// Remove a data type. Built-in types are never found.
    pub fn remove_data_type(&self, tag: &str) -> RegistryResult<()> {
        self.data_types.remove(tag)
    }

    pub fn data_type_tags(&self) -> Vec<String> {
        self.data_types.tags()
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Start enumerating the members of `object` selected by `kinds`.
    ///
    /// The iterator keeps `object` from being removed until it is passed to
    /// [`delete_iterator`](Self::delete_iterator) or dropped.
    pub fn new_iterator(
        &self,
        object: ObjectHandle,
        kinds: MemberKinds,
    ) -> RegistryResult<RegistryIterator> {
        if kinds.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "iterator mask selects nothing".into(),
            ));
        }
        let pin = self.enter(object)?;
        Ok(RegistryIterator::new(pin, kinds))
    }

    pub fn iterator_next(&self, iter: &mut RegistryIterator) -> RegistryResult<Option<Member>> {
        Ok(iter.next_member())
    }

    pub fn delete_iterator(&self, iter: RegistryIterator) -> RegistryResult<()> {
        iter.close();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Diagnostics and teardown
    // ------------------------------------------------------------------

    /// State of every registered object, in handle order.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let nodes: Vec<Arc<Node>> = self.index().nodes().cloned().collect();
        RegistrySnapshot {
            nodes: nodes.iter().map(|n| NodeSnapshot::capture(n)).collect(),
        }
    }

    /// Human-readable rendering of [`snapshot`](Self::snapshot).
    pub fn dump_registry(&self) -> String {
        self.snapshot().to_string()
    }

    /// Remove every connection, then every object except the well-known
    /// roots, deepest first.
    ///
    /// Objects another thread is already removing are waited for on their
    /// condition variable. Fails with `Busy` if a pass makes no progress and
    /// no such removal is pending, which happens when another thread keeps
    /// adding children or connections.
    pub fn clear(&self) -> RegistryResult<()> {
        loop {
            let nodes: Vec<Arc<Node>> = self.index().nodes().cloned().collect();
            for node in &nodes {
                let tags: Vec<String> = node
                    .lock()
                    .connections
                    .iter()
                    .map(|c| c.tag.clone())
                    .collect();
                for tag in tags {
                    tolerate(self.remove_connection(node.handle, &tag))?;
                }
            }

            let pending: Vec<&Arc<Node>> = nodes
                .iter()
                .filter(|n| !n.handle.is_well_known())
                .collect();
            if pending.is_empty() {
                debug!("registry cleared");
                return Ok(());
            }

            let mut progress = false;
            let mut last_busy = None;
            let mut in_flight = Vec::new();
            for node in pending {
                match self.remove_object(node.handle) {
                    Ok(()) => progress = true,
                    Err(e) if e.kind() == ErrorKind::Busy => last_busy = Some(e),
                    Err(e) if e.kind() == ErrorKind::Cancelled => in_flight.push(node),
                    other => tolerate(other)?,
                }
            }
            if progress {
                continue;
            }
            if !in_flight.is_empty() {
                for node in in_flight {
                    debug!(object = %node.handle, "waiting for concurrent removal");
                    node.wait_removed();
                }
                continue;
            }
            if let Some(e) = last_busy {
                return Err(e);
            }
        }
    }
}

/// Treat a concurrent removal as success during teardown.
fn tolerate(result: RegistryResult<()>) -> RegistryResult<()> {
    match result {
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::Cancelled) => Ok(()),
        other => other,
    }
}

fn node_event(node: &Node) -> NodeEvent {
    NodeEvent {
        handle: node.handle,
        tag: node.tag.clone(),
        parent: node.parent_handle,
    }
}

fn type_link_event(node: &Node) -> Option<TypeLinkEvent> {
    node.type_ref.as_ref().map(|t| TypeLinkEvent {
        instance: node.handle,
        instance_tag: node.tag.clone(),
        type_handle: t.handle,
        type_tag: t.tag.clone(),
    })
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("objects", &self.len())
            .field("data_types", &self.data_types)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{DataTypeError, FnDataType};
    use objreg_types::MemberKind;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    const INST: ObjectHandle = ObjectHandle::INSTANCES;

    fn h(raw: u64) -> ObjectHandle {
        ObjectHandle::from_raw(raw)
    }

    fn kind<T>(result: RegistryResult<T>) -> ErrorKind {
        match result {
            Ok(_) => panic!("expected an error"),
            Err(e) => e.kind(),
        }
    }

    /// Records every event as a short line.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn push(&self, line: String) -> Result<(), ProjectionError> {
            self.events.lock().unwrap().push(line);
            Ok(())
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl ProjectionSink for RecordingSink {
        fn publish_node(&self, e: &NodeEvent) -> Result<(), ProjectionError> {
            self.push(format!("+node {}", e.tag))
        }
        fn unpublish_node(&self, e: &NodeEvent) -> Result<(), ProjectionError> {
            self.push(format!("-node {}", e.tag))
        }
        fn publish_attribute(&self, e: &AttributeEvent) -> Result<(), ProjectionError> {
            self.push(format!("+attr {}:{}", e.tag, e.type_tag))
        }
        fn unpublish_attribute(&self, e: &AttributeEvent) -> Result<(), ProjectionError> {
            self.push(format!("-attr {}:{}", e.tag, e.type_tag))
        }
        fn publish_connection(&self, e: &LinkEvent) -> Result<(), ProjectionError> {
            self.push(format!("+link {} {}", e.tag, e.backlink_name()))
        }
        fn unpublish_connection(&self, e: &LinkEvent) -> Result<(), ProjectionError> {
            self.push(format!("-link {} {}", e.tag, e.backlink_name()))
        }
        fn publish_type_link(&self, e: &TypeLinkEvent) -> Result<(), ProjectionError> {
            self.push(format!("+type {} {}", e.type_link_name(), e.instance_link_name()))
        }
        fn unpublish_type_link(&self, e: &TypeLinkEvent) -> Result<(), ProjectionError> {
            self.push(format!("-type {} {}", e.type_link_name(), e.instance_link_name()))
        }
    }

    struct FailingSink;

    impl ProjectionSink for FailingSink {
        fn publish_node(&self, _: &NodeEvent) -> Result<(), ProjectionError> {
            Err(ProjectionError::Rejected("node".into()))
        }
        fn unpublish_node(&self, _: &NodeEvent) -> Result<(), ProjectionError> {
            Err(ProjectionError::Rejected("node".into()))
        }
        fn publish_attribute(&self, _: &AttributeEvent) -> Result<(), ProjectionError> {
            Err(ProjectionError::Rejected("attribute".into()))
        }
        fn unpublish_attribute(&self, _: &AttributeEvent) -> Result<(), ProjectionError> {
            Err(ProjectionError::Rejected("attribute".into()))
        }
        fn publish_connection(&self, _: &LinkEvent) -> Result<(), ProjectionError> {
            Err(ProjectionError::Rejected("link".into()))
        }
        fn unpublish_connection(&self, _: &LinkEvent) -> Result<(), ProjectionError> {
            Err(ProjectionError::Rejected("link".into()))
        }
        fn publish_type_link(&self, _: &TypeLinkEvent) -> Result<(), ProjectionError> {
            Err(ProjectionError::Rejected("type".into()))
        }
        fn unpublish_type_link(&self, _: &TypeLinkEvent) -> Result<(), ProjectionError> {
            Err(ProjectionError::Rejected("type".into()))
        }
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn new_registry_has_roots() {
        let reg = Registry::new();
        assert_eq!(reg.len(), 3);
        assert!(reg.is_empty());
        assert_eq!(reg.get_object_tag(ObjectHandle::ROOT).unwrap(), "registry");
        assert_eq!(reg.get_object_parent(ObjectHandle::TYPES).unwrap(), ObjectHandle::ROOT);
        assert_eq!(reg.get_object_parent(INST).unwrap(), ObjectHandle::ROOT);
        assert_eq!(reg.get_object(ObjectHandle::ROOT, "types").unwrap(), ObjectHandle::TYPES);
        assert_eq!(kind(reg.get_object_parent(ObjectHandle::ROOT)), ErrorKind::InvalidArgument);
    }

    #[test]
    fn configured_root_tags() {
        let config = RegistryConfig {
            root_tag: "top".into(),
            types_tag: "classes".into(),
            instances_tag: "objects".into(),
            ..RegistryConfig::default()
        };
        let reg = Registry::with_config(config).unwrap();
        assert_eq!(reg.get_object_tag(ObjectHandle::ROOT).unwrap(), "top");
        assert_eq!(reg.get_object(ObjectHandle::ROOT, "objects").unwrap(), INST);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = RegistryConfig {
            types_tag: "same".into(),
            instances_tag: "same".into(),
            ..RegistryConfig::default()
        };
        assert_eq!(kind(Registry::with_config(config)), ErrorKind::InvalidArgument);
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    #[test]
    fn lifecycle_scenario() {
        let reg = Registry::new();
        let r = h(0x100);
        let c = h(0x101);
        reg.add_object(INST, Some("r"), r).unwrap();
        reg.add_object(r, Some("c"), c).unwrap();
        reg.add_attribute(c, "x", "uint32", &[0, 0, 0, 42]).unwrap();

        let value = reg.get_attribute(c, "x").unwrap();
        assert_eq!(value.type_tag, "uint32");
        assert_eq!(&value.payload[..], &[0, 0, 0, 42]);
        assert_eq!(value.size(), 4);

        assert_eq!(kind(reg.remove_object(r)), ErrorKind::Busy);
        reg.remove_object(c).unwrap();
        reg.remove_object(r).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn duplicate_handle_is_rejected_anywhere() {
        let reg = Registry::new();
        reg.add_object(INST, Some("a"), h(1)).unwrap();
        let err = reg.add_object(ObjectHandle::TYPES, Some("b"), h(1)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateObject(x) if x == h(1)));
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(reg.get_object_tag(h(1)).unwrap(), "a");
    }

    #[test]
    fn sibling_tags_are_unique() {
        let reg = Registry::new();
        reg.add_object(INST, Some("dup"), h(1)).unwrap();
        assert_eq!(kind(reg.add_object(INST, Some("dup"), h(2))), ErrorKind::AlreadyExists);
        assert!(!reg.contains(h(2)));
        // Same tag under a different parent is fine.
        reg.add_object(h(1), Some("dup"), h(2)).unwrap();
    }

    #[test]
    fn tag_is_synthesized_from_parent() {
        let reg = Registry::new();
        reg.add_object(INST, None, h(0x1f)).unwrap();
        assert_eq!(reg.get_object_tag(h(0x1f)).unwrap(), "instances1f");

        let long = "a".repeat(MAX_TAG_LEN);
        reg.add_object(INST, Some(&long), h(2)).unwrap();
        reg.add_object(h(2), None, h(0xdead_beef)).unwrap();
        let tag = reg.get_object_tag(h(0xdead_beef)).unwrap();
        assert_eq!(tag.len(), MAX_TAG_LEN);
        assert_eq!(tag, format!("{}deadbeef", "a".repeat(23)));
    }

    #[test]
    fn invalid_arguments() {
        let reg = Registry::new();
        assert_eq!(kind(reg.add_object(INST, Some("x"), ObjectHandle::null())), ErrorKind::InvalidArgument);
        assert_eq!(kind(reg.add_object(INST, Some(""), h(1))), ErrorKind::InvalidArgument);
        let long = "t".repeat(MAX_TAG_LEN + 1);
        assert_eq!(kind(reg.add_object(INST, Some(&long), h(1))), ErrorKind::InvalidArgument);
        assert_eq!(kind(reg.remove_object(INST)), ErrorKind::InvalidArgument);
        assert_eq!(kind(reg.remove_object(ObjectHandle::ROOT)), ErrorKind::InvalidArgument);
        assert_eq!(kind(reg.get_object_tag(ObjectHandle::null())), ErrorKind::InvalidArgument);
    }

    #[test]
    fn unknown_objects_are_not_found() {
        let reg = Registry::new();
        assert_eq!(kind(reg.add_object(h(9), Some("x"), h(1))), ErrorKind::NotFound);
        assert_eq!(kind(reg.remove_object(h(9))), ErrorKind::NotFound);
        assert_eq!(kind(reg.get_object_tag(h(9))), ErrorKind::NotFound);
        assert_eq!(kind(reg.get_object(INST, "nope")), ErrorKind::NotFound);
    }

    #[test]
    fn parent_and_lookup_agree() {
        let reg = Registry::new();
        reg.add_object(INST, Some("bus"), h(1)).unwrap();
        reg.add_object(h(1), Some("dev0"), h(2)).unwrap();
        reg.add_object(h(1), Some("dev1"), h(3)).unwrap();
        for (child, tag) in [(h(2), "dev0"), (h(3), "dev1")] {
            assert_eq!(reg.get_object_parent(child).unwrap(), h(1));
            assert_eq!(reg.get_object(h(1), tag).unwrap(), child);
        }
        let snap = reg.snapshot();
        let parent = snap.find(h(1)).unwrap();
        assert_eq!(parent.children.len(), 2);
    }

    #[test]
    fn instances_record_their_type() {
        let reg = Registry::new();
        reg.add_object(ObjectHandle::TYPES, Some("uart"), h(10)).unwrap();
        reg.add_instance(INST, Some(h(10)), Some("uart0"), h(11)).unwrap();
        reg.add_object(INST, Some("plain"), h(12)).unwrap();
        assert_eq!(reg.get_object_type(h(11)).unwrap(), Some(h(10)));
        assert_eq!(reg.get_object_type(h(12)).unwrap(), None);
        assert_eq!(
            kind(reg.add_instance(INST, Some(h(99)), Some("x"), h(13))),
            ErrorKind::NotFound
        );
        assert!(!reg.contains(h(13)));
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    fn with_object() -> Registry {
        let reg = Registry::new();
        reg.add_object(INST, Some("obj"), h(1)).unwrap();
        reg
    }

    #[test]
    fn attribute_add_rules() {
        let reg = with_object();
        reg.add_attribute(h(1), "a", "uint32", &[1, 0, 0, 0]).unwrap();
        assert_eq!(kind(reg.add_attribute(h(1), "a", "uint32", &[2, 0, 0, 0])), ErrorKind::AlreadyExists);
        assert_eq!(kind(reg.add_attribute(h(1), "b", "uint32", &[])), ErrorKind::InvalidArgument);
        let long = "z".repeat(32);
        assert_eq!(kind(reg.add_attribute(h(1), &long, "uint32", &[1])), ErrorKind::InvalidArgument);
        assert_eq!(kind(reg.add_attribute(h(1), "b", &long, &[1])), ErrorKind::InvalidArgument);
        assert_eq!(kind(reg.add_attribute(h(2), "b", "uint32", &[1])), ErrorKind::NotFound);
        // add never clobbers
        assert_eq!(&reg.get_attribute(h(1), "a").unwrap().payload[..], &[1, 0, 0, 0]);
    }

    #[test]
    fn update_replaces_in_place() {
        let reg = with_object();
        assert_eq!(kind(reg.update_attribute(h(1), "a", "uint32", &[1])), ErrorKind::NotFound);
        reg.add_attribute(h(1), "a", "uint32", &[1, 0, 0, 0]).unwrap();
        reg.update_attribute(h(1), "a", "blob", &[9, 9]).unwrap();
        let value = reg.get_attribute(h(1), "a").unwrap();
        assert_eq!(value.type_tag, "blob");
        assert_eq!(&value.payload[..], &[9, 9]);
    }

    #[test]
    fn remove_attribute_then_missing() {
        let reg = with_object();
        reg.add_attribute(h(1), "a", "uint32", &[1, 0, 0, 0]).unwrap();
        reg.remove_attribute(h(1), "a").unwrap();
        assert_eq!(kind(reg.get_attribute(h(1), "a")), ErrorKind::NotFound);
        assert_eq!(kind(reg.remove_attribute(h(1), "a")), ErrorKind::NotFound);
    }

    #[test]
    fn read_attribute_probe_and_copy() {
        let reg = with_object();
        reg.add_attribute(h(1), "a", "uint32", &[4, 3, 2, 1]).unwrap();

        let probe = reg.read_attribute(h(1), "a", None).unwrap();
        assert_eq!(probe, AttributeInfo { type_tag: "uint32".into(), size: 4 });

        let mut small = [0u8; 2];
        let err = reg.read_attribute(h(1), "a", Some(&mut small)).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::InsufficientBuffer { required: 4, provided: 2 }
        ));
        assert_eq!(small, [0, 0]);

        let mut big = [0xffu8; 6];
        let info = reg.read_attribute(h(1), "a", Some(&mut big)).unwrap();
        assert_eq!(info.size, 4);
        assert_eq!(big, [4, 3, 2, 1, 0xff, 0xff]);
    }

    #[test]
    fn attributes_go_away_with_their_object() {
        let reg = with_object();
        reg.add_attribute(h(1), "a", "uint32", &[1, 0, 0, 0]).unwrap();
        reg.remove_object(h(1)).unwrap();
        assert_eq!(kind(reg.get_attribute(h(1), "a")), ErrorKind::NotFound);
    }

    #[test]
    fn format_and_parse_through_builtins() {
        let reg = with_object();
        reg.add_attribute(h(1), "n", "uint32", &42u32.to_ne_bytes()).unwrap();
        assert_eq!(reg.format_attribute(h(1), "n").unwrap(), "42");

        reg.parse_attribute(h(1), "n", "0x10").unwrap();
        assert_eq!(&reg.get_attribute(h(1), "n").unwrap().payload[..], &16u32.to_ne_bytes());

        assert_eq!(kind(reg.parse_attribute(h(1), "n", "bogus")), ErrorKind::InvalidArgument);
        assert_eq!(&reg.get_attribute(h(1), "n").unwrap().payload[..], &16u32.to_ne_bytes());

        reg.add_attribute(h(1), "raw", "unknown", &[1]).unwrap();
        assert_eq!(kind(reg.format_attribute(h(1), "raw")), ErrorKind::NotFound);
    }

    #[test]
    fn custom_data_type() {
        let reg = with_object();
        let flag = FnDataType::new(
            |_, payload: &[u8]| match payload {
                [0] => Ok("off".to_string()),
                [_] => Ok("on".to_string()),
                _ => Err(DataTypeError::Size { expected: "1".into(), actual: payload.len() }),
            },
            |_, payload: &mut [u8], text: &str| {
                payload[0] = u8::from(text.trim() == "on");
                Ok(())
            },
        );
        reg.add_data_type("flag", Arc::new(flag)).unwrap();
        assert_eq!(
            kind(reg.add_data_type("flag", Arc::new(crate::datatype::Int32))),
            ErrorKind::AlreadyExists
        );

        reg.add_attribute(h(1), "enabled", "flag", &[0]).unwrap();
        assert_eq!(reg.format_attribute(h(1), "enabled").unwrap(), "off");
        reg.parse_attribute(h(1), "enabled", "on").unwrap();
        assert_eq!(reg.format_attribute(h(1), "enabled").unwrap(), "on");

        reg.remove_data_type("flag").unwrap();
        assert_eq!(kind(reg.get_data_type("flag")), ErrorKind::NotFound);
        assert_eq!(kind(reg.remove_data_type("flag")), ErrorKind::NotFound);
        assert_eq!(kind(reg.remove_data_type("uint32")), ErrorKind::NotFound);
        assert!(reg.get_data_type("uint32").is_ok());
    }

    #[test]
    fn parse_is_redone_when_attribute_changes_underneath() {
        let reg = Arc::new(with_object());
        let weak = Arc::downgrade(&reg);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fill = FnDataType::new(
            |_, payload: &[u8]| Ok(payload.len().to_string()),
            move |object, payload: &mut [u8], text: &str| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Resize the attribute while the first parse is in flight.
                    let reg = weak.upgrade().unwrap();
                    reg.update_attribute(object, "addr", "fill", &[7; 8]).unwrap();
                }
                payload.fill(text.len() as u8);
                Ok(())
            },
        );
        reg.add_data_type("fill", Arc::new(fill)).unwrap();
        reg.add_attribute(h(1), "addr", "fill", &[0; 4]).unwrap();

        reg.parse_attribute(h(1), "addr", "ab").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let value = reg.get_attribute(h(1), "addr").unwrap();
        assert_eq!(&value.payload[..], &[2; 8]);
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    #[test]
    fn connection_symmetry() {
        let reg = Registry::new();
        reg.add_object(INST, Some("a"), h(1)).unwrap();
        reg.add_object(INST, Some("b"), h(2)).unwrap();
        assert_eq!(reg.incoming_connections(h(2)).unwrap(), 0);

        reg.add_connection(h(1), "peer", h(2)).unwrap();
        assert_eq!(reg.get_connection(h(1), "peer").unwrap(), h(2));
        assert_eq!(reg.incoming_connections(h(2)).unwrap(), 1);

        reg.remove_connection(h(1), "peer").unwrap();
        assert_eq!(kind(reg.get_connection(h(1), "peer")), ErrorKind::NotFound);
        assert_eq!(reg.incoming_connections(h(2)).unwrap(), 0);
    }

    #[test]
    fn connection_errors_leave_counts_alone() {
        let reg = Registry::new();
        reg.add_object(INST, Some("a"), h(1)).unwrap();
        reg.add_object(INST, Some("b"), h(2)).unwrap();
        reg.add_connection(h(1), "peer", h(2)).unwrap();

        assert_eq!(kind(reg.add_connection(h(1), "peer", h(2))), ErrorKind::AlreadyExists);
        assert_eq!(kind(reg.add_connection(h(1), "other", h(9))), ErrorKind::NotFound);
        assert_eq!(kind(reg.remove_connection(h(1), "missing")), ErrorKind::NotFound);
        assert_eq!(reg.incoming_connections(h(2)).unwrap(), 1);
        assert_eq!(kind(reg.get_connection(h(1), "other")), ErrorKind::NotFound);
    }

    #[test]
    fn connections_block_removal_of_both_ends() {
        let reg = Registry::new();
        reg.add_object(INST, Some("a"), h(1)).unwrap();
        reg.add_object(INST, Some("b"), h(2)).unwrap();
        reg.add_connection(h(1), "peer", h(2)).unwrap();

        assert_eq!(kind(reg.remove_object(h(1))), ErrorKind::Busy);
        assert_eq!(kind(reg.remove_object(h(2))), ErrorKind::Busy);

        reg.remove_connection(h(1), "peer").unwrap();
        reg.remove_object(h(2)).unwrap();
        reg.remove_object(h(1)).unwrap();
    }

    #[test]
    fn self_connection() {
        let reg = with_object();
        reg.add_connection(h(1), "me", h(1)).unwrap();
        assert_eq!(reg.incoming_connections(h(1)).unwrap(), 1);
        assert_eq!(kind(reg.add_connection(h(1), "me", h(1))), ErrorKind::AlreadyExists);
        assert_eq!(reg.incoming_connections(h(1)).unwrap(), 1);
        assert_eq!(kind(reg.remove_object(h(1))), ErrorKind::Busy);
        reg.remove_connection(h(1), "me").unwrap();
        reg.remove_object(h(1)).unwrap();
    }

    // -----------------------------------------------------------------------
    // Iteration
    // -----------------------------------------------------------------------

    fn populated() -> Registry {
        let reg = with_object();
        reg.add_object(h(1), Some("c0"), h(2)).unwrap();
        reg.add_object(h(1), Some("c1"), h(3)).unwrap();
        for tag in ["x", "y", "z"] {
            reg.add_attribute(h(1), tag, "uint32", &[0, 0, 0, 0]).unwrap();
        }
        reg.add_connection(h(1), "link", h(2)).unwrap();
        reg
    }

    #[test]
    fn iterator_visits_everything_in_order() {
        let reg = populated();
        let mut iter = reg.new_iterator(h(1), MemberKinds::ALL).unwrap();
        let mut seen = Vec::new();
        while let Some(member) = reg.iterator_next(&mut iter).unwrap() {
            seen.push((member.tag, member.kind));
        }
        assert_eq!(
            seen,
            vec![
                ("c0".to_string(), MemberKind::Object),
                ("c1".to_string(), MemberKind::Object),
                ("x".to_string(), MemberKind::Attribute),
                ("y".to_string(), MemberKind::Attribute),
                ("z".to_string(), MemberKind::Attribute),
                ("link".to_string(), MemberKind::Connection),
            ]
        );
        assert!(reg.iterator_next(&mut iter).unwrap().is_none());
        reg.delete_iterator(iter).unwrap();
    }

    #[test]
    fn iterator_respects_mask() {
        let reg = populated();
        let attrs: Vec<_> = reg
            .new_iterator(h(1), MemberKinds::ATTRIBUTES)
            .unwrap()
            .map(|m| m.tag)
            .collect();
        assert_eq!(attrs, ["x", "y", "z"]);

        let count = reg
            .new_iterator(h(1), MemberKinds::OBJECTS | MemberKinds::CONNECTIONS)
            .unwrap()
            .count();
        assert_eq!(count, 3);

        assert_eq!(kind(reg.new_iterator(h(1), MemberKinds::empty())), ErrorKind::InvalidArgument);
        assert_eq!(kind(reg.new_iterator(h(9), MemberKinds::ALL)), ErrorKind::NotFound);
    }

    #[test]
    fn empty_node_iterates_nothing() {
        let reg = with_object();
        let mut iter = reg.new_iterator(h(1), MemberKinds::ALL).unwrap();
        assert_eq!(iter.owner(), h(1));
        assert!(iter.next_member().is_none());
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn removal_waits_for_open_iterator() {
        let reg = Arc::new(with_object());
        let iter = reg.new_iterator(h(1), MemberKinds::ALL).unwrap();

        let (tx, rx) = mpsc::channel();
        let remover = {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                let result = reg.remove_object(h(1)).map_err(|e| e.kind());
                tx.send(result).unwrap();
            })
        };

        // Once removal has started, new users are turned away.
        let deadline = Instant::now() + Duration::from_secs(5);
        while reg.get_object_tag(h(1)).is_ok() {
            assert!(Instant::now() < deadline, "removal never started");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(kind(reg.get_object_tag(h(1))), ErrorKind::Cancelled);
        assert_eq!(kind(reg.add_attribute(h(1), "late", "uint32", &[1])), ErrorKind::Cancelled);

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(reg.contains(h(1)));

        drop(iter);
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result, Ok(()));
        remover.join().unwrap();
        assert!(!reg.contains(h(1)));
    }

    #[test]
    fn concurrent_attribute_adds() {
        let reg = Arc::new(with_object());
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    for i in 0..25 {
                        reg.add_attribute(h(1), &format!("t{t}_{i}"), "uint32", &[0; 4])
                            .unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        let snap = reg.snapshot();
        assert_eq!(snap.find(h(1)).unwrap().attributes.len(), 200);
        assert_eq!(snap.find(h(1)).unwrap().active_users, 0);
    }

    #[test]
    fn concurrent_same_tag_adds_admit_one() {
        let reg = Arc::new(Registry::new());
        let workers: Vec<_> = (0..8u64)
            .map(|i| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || reg.add_object(INST, Some("dup"), h(100 + i)).map_err(|e| e.kind()))
            })
            .collect();
        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.err())
            .all(|k| k == ErrorKind::AlreadyExists));
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn connect_races_with_target_removal() {
        let reg = Arc::new(Registry::new());
        reg.add_object(INST, Some("a"), h(1)).unwrap();
        reg.add_object(INST, Some("b"), h(2)).unwrap();

        let connector = {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for _ in 0..200 {
                    match reg.add_connection(h(1), "t", h(2)) {
                        Ok(()) => reg.remove_connection(h(1), "t").unwrap(),
                        Err(e) => assert!(
                            matches!(e.kind(), ErrorKind::NotFound | ErrorKind::Cancelled),
                            "unexpected {e}"
                        ),
                    }
                }
            })
        };
        let remover = {
            let reg = Arc::clone(&reg);
            thread::spawn(move || loop {
                match reg.remove_object(h(2)) {
                    Ok(()) => break,
                    Err(e) => {
                        assert_eq!(e.kind(), ErrorKind::Busy);
                        thread::yield_now();
                    }
                }
            })
        };
        connector.join().unwrap();
        remover.join().unwrap();

        assert!(!reg.contains(h(2)));
        assert_eq!(reg.snapshot().find(h(1)).unwrap().connections.len(), 0);
        reg.remove_object(h(1)).unwrap();
    }

    // -----------------------------------------------------------------------
    // Projection
    // -----------------------------------------------------------------------

    #[test]
    fn events_follow_mutations() {
        let sink = Arc::new(RecordingSink::default());
        let reg = Registry::with_projection(RegistryConfig::default(), sink.clone()).unwrap();
        assert_eq!(sink.take(), ["+node registry", "+node types", "+node instances"]);

        reg.add_object(ObjectHandle::TYPES, Some("uart"), h(0x10)).unwrap();
        reg.add_instance(INST, Some(h(0x10)), Some("uart0"), h(0x11)).unwrap();
        reg.add_attribute(h(0x11), "baud", "uint32", &[0; 4]).unwrap();
        reg.add_connection(h(0x11), "clk", h(0x10)).unwrap();
        assert_eq!(
            sink.take(),
            [
                "+node uart",
                "+node uart0",
                "+type uart inst_uart0",
                "+attr baud:uint32",
                "+link clk backlink-clk-from-uart0-11",
            ]
        );

        reg.update_attribute(h(0x11), "baud", "uint32", &[1; 4]).unwrap();
        assert!(sink.take().is_empty());
        reg.update_attribute(h(0x11), "baud", "int32", &[1; 4]).unwrap();
        assert_eq!(sink.take(), ["-attr baud:uint32", "+attr baud:int32"]);

        reg.remove_connection(h(0x11), "clk").unwrap();
        reg.remove_object(h(0x11)).unwrap();
        assert_eq!(
            sink.take(),
            [
                "-link clk backlink-clk-from-uart0-11",
                "-attr baud:int32",
                "-type uart inst_uart0",
                "-node uart0",
            ]
        );
    }

    #[test]
    fn disabled_projection_sends_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let mut config = RegistryConfig::default();
        config.projection.enabled = false;
        let reg = Registry::with_projection(config, sink.clone()).unwrap();
        reg.add_object(INST, Some("a"), h(1)).unwrap();
        assert!(sink.take().is_empty());
    }

    #[test]
    fn projection_failures_do_not_fail_operations() {
        let reg = Registry::with_projection(RegistryConfig::default(), Arc::new(FailingSink)).unwrap();
        reg.add_object(INST, Some("a"), h(1)).unwrap();
        reg.add_object(INST, Some("b"), h(2)).unwrap();
        reg.add_attribute(h(1), "x", "uint32", &[0; 4]).unwrap();
        reg.add_connection(h(1), "c", h(2)).unwrap();
        reg.remove_connection(h(1), "c").unwrap();
        reg.remove_object(h(1)).unwrap();
        reg.remove_object(h(2)).unwrap();
        assert!(reg.is_empty());
    }

    // -----------------------------------------------------------------------
    // Diagnostics and teardown
    // -----------------------------------------------------------------------

    #[test]
    fn dump_mentions_every_object() {
        let reg = populated();
        let dump = reg.dump_registry();
        assert!(dump.starts_with("registry: 6 object(s)"));
        for tag in ["\"obj\"", "\"c0\"", "\"c1\"", "\"instances\""] {
            assert!(dump.contains(tag), "missing {tag} in\n{dump}");
        }
        assert!(dump.contains("connection \"link\" -> 2"));
        assert!(dump.contains("incoming 1"));
    }

    #[test]
    fn clear_removes_everything_but_roots() {
        let reg = populated();
        reg.add_object(ObjectHandle::TYPES, Some("t"), h(50)).unwrap();
        reg.add_connection(h(50), "back", h(1)).unwrap();
        reg.add_connection(ObjectHandle::ROOT, "pin", h(3)).unwrap();
        reg.clear().unwrap();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 3);
        assert!(reg.snapshot().nodes.iter().all(|n| n.connections.is_empty()));
    }

    #[test]
    fn clear_waits_for_removal_in_progress_elsewhere() {
        let reg = Arc::new(with_object());
        reg.add_object(INST, Some("other"), h(2)).unwrap();
        let iter = reg.new_iterator(h(1), MemberKinds::ALL).unwrap();

        let remover = {
            let reg = Arc::clone(&reg);
            thread::spawn(move || reg.remove_object(h(1)).map_err(|e| e.kind()))
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while reg.get_object_tag(h(1)).is_ok() {
            assert!(Instant::now() < deadline, "removal never started");
            thread::sleep(Duration::from_millis(1));
        }

        let (tx, rx) = mpsc::channel();
        let clearer = {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                tx.send(reg.clear().map_err(|e| e.kind())).unwrap();
            })
        };

        // Everything else goes; object 1 is still held by the iterator.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!reg.contains(h(2)));
        assert!(reg.contains(h(1)));

        drop(iter);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(()));
        assert_eq!(remover.join().unwrap(), Ok(()));
        clearer.join().unwrap();
        assert!(reg.is_empty());
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    proptest! {
        #[test]
        fn attribute_round_trip(
            tag in "[a-z][a-z0-9_]{0,30}",
            type_tag in "[a-z]{1,31}",
            first in proptest::collection::vec(any::<u8>(), 1..64),
            second in proptest::collection::vec(any::<u8>(), 1..64),
        ) {
            let reg = with_object();
            reg.add_attribute(h(1), &tag, &type_tag, &first).unwrap();
            let value = reg.get_attribute(h(1), &tag).unwrap();
            prop_assert_eq!(&value.type_tag, &type_tag);
            prop_assert_eq!(&value.payload[..], &first[..]);

            reg.update_attribute(h(1), &tag, &type_tag, &second).unwrap();
            let value = reg.get_attribute(h(1), &tag).unwrap();
            prop_assert_eq!(&value.payload[..], &second[..]);
        }

        #[test]
        fn live_handles_are_unique(raws in proptest::collection::vec(1u64..1000, 1..40)) {
            let reg = Registry::new();
            let mut seen = HashSet::new();
            for raw in raws {
                let result = reg.add_object(INST, None, h(raw));
                if seen.insert(raw) {
                    prop_assert!(result.is_ok());
                } else {
                    prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::AlreadyExists);
                }
            }
            prop_assert_eq!(reg.len(), 3 + seen.len());
        }
    }
}
