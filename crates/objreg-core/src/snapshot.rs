//! Point-in-time views of the registry for diagnostics.

use std::fmt;

use objreg_types::ObjectHandle;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};
use crate::node::Node;

/// A child entry as seen from its parent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSnapshot {
    pub handle: ObjectHandle,
    pub tag: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSnapshot {
    pub tag: String,
    pub type_tag: String,
    pub size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub tag: String,
    pub target: ObjectHandle,
}

/// The state of one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub handle: ObjectHandle,
    pub tag: String,
    pub parent: Option<ObjectHandle>,
    pub type_handle: Option<ObjectHandle>,
    pub type_tag: Option<String>,
    pub children: Vec<ChildSnapshot>,
    pub attributes: Vec<AttributeSnapshot>,
    pub connections: Vec<ConnectionSnapshot>,
    pub incoming: usize,
    pub active_users: usize,
    pub deletion_started: bool,
}

impl NodeSnapshot {
    pub(crate) fn capture(node: &Node) -> Self {
        let state = node.lock();
        Self {
            handle: node.handle,
            tag: node.tag.clone(),
            parent: node.parent_handle,
            type_handle: node.type_ref.as_ref().map(|t| t.handle),
            type_tag: node.type_ref.as_ref().map(|t| t.tag.clone()),
            children: state
                .children
                .iter()
                .map(|c| ChildSnapshot {
                    handle: c.handle,
                    tag: c.tag.clone(),
                })
                .collect(),
            attributes: state
                .attributes
                .iter()
                .map(|a| AttributeSnapshot {
                    tag: a.tag.clone(),
                    type_tag: a.type_tag.clone(),
                    size: a.size(),
                })
                .collect(),
            connections: state
                .connections
                .iter()
                .map(|c| ConnectionSnapshot {
                    tag: c.tag.clone(),
                    target: c.target,
                })
                .collect(),
            incoming: state.incoming,
            active_users: state.active_users,
            deletion_started: state.deletion_started,
        }
    }
}

/// Every live node, in handle order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub nodes: Vec<NodeSnapshot>,
}

impl RegistrySnapshot {
    pub fn find(&self, handle: ObjectHandle) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.handle == handle)
    }

    pub fn to_json(&self) -> RegistryResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RegistryError::InvalidArgument(format!("snapshot: {e}")))
    }
}

impl fmt::Display for NodeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "object {} tag {:?}", self.handle, self.tag)?;
        match self.parent {
            Some(p) => writeln!(f, "  parent {p}")?,
            None => writeln!(f, "  parent -")?,
        }
        if let (Some(h), Some(t)) = (self.type_handle, &self.type_tag) {
            writeln!(f, "  type {h} tag {t:?}")?;
        }
        if self.deletion_started {
            writeln!(f, "  removing, {} active user(s)", self.active_users)?;
        }
        for c in &self.children {
            writeln!(f, "  child {} tag {:?}", c.handle, c.tag)?;
        }
        for a in &self.attributes {
            writeln!(f, "  attribute {:?} type {} size {}", a.tag, a.type_tag, a.size)?;
        }
        for c in &self.connections {
            writeln!(f, "  connection {:?} -> {}", c.tag, c.target)?;
        }
        if self.incoming > 0 {
            writeln!(f, "  incoming {}", self.incoming)?;
        }
        Ok(())
    }
}

impl fmt::Display for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "registry: {} object(s)", self.nodes.len())?;
        for node in &self.nodes {
            write!(f, "{node}")?;
        }
        Ok(())
    }
}
