//! Registry nodes and the lifecycle guard.
//!
//! Every facade operation on an existing node is bracketed by an entry and an
//! exit report:
//!
//! - **Entry** (under the structural lock, then the node lock): a node whose
//!   removal has started rejects the caller with `Cancelled`. A removal
//!   request checks that the node has no children, no connections and no
//!   incoming connections, failing with `Busy` otherwise, and sets the
//!   deletion flag in the same critical section. Any other caller increments
//!   the active-user count.
//! - **Exit** (under the node lock): decrement the active-user count and wake
//!   the remover once it reaches zero while deletion is pending.
//! - **Drain**: the remover blocks on the node's condition variable, holding
//!   no lock, until the active-user count is zero. Only then is the node
//!   unlinked, after which the remover marks it removed and wakes anyone
//!   waiting for the removal to finish.
//!
//! [`ActivePin`] is the entry report; dropping it is the exit report.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use objreg_types::ObjectHandle;
use tracing::{debug, warn};

use crate::attribute::AttributeSet;
use crate::connection::ConnectionSet;
use crate::error::{RegistryError, RegistryResult};

/// The type (class) object an instance was registered against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TypeRef {
    pub(crate) handle: ObjectHandle,
    pub(crate) tag: String,
}

/// Mutable part of a node, guarded by the node lock.
#[derive(Debug, Default)]
pub(crate) struct NodeState {
    pub(crate) children: Vec<Arc<Node>>,
    pub(crate) attributes: AttributeSet,
    pub(crate) connections: ConnectionSet,
    /// Connections on other nodes (or this one) that target this node.
    pub(crate) incoming: usize,
    pub(crate) active_users: usize,
    pub(crate) deletion_started: bool,
    /// Set once the node has been unlinked from the tree and the index.
    pub(crate) removed: bool,
}

impl NodeState {
    /// Why this node cannot be removed right now, if anything prevents it.
    pub(crate) fn busy_reason(&self) -> Option<String> {
        if let Some(conn) = self.connections.first() {
            return Some(format!("connection {:?} present", conn.tag));
        }
        if self.incoming != 0 {
            return Some(format!("still the target of {} connection(s)", self.incoming));
        }
        if let Some(child) = self.children.first() {
            return Some(format!("child {:?} present", child.tag));
        }
        None
    }

    pub(crate) fn child_by_tag(&self, tag: &str) -> Option<&Arc<Node>> {
        self.children.iter().find(|c| c.tag == tag)
    }
}

/// The registry's record of one published object.
pub(crate) struct Node {
    pub(crate) handle: ObjectHandle,
    pub(crate) tag: String,
    pub(crate) parent: Option<Weak<Node>>,
    pub(crate) parent_handle: Option<ObjectHandle>,
    pub(crate) type_ref: Option<TypeRef>,
    state: Mutex<NodeState>,
    drained: Condvar,
}

impl Node {
    pub(crate) fn new(
        handle: ObjectHandle,
        tag: String,
        parent: Option<&Arc<Node>>,
        type_ref: Option<TypeRef>,
    ) -> Self {
        Self {
            handle,
            tag,
            parent: parent.map(Arc::downgrade),
            parent_handle: parent.map(|p| p.handle),
            type_ref,
            state: Mutex::new(NodeState::default()),
            drained: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().expect("node lock poisoned")
    }

    /// Entry report for an ordinary operation.
    ///
    /// Must be called with the structural lock held, so the node cannot be
    /// unlinked between lookup and pinning.
    pub(crate) fn enter(self: &Arc<Self>) -> RegistryResult<ActivePin> {
        let mut state = self.lock();
        if state.deletion_started {
            debug!(object = %self.handle, "rejecting use of object being removed");
            return Err(RegistryError::Cancelled(self.handle));
        }
        state.active_users += 1;
        Ok(ActivePin {
            node: Arc::clone(self),
        })
    }

    /// Entry report with deletion intent.
    ///
    /// Must be called with the structural lock held. On success the deletion
    /// flag is set and no active-user reference is taken.
    pub(crate) fn begin_removal(&self) -> RegistryResult<()> {
        let mut state = self.lock();
        if state.deletion_started {
            return Err(RegistryError::Cancelled(self.handle));
        }
        if let Some(reason) = state.busy_reason() {
            debug!(object = %self.handle, %reason, "removal refused");
            return Err(RegistryError::Busy {
                handle: self.handle,
                reason,
            });
        }
        state.deletion_started = true;
        Ok(())
    }

    /// Exit report.
    fn exit(&self) {
        let mut state = self.lock();
        state.active_users = state.active_users.saturating_sub(1);
        if state.deletion_started && state.active_users == 0 {
            self.drained.notify_all();
        }
    }

    /// Block until every active user has exited. Holds no lock while waiting.
    pub(crate) fn wait_drained(&self) {
        let mut state = self.lock();
        if state.active_users > 0 {
            warn!(
                object = %self.handle,
                users = state.active_users,
                "waiting for active users before removal"
            );
        }
        while state.active_users > 0 {
            state = self.drained.wait(state).expect("node lock poisoned");
        }
    }

    /// Mark the node unlinked and wake every [`wait_removed`](Self::wait_removed) caller.
    pub(crate) fn finish_removal(&self) {
        let mut state = self.lock();
        state.removed = true;
        self.drained.notify_all();
    }

    /// Block until a removal already in progress on this node has finished.
    pub(crate) fn wait_removed(&self) {
        let mut state = self.lock();
        while state.deletion_started && !state.removed {
            state = self.drained.wait(state).expect("node lock poisoned");
        }
    }

    /// Count a new connection targeting this node.
    pub(crate) fn acquire_incoming(&self) -> RegistryResult<()> {
        let mut state = self.lock();
        if state.deletion_started {
            return Err(RegistryError::Cancelled(self.handle));
        }
        state.incoming += 1;
        Ok(())
    }

    /// Forget a connection targeting this node.
    pub(crate) fn release_incoming(&self) {
        let mut state = self.lock();
        state.incoming = state.incoming.saturating_sub(1);
    }

    pub(crate) fn parent_node(&self) -> Option<Arc<Node>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("handle", &self.handle)
            .field("tag", &self.tag)
            .field("parent", &self.parent_handle)
            .field("type_ref", &self.type_ref)
            .finish_non_exhaustive()
    }
}

/// An entered operation on a node.
///
/// While a pin exists the node cannot be unlinked: its remover waits in
/// [`Node::wait_drained`]. Dropping the pin performs the exit report.
pub struct ActivePin {
    node: Arc<Node>,
}

impl ActivePin {
    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Handle of the pinned object.
    pub fn handle(&self) -> ObjectHandle {
        self.node.handle
    }
}

impl Drop for ActivePin {
    fn drop(&mut self) {
        self.node.exit();
    }
}

impl fmt::Debug for ActivePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActivePin").field(&self.node.handle).finish()
    }
}
