//! Browsable mirror of an object registry.
//!
//! [`VirtualNamespace`] receives the registry's change events and keeps a
//! path-addressed tree under a fixed mount point:
//!
//! - every object is a directory nested under its parent's directory
//! - every attribute is a leaf; reading it runs the attribute's data type
//!   `format`, writing it runs `parse`
//! - every connection is a link to the target's directory, with a reciprocal
//!   `backlink-<tag>-from-<source-tag>-<source-handle>` link under the target
//! - an instance links to its type by the type's tag, and the type links
//!   back with `inst_<instance-tag>`
//!
//! The mirror is informational. The registry stays authoritative and keeps
//! working when the mirror rejects an event.

pub mod error;
pub mod namespace;

pub use error::{NamespaceError, NamespaceResult};
pub use namespace::{EntryInfo, EntryKind, Resolved, VirtualNamespace};
