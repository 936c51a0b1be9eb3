//! Concurrent hierarchical object registry.
//!
//! Subsystems publish opaque object handles into a tree, attach typed
//! attributes to them and connect them to each other. The registry keeps the
//! graph consistent under concurrent use: an object cannot be removed while
//! it has children or connections, and removal waits for every operation
//! already in progress on the object before unlinking it.
//!
//! # Key Types
//!
//! - [`Registry`] -- The context object every operation goes through
//! - [`RegistryIterator`] -- Enumerates a node's children, attributes and connections
//! - [`DataType`] -- Format/parse capability for attribute payloads
//! - [`ProjectionSink`] -- Receiver of change events for an introspection mirror
//! - [`RegistryConfig`] -- Root tags and mirror settings
//! - [`RegistrySnapshot`] -- Serializable view used by `dump_registry`

pub mod config;
pub mod datatype;
pub mod error;
pub mod iterator;
pub mod projection;
pub mod registry;
pub mod snapshot;

mod attribute;
mod connection;
mod node;
mod store;

pub use config::{ProjectionConfig, RegistryConfig};
pub use datatype::{DataType, DataTypeError, DataTypeTable, FnDataType};
pub use error::{Entity, ErrorKind, RegistryError, RegistryResult};
pub use iterator::{Member, RegistryIterator};
pub use node::ActivePin;
pub use projection::{
    AttributeEvent, LinkEvent, NodeEvent, NullProjection, ProjectionError, ProjectionSink,
    TypeLinkEvent,
};
pub use registry::{synthesize_tag, AttributeInfo, AttributeValue, Registry};
pub use snapshot::{
    AttributeSnapshot, ChildSnapshot, ConnectionSnapshot, NodeSnapshot, RegistrySnapshot,
};

pub use objreg_types::{MemberKind, MemberKinds, ObjectHandle};
