//! Error types for registry operations.

use std::fmt;

use objreg_types::{ObjectHandle, TypeError};
use thiserror::Error;

use crate::datatype::DataTypeError;

/// What a `NotFound` or `AlreadyExists` error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    Object,
    Attribute,
    Connection,
    DataType,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Entity::Object => "object",
            Entity::Attribute => "attribute",
            Entity::Connection => "connection",
            Entity::DataType => "data type",
        };
        f.write_str(s)
    }
}

/// Coarse classification of a [`RegistryError`].
///
/// Callers that only care about the failure class (retry, report, ignore)
/// match on this rather than on the detailed variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Busy,
    Cancelled,
    InsufficientBuffer,
    OutOfMemory,
}

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A handle, tag, payload or mask was rejected before touching any node.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Tag or handle validation failure.
    #[error("invalid argument: {0}")]
    InvalidType(#[from] TypeError),

    /// A DataType callback rejected the payload or the text.
    #[error("data type {tag}: {source}")]
    DataType {
        tag: String,
        #[source]
        source: DataTypeError,
    },

    /// No live object has this handle.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectHandle),

    /// A named member of an object, or a data type, does not exist.
    #[error("{entity} not found: {tag}")]
    NotFound { entity: Entity, tag: String },

    /// A live object already has this handle.
    #[error("object already registered: {0}")]
    DuplicateObject(ObjectHandle),

    /// A named member of an object, or a data type, already exists.
    #[error("{entity} already exists: {tag}")]
    AlreadyExists { entity: Entity, tag: String },

    /// Removal requested on an object that still has dependents.
    #[error("object {handle} is busy: {reason}")]
    Busy { handle: ObjectHandle, reason: String },

    /// The object is being removed.
    #[error("object {0} is being removed")]
    Cancelled(ObjectHandle),

    /// The caller's buffer cannot hold the attribute. `required` is the
    /// stored size.
    #[error("buffer too small: {provided} bytes provided, {required} required")]
    InsufficientBuffer { required: usize, provided: usize },

    /// Storage for a new record could not be reserved.
    #[error("out of memory")]
    OutOfMemory,
}

impl RegistryError {
    /// The failure class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InvalidArgument(_)
            | RegistryError::InvalidType(_)
            | RegistryError::DataType { .. } => ErrorKind::InvalidArgument,
            RegistryError::ObjectNotFound(_) | RegistryError::NotFound { .. } => {
                ErrorKind::NotFound
            }
            RegistryError::DuplicateObject(_) | RegistryError::AlreadyExists { .. } => {
                ErrorKind::AlreadyExists
            }
            RegistryError::Busy { .. } => ErrorKind::Busy,
            RegistryError::Cancelled(_) => ErrorKind::Cancelled,
            RegistryError::InsufficientBuffer { .. } => ErrorKind::InsufficientBuffer,
            RegistryError::OutOfMemory => ErrorKind::OutOfMemory,
        }
    }

    pub(crate) fn not_found(entity: Entity, tag: &str) -> Self {
        RegistryError::NotFound {
            entity,
            tag: tag.to_string(),
        }
    }

    pub(crate) fn exists(entity: Entity, tag: &str) -> Self {
        RegistryError::AlreadyExists {
            entity,
            tag: tag.to_string(),
        }
    }
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
