use objreg_core::RegistryError;
use thiserror::Error;

/// Errors from browsing the mirror.
#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("no such path: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not an attribute: {0}")]
    NotAnAttribute(String),

    #[error("not a link: {0}")]
    NotALink(String),

    /// The path is outside the mount point.
    #[error("path {path} is outside {mount_point}")]
    OutsideMount { path: String, mount_point: String },

    /// The registry rejected the read or write behind an attribute leaf.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type NamespaceResult<T> = Result<T, NamespaceError>;
