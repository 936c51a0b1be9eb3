use thiserror::Error;

/// Errors produced when validating foundation types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("tag must not be empty")]
    EmptyTag,

    #[error("tag {tag:?} is {len} bytes, limit is {max}")]
    TagTooLong { tag: String, len: usize, max: usize },

    #[error("null object handle")]
    NullHandle,
}
