//! Foundation types for the object registry.
//!
//! This crate provides the small value types shared by every other registry
//! crate. It has no knowledge of nodes, locks or storage.
//!
//! # Key Types
//!
//! - [`ObjectHandle`] -- Opaque, caller-supplied identity of a published object
//! - [`MemberKind`] -- Which collection of a node an enumerated entry came from
//! - [`MemberKinds`] -- Bit mask selecting collections for iteration
//! - [`validate_tag`] -- Length and emptiness rules shared by all tags

pub mod error;
pub mod handle;
pub mod member;
pub mod tag;

pub use error::TypeError;
pub use handle::ObjectHandle;
pub use member::{MemberKind, MemberKinds};
pub use tag::{validate_tag, MAX_TAG_LEN};
