use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque identity of an object published in the registry.
///
/// The registry never dereferences a handle; it is a key, not a value.
/// Callers typically derive handles from the address or index of the object
/// they publish. The zero value is reserved as the null handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    /// The top of the registry tree. Has no parent.
    pub const ROOT: ObjectHandle = ObjectHandle(u64::MAX);

    /// Well-known parent for type (class) objects.
    pub const TYPES: ObjectHandle = ObjectHandle(u64::MAX - 1);

    /// Well-known parent for instance objects.
    pub const INSTANCES: ObjectHandle = ObjectHandle(u64::MAX - 2);

    /// The null handle. Never names a live object.
    pub const fn null() -> Self {
        Self(0)
    }

    /// Wrap a raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value.
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns `true` for the null handle.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns `true` for one of the roots created with every registry.
    pub fn is_well_known(&self) -> bool {
        *self == Self::ROOT || *self == Self::TYPES || *self == Self::INSTANCES
    }

    /// Reject the null handle.
    pub fn non_null(self) -> Result<Self, TypeError> {
        if self.is_null() {
            Err(TypeError::NullHandle)
        } else {
            Ok(self)
        }
    }

    /// Lowercase hex rendering, as used in synthesized tags and link names.
    pub fn to_hex(&self) -> String {
        format!("{:x}", self.0)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({:#x})", self.0)
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl From<u64> for ObjectHandle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<ObjectHandle> for u64 {
    fn from(handle: ObjectHandle) -> Self {
        handle.0
    }
}
