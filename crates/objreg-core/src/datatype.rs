//! The data-type table.
//!
//! A data type is a named pair of callbacks that render an attribute's bytes
//! as text and parse text back into those bytes. The registry itself never
//! interprets payloads; only the introspection surface does, through this
//! table.
//!
//! Three types are built in and cannot be removed: `int32`, `uint32` and
//! `address`. All of them read and write native-endian integers, matching
//! how the publishing subsystems lay the values out in memory.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use objreg_types::{validate_tag, ObjectHandle};
use thiserror::Error;
use tracing::debug;

use crate::error::{Entity, RegistryError, RegistryResult};

/// Tag of the built-in signed 32-bit type.
pub const INT32: &str = "int32";
/// Tag of the built-in unsigned 32-bit type.
pub const UINT32: &str = "uint32";
/// Tag of the built-in pointer-sized type.
pub const ADDRESS: &str = "address";

/// Errors raised by data type callbacks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataTypeError {
    /// The payload does not have a size this type understands.
    #[error("payload is {actual} bytes, expected {expected}")]
    Size { expected: String, actual: usize },

    /// The text could not be converted.
    #[error("cannot parse {text:?}: {reason}")]
    Parse { text: String, reason: String },
}

/// Format/parse capability for attribute payloads.
///
/// `parse` writes into the attribute's existing payload; the payload size
/// never changes through this path.
pub trait DataType: Send + Sync {
    /// Render `payload` as text.
    fn format(&self, object: ObjectHandle, payload: &[u8]) -> Result<String, DataTypeError>;

    /// Parse `text` into `payload`.
    fn parse(
        &self,
        object: ObjectHandle,
        payload: &mut [u8],
        text: &str,
    ) -> Result<(), DataTypeError>;
}

/// Adapts a pair of closures into a [`DataType`].
pub struct FnDataType<F, P> {
    format: F,
    parse: P,
}

impl<F, P> FnDataType<F, P>
where
    F: Fn(ObjectHandle, &[u8]) -> Result<String, DataTypeError> + Send + Sync,
    P: Fn(ObjectHandle, &mut [u8], &str) -> Result<(), DataTypeError> + Send + Sync,
{
    pub fn new(format: F, parse: P) -> Self {
        Self { format, parse }
    }
}

impl<F, P> DataType for FnDataType<F, P>
where
    F: Fn(ObjectHandle, &[u8]) -> Result<String, DataTypeError> + Send + Sync,
    P: Fn(ObjectHandle, &mut [u8], &str) -> Result<(), DataTypeError> + Send + Sync,
{
    fn format(&self, object: ObjectHandle, payload: &[u8]) -> Result<String, DataTypeError> {
        (self.format)(object, payload)
    }

    fn parse(
        &self,
        object: ObjectHandle,
        payload: &mut [u8],
        text: &str,
    ) -> Result<(), DataTypeError> {
        (self.parse)(object, payload, text)
    }
}

impl<F, P> fmt::Debug for FnDataType<F, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnDataType")
    }
}

fn fixed<const N: usize>(payload: &[u8]) -> Result<[u8; N], DataTypeError> {
    payload.try_into().map_err(|_| DataTypeError::Size {
        expected: N.to_string(),
        actual: payload.len(),
    })
}

fn parse_error(text: &str, reason: impl fmt::Display) -> DataTypeError {
    DataTypeError::Parse {
        text: text.to_string(),
        reason: reason.to_string(),
    }
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_unsigned(text: &str) -> Result<u64, DataTypeError> {
    let t = text.trim();
    let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => t.parse::<u64>(),
    };
    parsed.map_err(|e| parse_error(text, e))
}

/// Built-in `int32`.
#[derive(Debug, Clone, Copy)]
pub struct Int32;

impl DataType for Int32 {
    fn format(&self, _object: ObjectHandle, payload: &[u8]) -> Result<String, DataTypeError> {
        Ok(i32::from_ne_bytes(fixed::<4>(payload)?).to_string())
    }

    fn parse(
        &self,
        _object: ObjectHandle,
        payload: &mut [u8],
        text: &str,
    ) -> Result<(), DataTypeError> {
        fixed::<4>(payload)?;
        let value: i32 = text.trim().parse().map_err(|e| parse_error(text, e))?;
        payload.copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }
}

/// Built-in `uint32`.
#[derive(Debug, Clone, Copy)]
pub struct Uint32;

impl DataType for Uint32 {
    fn format(&self, _object: ObjectHandle, payload: &[u8]) -> Result<String, DataTypeError> {
        Ok(u32::from_ne_bytes(fixed::<4>(payload)?).to_string())
    }

    fn parse(
        &self,
        _object: ObjectHandle,
        payload: &mut [u8],
        text: &str,
    ) -> Result<(), DataTypeError> {
        fixed::<4>(payload)?;
        let value = u32::try_from(parse_unsigned(text)?).map_err(|e| parse_error(text, e))?;
        payload.copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }
}

/// Built-in `address`: a 4- or 8-byte value rendered as `0x` hex.
#[derive(Debug, Clone, Copy)]
pub struct Address;

impl DataType for Address {
    fn format(&self, _object: ObjectHandle, payload: &[u8]) -> Result<String, DataTypeError> {
        let value = match payload.len() {
            4 => u64::from(u32::from_ne_bytes(fixed::<4>(payload)?)),
            8 => u64::from_ne_bytes(fixed::<8>(payload)?),
            actual => {
                return Err(DataTypeError::Size {
                    expected: "4 or 8".into(),
                    actual,
                })
            }
        };
        Ok(format!("{value:#x}"))
    }

    fn parse(
        &self,
        _object: ObjectHandle,
        payload: &mut [u8],
        text: &str,
    ) -> Result<(), DataTypeError> {
        let value = parse_unsigned(text)?;
        match payload.len() {
            4 => {
                let narrow = u32::try_from(value).map_err(|e| parse_error(text, e))?;
                payload.copy_from_slice(&narrow.to_ne_bytes());
            }
            8 => payload.copy_from_slice(&value.to_ne_bytes()),
            actual => {
                return Err(DataTypeError::Size {
                    expected: "4 or 8".into(),
                    actual,
                })
            }
        }
        Ok(())
    }
}

/// Process-wide table of data types, keyed by tag.
///
/// Guarded by its own lock, independent of the structural lock and of every
/// node lock. Built-in types live outside the removable map, so they can be
/// looked up but never removed or shadowed.
pub struct DataTypeTable {
    builtins: BTreeMap<&'static str, Arc<dyn DataType>>,
    custom: RwLock<BTreeMap<String, Arc<dyn DataType>>>,
}

impl DataTypeTable {
    /// Create a table holding only the built-in types.
    pub fn new() -> Self {
        let mut builtins: BTreeMap<&'static str, Arc<dyn DataType>> = BTreeMap::new();
        builtins.insert(INT32, Arc::new(Int32));
        builtins.insert(UINT32, Arc::new(Uint32));
        builtins.insert(ADDRESS, Arc::new(Address));
        Self {
            builtins,
            custom: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a data type under `tag`.
    pub fn add(&self, tag: &str, def: Arc<dyn DataType>) -> RegistryResult<()> {
        validate_tag(tag)?;
        if self.builtins.contains_key(tag) {
            return Err(RegistryError::exists(Entity::DataType, tag));
        }
        let mut custom = self.custom.write().expect("data type lock poisoned");
        if custom.contains_key(tag) {
            return Err(RegistryError::exists(Entity::DataType, tag));
        }
        custom.insert(tag.to_string(), def);
        debug!(tag, "data type added");
        Ok(())
    }

    /// Remove a previously added data type. Built-ins are not found here.
    pub fn remove(&self, tag: &str) -> RegistryResult<()> {
        let mut custom = self.custom.write().expect("data type lock poisoned");
        match custom.remove(tag) {
            Some(_) => {
                debug!(tag, "data type removed");
                Ok(())
            }
            None => Err(RegistryError::not_found(Entity::DataType, tag)),
        }
    }

    /// Look up a data type by tag.
    pub fn get(&self, tag: &str) -> RegistryResult<Arc<dyn DataType>> {
        if let Some(def) = self.builtins.get(tag) {
            return Ok(Arc::clone(def));
        }
        let custom = self.custom.read().expect("data type lock poisoned");
        custom
            .get(tag)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(Entity::DataType, tag))
    }

    /// Returns `true` if `tag` names a built-in type.
    pub fn is_builtin(&self, tag: &str) -> bool {
        self.builtins.contains_key(tag)
    }

    /// All registered tags, built-ins first, each group sorted.
    pub fn tags(&self) -> Vec<String> {
        let custom = self.custom.read().expect("data type lock poisoned");
        self.builtins
            .keys()
            .map(|t| t.to_string())
            .chain(custom.keys().cloned())
            .collect()
    }
}

impl Default for DataTypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DataTypeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTypeTable")
            .field("tags", &self.tags())
            .finish()
    }
}
