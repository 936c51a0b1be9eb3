//! TOML description of registry contents.
//!
//! ```toml
//! [[object]]
//! handle = 0x100
//! parent = "types"
//! tag = "decoder"
//!
//! [[attribute]]
//! object = 0x100
//! tag = "width"
//! type = "uint32"
//! value = "1920"
//!
//! [[connection]]
//! object = 0x100
//! tag = "output"
//! target = 0x200
//! ```

use std::path::Path;

use anyhow::{bail, Context};
use objreg_core::datatype::{ADDRESS, INT32, UINT32};
use objreg_core::Registry;
use objreg_types::ObjectHandle;
use serde::Deserialize;
use tracing::debug;

/// Manifest loaded when none is given on the command line.
pub const DEMO: &str = r#"
[[object]]
handle = 0x100
parent = "types"
tag = "decoder"

[[object]]
handle = 0x200
parent = "types"
tag = "display"

[[object]]
handle = 0x1000
parent = "instances"
type = 0x100
tag = "video_dec0"

[[object]]
handle = 0x1001
parent = 0x1000

[[object]]
handle = 0x2000
parent = "instances"
type = 0x200
tag = "hdmi0"

[[attribute]]
object = 0x1000
tag = "width"
type = "uint32"
value = "1920"

[[attribute]]
object = 0x1000
tag = "height"
type = "uint32"
value = "1080"

[[attribute]]
object = 0x1000
tag = "base"
type = "address"
value = "0xfe000000"

[[attribute]]
object = 0x2000
tag = "refresh"
type = "int32"
value = "60"

[[attribute]]
object = 0x2000
tag = "edid"
type = "blob"
bytes = [0, 255, 255, 255, 255, 255, 255, 0]

[[connection]]
object = 0x1000
tag = "output"
target = 0x2000
"#;

/// Where an object is attached: a well-known root by name, or a handle.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ParentRef {
    Handle(u64),
    Named(String),
}

impl ParentRef {
    fn resolve(&self) -> anyhow::Result<ObjectHandle> {
        match self {
            ParentRef::Handle(raw) => Ok(ObjectHandle::from_raw(*raw)),
            ParentRef::Named(name) => match name.as_str() {
                "root" => Ok(ObjectHandle::ROOT),
                "types" => Ok(ObjectHandle::TYPES),
                "instances" => Ok(ObjectHandle::INSTANCES),
                other => bail!("unknown parent {other:?} (expected root, types or instances)"),
            },
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectSpec {
    pub handle: u64,
    pub parent: ParentRef,
    pub tag: Option<String>,
    #[serde(rename = "type")]
    pub type_object: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeSpec {
    pub object: u64,
    pub tag: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Text parsed through the data type.
    pub value: Option<String>,
    /// Raw payload.
    pub bytes: Option<Vec<u8>>,
    /// Payload size for `value`; defaults to the built-in type's width.
    pub size: Option<usize>,
}

impl AttributeSpec {
    fn payload_size(&self) -> anyhow::Result<usize> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        match self.type_tag.as_str() {
            INT32 | UINT32 => Ok(4),
            ADDRESS => Ok(8),
            other => bail!(
                "attribute {:?}: size is required for type {other:?}",
                self.tag
            ),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSpec {
    pub object: u64,
    pub tag: String,
    pub target: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default, rename = "object")]
    pub objects: Vec<ObjectSpec>,
    #[serde(default, rename = "attribute")]
    pub attributes: Vec<AttributeSpec>,
    #[serde(default, rename = "connection")]
    pub connections: Vec<ConnectionSpec>,
}

impl Manifest {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("invalid manifest")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn demo() -> anyhow::Result<Self> {
        Self::from_toml_str(DEMO)
    }

    /// Register everything in order: objects, then attributes, then
    /// connections.
    pub fn apply(&self, registry: &Registry) -> anyhow::Result<()> {
        for obj in &self.objects {
            let handle = ObjectHandle::from_raw(obj.handle);
            registry
                .add_instance(
                    obj.parent.resolve()?,
                    obj.type_object.map(ObjectHandle::from_raw),
                    obj.tag.as_deref(),
                    handle,
                )
                .with_context(|| format!("adding object {handle}"))?;
        }

        for attr in &self.attributes {
            let object = ObjectHandle::from_raw(attr.object);
            let context = || format!("adding attribute {:?} to {object}", attr.tag);
            match (&attr.bytes, &attr.value) {
                (Some(bytes), None) => registry
                    .add_attribute(object, &attr.tag, &attr.type_tag, bytes)
                    .with_context(context)?,
                (None, Some(value)) => {
                    let zeroed = vec![0u8; attr.payload_size()?];
                    registry
                        .add_attribute(object, &attr.tag, &attr.type_tag, &zeroed)
                        .with_context(context)?;
                    registry
                        .parse_attribute(object, &attr.tag, value)
                        .with_context(context)?;
                }
                _ => bail!(
                    "attribute {:?}: exactly one of `value` or `bytes` is required",
                    attr.tag
                ),
            }
        }

        for conn in &self.connections {
            let object = ObjectHandle::from_raw(conn.object);
            registry
                .add_connection(object, &conn.tag, ObjectHandle::from_raw(conn.target))
                .with_context(|| format!("adding connection {:?} to {object}", conn.tag))?;
        }

        debug!(
            objects = self.objects.len(),
            attributes = self.attributes.len(),
            connections = self.connections.len(),
            "manifest applied"
        );
        Ok(())
    }
}
