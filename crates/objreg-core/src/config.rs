use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Tag of the tree root.
    pub root_tag: String,
    /// Tag of the well-known parent of type objects.
    pub types_tag: String,
    /// Tag of the well-known parent of instance objects.
    pub instances_tag: String,
    /// Introspection mirror settings.
    pub projection: ProjectionConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root_tag: "registry".into(),
            types_tag: "types".into(),
            instances_tag: "instances".into(),
            projection: ProjectionConfig::default(),
        }
    }
}

/// Settings for the introspection mirror.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectionConfig {
    /// When `false`, no sink is notified of changes.
    pub enabled: bool,
    /// Absolute path the mirror is rooted at.
    pub mount_point: String,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mount_point: "/registry".into(),
        }
    }
}

impl RegistryConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> RegistryResult<Self> {
        let config: RegistryConfig = toml::from_str(s)
            .map_err(|e| RegistryError::InvalidArgument(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> RegistryResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::InvalidArgument(format!("config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Check root tags and the mount point.
    pub fn validate(&self) -> RegistryResult<()> {
        for tag in [&self.root_tag, &self.types_tag, &self.instances_tag] {
            objreg_types::validate_tag(tag)?;
        }
        if self.types_tag == self.instances_tag {
            return Err(RegistryError::InvalidArgument(
                "types_tag and instances_tag must differ".into(),
            ));
        }
        if !self.projection.mount_point.starts_with('/') {
            return Err(RegistryError::InvalidArgument(format!(
                "mount_point must be absolute: {}",
                self.projection.mount_point
            )));
        }
        Ok(())
    }
}
