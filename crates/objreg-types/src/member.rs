use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// The collection of a node an enumerated member belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    /// A child object.
    Object,
    /// A named, typed attribute.
    Attribute,
    /// A named link to another object.
    Connection,
}

impl MemberKind {
    /// The mask bit selecting this kind.
    pub fn mask(self) -> MemberKinds {
        match self {
            MemberKind::Object => MemberKinds::OBJECTS,
            MemberKind::Attribute => MemberKinds::ATTRIBUTES,
            MemberKind::Connection => MemberKinds::CONNECTIONS,
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberKind::Object => "object",
            MemberKind::Attribute => "attribute",
            MemberKind::Connection => "connection",
        };
        f.write_str(s)
    }
}

bitflags! {
    /// Selects which collections an iterator walks.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemberKinds: u8 {
        /// Child objects.
        const OBJECTS = 1 << 0;
        /// Attributes.
        const ATTRIBUTES = 1 << 1;
        /// Connections.
        const CONNECTIONS = 1 << 2;
        /// Every collection.
        const ALL = Self::OBJECTS.bits() | Self::ATTRIBUTES.bits() | Self::CONNECTIONS.bits();
    }
}
