//! Enumeration of a node's members.

use objreg_types::{MemberKind, MemberKinds, ObjectHandle};

use crate::node::ActivePin;

/// One enumerated entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub tag: String,
    pub kind: MemberKind,
}

const PHASES: [MemberKind; 3] = [
    MemberKind::Object,
    MemberKind::Attribute,
    MemberKind::Connection,
];

/// First selected phase strictly after `after` (or the first one at all).
fn next_phase(after: Option<MemberKind>, kinds: MemberKinds) -> Option<MemberKind> {
    let start = match after {
        None => 0,
        Some(kind) => PHASES.iter().position(|k| *k == kind).map_or(PHASES.len(), |i| i + 1),
    };
    PHASES[start..]
        .iter()
        .copied()
        .find(|k| kinds.contains(k.mask()))
}

/// Walks the children, then the attributes, then the connections of one
/// node, restricted to the selected kinds.
///
/// The iterator pins its owner: removal of the owner waits until the
/// iterator is closed or dropped. The owner must not be mutated while it is
/// being iterated; entries added or removed meanwhile may be skipped or seen
/// twice. Not restartable.
#[derive(Debug)]
pub struct RegistryIterator {
    pin: ActivePin,
    kinds: MemberKinds,
    phase: Option<MemberKind>,
    cursor: usize,
}

impl RegistryIterator {
    pub(crate) fn new(pin: ActivePin, kinds: MemberKinds) -> Self {
        Self {
            pin,
            kinds,
            phase: next_phase(None, kinds),
            cursor: 0,
        }
    }

    /// The node being iterated.
    pub fn owner(&self) -> ObjectHandle {
        self.pin.handle()
    }

    pub fn kinds(&self) -> MemberKinds {
        self.kinds
    }

    /// The next entry, or `None` once every selected collection is done.
    pub fn next_member(&mut self) -> Option<Member> {
        let state = self.pin.node().lock();
        while let Some(kind) = self.phase {
            let tag = match kind {
                MemberKind::Object => state.children.get(self.cursor).map(|c| c.tag.clone()),
                MemberKind::Attribute => state.attributes.tag_at(self.cursor).map(str::to_owned),
                MemberKind::Connection => state.connections.tag_at(self.cursor).map(str::to_owned),
            };
            match tag {
                Some(tag) => {
                    self.cursor += 1;
                    return Some(Member { tag, kind });
                }
                None => {
                    self.phase = next_phase(Some(kind), self.kinds);
                    self.cursor = 0;
                }
            }
        }
        None
    }

    /// Release the owner. Equivalent to dropping the iterator.
    pub fn close(self) {}
}

impl Iterator for RegistryIterator {
    type Item = Member;

    fn next(&mut self) -> Option<Member> {
        self.next_member()
    }
}
