//! Path-addressed mirror of the registry tree.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use objreg_core::{
    AttributeEvent, LinkEvent, NodeEvent, ObjectHandle, ProjectionConfig, ProjectionError,
    ProjectionSink, Registry, TypeLinkEvent,
};
use tracing::debug;

use crate::error::{NamespaceError, NamespaceResult};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Entry {
    Dir(ObjectHandle),
    Attribute { type_tag: String },
    Link(ObjectHandle),
}

/// What a directory entry is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Attribute,
    Link,
}

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub kind: EntryKind,
}

/// What a path names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    Directory(ObjectHandle),
    Attribute {
        object: ObjectHandle,
        tag: String,
        type_tag: String,
    },
    Link {
        owner: ObjectHandle,
        target: ObjectHandle,
    },
}

#[derive(Debug)]
struct Directory {
    name: String,
    parent: Option<ObjectHandle>,
    entries: BTreeMap<String, Entry>,
}

#[derive(Debug, Default)]
struct Tree {
    root: Option<ObjectHandle>,
    dirs: BTreeMap<ObjectHandle, Directory>,
    /// (source, connection tag) -> (target, back-link name)
    backlinks: BTreeMap<(ObjectHandle, String), (ObjectHandle, String)>,
}

impl Tree {
    fn dir_mut(&mut self, handle: ObjectHandle) -> Result<&mut Directory, ProjectionError> {
        self.dirs
            .get_mut(&handle)
            .ok_or_else(|| ProjectionError::Missing(format!("directory for {handle}")))
    }

    fn add_entry(
        &mut self,
        dir: ObjectHandle,
        name: String,
        entry: Entry,
    ) -> Result<(), ProjectionError> {
        let d = self.dir_mut(dir)?;
        if d.entries.contains_key(&name) {
            return Err(ProjectionError::Exists(format!("{}/{name}", d.name)));
        }
        d.entries.insert(name, entry);
        Ok(())
    }

    /// Remove `name` from `dir` only if the entry satisfies `matches`.
    fn remove_entry_if(
        &mut self,
        dir: ObjectHandle,
        name: &str,
        matches: impl Fn(&Entry) -> bool,
    ) -> Result<Entry, ProjectionError> {
        let d = self.dir_mut(dir)?;
        match d.entries.get(name) {
            Some(entry) if matches(entry) => {}
            _ => return Err(ProjectionError::Missing(format!("{}/{name}", d.name))),
        }
        d.entries
            .remove(name)
            .ok_or_else(|| ProjectionError::Missing(format!("{}/{name}", d.name)))
    }

    fn path_of(&self, handle: ObjectHandle, mount_point: &str) -> Option<String> {
        let mut names = Vec::new();
        let mut current = handle;
        loop {
            let dir = self.dirs.get(&current)?;
            match dir.parent {
                Some(parent) => {
                    names.push(dir.name.as_str());
                    current = parent;
                }
                None => break,
            }
        }
        let mut path = mount_point.to_string();
        for name in names.into_iter().rev() {
            if !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(name);
        }
        Some(path)
    }
}

struct Line {
    depth: usize,
    text: String,
    attribute: Option<(ObjectHandle, String)>,
}

/// In-memory mirror of a registry, rooted at a mount point.
///
/// Install it with [`Registry::with_projection`]; it then tracks every
/// object, attribute and connection. Attribute reads and writes go back to
/// the registry, so leaves always show current values.
#[derive(Debug)]
pub struct VirtualNamespace {
    mount_point: String,
    tree: RwLock<Tree>,
}

impl VirtualNamespace {
    pub fn new(mount_point: impl Into<String>) -> Self {
        Self {
            mount_point: mount_point.into(),
            tree: RwLock::new(Tree::default()),
        }
    }

    pub fn from_config(config: &ProjectionConfig) -> Self {
        Self::new(config.mount_point.clone())
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn read_tree(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().expect("namespace lock poisoned")
    }

    fn write_tree(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().expect("namespace lock poisoned")
    }

    fn components<'a>(&self, path: &'a str) -> NamespaceResult<Vec<&'a str>> {
        let outside = || NamespaceError::OutsideMount {
            path: path.to_string(),
            mount_point: self.mount_point.clone(),
        };
        let rest = path.strip_prefix(self.mount_point.as_str()).ok_or_else(outside)?;
        if !(rest.is_empty() || rest.starts_with('/') || self.mount_point.ends_with('/')) {
            return Err(outside());
        }
        Ok(rest.split('/').filter(|c| !c.is_empty()).collect())
    }

    /// Look up what `path` names.
    ///
    /// Links in the middle of a path are followed; a link in last position is
    /// returned as such.
    pub fn resolve(&self, path: &str) -> NamespaceResult<Resolved> {
        let parts = self.components(path)?;
        let not_found = || NamespaceError::NotFound(path.to_string());
        let tree = self.read_tree();
        let mut current = tree.root.ok_or_else(not_found)?;
        for (i, name) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            let dir = tree.dirs.get(&current).ok_or_else(not_found)?;
            match dir.entries.get(*name).ok_or_else(not_found)? {
                Entry::Dir(handle) => current = *handle,
                Entry::Link(target) if last => {
                    return Ok(Resolved::Link {
                        owner: current,
                        target: *target,
                    })
                }
                Entry::Link(target) => current = *target,
                Entry::Attribute { type_tag } if last => {
                    return Ok(Resolved::Attribute {
                        object: current,
                        tag: name.to_string(),
                        type_tag: type_tag.clone(),
                    })
                }
                Entry::Attribute { .. } => {
                    return Err(NamespaceError::NotADirectory(path.to_string()))
                }
            }
        }
        if !tree.dirs.contains_key(&current) {
            return Err(not_found());
        }
        Ok(Resolved::Directory(current))
    }

    /// Entries of the directory at `path`, sorted by name. A link to a
    /// directory is listed as that directory.
    pub fn list(&self, path: &str) -> NamespaceResult<Vec<EntryInfo>> {
        let handle = match self.resolve(path)? {
            Resolved::Directory(handle) => handle,
            Resolved::Link { target, .. } => target,
            Resolved::Attribute { .. } => {
                return Err(NamespaceError::NotADirectory(path.to_string()))
            }
        };
        let tree = self.read_tree();
        let dir = tree
            .dirs
            .get(&handle)
            .ok_or_else(|| NamespaceError::NotFound(path.to_string()))?;
        Ok(dir
            .entries
            .iter()
            .map(|(name, entry)| EntryInfo {
                name: name.clone(),
                kind: match entry {
                    Entry::Dir(_) => EntryKind::Directory,
                    Entry::Attribute { .. } => EntryKind::Attribute,
                    Entry::Link(_) => EntryKind::Link,
                },
            })
            .collect())
    }

    /// Read the attribute leaf at `path` as text.
    pub fn read(&self, path: &str, registry: &Registry) -> NamespaceResult<String> {
        match self.resolve(path)? {
            Resolved::Attribute { object, tag, .. } => Ok(registry.format_attribute(object, &tag)?),
            _ => Err(NamespaceError::NotAnAttribute(path.to_string())),
        }
    }

    /// Parse `text` into the attribute leaf at `path`.
    pub fn write(&self, path: &str, text: &str, registry: &Registry) -> NamespaceResult<()> {
        match self.resolve(path)? {
            Resolved::Attribute { object, tag, .. } => {
                registry.parse_attribute(object, &tag, text)?;
                Ok(())
            }
            _ => Err(NamespaceError::NotAnAttribute(path.to_string())),
        }
    }

    /// Path of the directory the link at `path` points to.
    pub fn resolve_link(&self, path: &str) -> NamespaceResult<String> {
        match self.resolve(path)? {
            Resolved::Link { target, .. } => self
                .path_of(target)
                .ok_or_else(|| NamespaceError::NotFound(path.to_string())),
            _ => Err(NamespaceError::NotALink(path.to_string())),
        }
    }

    /// Path of the directory mirroring `object`.
    pub fn path_of(&self, object: ObjectHandle) -> Option<String> {
        self.read_tree().path_of(object, &self.mount_point)
    }

    /// Indented rendering of the whole tree.
    ///
    /// With a registry, attribute leaves show their formatted value, or the
    /// payload in hex when the data type cannot format it.
    pub fn render(&self, registry: Option<&Registry>) -> String {
        let lines = {
            let tree = self.read_tree();
            let mut lines = Vec::new();
            if let Some(root) = tree.root {
                lines.push(Line {
                    depth: 0,
                    text: self.mount_point.clone(),
                    attribute: None,
                });
                self.walk(&tree, root, 1, &mut lines);
            }
            lines
        };

        let mut out = String::new();
        for line in lines {
            let _ = write!(out, "{}{}", "  ".repeat(line.depth), line.text);
            if let (Some(registry), Some((object, tag))) = (registry, &line.attribute) {
                let _ = write!(out, " = {}", leaf_value(registry, *object, tag));
            }
            out.push('\n');
        }
        out
    }

    fn walk(&self, tree: &Tree, handle: ObjectHandle, depth: usize, lines: &mut Vec<Line>) {
        let Some(dir) = tree.dirs.get(&handle) else {
            return;
        };
        for (name, entry) in &dir.entries {
            match entry {
                Entry::Dir(child) => {
                    lines.push(Line {
                        depth,
                        text: format!("{name}/"),
                        attribute: None,
                    });
                    self.walk(tree, *child, depth + 1, lines);
                }
                Entry::Attribute { type_tag } => lines.push(Line {
                    depth,
                    text: format!("{name} [{type_tag}]"),
                    attribute: Some((handle, name.clone())),
                }),
                Entry::Link(target) => {
                    let dest = tree
                        .path_of(*target, &self.mount_point)
                        .unwrap_or_else(|| format!("<gone {target}>"));
                    lines.push(Line {
                        depth,
                        text: format!("{name} -> {dest}"),
                        attribute: None,
                    });
                }
            }
        }
    }
}

fn is_link(entry: &Entry) -> bool {
    matches!(entry, Entry::Link(_))
}

fn leaf_value(registry: &Registry, object: ObjectHandle, tag: &str) -> String {
    match registry.format_attribute(object, tag) {
        Ok(text) => text,
        Err(_) => match registry.get_attribute(object, tag) {
            Ok(value) => format!("hex:{}", hex::encode(&value.payload)),
            Err(e) => format!("<{e}>"),
        },
    }
}

impl ProjectionSink for VirtualNamespace {
    fn publish_node(&self, event: &NodeEvent) -> Result<(), ProjectionError> {
        let mut tree = self.write_tree();
        if tree.dirs.contains_key(&event.handle) {
            return Err(ProjectionError::Exists(format!("directory for {}", event.handle)));
        }
        match event.parent {
            Some(parent) => {
                tree.add_entry(parent, event.tag.clone(), Entry::Dir(event.handle))?;
            }
            None => {
                if tree.root.is_some() {
                    return Err(ProjectionError::Exists(self.mount_point.clone()));
                }
                tree.root = Some(event.handle);
            }
        }
        tree.dirs.insert(
            event.handle,
            Directory {
                name: event.tag.clone(),
                parent: event.parent,
                entries: BTreeMap::new(),
            },
        );
        debug!(object = %event.handle, tag = %event.tag, "directory published");
        Ok(())
    }

    fn unpublish_node(&self, event: &NodeEvent) -> Result<(), ProjectionError> {
        let mut tree = self.write_tree();
        let dir = tree
            .dirs
            .remove(&event.handle)
            .ok_or_else(|| ProjectionError::Missing(format!("directory for {}", event.handle)))?;
        match dir.parent {
            Some(parent) => {
                let handle = event.handle;
                tree.remove_entry_if(parent, &dir.name, |e| *e == Entry::Dir(handle))?;
            }
            None => tree.root = None,
        }
        Ok(())
    }

    fn publish_attribute(&self, event: &AttributeEvent) -> Result<(), ProjectionError> {
        self.write_tree().add_entry(
            event.object,
            event.tag.clone(),
            Entry::Attribute {
                type_tag: event.type_tag.clone(),
            },
        )
    }

    fn unpublish_attribute(&self, event: &AttributeEvent) -> Result<(), ProjectionError> {
        self.write_tree()
            .remove_entry_if(event.object, &event.tag, |e| matches!(e, Entry::Attribute { .. }))?;
        Ok(())
    }

    fn publish_connection(&self, event: &LinkEvent) -> Result<(), ProjectionError> {
        let mut tree = self.write_tree();
        let backlink = event.backlink_name();
        tree.add_entry(event.source, event.tag.clone(), Entry::Link(event.target))?;
        if let Err(e) = tree.add_entry(event.target, backlink.clone(), Entry::Link(event.source)) {
            let _ = tree.remove_entry_if(event.source, &event.tag, is_link);
            return Err(e);
        }
        tree.backlinks
            .insert((event.source, event.tag.clone()), (event.target, backlink));
        Ok(())
    }

    fn unpublish_connection(&self, event: &LinkEvent) -> Result<(), ProjectionError> {
        let mut tree = self.write_tree();
        let (target, backlink) = tree
            .backlinks
            .remove(&(event.source, event.tag.clone()))
            .unwrap_or_else(|| (event.target, event.backlink_name()));
        let forward = tree.remove_entry_if(event.source, &event.tag, is_link);
        let reverse = tree.remove_entry_if(target, &backlink, is_link);
        forward?;
        reverse?;
        Ok(())
    }

    fn publish_type_link(&self, event: &TypeLinkEvent) -> Result<(), ProjectionError> {
        let mut tree = self.write_tree();
        tree.add_entry(
            event.instance,
            event.type_link_name().to_string(),
            Entry::Link(event.type_handle),
        )?;
        if let Err(e) = tree.add_entry(
            event.type_handle,
            event.instance_link_name(),
            Entry::Link(event.instance),
        ) {
            let _ = tree.remove_entry_if(event.instance, event.type_link_name(), is_link);
            return Err(e);
        }
        Ok(())
    }

    fn unpublish_type_link(&self, event: &TypeLinkEvent) -> Result<(), ProjectionError> {
        let mut tree = self.write_tree();
        tree.remove_entry_if(event.instance, event.type_link_name(), is_link)?;
        // The type object may already be gone; its directory took the link
        // with it.
        if tree.dirs.contains_key(&event.type_handle) {
            tree.remove_entry_if(event.type_handle, &event.instance_link_name(), is_link)?;
        }
        Ok(())
    }
}
