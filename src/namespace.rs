//! The mount table and root-key resolution.
//!
//! A [`Namespace`] is an immutable snapshot of the registry's mounts. Key
//! nodes keep the snapshot they were resolved against, so a node's view of
//! the tree never changes under it; mapping or unmapping a hive publishes a
//! new snapshot for later lookups.
//!
//! # Precedence
//!
//! - A mount always shadows a hive key of the same name at its mount path.
//! - Several mounts at one path are ordered by [`TieBreak`]; the losers stay
//!   queryable through [`KeyNode::shadowed_sources`].
//! - Intermediate path segments of a mount (`HKEY_LOCAL_MACHINE` above
//!   `HKEY_LOCAL_MACHINE\System`) become empty virtual keys unless a real key
//!   of that name already exists.

use crate::error::{RegistryError, Result};
use crate::hive::HiveSource;
use crate::key_path::{self, fold, has_prefix, names_equal, RootKey};
use crate::node::KeyNode;
use crate::options::TieBreak;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where HKEY_CLASSES_ROOT takes its machine-wide layer from.
pub const MACHINE_CLASSES: &str = "HKEY_LOCAL_MACHINE\\Software\\Classes";

/// Where HKEY_CLASSES_ROOT takes its per-user layer from.
pub const USER_CLASSES: &str = "HKEY_CURRENT_USER\\Software\\Classes";

/// The key HKEY_CURRENT_CONFIG mirrors.
pub const CURRENT_HARDWARE_PROFILE: &str =
    "HKEY_LOCAL_MACHINE\\System\\CurrentControlSet\\Hardware Profiles\\Current";

/// One hive registered at a mount path.
pub struct Mount {
    id: u64,
    path: String,
    folded: String,
    source: Arc<HiveSource>,
}

impl Mount {
    pub(crate) fn new(id: u64, path: String, source: Arc<HiveSource>) -> Self {
        let folded = fold(&path);
        Self {
            id,
            path,
            folded,
            source,
        }
    }

    /// Registration sequence number; later mounts have larger numbers.
    pub fn registration(&self) -> u64 {
        self.id
    }

    /// Canonical mount path, e.g. `HKEY_LOCAL_MACHINE\System`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The hive served at this path.
    pub fn source(&self) -> &Arc<HiveSource> {
        &self.source
    }

    pub(crate) fn folded_path(&self) -> &str {
        &self.folded
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("registration", &self.id)
            .field("path", &self.path)
            .field("source", &self.source.label())
            .finish()
    }
}

/// Immutable snapshot of the mount table.
pub(crate) struct Namespace {
    mounts: Vec<Arc<Mount>>,
    tie_break: TieBreak,
    closed: Arc<AtomicBool>,
}

impl Namespace {
    pub(crate) fn new(mounts: Vec<Arc<Mount>>, tie_break: TieBreak, closed: Arc<AtomicBool>) -> Self {
        Self {
            mounts,
            tie_break,
            closed,
        }
    }

    pub(crate) fn mounts(&self) -> &[Arc<Mount>] {
        &self.mounts
    }

    /// Fails once the owning registry has been closed.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(RegistryError::use_after_close("registry"))
        } else {
            Ok(())
        }
    }

    /// Mounts registered exactly at `folded`, winner first.
    pub(crate) fn mounts_at(&self, folded: &str) -> Vec<Arc<Mount>> {
        let mut found: Vec<Arc<Mount>> = self
            .mounts
            .iter()
            .filter(|m| m.folded_path() == folded)
            .cloned()
            .collect();

        match self.tie_break {
            TieBreak::MostRecent => found.sort_by(|a, b| b.id.cmp(&a.id)),
            TieBreak::FirstRegistered => found.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        found
    }

    /// Names of the mount path segments directly below `parent_path`.
    fn child_mount_names(&self, parent_path: &str) -> Vec<String> {
        let parent_folded = fold(parent_path);
        let depth = key_path::split(parent_path).len();
        let mut names: Vec<String> = Vec::new();

        for mount in &self.mounts {
            let below = if parent_folded.is_empty() {
                true
            } else {
                has_prefix(mount.folded_path(), &parent_folded) && mount.folded_path() != parent_folded
            };
            if !below {
                continue;
            }

            if let Some(name) = key_path::split(mount.path()).get(depth) {
                if !names.iter().any(|n| names_equal(n, name)) {
                    names.push((*name).to_string());
                }
            }
        }
        names
    }

    /// Applies the mounts below `parent` to its computed children.
    pub(crate) fn overlay_mounts(self: &Arc<Self>, parent: &KeyNode, children: &mut Vec<Result<KeyNode>>) {
        for name in self.child_mount_names(parent.path()) {
            let path = key_path::child(parent.path(), &name);
            let existing = children
                .iter()
                .position(|c| matches!(c, Ok(node) if names_equal(node.name(), &name)));

            let mut at_path = self.mounts_at(&fold(&path));
            if at_path.is_empty() {
                if existing.is_none() {
                    children.push(Ok(KeyNode::empty_virtual(Arc::clone(self), name, path)));
                }
                continue;
            }

            let winner = at_path.remove(0);
            if !at_path.is_empty() {
                debug!(
                    path = %path,
                    served_by = %winner.source().label(),
                    shadowed = at_path.len(),
                    "Several hives mounted at one path"
                );
            }

            let node = KeyNode::mounted(Arc::clone(self), winner, at_path, name, path.clone());
            if let Err(e) = &node {
                warn!(path = %path, error = %e, "Mounted hive root is unreadable");
            }
            match existing {
                Some(index) => {
                    debug!(path = %path, "Mount shadows hive key");
                    children[index] = node;
                }
                None => children.push(node),
            }
        }
    }

    /// Resolves one root key.
    pub(crate) fn root_node(self: &Arc<Self>, root: RootKey) -> Result<KeyNode> {
        self.ensure_open()?;
        let name = root.name().to_string();

        let mut exact = self.mounts_at(&fold(&name));
        if !exact.is_empty() {
            let winner = exact.remove(0);
            return KeyNode::mounted(Arc::clone(self), winner, exact, name.clone(), name);
        }

        match root {
            RootKey::ClassesRoot => {
                let mut layers = Vec::new();
                for layer_path in [MACHINE_CLASSES, USER_CLASSES] {
                    match self.resolve(layer_path) {
                        Ok(layer) => layers.push(layer),
                        Err(e) if e.is_not_found() => {}
                        Err(e) => {
                            warn!(layer = layer_path, error = %e, "Skipping unreadable classes layer");
                        }
                    }
                }
                Ok(KeyNode::merged(Arc::clone(self), name.clone(), name, layers))
            }
            RootKey::CurrentConfig => match self.resolve(CURRENT_HARDWARE_PROFILE) {
                Ok(profile) => Ok(profile.relabel(name.clone(), name)),
                Err(e) if e.is_not_found() => Ok(KeyNode::empty_virtual(Arc::clone(self), name.clone(), name)),
                Err(e) => Err(e),
            },
            _ => Ok(KeyNode::empty_virtual(Arc::clone(self), name.clone(), name)),
        }
    }

    /// Walks `path` from its root key, one case-insensitive segment at a time.
    ///
    /// An empty path resolves to the registry root, whose children are the
    /// standard root keys. There is no partial-match fallback.
    pub(crate) fn resolve(self: &Arc<Self>, path: &str) -> Result<KeyNode> {
        self.ensure_open()?;
        let parsed = key_path::KeyPath::parse(path)?;

        let mut node = match parsed.root {
            None => return Ok(KeyNode::registry_root(Arc::clone(self))),
            Some(root) => self.root_node(root)?,
        };
        for segment in &parsed.segments {
            node = node.subkey(segment)?;
        }
        Ok(node)
    }
}
