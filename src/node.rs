//! Navigable key and value handles.
//!
//! A [`KeyNode`] is either backed by one key record of one hive, or virtual:
//! a synthesised key whose children are the union of zero or more contributing
//! keys (empty mount-path segments, HKEY_CLASSES_ROOT layers). Children and
//! values are computed on first access and cached on the handle; clones of a
//! handle share the cache.
//!
//! Name and path stay readable after the backing hive is closed. Everything
//! else returns [`RegistryError::UseAfterClose`].

use crate::alias;
use crate::cell::ValueType;
use crate::error::{RegistryError, Result};
use crate::hive::{HiveSource, KeyEntry};
use crate::key_path::{self, fold, names_equal, RootKey};
use crate::namespace::{Mount, Namespace};
use crate::utils::filetime_to_datetime;
use crate::value::{ValueCell, ValueData};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Deepest key nesting followed by recursive walks (the Windows limit).
pub const MAX_KEY_DEPTH: usize = 512;

#[derive(Clone)]
enum Backing {
    /// One key record of one hive.
    Real {
        source: Arc<HiveSource>,
        entry: Arc<KeyEntry>,
    },
    /// Synthesised key; later layers win on name clashes.
    Virtual { layers: Vec<KeyNode> },
    /// The unnamed key above the root keys.
    RegistryRoot,
}

struct NodeInner {
    name: String,
    path: String,
    backing: Backing,
    ctx: Option<Arc<Namespace>>,
    served_by: Option<Arc<Mount>>,
    shadowed: Vec<Arc<Mount>>,
    alias_target: Option<String>,
    children: OnceLock<Vec<KeyNode>>,
    values: OnceLock<Vec<ValueNode>>,
}

/// A registry key.
#[derive(Clone)]
pub struct KeyNode {
    inner: Arc<NodeInner>,
}

impl fmt::Debug for KeyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyNode")
            .field("path", &self.inner.path)
            .field("virtual", &self.is_virtual())
            .field("alias_target", &self.inner.alias_target)
            .finish()
    }
}

impl KeyNode {
    fn build(
        name: String,
        path: String,
        backing: Backing,
        ctx: Option<Arc<Namespace>>,
        served_by: Option<Arc<Mount>>,
        shadowed: Vec<Arc<Mount>>,
    ) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                name,
                path,
                backing,
                ctx,
                served_by,
                shadowed,
                alias_target: None,
                children: OnceLock::new(),
                values: OnceLock::new(),
            }),
        }
    }

    /// Copies this key's backing and provenance under a new name and path.
    fn rebuild(
        &self,
        name: String,
        path: String,
        ctx: Option<Arc<Namespace>>,
        alias_target: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                name,
                path,
                backing: self.inner.backing.clone(),
                ctx,
                served_by: self.inner.served_by.clone(),
                shadowed: self.inner.shadowed.clone(),
                alias_target,
                children: OnceLock::new(),
                values: OnceLock::new(),
            }),
        }
    }

    /// Root key of a standalone hive; the root has the empty path.
    pub(crate) fn hive_root(source: Arc<HiveSource>) -> Result<Self> {
        let entry = source.key_entry(source.root_cell_offset())?;
        let name = entry.cell.name.clone();
        Ok(Self::build(
            name,
            String::new(),
            Backing::Real { source, entry },
            None,
            None,
            Vec::new(),
        ))
    }

    /// Root key of a mounted hive, labelled with its mount path.
    pub(crate) fn mounted(
        ctx: Arc<Namespace>,
        winner: Arc<Mount>,
        shadowed: Vec<Arc<Mount>>,
        name: String,
        path: String,
    ) -> Result<Self> {
        let source = Arc::clone(winner.source());
        let entry = source.key_entry(source.root_cell_offset())?;
        Ok(Self::build(
            name,
            path,
            Backing::Real { source, entry },
            Some(ctx),
            Some(winner),
            shadowed,
        ))
    }

    /// A virtual key with no contributors; only mounts can give it children.
    pub(crate) fn empty_virtual(ctx: Arc<Namespace>, name: String, path: String) -> Self {
        Self::merged(ctx, name, path, Vec::new())
    }

    /// A virtual key merging the children and values of `layers`.
    pub(crate) fn merged(ctx: Arc<Namespace>, name: String, path: String, layers: Vec<KeyNode>) -> Self {
        Self::layered(name, path, layers, Some(ctx))
    }

    /// A virtual key over `layers`, served by the mount of the last layer.
    /// Mounts of the earlier layers are recorded as shadowed.
    fn layered(name: String, path: String, layers: Vec<KeyNode>, ctx: Option<Arc<Namespace>>) -> Self {
        let served_by = layers.last().and_then(|layer| layer.inner.served_by.clone());
        let mut shadowed: Vec<Arc<Mount>> = Vec::new();
        for layer in layers.iter().rev().skip(1) {
            if let Some(mount) = &layer.inner.served_by {
                let seen = served_by.iter().chain(shadowed.iter()).any(|m| Arc::ptr_eq(m, mount));
                if !seen {
                    shadowed.push(Arc::clone(mount));
                }
            }
        }
        Self::build(name, path, Backing::Virtual { layers }, ctx, served_by, shadowed)
    }

    pub(crate) fn registry_root(ctx: Arc<Namespace>) -> Self {
        Self::build(
            String::new(),
            String::new(),
            Backing::RegistryRoot,
            Some(ctx),
            None,
            Vec::new(),
        )
    }

    /// An alias of this key under another name and path, with fresh caches.
    pub(crate) fn relabel(&self, name: String, path: String) -> Self {
        self.rebuild(name, path, self.inner.ctx.clone(), Some(self.inner.path.clone()))
    }

    /// Key name; empty for the registry root.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Full logical path, e.g. `HKEY_LOCAL_MACHINE\System\Select`.
    ///
    /// Keys of a standalone hive have paths relative to the hive root.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// True for synthesised keys with no single backing record.
    pub fn is_virtual(&self) -> bool {
        !matches!(self.inner.backing, Backing::Real { .. })
    }

    /// For alias keys (`CurrentControlSet`, `HKEY_CURRENT_CONFIG`), the path
    /// of the key they stand for.
    pub fn alias_target(&self) -> Option<&str> {
        self.inner.alias_target.as_deref()
    }

    /// The mount that served this key, if it comes from a mounted hive.
    pub fn served_by(&self) -> Option<&Arc<Mount>> {
        self.inner.served_by.as_ref()
    }

    /// Mounts that lost to [`KeyNode::served_by`]: other mounts registered
    /// at the same path, or the overridden layers of a merged key.
    pub fn shadowed_sources(&self) -> &[Arc<Mount>] {
        &self.inner.shadowed
    }

    /// The hive backing this key, if it is a real key.
    pub fn source(&self) -> Option<&Arc<HiveSource>> {
        match &self.inner.backing {
            Backing::Real { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Cell offset of the key record, if it is a real key.
    pub fn offset(&self) -> Option<u32> {
        match &self.inner.backing {
            Backing::Real { entry, .. } => Some(entry.offset),
            _ => None,
        }
    }

    fn ensure_readable(&self) -> Result<()> {
        if let Some(ctx) = &self.inner.ctx {
            ctx.ensure_open()?;
        }
        match &self.inner.backing {
            Backing::Real { source, .. } => source.ensure_open(),
            _ => Ok(()),
        }
    }

    /// Last-written time; `None` for virtual keys without contributors.
    pub fn last_written_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.ensure_readable()?;
        match &self.inner.backing {
            Backing::Real { entry, .. } => Ok(filetime_to_datetime(entry.cell.last_written)),
            Backing::Virtual { layers } => match layers.last() {
                Some(layer) => layer.last_written_time(),
                None => Ok(None),
            },
            Backing::RegistryRoot => Ok(None),
        }
    }

    /// Class name of the key record, if any.
    pub fn class_name(&self) -> Result<Option<String>> {
        self.ensure_readable()?;
        match &self.inner.backing {
            Backing::Real { source, entry } => source.class_name(&entry.cell),
            Backing::Virtual { layers } => match layers.last() {
                Some(layer) => layer.class_name(),
                None => Ok(None),
            },
            Backing::RegistryRoot => Ok(None),
        }
    }

    /// Child keys ordered by case-folded name.
    ///
    /// The first successful call caches the list on this handle. A leaf
    /// yields an empty list.
    ///
    /// # Errors
    ///
    /// Fails if the subkey index or any child record is malformed; use
    /// [`KeyNode::subkeys_lossy`] to still reach the readable children.
    pub fn subkeys(&self) -> Result<Vec<KeyNode>> {
        if let Some(children) = self.inner.children.get() {
            self.ensure_readable()?;
            return Ok(children.clone());
        }

        let children = self
            .compute_children()?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        Ok(self.inner.children.get_or_init(|| children).clone())
    }

    /// Child keys, one result per child record.
    ///
    /// The outer error means the subkey index itself could not be read.
    pub fn subkeys_lossy(&self) -> Result<Vec<Result<KeyNode>>> {
        if let Some(children) = self.inner.children.get() {
            self.ensure_readable()?;
            return Ok(children.iter().cloned().map(Ok).collect());
        }

        let children = self.compute_children()?;
        if children.iter().all(|c| c.is_ok()) {
            let cached: Vec<KeyNode> = children.iter().filter_map(|c| c.as_ref().ok()).cloned().collect();
            let _ = self.inner.children.set(cached);
        }
        Ok(children)
    }

    /// Looks up a direct child by name, case-insensitively.
    ///
    /// # Errors
    ///
    /// `NotFound` if no readable child matches. When the name is missing and
    /// some child records could not be decoded, the first decode error is
    /// returned instead, since the key may be one of them.
    pub fn subkey(&self, name: &str) -> Result<KeyNode> {
        let children = self.subkeys_lossy()?;
        let mut first_error = None;

        for child in children {
            match child {
                Ok(node) if names_equal(node.name(), name) => return Ok(node),
                Ok(_) => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        Err(first_error.unwrap_or_else(|| {
            RegistryError::not_found("key", &key_path::child(self.path(), name))
        }))
    }

    /// Returns the child at `index` in name order.
    pub fn subkey_by_index(&self, index: usize) -> Result<KeyNode> {
        self.subkeys()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| RegistryError::not_found("subkey index", &index.to_string()))
    }

    /// Resolves a backslash-separated path relative to this key.
    ///
    /// An empty path returns this key.
    pub fn subkey_by_path(&self, path: &str) -> Result<KeyNode> {
        let mut node = self.clone();
        for segment in key_path::split(path) {
            node = node.subkey(segment)?;
        }
        Ok(node)
    }

    /// Number of child keys.
    pub fn subkey_count(&self) -> Result<usize> {
        Ok(self.subkeys()?.len())
    }

    /// Values of this key, in record order.
    pub fn values(&self) -> Result<Vec<ValueNode>> {
        if let Some(values) = self.inner.values.get() {
            self.ensure_readable()?;
            return Ok(values.clone());
        }

        let values = self
            .compute_values()?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        Ok(self.inner.values.get_or_init(|| values).clone())
    }

    /// Values of this key, one result per value record.
    pub fn values_lossy(&self) -> Result<Vec<Result<ValueNode>>> {
        if let Some(values) = self.inner.values.get() {
            self.ensure_readable()?;
            return Ok(values.iter().cloned().map(Ok).collect());
        }
        self.compute_values()
    }

    /// Looks up a value by name, case-insensitively.
    ///
    /// The empty name selects the default value.
    pub fn value(&self, name: &str) -> Result<ValueNode> {
        let mut first_error = None;
        for value in self.values_lossy()? {
            match value {
                Ok(v) if names_equal(v.name(), name) => return Ok(v),
                Ok(_) => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let shown = if name.is_empty() { "(default)" } else { name };
        Err(first_error.unwrap_or_else(|| RegistryError::not_found("value", shown)))
    }

    /// Number of values.
    pub fn value_count(&self) -> Result<usize> {
        Ok(self.values()?.len())
    }

    /// Depth-first walk over this key and everything below it.
    pub fn recurse(&self) -> RecurseKeys {
        RecurseKeys {
            stack: vec![(0, Ok(self.clone()))],
        }
    }

    fn child_of_record(&self, source: &Arc<HiveSource>, offset: u32) -> Result<KeyNode> {
        let entry = source.key_entry(offset)?;
        let name = entry.cell.name.clone();
        let path = key_path::child(self.path(), &name);
        Ok(Self::build(
            name,
            path,
            Backing::Real {
                source: Arc::clone(source),
                entry,
            },
            self.inner.ctx.clone(),
            self.inner.served_by.clone(),
            Vec::new(),
        ))
    }

    fn compute_children(&self) -> Result<Vec<Result<KeyNode>>> {
        self.ensure_readable()?;

        let mut children = match &self.inner.backing {
            Backing::Real { source, entry } => source
                .subkey_offsets(entry)?
                .into_iter()
                .map(|offset| self.child_of_record(source, offset))
                .collect(),
            Backing::Virtual { layers } => self.merge_layer_children(layers),
            Backing::RegistryRoot => return Ok(self.standard_roots()),
        };

        if let Some(ctx) = &self.inner.ctx {
            ctx.overlay_mounts(self, &mut children);
        }
        alias::attach_current_control_set(self, &mut children);

        children.sort_by_cached_key(|child| match child {
            Ok(node) => (0, fold(node.name())),
            Err(_) => (1, String::new()),
        });
        Ok(children)
    }

    fn standard_roots(&self) -> Vec<Result<KeyNode>> {
        match &self.inner.ctx {
            Some(ctx) => RootKey::STANDARD.iter().map(|root| ctx.root_node(*root)).collect(),
            None => Vec::new(),
        }
    }

    /// Unions the children of `layers`; same-named children are merged recursively.
    fn merge_layer_children(&self, layers: &[KeyNode]) -> Vec<Result<KeyNode>> {
        let mut groups: Vec<(String, Vec<KeyNode>)> = Vec::new();
        let mut errors = Vec::new();

        for layer in layers {
            let children = match layer.subkeys_lossy() {
                Ok(children) => children,
                Err(e) => {
                    errors.push(Err(e));
                    continue;
                }
            };
            for child in children {
                match child {
                    Ok(node) => {
                        let folded = fold(node.name());
                        match groups.iter_mut().find(|(name, _)| *name == folded) {
                            Some((_, group)) => group.push(node),
                            None => groups.push((folded, vec![node])),
                        }
                    }
                    Err(e) => errors.push(Err(e)),
                }
            }
        }

        let mut merged: Vec<Result<KeyNode>> = groups
            .into_iter()
            .filter_map(|(_, group)| {
                let winner = group.last()?.clone();
                let name = winner.name().to_string();
                let path = key_path::child(self.path(), &name);
                let ctx = self.inner.ctx.clone();
                if group.len() == 1 {
                    Some(Ok(winner.rebuild(name, path, ctx, None)))
                } else {
                    Some(Ok(Self::layered(name, path, group, ctx)))
                }
            })
            .collect();

        merged.extend(errors);
        merged
    }

    fn compute_values(&self) -> Result<Vec<Result<ValueNode>>> {
        self.ensure_readable()?;
        match &self.inner.backing {
            Backing::Real { source, entry } => Ok(source
                .value_offsets(entry)?
                .into_iter()
                .map(|offset| {
                    source.value_cell(offset).map(|cell| ValueNode {
                        source: Arc::clone(source),
                        cell,
                        offset,
                        key_path: self.path().to_string(),
                    })
                })
                .collect()),
            Backing::Virtual { layers } => {
                let mut merged: Vec<Result<ValueNode>> = Vec::new();
                for layer in layers {
                    for value in layer.values_lossy()? {
                        if let Ok(v) = &value {
                            if let Some(slot) = merged
                                .iter_mut()
                                .find(|m| matches!(m, Ok(existing) if names_equal(existing.name(), v.name())))
                            {
                                debug!(value = %v.name(), key = %self.path(), "Later classes layer overrides value");
                                *slot = value;
                                continue;
                            }
                        }
                        merged.push(value);
                    }
                }
                Ok(merged)
            }
            Backing::RegistryRoot => Ok(Vec::new()),
        }
    }
}

/// A value under a key.
#[derive(Clone)]
pub struct ValueNode {
    source: Arc<HiveSource>,
    cell: Arc<ValueCell>,
    offset: u32,
    key_path: String,
}

impl fmt::Debug for ValueNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueNode")
            .field("key", &self.key_path)
            .field("name", &self.cell.name)
            .field("type", &self.cell.data_type)
            .finish()
    }
}

impl ValueNode {
    /// Value name; empty for the default value.
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Path of the key holding this value.
    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    /// The hive holding the vk record.
    pub fn source(&self) -> &Arc<HiveSource> {
        &self.source
    }

    /// Cell offset of the vk record.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Declared type tag.
    pub fn data_type(&self) -> ValueType {
        self.cell.data_type
    }

    /// Declared type as a `REG_*` name.
    pub fn data_type_name(&self) -> String {
        self.cell.data_type.name()
    }

    /// Declared payload size in bytes.
    pub fn data_size(&self) -> u32 {
        self.cell.data_length
    }

    /// Raw payload, available whether or not it decodes.
    pub fn raw_data(&self) -> Result<Vec<u8>> {
        self.source.value_data(&self.cell)
    }

    /// Payload decoded according to the declared type.
    pub fn data(&self) -> Result<ValueData> {
        let raw = self.raw_data()?;
        ValueData::decode(&raw, self.cell.data_type, self.name())
    }

    /// REG_SZ or REG_EXPAND_SZ.
    pub fn data_is_string(&self) -> bool {
        self.cell.data_type.is_string()
    }

    /// REG_DWORD, REG_DWORD_BIG_ENDIAN or REG_QWORD.
    pub fn data_is_integer(&self) -> bool {
        self.cell.data_type.is_integer()
    }

    /// REG_MULTI_SZ.
    pub fn data_is_multi_string(&self) -> bool {
        self.cell.data_type.is_multi_string()
    }

    /// REG_BINARY.
    pub fn data_is_binary(&self) -> bool {
        self.cell.data_type.is_binary()
    }
}

/// Depth-first, pre-order walk over a key tree.
///
/// Unreadable subtrees yield an `Err` and the walk continues with the next
/// sibling.
pub struct RecurseKeys {
    stack: Vec<(usize, Result<KeyNode>)>,
}

impl Iterator for RecurseKeys {
    type Item = Result<KeyNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, item) = self.stack.pop()?;
        let node = match item {
            Ok(node) => node,
            Err(e) => return Some(Err(e)),
        };

        if depth >= MAX_KEY_DEPTH {
            self.stack.push((
                depth,
                Err(RegistryError::format_error(format!(
                    "Key nesting below '{}' exceeds {} levels",
                    node.path(),
                    MAX_KEY_DEPTH
                ))),
            ));
            return Some(Ok(node));
        }

        match node.subkeys_lossy() {
            Ok(children) => self
                .stack
                .extend(children.into_iter().rev().map(|child| (depth + 1, child))),
            Err(e) => self.stack.push((depth + 1, Err(e))),
        }
        Some(Ok(node))
    }
}
