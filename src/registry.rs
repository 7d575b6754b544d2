//! The registry facade: owns the mounted hives and answers path lookups.

use crate::error::{RegistryError, Result};
use crate::hive::HiveSource;
use crate::key_path::{self, fold, has_prefix, KeyPath, RootKey};
use crate::mapping;
use crate::namespace::{Mount, Namespace, MACHINE_CLASSES, USER_CLASSES};
use crate::node::KeyNode;
use crate::options::RegistryOptions;
use crate::reader::RegistryFileReader;
use crate::value::ValueData;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};

/// Key listing the user profiles of a machine, below HKEY_LOCAL_MACHINE\Software.
pub const PROFILE_LIST: &str =
    "HKEY_LOCAL_MACHINE\\Software\\Microsoft\\Windows NT\\CurrentVersion\\ProfileList";

/// Location of UsrClass.dat inside a Vista-or-later profile.
const USER_CLASSES_FILE: &str = "AppData\\Local\\Microsoft\\Windows\\UsrClass.dat";

/// Lifecycle of a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// Nothing mapped yet.
    Unopened,
    /// At least one hive is mapped.
    Mapped,
    /// Closed; every operation fails with `UseAfterClose`.
    Closed,
}

/// A virtual Windows registry composed of mounted hive files.
///
/// Lookups run against an immutable snapshot of the mount table; mapping
/// and unmapping publish a new snapshot. Handles obtained earlier keep
/// the view they were resolved in.
///
/// # Examples
///
/// ```no_run
/// use reg_vfs::Registry;
///
/// # fn main() -> reg_vfs::Result<()> {
/// let registry = Registry::new();
/// registry.map_file("SYSTEM", None)?;
///
/// let services = registry.get_key_by_path("HKLM\\System\\CurrentControlSet\\Services")?;
/// for service in services.subkeys()? {
///     println!("{}", service.name());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Registry {
    options: RegistryOptions,
    reader: Option<Box<dyn RegistryFileReader>>,
    namespace: RwLock<Arc<Namespace>>,
    next_registration: AtomicU64,
    closed: Arc<AtomicBool>,
    attempted_mappings: Mutex<HashSet<usize>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry with default options.
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    /// Creates an empty registry.
    pub fn with_options(options: RegistryOptions) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let namespace = Namespace::new(Vec::new(), options.tie_break, Arc::clone(&closed));
        Self {
            options,
            reader: None,
            namespace: RwLock::new(Arc::new(namespace)),
            next_registration: AtomicU64::new(1),
            closed,
            attempted_mappings: Mutex::new(HashSet::new()),
        }
    }

    /// Creates a registry that opens the standard hive files through `reader`.
    pub fn with_reader(reader: impl RegistryFileReader + 'static, options: RegistryOptions) -> Self {
        let mut registry = Self::with_options(options);
        registry.reader = Some(Box::new(reader));
        registry
    }

    /// Returns the options.
    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RegistryState {
        if self.is_closed() {
            RegistryState::Closed
        } else if self.snapshot().mounts().is_empty() {
            RegistryState::Unopened
        } else {
            RegistryState::Mapped
        }
    }

    /// Returns true once [`Registry::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(RegistryError::use_after_close("registry"))
        } else {
            Ok(())
        }
    }

    fn snapshot(&self) -> Arc<Namespace> {
        Arc::clone(&self.namespace.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Opens a hive file and mounts it.
    ///
    /// The mount point is `hint` if given, otherwise derived from the file
    /// name (`SYSTEM`, `NTUSER.DAT`, ...) or, failing that, from keys only
    /// one kind of hive carries.
    ///
    /// # Errors
    ///
    /// Format errors from the header, I/O errors, and `InvalidKeyPath` when no
    /// mount point can be derived.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn map_file<P: AsRef<Path>>(&self, path: P, hint: Option<&str>) -> Result<Arc<Mount>> {
        self.ensure_open()?;
        let source = Arc::new(HiveSource::open_with_options(&path, &self.options.hive)?);
        let file_name = path.as_ref().file_name().map(|n| n.to_string_lossy().into_owned());
        let mount_point = mapping::derive_mount_point(hint, file_name.as_deref(), &source)?;
        self.mount(source, &mount_point)
    }

    /// Mounts a hive held in memory.
    pub fn map_bytes(&self, data: Vec<u8>, label: &str, hint: Option<&str>) -> Result<Arc<Mount>> {
        self.ensure_open()?;
        let source = Arc::new(HiveSource::from_vec_with_options(data, label, &self.options.hive)?);
        let mount_point = mapping::derive_mount_point(hint, Some(label), &source)?;
        self.mount(source, &mount_point)
    }

    /// Mounts an already opened hive at `mount_point`.
    pub fn map_source(&self, source: HiveSource, mount_point: &str) -> Result<Arc<Mount>> {
        self.ensure_open()?;
        let mount_point = key_path::canonicalize_mount_point(mount_point)?;
        self.mount(Arc::new(source), &mount_point)
    }

    fn mount(&self, source: Arc<HiveSource>, mount_point: &str) -> Result<Arc<Mount>> {
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let mount = Arc::new(Mount::new(id, mount_point.to_string(), source));

        let mut guard = self.namespace.write().unwrap_or_else(PoisonError::into_inner);
        let mut mounts = guard.mounts().to_vec();
        if let Some(previous) = mounts.iter().find(|m| m.folded_path() == mount.folded_path()) {
            warn!(
                path = %mount.path(),
                previous = %previous.source().label(),
                new = %mount.source().label(),
                tie_break = ?self.options.tie_break,
                "Mount path already in use"
            );
        }
        mounts.push(Arc::clone(&mount));
        *guard = Arc::new(Namespace::new(mounts, self.options.tie_break, Arc::clone(&self.closed)));

        info!(path = %mount.path(), source = %mount.source().label(), registration = id, "Mapped hive");
        Ok(mount)
    }

    /// Removes a mount and closes its hive.
    ///
    /// Handles resolved through the mount fail with `UseAfterClose` afterwards.
    pub fn unmap(&self, mount: &Mount) -> Result<()> {
        self.ensure_open()?;
        let mut guard = self.namespace.write().unwrap_or_else(PoisonError::into_inner);
        let mounts = guard.mounts();
        let Some(index) = mounts.iter().position(|m| m.registration() == mount.registration()) else {
            return Err(RegistryError::not_found("mount", mount.path()));
        };

        let mut remaining = mounts.to_vec();
        let removed = remaining.remove(index);
        *guard = Arc::new(Namespace::new(remaining, self.options.tie_break, Arc::clone(&self.closed)));
        drop(guard);

        removed.source().close();
        info!(path = %removed.path(), source = %removed.source().label(), "Unmapped hive");
        Ok(())
    }

    /// Mounts in registration order.
    pub fn mounts(&self) -> Vec<Arc<Mount>> {
        self.snapshot().mounts().to_vec()
    }

    /// Resolves a key path.
    ///
    /// The first segment is a root key name or alias (`HKLM`, `HKCU`, ...);
    /// the rest is matched case-insensitively, one segment at a time. The
    /// empty path is the registry root.
    ///
    /// # Errors
    ///
    /// `UnsupportedRootKey` for an unknown root, `NotFound` for a missing key,
    /// a decode error when a record on the way is malformed.
    #[instrument(skip(self))]
    pub fn get_key_by_path(&self, path: &str) -> Result<KeyNode> {
        self.ensure_open()?;
        let parsed = KeyPath::parse(path)?;
        self.auto_mount_for(&parsed);
        self.snapshot().resolve(path)
    }

    /// Reads one value by key path and value name.
    pub fn get_value(&self, key_path: &str, value_name: &str) -> Result<ValueData> {
        self.get_key_by_path(key_path)?.value(value_name)?.data()
    }

    /// The five standard root keys, in name order.
    pub fn get_root_keys(&self) -> Result<Vec<KeyNode>> {
        RootKey::STANDARD.iter().map(|root| self.root_key(*root)).collect()
    }

    /// Resolves one root key.
    pub fn root_key(&self, root: RootKey) -> Result<KeyNode> {
        self.get_key_by_path(root.name())
    }

    /// The unnamed key above the root keys.
    pub fn registry_root(&self) -> Result<KeyNode> {
        self.get_key_by_path("")
    }

    /// Mounts every profile listed under `ProfileList` through the file reader.
    ///
    /// `NTUSER.DAT` mounts at `HKEY_USERS\<SID>` and `UsrClass.dat` at
    /// `HKEY_USERS\<SID>_Classes`. Profiles whose files are missing are skipped.
    pub fn map_user_profiles(&self) -> Result<Vec<Arc<Mount>>> {
        self.ensure_open()?;
        let Some(reader) = self.reader.as_deref() else {
            warn!("No file reader installed; user profiles cannot be opened");
            return Ok(Vec::new());
        };

        let profiles = match self.get_key_by_path(PROFILE_LIST) {
            Ok(key) => key,
            Err(e) if e.is_not_found() => {
                debug!("No ProfileList key");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut mounted = Vec::new();
        for profile in profiles.subkeys_lossy()? {
            let profile = match profile {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable profile key");
                    continue;
                }
            };

            let image_path = match profile.value("ProfileImagePath").and_then(|v| v.data()) {
                Ok(data) => match data.as_str() {
                    Some(path) => path.trim_end_matches('\\').to_string(),
                    None => continue,
                },
                Err(e) => {
                    debug!(sid = %profile.name(), error = %e, "Profile without image path");
                    continue;
                }
            };

            let sid = profile.name();
            let files = [
                (format!("{}\\NTUSER.DAT", image_path), format!("HKEY_USERS\\{}", sid)),
                (
                    format!("{}\\{}", image_path, USER_CLASSES_FILE),
                    format!("HKEY_USERS\\{}_Classes", sid),
                ),
            ];

            for (windows_path, mount_point) in files {
                if !self.snapshot().mounts_at(&fold(&mount_point)).is_empty() {
                    continue;
                }
                match reader.open(&windows_path, &self.options.hive) {
                    Ok(Some(source)) => mounted.push(self.mount(Arc::new(source), &mount_point)?),
                    Ok(None) => debug!(path = %windows_path, "Profile hive not present"),
                    Err(e) => warn!(path = %windows_path, error = %e, "Profile hive unreadable"),
                }
            }
        }
        Ok(mounted)
    }

    /// Key-path prefixes whose standard hives a lookup of `parsed` depends on.
    fn dependencies(parsed: &KeyPath) -> Vec<String> {
        let mut paths = vec![parsed.canonical()];
        match parsed.root {
            Some(RootKey::ClassesRoot) => {
                paths.push(MACHINE_CLASSES.to_string());
                paths.push(USER_CLASSES.to_string());
            }
            Some(RootKey::CurrentConfig) => {
                paths.push("HKEY_LOCAL_MACHINE\\System".to_string());
            }
            _ => {}
        }
        paths
    }

    /// Opens the standard hives a lookup needs, each mapping at most once.
    fn auto_mount_for(&self, parsed: &KeyPath) {
        let Some(reader) = self.reader.as_deref() else {
            return;
        };
        if !self.options.auto_mount {
            return;
        }

        for path in Self::dependencies(parsed) {
            for (index, mapping) in mapping::mappings_for_path(&path) {
                // record the attempt only when no mount covers the mapping
                let prefix = fold(mapping.key_path_prefix);
                let snapshot = self.snapshot();
                if snapshot
                    .mounts()
                    .iter()
                    .any(|m| has_prefix(&prefix, m.folded_path()))
                {
                    continue;
                }

                {
                    let mut attempted = self
                        .attempted_mappings
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if !attempted.insert(index) {
                        continue;
                    }
                }

                match reader.open(mapping.windows_path, &self.options.hive) {
                    Ok(Some(source)) => {
                        if let Err(e) = self.mount(Arc::new(source), mapping.key_path_prefix) {
                            warn!(path = %mapping.windows_path, error = %e, "Auto-mount failed");
                        }
                    }
                    Ok(None) => debug!(path = %mapping.windows_path, "Standard hive not available"),
                    Err(e) => warn!(path = %mapping.windows_path, error = %e, "Standard hive unreadable"),
                }
            }
        }
    }

    /// Closes every mounted hive. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for mount in self.snapshot().mounts() {
            mount.source().close();
        }
        info!("Closed registry");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("state", &self.state())
            .field("mounts", &self.snapshot().mounts())
            .field("options", &self.options)
            .finish()
    }
}
