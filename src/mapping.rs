//! Where hive files live on a Windows volume and where they mount.
//!
//! Mount points are derived in this order: an explicit hint, the file name,
//! then the hive's content (key paths only one kind of hive carries).

use crate::error::{RegistryError, Result};
use crate::hive::HiveSource;
use crate::key_path::{self, fold, has_prefix};
use std::sync::Arc;
use tracing::debug;

/// One standard hive file and the key path it is mounted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMapping {
    /// Key path the hive root is mounted at.
    pub key_path_prefix: &'static str,

    /// Location of the file on a Windows volume, with environment tokens.
    pub windows_path: &'static str,

    /// Key paths, relative to the hive root, that identify this kind of hive.
    pub unique_key_paths: &'static [&'static str],
}

/// Hive files of Windows NT and later.
pub const NT_FILE_MAPPINGS: &[FileMapping] = &[
    FileMapping {
        key_path_prefix: "HKEY_CURRENT_USER",
        windows_path: "%UserProfile%\\NTUSER.DAT",
        unique_key_paths: &["\\Software\\Microsoft\\Windows\\CurrentVersion\\Explorer"],
    },
    FileMapping {
        key_path_prefix: "HKEY_CURRENT_USER\\Software\\Classes",
        windows_path: "%UserProfile%\\AppData\\Local\\Microsoft\\Windows\\UsrClass.dat",
        unique_key_paths: &["\\Local Settings\\Software\\Microsoft\\Windows\\CurrentVersion"],
    },
    FileMapping {
        key_path_prefix: "HKEY_CURRENT_USER\\Software\\Classes",
        windows_path: "%UserProfile%\\Local Settings\\Application Data\\Microsoft\\Windows\\UsrClass.dat",
        unique_key_paths: &[],
    },
    FileMapping {
        key_path_prefix: "HKEY_LOCAL_MACHINE\\SAM",
        windows_path: "%SystemRoot%\\System32\\config\\SAM",
        unique_key_paths: &["\\SAM\\Domains\\Account\\Users"],
    },
    FileMapping {
        key_path_prefix: "HKEY_LOCAL_MACHINE\\Security",
        windows_path: "%SystemRoot%\\System32\\config\\SECURITY",
        unique_key_paths: &["\\Policy\\PolAdtEv"],
    },
    FileMapping {
        key_path_prefix: "HKEY_LOCAL_MACHINE\\Software",
        windows_path: "%SystemRoot%\\System32\\config\\SOFTWARE",
        unique_key_paths: &["\\Microsoft\\Windows\\CurrentVersion\\App Paths"],
    },
    FileMapping {
        key_path_prefix: "HKEY_LOCAL_MACHINE\\System",
        windows_path: "%SystemRoot%\\System32\\config\\SYSTEM",
        unique_key_paths: &["\\Select"],
    },
];

/// Hive files of Windows 9x.
pub const WIN9X_FILE_MAPPINGS: &[FileMapping] = &[
    FileMapping {
        key_path_prefix: "HKEY_LOCAL_MACHINE",
        windows_path: "%SystemRoot%\\SYSTEM.DAT",
        unique_key_paths: &[],
    },
    FileMapping {
        key_path_prefix: "HKEY_USERS",
        windows_path: "%SystemRoot%\\USER.DAT",
        unique_key_paths: &[],
    },
];

/// Mount points of well-known hive file names.
const FILE_NAME_MOUNT_POINTS: &[(&str, &str)] = &[
    ("SYSTEM", "HKEY_LOCAL_MACHINE\\System"),
    ("SOFTWARE", "HKEY_LOCAL_MACHINE\\Software"),
    ("SAM", "HKEY_LOCAL_MACHINE\\SAM"),
    ("SECURITY", "HKEY_LOCAL_MACHINE\\Security"),
    ("COMPONENTS", "HKEY_LOCAL_MACHINE\\COMPONENTS"),
    ("BCD", "HKEY_LOCAL_MACHINE\\BCD00000000"),
    ("DEFAULT", "HKEY_USERS\\.DEFAULT"),
    ("NTUSER.DAT", "HKEY_CURRENT_USER"),
    ("USRCLASS.DAT", "HKEY_CURRENT_USER\\Software\\Classes"),
    ("SYSTEM.DAT", "HKEY_LOCAL_MACHINE"),
    ("USER.DAT", "HKEY_USERS"),
];

/// Looks up the mount point of a hive by its file name (case-insensitive).
///
/// ```rust
/// # use reg_vfs::mapping::mount_point_for_file_name;
/// assert_eq!(mount_point_for_file_name("ntuser.dat"), Some("HKEY_CURRENT_USER"));
/// assert_eq!(mount_point_for_file_name("notes.txt"), None);
/// ```
pub fn mount_point_for_file_name(file_name: &str) -> Option<&'static str> {
    let upper = file_name.to_ascii_uppercase();
    FILE_NAME_MOUNT_POINTS
        .iter()
        .find(|(name, _)| *name == upper)
        .map(|(_, mount)| *mount)
}

/// Detects the mount point of a hive from the keys it contains.
///
/// Returns `Ok(None)` when no mapping matches.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidKeyPath`] when several mappings match and
/// they are not the NTUSER.DAT / UsrClass.dat pair, which resolves to
/// `HKEY_CURRENT_USER`.
pub fn detect_mount_point(source: &Arc<HiveSource>) -> Result<Option<&'static str>> {
    let mut candidates: Vec<&'static str> = Vec::new();

    for mapping in NT_FILE_MAPPINGS {
        if mapping.unique_key_paths.is_empty() {
            continue;
        }

        let all_present = mapping
            .unique_key_paths
            .iter()
            .all(|path| match source.get_key_by_path(path) {
                Ok(_) => true,
                Err(e) => {
                    if !e.is_not_found() {
                        debug!(hive = %source.label(), path = %path, error = %e, "Probe key unreadable");
                    }
                    false
                }
            });

        if all_present && !candidates.contains(&mapping.key_path_prefix) {
            candidates.push(mapping.key_path_prefix);
        }
    }

    match candidates.as_slice() {
        [] => Ok(None),
        [single] => Ok(Some(*single)),
        [a, b]
            if [*a, *b].contains(&"HKEY_CURRENT_USER")
                && [*a, *b].contains(&"HKEY_CURRENT_USER\\Software\\Classes") =>
        {
            Ok(Some("HKEY_CURRENT_USER"))
        }
        _ => Err(RegistryError::InvalidKeyPath(format!(
            "hive '{}' matches several mount points: {}",
            source.label(),
            candidates.join(", ")
        ))),
    }
}

/// Derives the mount point of a hive: hint, then file name, then content.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidKeyPath`] when nothing identifies the hive.
pub fn derive_mount_point(
    hint: Option<&str>,
    file_name: Option<&str>,
    source: &Arc<HiveSource>,
) -> Result<String> {
    if let Some(hint) = hint {
        return key_path::canonicalize_mount_point(hint);
    }

    if let Some(mount) = file_name.and_then(mount_point_for_file_name) {
        debug!(hive = %source.label(), mount, "Mount point from file name");
        return Ok(mount.to_string());
    }

    match detect_mount_point(source)? {
        Some(mount) => {
            debug!(hive = %source.label(), mount, "Mount point from hive content");
            Ok(mount.to_string())
        }
        None => Err(RegistryError::InvalidKeyPath(format!(
            "unable to determine a mount point for hive '{}'",
            source.label()
        ))),
    }
}

/// NT mappings relevant to a lookup of `path` (canonical form), longest prefix first.
///
/// A mapping is relevant when the path lies beneath its prefix, or when the
/// prefix lies beneath the path (the lookup enumerates it).
pub fn mappings_for_path(path: &str) -> Vec<(usize, &'static FileMapping)> {
    let folded = fold(path);
    let mut candidates: Vec<(usize, &'static FileMapping)> = NT_FILE_MAPPINGS
        .iter()
        .enumerate()
        .filter(|(_, mapping)| {
            let prefix = fold(mapping.key_path_prefix);
            folded.is_empty() || has_prefix(&folded, &prefix) || has_prefix(&prefix, &folded)
        })
        .collect();

    candidates.sort_by(|a, b| b.1.key_path_prefix.len().cmp(&a.1.key_path_prefix.len()));
    candidates
}
