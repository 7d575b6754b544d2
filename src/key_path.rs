//! Key path handling: splitting, joining, case folding and root keys.
//!
//! Key paths are backslash-separated. Empty segments are ignored, so
//! `\HKLM\\Software\` and `HKLM\Software` name the same key. Comparison is
//! case-insensitive over the full Unicode range.

use crate::error::{RegistryError, Result};
use std::fmt;

/// Key path segment separator.
pub const SEPARATOR: char = '\\';

/// Splits a key path into its non-empty segments.
pub fn split(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
}

/// Joins segments into a key path, collapsing empty segments.
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .flat_map(|s| split(s.as_ref()))
        .collect::<Vec<_>>()
        .join("\\")
}

/// Appends a child name to a parent path.
pub fn child(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, SEPARATOR, name)
    }
}

/// Case-folds a key name or path for comparisons and sorting.
pub fn fold(name: &str) -> String {
    name.to_uppercase()
}

/// Compares two names case-insensitively.
pub fn names_equal(a: &str, b: &str) -> bool {
    a == b || fold(a) == fold(b)
}

/// Returns true when `path` equals `prefix` or lies beneath it.
///
/// Both arguments must already be folded.
pub fn has_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path[prefix.len()..].starts_with(SEPARATOR))
}

/// The registry's top-level keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RootKey {
    /// HKEY_CLASSES_ROOT
    ClassesRoot,
    /// HKEY_CURRENT_CONFIG
    CurrentConfig,
    /// HKEY_CURRENT_USER
    CurrentUser,
    /// HKEY_LOCAL_MACHINE
    LocalMachine,
    /// HKEY_USERS
    Users,
    /// HKEY_DYN_DATA (Windows 9x only)
    DynData,
    /// HKEY_PERFORMANCE_DATA
    PerformanceData,
}

impl RootKey {
    /// The five root keys every Windows NT registry exposes, in name order.
    pub const STANDARD: [RootKey; 5] = [
        RootKey::ClassesRoot,
        RootKey::CurrentConfig,
        RootKey::CurrentUser,
        RootKey::LocalMachine,
        RootKey::Users,
    ];

    /// Returns the canonical `HKEY_*` name.
    pub fn name(&self) -> &'static str {
        match self {
            RootKey::ClassesRoot => "HKEY_CLASSES_ROOT",
            RootKey::CurrentConfig => "HKEY_CURRENT_CONFIG",
            RootKey::CurrentUser => "HKEY_CURRENT_USER",
            RootKey::LocalMachine => "HKEY_LOCAL_MACHINE",
            RootKey::Users => "HKEY_USERS",
            RootKey::DynData => "HKEY_DYN_DATA",
            RootKey::PerformanceData => "HKEY_PERFORMANCE_DATA",
        }
    }

    /// Returns the short alias, where one exists.
    pub fn alias(&self) -> Option<&'static str> {
        match self {
            RootKey::ClassesRoot => Some("HKCR"),
            RootKey::CurrentConfig => Some("HKCC"),
            RootKey::CurrentUser => Some("HKCU"),
            RootKey::LocalMachine => Some("HKLM"),
            RootKey::Users => Some("HKU"),
            RootKey::DynData | RootKey::PerformanceData => None,
        }
    }

    /// Parses a root key name or alias, case-insensitively.
    pub fn from_name(name: &str) -> Option<RootKey> {
        let upper = name.to_ascii_uppercase();
        [
            RootKey::ClassesRoot,
            RootKey::CurrentConfig,
            RootKey::CurrentUser,
            RootKey::LocalMachine,
            RootKey::Users,
            RootKey::DynData,
            RootKey::PerformanceData,
        ]
        .into_iter()
        .find(|root| root.name() == upper || root.alias() == Some(upper.as_str()))
    }

    /// True for the five standard roots.
    pub fn is_standard(&self) -> bool {
        Self::STANDARD.contains(self)
    }
}

impl fmt::Display for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A key path split into its root key and the segments beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    /// Root key, or `None` for the registry root itself.
    pub root: Option<RootKey>,
    /// Segments below the root, as written by the caller.
    pub segments: Vec<String>,
}

impl KeyPath {
    /// Parses a path whose first segment is a root key name or alias.
    ///
    /// An empty path yields the registry root.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnsupportedRootKey`] if the first segment is
    /// not a root key.
    pub fn parse(path: &str) -> Result<Self> {
        let mut segments = split(path).into_iter();
        let root = match segments.next() {
            None => {
                return Ok(Self {
                    root: None,
                    segments: Vec::new(),
                })
            }
            Some(first) => RootKey::from_name(first)
                .ok_or_else(|| RegistryError::UnsupportedRootKey(first.to_string()))?,
        };

        Ok(Self {
            root: Some(root),
            segments: segments.map(str::to_string).collect(),
        })
    }

    /// Returns the path with the root canonicalised.
    pub fn canonical(&self) -> String {
        match self.root {
            None => String::new(),
            Some(root) => {
                let mut path = root.name().to_string();
                for segment in &self.segments {
                    path.push(SEPARATOR);
                    path.push_str(segment);
                }
                path
            }
        }
    }
}

/// Canonicalises a mount point: resolves the root alias, drops empty segments.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidKeyPath`] for the empty path and
/// [`RegistryError::UnsupportedRootKey`] for an unknown root.
pub fn canonicalize_mount_point(path: &str) -> Result<String> {
    let parsed = KeyPath::parse(path)?;
    if parsed.root.is_none() {
        return Err(RegistryError::InvalidKeyPath(
            "the registry root cannot be a mount point".to_string(),
        ));
    }
    Ok(parsed.canonical())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_join() {
        assert_eq!(split("\\HKLM\\\\Software\\"), vec!["HKLM", "Software"]);
        assert!(split("").is_empty());
        assert_eq!(join(&["HKEY_USERS", "S-1-5-18\\Software"]), "HKEY_USERS\\S-1-5-18\\Software");
    }

    #[test]
    fn test_root_aliases() {
        assert_eq!(RootKey::from_name("hklm"), Some(RootKey::LocalMachine));
        assert_eq!(RootKey::from_name("HKEY_USERS"), Some(RootKey::Users));
        assert_eq!(RootKey::from_name("HKEY_DYN_DATA"), Some(RootKey::DynData));
        assert_eq!(RootKey::from_name("HKEY_BOGUS"), None);
        assert!(!RootKey::PerformanceData.is_standard());
    }

    #[test]
    fn test_parse_canonical() {
        let path = KeyPath::parse("hkcu\\Software\\Classes").unwrap();
        assert_eq!(path.canonical(), "HKEY_CURRENT_USER\\Software\\Classes");

        assert_eq!(KeyPath::parse("").unwrap().root, None);
        assert!(matches!(
            KeyPath::parse("HKEY_NOPE\\x").unwrap_err(),
            RegistryError::UnsupportedRootKey(_)
        ));
        assert!(canonicalize_mount_point("\\").is_err());
    }

    #[test]
    fn test_prefix_and_case() {
        assert!(has_prefix("HKEY_USERS\\S-1", "HKEY_USERS"));
        assert!(!has_prefix("HKEY_USERSX", "HKEY_USERS"));
        assert!(names_equal("Stra\u{df}e", "STRA\u{df}E"));
        assert!(names_equal("\u{e9}t\u{e9}", "\u{c9}T\u{c9}"));
    }
}
