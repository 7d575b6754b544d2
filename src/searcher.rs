//! Finding keys by path, glob or regular expression.
//!
//! A [`FindSpec`] holds one matcher per key path segment, root key first.
//! The search starts at the registry root (depth 0) and descends one segment
//! per level; a key matches when it sits exactly at the pattern's depth and every
//! segment above it matched. Segment matching is case-insensitive.

use crate::error::{RegistryError, Result};
use crate::key_path::{self, fold, KeyPath};
use crate::node::{KeyNode, MAX_KEY_DEPTH};
use crate::registry::Registry;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum SegmentMatcher {
    /// Case-folded literal name.
    Literal(String),
    Pattern(Regex),
}

impl SegmentMatcher {
    fn pattern(expression: &str) -> Result<Self> {
        let regex = RegexBuilder::new(&format!("^(?:{})$", expression))
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()?;
        Ok(Self::Pattern(regex))
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Literal(folded) => *folded == fold(name),
            Self::Pattern(regex) => regex.is_match(name),
        }
    }
}

/// What to look for.
#[derive(Debug, Clone, Default)]
pub struct FindSpec {
    segments: Option<Vec<SegmentMatcher>>,
}

impl FindSpec {
    /// Matches every key.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches one key path exactly; the root may be given by its alias.
    pub fn key_path(path: &str) -> Self {
        let canonical = KeyPath::parse(path)
            .map(|parsed| parsed.canonical())
            .unwrap_or_else(|_| path.to_string());
        let segments = key_path::split(&canonical)
            .into_iter()
            .map(|segment| SegmentMatcher::Literal(fold(segment)))
            .collect();
        Self {
            segments: Some(segments),
        }
    }

    /// Matches key paths against a glob, one segment at a time.
    ///
    /// ```rust
    /// # use reg_vfs::searcher::FindSpec;
    /// let spec = FindSpec::key_path_glob("HKEY_LOCAL_MACHINE\\System\\ControlSet00?").unwrap();
    /// assert_eq!(spec.depth(), Some(3));
    /// ```
    ///
    /// # Errors
    ///
    /// Fails on an empty segment pattern.
    pub fn key_path_glob(glob: &str) -> Result<Self> {
        let segments = key_path::split(glob)
            .into_iter()
            .map(|segment| SegmentMatcher::pattern(&glob_to_regex(segment)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            segments: Some(segments),
        })
    }

    /// Matches key paths against regular expressions, one per segment.
    ///
    /// Segments are separated by a single backslash; a regex that needs a
    /// literal backslash cannot be expressed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidPattern`] if a segment does not compile.
    pub fn key_path_regex(expression: &str) -> Result<Self> {
        let segments = key_path::split(expression)
            .into_iter()
            .map(SegmentMatcher::pattern)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            segments: Some(segments),
        })
    }

    /// Number of segments a match has, or `None` for [`FindSpec::all`].
    pub fn depth(&self) -> Option<usize> {
        self.segments.as_ref().map(Vec::len)
    }

    /// Whether the key at `depth` lies on this spec's path.
    fn on_path(&self, key: &KeyNode, depth: usize) -> bool {
        match &self.segments {
            None => true,
            Some(segments) => match depth {
                0 => true,
                d if d > segments.len() => false,
                d => segments[d - 1].matches(key.name()),
            },
        }
    }

    fn matches(&self, key: &KeyNode, depth: usize) -> bool {
        self.on_path(key, depth) && self.depth().map_or(true, |d| d == depth)
    }

    fn at_maximum_depth(&self, depth: usize) -> bool {
        self.depth().map_or(false, |d| depth >= d)
    }
}

/// Converts a glob segment to a regular expression.
///
/// Supports `*`, `?`, `[seq]` and `[!seq]`. A `[` without a closing bracket
/// is literal.
///
/// ```rust
/// # use reg_vfs::searcher::glob_to_regex;
/// assert_eq!(glob_to_regex("Control*").unwrap(), "Control.*");
/// assert_eq!(glob_to_regex("[!a]b?").unwrap(), "[^a]b.");
/// ```
///
/// # Errors
///
/// Returns [`RegistryError::InvalidKeyPath`] for an empty pattern.
pub fn glob_to_regex(glob: &str) -> Result<String> {
    if glob.is_empty() {
        return Err(RegistryError::InvalidKeyPath("empty glob pattern".to_string()));
    }

    let chars: Vec<char> = glob.chars().collect();
    let mut regex = String::with_capacity(glob.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    let mut start = i + 1;
                    regex.push('[');
                    if chars[start] == '!' && start + 1 < end {
                        regex.push('^');
                        start += 1;
                    }
                    for &c in &chars[start..end] {
                        if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
                            regex.push('\\');
                        }
                        regex.push(c);
                    }
                    regex.push(']');
                    i = end;
                }
                None => regex.push_str("\\["),
            },
            c => {
                let mut buf = [0u8; 4];
                regex.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
        i += 1;
    }
    Ok(regex)
}

/// Index of the `]` closing the class opened at `open`, if the class is non-empty.
fn class_end(chars: &[char], open: usize) -> Option<usize> {
    chars
        .iter()
        .enumerate()
        .skip(open + 2)
        .find(|(_, c)| **c == ']')
        .map(|(index, _)| index)
}

/// Walks a registry and reports the key paths matching a set of specs.
pub struct RegistrySearcher<'a> {
    registry: &'a Registry,
}

impl<'a> RegistrySearcher<'a> {
    /// Creates a searcher over `registry`.
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Returns the paths of keys matching any of `specs`, in walk order.
    ///
    /// An empty slice matches every key. Unreadable keys are logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Fails if the registry is closed.
    pub fn find(&self, specs: &[FindSpec]) -> Result<Vec<String>> {
        let all = [FindSpec::all()];
        let specs: Vec<&FindSpec> = if specs.is_empty() {
            all.iter().collect()
        } else {
            specs.iter().collect()
        };

        let root = self.registry.registry_root()?;
        let mut found = Vec::new();
        Self::find_in_key(&root, &specs, 0, &mut found)?;
        debug!(matches = found.len(), "Search finished");
        Ok(found)
    }

    fn find_in_key(key: &KeyNode, specs: &[&FindSpec], depth: usize, found: &mut Vec<String>) -> Result<()> {
        let mut descend: Vec<&FindSpec> = Vec::new();
        let mut reported = false;

        for spec in specs {
            if spec.matches(key, depth) && !reported && !key.path().is_empty() {
                found.push(key.path().to_string());
                reported = true;
            }
            if spec.on_path(key, depth) && !spec.at_maximum_depth(depth) {
                descend.push(spec);
            }
        }

        if descend.is_empty() {
            return Ok(());
        }
        if depth >= MAX_KEY_DEPTH {
            warn!(key = %key.path(), "Search depth limit reached");
            return Ok(());
        }

        let children = match key.subkeys_lossy() {
            Ok(children) => children,
            Err(e @ RegistryError::UseAfterClose(_)) => return Err(e),
            Err(e) => {
                warn!(key = %key.path(), error = %e, "Skipping unreadable key");
                return Ok(());
            }
        };

        for child in children {
            match child {
                Ok(child) => Self::find_in_key(&child, &descend, depth + 1, found)?,
                Err(e @ RegistryError::UseAfterClose(_)) => return Err(e),
                Err(e) => warn!(key = %key.path(), error = %e, "Skipping unreadable subkey"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_regex() {
        assert_eq!(glob_to_regex("ControlSet00?").unwrap(), "ControlSet00.");
        assert_eq!(glob_to_regex("a.b").unwrap(), "a\\.b");
        assert_eq!(glob_to_regex("[abc]*").unwrap(), "[abc].*");
        assert_eq!(glob_to_regex("[!0-9]").unwrap(), "[^0-9]");
        assert_eq!(glob_to_regex("[").unwrap(), "\\[");
        assert_eq!(glob_to_regex("[]").unwrap(), "\\[\\]");
        assert!(glob_to_regex("").is_err());
    }

    #[test]
    fn test_segment_matching() {
        let glob = SegmentMatcher::pattern(&glob_to_regex("control*").unwrap()).unwrap();
        assert!(glob.matches("ControlSet001"));
        assert!(!glob.matches("Select"));

        let literal = SegmentMatcher::Literal(fold("Select"));
        assert!(literal.matches("SELECT"));
    }

    #[test]
    fn test_key_path_canonicalises_root() {
        let spec = FindSpec::key_path("HKLM\\System");
        match &spec.segments.as_ref().unwrap()[0] {
            SegmentMatcher::Literal(name) => assert_eq!(name, "HKEY_LOCAL_MACHINE"),
            other => panic!("unexpected matcher {:?}", other),
        }
        assert_eq!(spec.depth(), Some(2));
        assert_eq!(FindSpec::all().depth(), None);
    }

    #[test]
    fn test_invalid_regex() {
        assert!(matches!(
            FindSpec::key_path_regex("HKEY_LOCAL_MACHINE\\Mi(rosoft"),
            Err(RegistryError::InvalidPattern(_))
        ));
    }
}
