//! Registry file readers: how the registry opens hives by Windows path.
//!
//! The registry never touches acquisition itself. A [`RegistryFileReader`]
//! turns a Windows path such as `%SystemRoot%\System32\config\SYSTEM` into an
//! open [`HiveSource`], whether the files sit on a mounted volume, in an
//! image extraction directory or in memory.

use crate::error::Result;
use crate::hive::HiveSource;
use crate::key_path::fold;
use crate::options::HiveOptions;
use crate::value::expand_environment_strings;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Opens hive files by Windows path.
pub trait RegistryFileReader: Send + Sync {
    /// Opens the hive at `windows_path`.
    ///
    /// Returns `Ok(None)` when the file does not exist, and an error when it
    /// exists but is not a usable hive.
    fn open(&self, windows_path: &str, options: &HiveOptions) -> Result<Option<HiveSource>>;
}

fn default_variables() -> HashMap<String, String> {
    let mut variables = HashMap::new();
    variables.insert("SystemDrive".to_string(), "C:".to_string());
    variables.insert("SystemRoot".to_string(), "C:\\Windows".to_string());
    variables.insert("windir".to_string(), "C:\\Windows".to_string());
    variables
}

/// Expands `windows_path` and splits it into segments below the drive root.
///
/// Returns `None` if an environment token is left unexpanded.
fn volume_segments(windows_path: &str, variables: &HashMap<String, String>) -> Option<Vec<String>> {
    let expanded = expand_environment_strings(windows_path, variables);
    if expanded.contains('%') {
        return None;
    }

    let mut rest = expanded.as_str();
    if rest.len() >= 2 && rest.as_bytes()[1] == b':' {
        rest = &rest[2..];
    }

    Some(
        rest.split(['\\', '/'])
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Reads hives from a directory holding the contents of a Windows volume.
///
/// Path segments are matched case-insensitively, as NTFS does.
#[derive(Debug, Clone)]
pub struct FileSystemReader {
    volume_root: PathBuf,
    variables: HashMap<String, String>,
}

impl FileSystemReader {
    /// Creates a reader rooted at `volume_root`, which stands for `C:\`.
    ///
    /// `%SystemDrive%`, `%SystemRoot%` and `%windir%` are predefined;
    /// `%UserProfile%` must be set with [`FileSystemReader::with_variable`].
    pub fn new(volume_root: impl Into<PathBuf>) -> Self {
        Self {
            volume_root: volume_root.into(),
            variables: default_variables(),
        }
    }

    /// Defines or overrides an environment variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Maps a Windows path to a file below the volume root, if it exists.
    pub fn resolve(&self, windows_path: &str) -> Option<PathBuf> {
        let segments = volume_segments(windows_path, &self.variables)?;
        let mut current = self.volume_root.clone();
        for segment in segments {
            current = find_entry(&current, &segment)?;
        }
        current.is_file().then_some(current)
    }
}

/// Finds `name` in `dir`, exact spelling first, then case-insensitively.
fn find_entry(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = dir.join(name);
    if exact.exists() {
        return Some(exact);
    }

    let wanted = fold(name);
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .find(|entry| fold(&entry.file_name().to_string_lossy()) == wanted)
        .map(|entry| entry.path())
}

impl RegistryFileReader for FileSystemReader {
    fn open(&self, windows_path: &str, options: &HiveOptions) -> Result<Option<HiveSource>> {
        match self.resolve(windows_path) {
            Some(path) => {
                debug!(windows_path, path = %path.display(), "Opening hive from volume");
                HiveSource::open_with_options(&path, options).map(Some)
            }
            None => {
                debug!(windows_path, "Hive file not present on volume");
                Ok(None)
            }
        }
    }
}

/// Serves hives from in-memory buffers keyed by Windows path.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    files: HashMap<String, Arc<Vec<u8>>>,
    variables: HashMap<String, String>,
}

impl Default for MemoryReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReader {
    /// Creates an empty reader with the default environment.
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            variables: default_variables(),
        }
    }

    /// Defines or overrides an environment variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Registers hive bytes under a Windows path.
    pub fn with_file(mut self, windows_path: &str, data: Vec<u8>) -> Self {
        self.insert(windows_path, data);
        self
    }

    /// Registers hive bytes under a Windows path.
    pub fn insert(&mut self, windows_path: &str, data: Vec<u8>) {
        if let Some(key) = self.key(windows_path) {
            self.files.insert(key, Arc::new(data));
        }
    }

    fn key(&self, windows_path: &str) -> Option<String> {
        volume_segments(windows_path, &self.variables).map(|segments| fold(&segments.join("\\")))
    }
}

impl RegistryFileReader for MemoryReader {
    fn open(&self, windows_path: &str, options: &HiveOptions) -> Result<Option<HiveSource>> {
        let Some(data) = self.key(windows_path).and_then(|key| self.files.get(&key)) else {
            return Ok(None);
        };
        HiveSource::from_vec_with_options(data.as_ref().clone(), windows_path, options).map(Some)
    }
}
