//! # Virtual Windows Registry
//!
//! A read-only view of a Windows registry assembled from offline hive files.
//!
//! ## Features
//!
//! - **Mounting**: hive files are mounted at key paths (`HKEY_LOCAL_MACHINE\System`,
//!   `HKEY_USERS\<SID>`); mount points are derived from file names or hive content
//! - **Virtual keys**: `HKEY_CLASSES_ROOT`, `HKEY_CURRENT_CONFIG` and
//!   `CurrentControlSet` are synthesised the way Windows presents them
//! - **Lazy decoding**: key and value records are parsed on first access and
//!   a corrupt record only affects the keys that depend on it
//! - **Memory-mapped I/O** for hive files, or in-memory buffers
//! - **Search** by key path, glob or regular expression
//!
//! ## Architecture
//!
//! 1. **Hive layer** ([`hive`], [`header`], [`hbin`], [`key`], [`value`],
//!    [`subkey_list`], [`bigdata`]): decodes one regf file
//! 2. **Namespace** ([`registry`], [`node`], [`alias`]): mounts, root keys,
//!    aliases and path resolution over snapshots of the mount table
//! 3. **Acquisition** ([`reader`], [`mapping`]): where standard hive files live
//!    and how to open them
//! 4. **Search** ([`searcher`]): key path, glob and regex matching
//!
//! ## Binary Layout
//!
//! ```text
//! [Base Block - 4KB]
//!   - Signature: "regf"
//!   - Version, timestamps, root offset
//!   - Checksum
//!
//! [Hive Bins - variable size, 4KB aligned]
//!   [Hbin Header - 32 bytes]
//!   [Cells - variable size, negative size if allocated]
//!       - Key nodes (nk), value keys (vk)
//!       - Subkey lists (lf/lh/li/ri), big data (db)
//! ```
//!
//! ## Examples
//!
//! ### Mounting hives
//!
//! ```no_run
//! use reg_vfs::Registry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new();
//! registry.map_file("SYSTEM", None)?;
//! registry.map_file("NTUSER.DAT", None)?;
//!
//! let select = registry.get_key_by_path("HKLM\\System\\Select")?;
//! for value in select.values()? {
//!     println!("{} = {}", value.name(), value.data()?);
//! }
//!
//! let ccs = registry.get_key_by_path("HKLM\\System\\CurrentControlSet")?;
//! println!("CurrentControlSet -> {:?}", ccs.alias_target());
//! # Ok(())
//! # }
//! ```
//!
//! ### Opening a volume
//!
//! ```no_run
//! use reg_vfs::{FileSystemReader, Registry, RegistryOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reader = FileSystemReader::new("/mnt/windows")
//!     .with_variable("UserProfile", "C:\\Users\\alice");
//! let registry = Registry::with_reader(reader, RegistryOptions::default());
//!
//! // Standard hives are opened the first time a path needs them.
//! let run = registry.get_key_by_path("HKCU\\Software\\Microsoft\\Windows\\CurrentVersion\\Run")?;
//! println!("{} values", run.value_count()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Searching
//!
//! ```no_run
//! use reg_vfs::{FindSpec, Registry, RegistrySearcher};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new();
//! registry.map_file("SYSTEM", None)?;
//!
//! let spec = FindSpec::key_path_glob("HKEY_LOCAL_MACHINE\\System\\ControlSet*\\Services")?;
//! for path in RegistrySearcher::new(&registry).find(&[spec])? {
//!     println!("{}", path);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alias;
pub mod bigdata;
pub mod cell;
pub mod error;
pub mod hbin;
pub mod header;
pub mod hive;
pub mod key;
pub mod key_path;
pub mod mapping;
mod namespace;
pub mod node;
pub mod options;
pub mod reader;
pub mod registry;
pub mod searcher;
pub mod subkey_list;
pub mod utils;
pub mod value;

// Re-export main types for convenience
pub use cell::{CellType, KeyNodeFlags, ValueType};
pub use error::{ErrorKind, RegistryError, Result};
pub use hbin::HbinHeader;
pub use header::BaseBlock;
pub use hive::{HiveSource, HiveStatistics};
pub use key::KeyCell;
pub use key_path::{KeyPath, RootKey};
pub use namespace::Mount;
pub use node::{KeyNode, RecurseKeys, ValueNode};
pub use options::{HiveOptions, RegistryOptions, TieBreak};
pub use reader::{FileSystemReader, MemoryReader, RegistryFileReader};
pub use registry::{Registry, RegistryState};
pub use searcher::{FindSpec, RegistrySearcher};
pub use subkey_list::{SubkeyList, SubkeyListEntry, SubkeyListType};
pub use value::{expand_environment_strings, ValueCell, ValueData};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
