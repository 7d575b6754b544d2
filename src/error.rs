//! Error types for hive decoding and virtual registry lookups.
//!
//! Every error belongs to one [`ErrorKind`]. Format errors are fatal for a
//! single hive and only surface when it is opened or mapped. Decode errors are
//! scoped to the one key, value or path lookup that touched the bad cell, so
//! traversal of a partially corrupt hive can continue elsewhere.

use std::io;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Coarse classification of a [`RegistryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The hive header or signature is invalid. Reported at open/map time.
    Format,
    /// One cell or record is malformed.
    Decode,
    /// A path or name lookup missed.
    NotFound,
    /// The hive source or registry has been closed.
    UseAfterClose,
    /// Reading the underlying stream failed.
    Io,
    /// The caller supplied an unusable argument (path, pattern, mount point).
    InvalidArgument,
}

/// Errors that can occur while decoding hives or resolving registry paths.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// I/O error occurred while reading the hive file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid magic signature in header or structure.
    #[error("Invalid signature: expected {expected:?}, found {found:?}")]
    InvalidSignature {
        /// Expected signature bytes.
        expected: Vec<u8>,
        /// Signature bytes found.
        found: Vec<u8>,
    },

    /// Invalid hive format or corrupted data.
    #[error("Invalid hive format: {0}")]
    InvalidFormat(String),

    /// Cell offset is out of bounds.
    #[error("Invalid cell offset: {offset:#x} (hive size: {hive_size:#x})")]
    InvalidOffset {
        /// Offending cell offset.
        offset: u32,
        /// Size of the hive data.
        hive_size: usize,
    },

    /// Cell size is invalid or corrupted.
    #[error("Invalid cell size: {size} at offset {offset:#x}")]
    InvalidCellSize {
        /// Raw cell size.
        size: i32,
        /// Cell offset.
        offset: u32,
    },

    /// Unknown or unsupported cell type.
    #[error("Unknown cell type: {cell_type:?} at offset {offset:#x}")]
    UnknownCellType {
        /// Cell signature bytes.
        cell_type: [u8; 2],
        /// Cell offset.
        offset: u32,
    },

    /// Key, value or mount not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The first path component is not a known root key.
    #[error("Unsupported root key: {0}")]
    UnsupportedRootKey(String),

    /// Invalid UTF-16 string data.
    #[error("Invalid UTF-16 string at offset {offset:#x}")]
    InvalidUtf16 {
        /// Offset of the record holding the string.
        offset: u32,
    },

    /// Value data does not match its declared type.
    #[error("Unable to decode value '{name}' as {data_type}: {reason}")]
    ValueDecode {
        /// Value name.
        name: String,
        /// Declared type name.
        data_type: String,
        /// What was wrong with the payload.
        reason: String,
    },

    /// Hive is too small to be valid.
    #[error("Hive too small: {size} bytes (minimum: {minimum} bytes)")]
    HiveTooSmall {
        /// Size of the data.
        size: usize,
        /// Minimum size of a hive.
        minimum: usize,
    },

    /// Checksum mismatch in hive header.
    #[error("Checksum mismatch: expected {expected:#x}, calculated {calculated:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the header.
        expected: u32,
        /// Checksum calculated over the header.
        calculated: u32,
    },

    /// Unsupported hive version.
    #[error("Unsupported hive version: {major}.{minor}")]
    UnsupportedVersion {
        /// Major version.
        major: u32,
        /// Minor version.
        minor: u32,
    },

    /// Data truncated or incomplete.
    #[error("Truncated data at offset {offset:#x}: expected {expected} bytes, got {actual} bytes")]
    TruncatedData {
        /// Offset of the record.
        offset: u32,
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Invalid subkey list type.
    #[error("Invalid subkey list type: {list_type:?}")]
    InvalidSubkeyList {
        /// Signature bytes found.
        list_type: [u8; 2],
    },

    /// Operation on a closed hive source or registry.
    #[error("Use after close: {0}")]
    UseAfterClose(String),

    /// Malformed key path or mount point.
    #[error("Invalid key path: {0}")]
    InvalidKeyPath(String),

    /// Codepage label not recognised by the encoding registry.
    #[error("Unknown codepage: {0}")]
    UnknownCodepage(String),

    /// Search pattern could not be compiled.
    #[error("Invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl RegistryError {
    /// Creates an invalid signature error with context.
    ///
    /// # Arguments
    ///
    /// * `expected` - Expected signature bytes
    /// * `found` - Actual signature bytes found
    pub fn invalid_signature(expected: &[u8], found: &[u8]) -> Self {
        Self::InvalidSignature {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// Creates an invalid offset error with context.
    pub fn invalid_offset(offset: u32, hive_size: usize) -> Self {
        Self::InvalidOffset { offset, hive_size }
    }

    /// Creates an invalid cell size error with context.
    pub fn invalid_cell_size(size: i32, offset: u32) -> Self {
        Self::InvalidCellSize { size, offset }
    }

    /// Creates a format error with detailed context.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use reg_vfs::error::RegistryError;
    /// let len = 256;
    /// let offset = 0x1000;
    /// let err = RegistryError::format_error(
    ///     format!("Invalid key name length: {} at offset {:#x}", len, offset)
    /// );
    /// ```
    pub fn format_error(message: String) -> Self {
        Self::InvalidFormat(message)
    }

    /// Creates a not found error with context about what was being searched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use reg_vfs::error::RegistryError;
    /// let err = RegistryError::not_found("value", "DisplayName");
    /// assert!(err.is_not_found());
    /// ```
    pub fn not_found(item_type: &str, name: &str) -> Self {
        Self::NotFound(format!("{} '{}'", item_type, name))
    }

    /// Creates an unknown cell type error.
    pub fn unknown_cell_type(cell_type: [u8; 2], offset: u32) -> Self {
        Self::UnknownCellType { cell_type, offset }
    }

    /// Creates a use-after-close error naming the closed object.
    pub fn use_after_close(what: impl Into<String>) -> Self {
        Self::UseAfterClose(what.into())
    }

    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSignature { .. }
            | Self::HiveTooSmall { .. }
            | Self::ChecksumMismatch { .. }
            | Self::UnsupportedVersion { .. } => ErrorKind::Format,
            Self::InvalidFormat(_)
            | Self::InvalidOffset { .. }
            | Self::InvalidCellSize { .. }
            | Self::UnknownCellType { .. }
            | Self::InvalidUtf16 { .. }
            | Self::ValueDecode { .. }
            | Self::TruncatedData { .. }
            | Self::InvalidSubkeyList { .. } => ErrorKind::Decode,
            Self::NotFound(_) | Self::UnsupportedRootKey(_) => ErrorKind::NotFound,
            Self::UseAfterClose(_) => ErrorKind::UseAfterClose,
            Self::Io(_) => ErrorKind::Io,
            Self::InvalidKeyPath(_) | Self::UnknownCodepage(_) | Self::InvalidPattern(_) => {
                ErrorKind::InvalidArgument
            }
        }
    }

    /// Returns true for an ordinary lookup miss.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true when a single cell or record was malformed.
    pub fn is_decode_error(&self) -> bool {
        self.kind() == ErrorKind::Decode
    }
}
