//! Registry hive base block (header) parsing.
//!
//! The base block is the first 4096 bytes (0x1000) of a registry hive file.
//! It contains metadata about the hive including version, timestamps, and
//! the root key cell offset.

use crate::error::{RegistryError, Result};
use crate::utils::{calculate_checksum, filetime_to_datetime, read_u32_le, read_u64_le};
use encoding_rs::UTF_16LE;
use std::fmt;

/// Size of the base block in bytes.
pub const BASE_BLOCK_SIZE: usize = 4096;

/// Expected signature for a valid registry hive ("regf").
pub const REGF_SIGNATURE: &[u8; 4] = b"regf";

/// Offset of the file name in the base block.
const FILE_NAME_OFFSET: usize = 0x30;

/// Length of the file name field (64 UTF-16LE characters = 128 bytes).
const FILE_NAME_LENGTH: usize = 128;

/// Offset of the checksum field in the base block.
pub const CHECKSUM_OFFSET: usize = 0x1FC;

/// Registry hive base block header.
#[derive(Debug, Clone)]
pub struct BaseBlock {
    /// Signature, should be "regf" (0x66676572).
    pub signature: [u8; 4],

    /// Primary sequence number.
    pub primary_sequence: u32,

    /// Secondary sequence number.
    pub secondary_sequence: u32,

    /// Last written timestamp (Windows FILETIME).
    pub last_written: u64,

    /// Major version of the hive format.
    pub major_version: u32,

    /// Minor version of the hive format.
    pub minor_version: u32,

    /// File type (0 = normal, 1 = transaction log).
    pub file_type: u32,

    /// File format (1 = direct memory load).
    pub file_format: u32,

    /// Offset to root key cell (relative to first hbin).
    pub root_cell_offset: u32,

    /// Length of hive bins data in bytes.
    pub hive_length: u32,

    /// Clustering factor (always 1).
    pub clustering_factor: u32,

    /// Embedded file name (last 31 characters of the hive path).
    pub file_name: String,

    /// Checksum (XOR of first 508 bytes).
    pub checksum: u32,
}

impl BaseBlock {
    /// Parses a base block from raw bytes.
    ///
    /// Only the size and the `regf` signature are mandatory; see
    /// [`BaseBlock::validate`] for the checksum and version checks.
    ///
    /// # Errors
    ///
    /// Returns a format error if the data is too small or the signature is
    /// missing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BASE_BLOCK_SIZE {
            return Err(RegistryError::HiveTooSmall {
                size: data.len(),
                minimum: BASE_BLOCK_SIZE,
            });
        }

        let mut signature = [0u8; 4];
        signature.copy_from_slice(&data[0..4]);

        if &signature != REGF_SIGNATURE {
            return Err(RegistryError::invalid_signature(REGF_SIGNATURE, &signature));
        }

        let file_name_bytes = &data[FILE_NAME_OFFSET..FILE_NAME_OFFSET + FILE_NAME_LENGTH];
        let (file_name, _, _) = UTF_16LE.decode(file_name_bytes);
        let file_name = file_name
            .split('\0')
            .next()
            .unwrap_or_default()
            .to_string();

        Ok(BaseBlock {
            signature,
            primary_sequence: read_u32_le(data, 0x04)?,
            secondary_sequence: read_u32_le(data, 0x08)?,
            last_written: read_u64_le(data, 0x0C)?,
            major_version: read_u32_le(data, 0x14)?,
            minor_version: read_u32_le(data, 0x18)?,
            file_type: read_u32_le(data, 0x1C)?,
            file_format: read_u32_le(data, 0x20)?,
            root_cell_offset: read_u32_le(data, 0x24)?,
            hive_length: read_u32_le(data, 0x28)?,
            clustering_factor: read_u32_le(data, 0x2C)?,
            file_name,
            checksum: read_u32_le(data, CHECKSUM_OFFSET)?,
        })
    }

    /// Checks the header checksum and the format version.
    ///
    /// Returns every problem found; an empty list means the header is sound.
    pub fn validate(&self, data: &[u8]) -> Vec<RegistryError> {
        let mut issues = Vec::new();

        let calculated = calculate_checksum(data);
        if self.checksum != calculated {
            issues.push(RegistryError::ChecksumMismatch {
                expected: self.checksum,
                calculated,
            });
        }

        // Versions 1.2 through 1.6 are in the wild.
        if self.major_version != 1 || !(2..=6).contains(&self.minor_version) {
            issues.push(RegistryError::UnsupportedVersion {
                major: self.major_version,
                minor: self.minor_version,
            });
        }

        issues
    }

    /// Returns true if the hive is in a consistent state.
    ///
    /// The hive is consistent when primary and secondary sequence numbers match.
    pub fn is_consistent(&self) -> bool {
        self.primary_sequence == self.secondary_sequence
    }

    /// Returns true if this hive version stores large values in db records.
    pub fn supports_big_data(&self) -> bool {
        self.major_version == 1 && self.minor_version >= 4
    }

    /// Converts the last written timestamp to a calendar timestamp.
    pub fn last_written_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        filetime_to_datetime(self.last_written)
    }
}

impl fmt::Display for BaseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registry Hive Header:\n\
             - Version: {}.{}\n\
             - Root Cell Offset: {:#x}\n\
             - Hive Length: {} bytes\n\
             - Consistent: {}\n\
             - File Name: {}",
            self.major_version,
            self.minor_version,
            self.root_cell_offset,
            self.hive_length,
            self.is_consistent(),
            self.file_name
        )
    }
}
