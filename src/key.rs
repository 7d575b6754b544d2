//! Registry key node (nk) record parsing.

use crate::cell::KeyNodeFlags;
use crate::error::{RegistryError, Result};
use crate::utils::{is_cell_offset, read_ascii_string, read_u16_le, read_u32_le, read_u64_le, read_utf16_string};
use encoding_rs::Encoding;

/// Minimum size of a key node structure in bytes.
const KEY_NODE_MIN_SIZE: usize = 76;

/// Offset of the key name in the key node structure.
const KEY_NAME_OFFSET: usize = 0x4C;

/// Key node (nk) record as stored in one cell.
///
/// This is the raw record only; [`crate::KeyNode`] is the navigable handle.
#[derive(Debug, Clone)]
pub struct KeyCell {
    /// Flags for this key.
    pub flags: KeyNodeFlags,

    /// Last written timestamp (Windows FILETIME).
    pub last_written: u64,

    /// Offset to parent key node.
    pub parent_offset: u32,

    /// Number of subkeys.
    pub subkey_count: u32,

    /// Number of volatile subkeys (never present on disk).
    pub volatile_subkey_count: u32,

    /// Offset to subkey list.
    pub subkey_list_offset: u32,

    /// Number of values.
    pub value_count: u32,

    /// Offset to value list.
    pub value_list_offset: u32,

    /// Offset to security descriptor.
    pub security_offset: u32,

    /// Offset to class name.
    pub class_name_offset: u32,

    /// Length of class name in bytes.
    pub class_name_length: u16,

    /// Key name.
    pub name: String,
}

impl KeyCell {
    /// Parses a key node from cell data.
    ///
    /// # Arguments
    ///
    /// * `data` - Cell data (excluding size field, starting with "nk" signature).
    /// * `offset` - Offset of this cell for error reporting.
    /// * `codepage` - Codepage of compressed (8-bit) names.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or truncated.
    pub fn parse(data: &[u8], offset: u32, codepage: &'static Encoding) -> Result<Self> {
        if data.len() < KEY_NODE_MIN_SIZE {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: KEY_NODE_MIN_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..2] != b"nk" {
            return Err(RegistryError::InvalidFormat(format!(
                "Expected 'nk' signature at offset {:#x}",
                offset
            )));
        }

        let flags = KeyNodeFlags::new(read_u16_le(data, 0x02)?);
        let name_length = read_u16_le(data, 0x48)? as usize;

        let name_end = KEY_NAME_OFFSET + name_length;
        if name_end > data.len() {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: name_end,
                actual: data.len(),
            });
        }

        let name_data = &data[KEY_NAME_OFFSET..name_end];
        let name = if flags.is_compressed() {
            read_ascii_string(name_data, codepage)
        } else {
            read_utf16_string(name_data, offset)?
        };

        Ok(KeyCell {
            flags,
            last_written: read_u64_le(data, 0x04)?,
            parent_offset: read_u32_le(data, 0x10)?,
            subkey_count: read_u32_le(data, 0x14)?,
            volatile_subkey_count: read_u32_le(data, 0x18)?,
            subkey_list_offset: read_u32_le(data, 0x1C)?,
            value_count: read_u32_le(data, 0x24)?,
            value_list_offset: read_u32_le(data, 0x28)?,
            security_offset: read_u32_le(data, 0x2C)?,
            class_name_offset: read_u32_le(data, 0x30)?,
            class_name_length: read_u16_le(data, 0x4A)?,
            name,
        })
    }

    /// Returns true if this key has subkeys.
    pub fn has_subkeys(&self) -> bool {
        self.subkey_count > 0 && is_cell_offset(self.subkey_list_offset)
    }

    /// Returns true if this key has values.
    pub fn has_values(&self) -> bool {
        self.value_count > 0 && is_cell_offset(self.value_list_offset)
    }

    /// Returns true if this key has a class name.
    pub fn has_class_name(&self) -> bool {
        self.class_name_length > 0 && is_cell_offset(self.class_name_offset)
    }

    /// Returns true if this is the root key.
    pub fn is_root(&self) -> bool {
        self.flags.is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;

    fn nk(name: &[u8], flags: u16) -> Vec<u8> {
        let mut data = vec![0u8; KEY_NAME_OFFSET];
        data[0..2].copy_from_slice(b"nk");
        data[0x02..0x04].copy_from_slice(&flags.to_le_bytes());
        data[0x14..0x18].copy_from_slice(&3u32.to_le_bytes());
        data[0x1C..0x20].copy_from_slice(&0x400u32.to_le_bytes());
        data[0x28..0x2C].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        data[0x48..0x4A].copy_from_slice(&(name.len() as u16).to_le_bytes());
        data.extend_from_slice(name);
        data
    }

    #[test]
    fn test_key_node_minimum_size() {
        let data = vec![0u8; 75];
        assert!(KeyCell::parse(&data, 0, WINDOWS_1252).is_err());
    }

    #[test]
    fn test_key_node_invalid_signature() {
        let mut data = vec![0u8; 80];
        data[0..2].copy_from_slice(b"XX");
        assert!(KeyCell::parse(&data, 0, WINDOWS_1252).is_err());
    }

    #[test]
    fn test_compressed_name() {
        let data = nk(b"ControlSet001", KeyNodeFlags::COMP_NAME);
        let cell = KeyCell::parse(&data, 0x20, WINDOWS_1252).unwrap();
        assert_eq!(cell.name, "ControlSet001");
        assert!(cell.has_subkeys());
        assert!(!cell.has_values());
        assert!(!cell.has_class_name());
    }

    #[test]
    fn test_utf16_name() {
        let name: Vec<u8> = "Sch\u{fc}ssel".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let data = nk(&name, 0);
        let cell = KeyCell::parse(&data, 0x20, WINDOWS_1252).unwrap();
        assert_eq!(cell.name, "Sch\u{fc}ssel");
    }

    #[test]
    fn test_name_past_end_of_cell() {
        let mut data = nk(b"Foo", KeyNodeFlags::COMP_NAME);
        data.truncate(KEY_NAME_OFFSET + 1);
        assert!(matches!(
            KeyCell::parse(&data, 0x20, WINDOWS_1252).unwrap_err(),
            RegistryError::TruncatedData { .. }
        ));
    }
}
