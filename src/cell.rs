//! Cell signatures, key flags and value type tags.

use crate::error::{RegistryError, Result};

/// Cell type signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellType {
    /// Key node (nk) - represents a registry key.
    KeyNode,

    /// Value key (vk) - represents a registry value.
    ValueKey,

    /// Security descriptor (sk).
    Security,

    /// Index leaf (li) - list of subkey offsets.
    IndexLeaf,

    /// Fast leaf (lf) - list of subkeys with name hints.
    FastLeaf,

    /// Hash leaf (lh) - list of subkeys with name hashes.
    HashLeaf,

    /// Index root (ri) - list of subkey list offsets.
    IndexRoot,

    /// Data block (db) - big data block.
    DataBlock,
}

/// Signature of every cell kind, in on-disk order of frequency.
const CELL_SIGNATURES: [(CellType, &[u8; 2]); 8] = [
    (CellType::KeyNode, b"nk"),
    (CellType::ValueKey, b"vk"),
    (CellType::HashLeaf, b"lh"),
    (CellType::FastLeaf, b"lf"),
    (CellType::IndexLeaf, b"li"),
    (CellType::IndexRoot, b"ri"),
    (CellType::Security, b"sk"),
    (CellType::DataBlock, b"db"),
];

impl CellType {
    /// Parses a cell type from a 2-byte signature.
    ///
    /// The error carries offset 0; callers that know the cell offset report it.
    pub fn from_signature(sig: &[u8; 2]) -> Result<Self> {
        CELL_SIGNATURES
            .iter()
            .find(|(_, known)| *known == sig)
            .map(|(cell_type, _)| *cell_type)
            .ok_or_else(|| RegistryError::unknown_cell_type(*sig, 0))
    }

    /// Returns the 2-byte signature for this cell type.
    pub fn signature(&self) -> &'static [u8; 2] {
        CELL_SIGNATURES
            .iter()
            .find(|(cell_type, _)| cell_type == self)
            .map(|(_, sig)| *sig)
            .unwrap_or(b"??")
    }

    /// Returns true if this cell type represents a subkey list.
    pub fn is_subkey_list(&self) -> bool {
        matches!(
            self,
            CellType::IndexLeaf | CellType::FastLeaf | CellType::HashLeaf | CellType::IndexRoot
        )
    }
}

/// Flags for key nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyNodeFlags(pub u16);

impl KeyNodeFlags {
    /// Key is volatile (not stored on disk).
    pub const VOLATILE: u16 = 0x0001;

    /// Key is a mount point for another hive.
    pub const HIVE_EXIT: u16 = 0x0002;

    /// Key is the root key.
    pub const ROOT_KEY: u16 = 0x0004;

    /// Key cannot be deleted.
    pub const NO_DELETE: u16 = 0x0008;

    /// Key is a symbolic link.
    pub const SYM_LINK: u16 = 0x0010;

    /// Key name is in compressed format (ASCII).
    pub const COMP_NAME: u16 = 0x0020;

    /// Creates a new KeyNodeFlags from a u16 value.
    pub fn new(flags: u16) -> Self {
        Self(flags)
    }

    /// Returns true if the specified flag is set.
    pub fn has_flag(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    /// Returns true if the key name is compressed (ASCII).
    pub fn is_compressed(&self) -> bool {
        self.has_flag(Self::COMP_NAME)
    }

    /// Returns true if this is a volatile key.
    pub fn is_volatile(&self) -> bool {
        self.has_flag(Self::VOLATILE)
    }

    /// Returns true if this is the root key.
    pub fn is_root(&self) -> bool {
        self.has_flag(Self::ROOT_KEY)
    }

    /// Returns true if this key is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.has_flag(Self::SYM_LINK)
    }
}

/// Registry value data types.
///
/// The twelve predefined tags are closed variants; any other tag is carried
/// verbatim in [`ValueType::Unknown`] so parsing never fails on a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueType {
    /// No value type.
    None,

    /// String (null-terminated).
    String,

    /// String with environment variables.
    ExpandString,

    /// Binary data.
    Binary,

    /// 32-bit little-endian integer.
    Dword,

    /// 32-bit big-endian integer.
    DwordBigEndian,

    /// Symbolic link (Unicode).
    Link,

    /// Multiple strings.
    MultiString,

    /// Resource list.
    ResourceList,

    /// Full resource descriptor.
    FullResourceDescriptor,

    /// Resource requirements list.
    ResourceRequirementsList,

    /// 64-bit little-endian integer.
    Qword,

    /// Unknown or non-standard value type.
    Unknown(u32),
}

/// The predefined tags, indexed by their numeric value.
const PREDEFINED: [(ValueType, &str); 12] = [
    (ValueType::None, "REG_NONE"),
    (ValueType::String, "REG_SZ"),
    (ValueType::ExpandString, "REG_EXPAND_SZ"),
    (ValueType::Binary, "REG_BINARY"),
    (ValueType::Dword, "REG_DWORD"),
    (ValueType::DwordBigEndian, "REG_DWORD_BIG_ENDIAN"),
    (ValueType::Link, "REG_LINK"),
    (ValueType::MultiString, "REG_MULTI_SZ"),
    (ValueType::ResourceList, "REG_RESOURCE_LIST"),
    (ValueType::FullResourceDescriptor, "REG_FULL_RESOURCE_DESCRIPTOR"),
    (ValueType::ResourceRequirementsList, "REG_RESOURCE_REQUIREMENTS_LIST"),
    (ValueType::Qword, "REG_QWORD"),
];

impl ValueType {
    /// Maps a raw type tag to a value type.
    pub fn from_u32(value: u32) -> Self {
        PREDEFINED
            .get(value as usize)
            .map(|(value_type, _)| *value_type)
            .unwrap_or(ValueType::Unknown(value))
    }

    /// Returns the raw type tag.
    pub fn to_u32(&self) -> u32 {
        match self {
            ValueType::Unknown(value) => *value,
            known => PREDEFINED
                .iter()
                .position(|(value_type, _)| value_type == known)
                .map_or(u32::MAX, |index| index as u32),
        }
    }

    /// Returns the `REG_*` name; unknown tags render as `REG_UNKNOWN_0x...`.
    pub fn name(&self) -> String {
        match self {
            ValueType::Unknown(value) => format!("REG_UNKNOWN_{:#010x}", value),
            known => PREDEFINED
                .iter()
                .find(|(value_type, _)| value_type == known)
                .map_or_else(String::new, |(_, name)| name.to_string()),
        }
    }

    /// REG_SZ and REG_EXPAND_SZ.
    pub fn is_string(&self) -> bool {
        matches!(self, ValueType::String | ValueType::ExpandString)
    }

    /// REG_DWORD, REG_DWORD_BIG_ENDIAN and REG_QWORD.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ValueType::Dword | ValueType::DwordBigEndian | ValueType::Qword
        )
    }

    /// REG_MULTI_SZ.
    pub fn is_multi_string(&self) -> bool {
        matches!(self, ValueType::MultiString)
    }

    /// REG_BINARY.
    pub fn is_binary(&self) -> bool {
        matches!(self, ValueType::Binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_type_from_signature() {
        assert_eq!(CellType::from_signature(b"nk").unwrap(), CellType::KeyNode);
        assert_eq!(CellType::from_signature(b"vk").unwrap(), CellType::ValueKey);
        assert_eq!(CellType::from_signature(b"lf").unwrap(), CellType::FastLeaf);
        assert!(CellType::from_signature(b"XX").is_err());
    }

    #[test]
    fn test_key_node_flags() {
        let flags = KeyNodeFlags::new(KeyNodeFlags::COMP_NAME | KeyNodeFlags::ROOT_KEY);
        assert!(flags.is_compressed());
        assert!(flags.is_root());
        assert!(!flags.is_volatile());
        assert!(!flags.is_symlink());
    }

    #[test]
    fn test_value_type_round_trip_of_tags() {
        for tag in 0..=11 {
            assert_eq!(ValueType::from_u32(tag).to_u32(), tag);
        }
        assert_eq!(ValueType::from_u32(999), ValueType::Unknown(999));
        assert_eq!(ValueType::from_u32(999).name(), "REG_UNKNOWN_0x000003e7");
    }

    #[test]
    fn test_value_type_classes() {
        assert!(ValueType::ExpandString.is_string());
        assert!(!ValueType::Link.is_string());
        assert!(ValueType::DwordBigEndian.is_integer());
        assert!(ValueType::Qword.is_integer());
        assert!(ValueType::MultiString.is_multi_string());
        assert!(ValueType::Binary.is_binary());
    }
}
