//! Subkey list parsing (lf, lh, li, ri).
//!
//! Registry keys can have multiple subkeys, which are organized in various
//! list structures. An index root (ri) points at further leaf lists.

use crate::error::{RegistryError, Result};
use crate::utils::{read_u16_le, read_u32_le};

/// Subkey list types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubkeyListType {
    /// Index leaf (li) - simple list of offsets.
    IndexLeaf,

    /// Fast leaf (lf) - list with 4-byte name hints.
    FastLeaf,

    /// Hash leaf (lh) - list with name hash hints.
    HashLeaf,

    /// Index root (ri) - list of subkey list offsets.
    IndexRoot,
}

impl SubkeyListType {
    /// Parses a subkey list type from a 2-byte signature.
    pub fn from_signature(sig: &[u8; 2]) -> Result<Self> {
        match sig {
            b"li" => Ok(SubkeyListType::IndexLeaf),
            b"lf" => Ok(SubkeyListType::FastLeaf),
            b"lh" => Ok(SubkeyListType::HashLeaf),
            b"ri" => Ok(SubkeyListType::IndexRoot),
            _ => Err(RegistryError::InvalidSubkeyList { list_type: *sig }),
        }
    }

    /// Size in bytes of one list element.
    fn entry_size(&self) -> usize {
        match self {
            SubkeyListType::FastLeaf | SubkeyListType::HashLeaf => 8,
            SubkeyListType::IndexLeaf | SubkeyListType::IndexRoot => 4,
        }
    }
}

/// Subkey list entry (for lf/lh lists).
#[derive(Debug, Clone)]
pub struct SubkeyListEntry {
    /// Offset to the key node.
    pub key_offset: u32,

    /// Name hint (first 4 chars for lf, hash for lh).
    pub name_hint: u32,
}

/// Parsed subkey list.
#[derive(Debug, Clone)]
pub enum SubkeyList {
    /// Index leaf - simple list of offsets.
    IndexLeaf(Vec<u32>),

    /// Fast leaf or hash leaf - list with hints.
    LeafWithHints(Vec<SubkeyListEntry>),

    /// Index root - list of sublist offsets.
    IndexRoot(Vec<u32>),
}

impl SubkeyList {
    /// Parses a subkey list from cell data.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is unknown or the cell is shorter
    /// than its element count requires.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < 4 {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: 4,
                actual: data.len(),
            });
        }

        let list_type = SubkeyListType::from_signature(&[data[0], data[1]])?;
        let count = read_u16_le(data, 2)? as usize;

        let expected_size = 4 + count * list_type.entry_size();
        if data.len() < expected_size {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: expected_size,
                actual: data.len(),
            });
        }

        let read_offsets = || -> Result<Vec<u32>> {
            (0..count).map(|i| read_u32_le(data, 4 + i * 4)).collect()
        };

        match list_type {
            SubkeyListType::IndexLeaf => Ok(SubkeyList::IndexLeaf(read_offsets()?)),
            SubkeyListType::IndexRoot => Ok(SubkeyList::IndexRoot(read_offsets()?)),
            SubkeyListType::FastLeaf | SubkeyListType::HashLeaf => {
                let mut entries = Vec::with_capacity(count);
                for i in 0..count {
                    let entry_pos = 4 + i * 8;
                    entries.push(SubkeyListEntry {
                        key_offset: read_u32_le(data, entry_pos)?,
                        name_hint: read_u32_le(data, entry_pos + 4)?,
                    });
                }
                Ok(SubkeyList::LeafWithHints(entries))
            }
        }
    }

    /// Returns an iterator over the offsets in this list.
    ///
    /// For index roots these are offsets of further subkey lists, not keys.
    pub fn offsets(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            SubkeyList::IndexLeaf(offsets) | SubkeyList::IndexRoot(offsets) => {
                Box::new(offsets.iter().copied())
            }
            SubkeyList::LeafWithHints(entries) => Box::new(entries.iter().map(|e| e.key_offset)),
        }
    }

    /// Returns the number of entries in this list.
    pub fn len(&self) -> usize {
        match self {
            SubkeyList::IndexLeaf(offsets) | SubkeyList::IndexRoot(offsets) => offsets.len(),
            SubkeyList::LeafWithHints(entries) => entries.len(),
        }
    }

    /// Returns true if this list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if this is an index root (contains sublists).
    pub fn is_index_root(&self) -> bool {
        matches!(self, SubkeyList::IndexRoot(_))
    }
}
