//! Big data block (db) parsing.
//!
//! Registry values larger than 16,344 bytes are stored in big data blocks,
//! which consist of a header cell, a segment list cell, and the segments.

use crate::error::{RegistryError, Result};
use crate::utils::{read_u16_le, read_u32_le};

/// Largest value payload stored in a single cell. Anything longer goes
/// through a db record (hive format 1.4 and later).
pub const MAX_DIRECT_DATA_SIZE: u32 = 16344;

/// Big data block header structure.
///
/// Format:
/// ```text
/// Offset  Size  Description
/// 0x00    2     Signature ("db")
/// 0x02    2     Number of segments
/// 0x04    4     Offset to segment list
/// ```
#[derive(Debug, Clone)]
pub struct BigDataBlock {
    /// Number of data segments
    pub segment_count: u16,

    /// Offset to the list of segment offsets
    pub segment_list_offset: u32,
}

impl BigDataBlock {
    /// Minimum size of a big data block header
    const MIN_SIZE: usize = 8;

    /// Returns true if the cell data starts with the db signature.
    pub fn is_big_data(data: &[u8]) -> bool {
        data.len() >= Self::MIN_SIZE && &data[0..2] == b"db"
    }

    /// Parses a big data block header from cell data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or truncated.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: Self::MIN_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..2] != b"db" {
            return Err(RegistryError::InvalidFormat(format!(
                "Expected 'db' signature at offset {:#x}, found {:?}",
                offset,
                &data[0..2]
            )));
        }

        Ok(BigDataBlock {
            segment_count: read_u16_le(data, 0x02)?,
            segment_list_offset: read_u32_le(data, 0x04)?,
        })
    }

    /// Parses the segment list cell referenced by this header.
    ///
    /// # Errors
    ///
    /// Returns an error if the list holds fewer offsets than `segment_count`.
    pub fn segment_offsets(&self, list: &[u8]) -> Result<Vec<u32>> {
        let count = self.segment_count as usize;
        if list.len() < count * 4 {
            return Err(RegistryError::TruncatedData {
                offset: self.segment_list_offset,
                expected: count * 4,
                actual: list.len(),
            });
        }

        (0..count).map(|i| read_u32_le(list, i * 4)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigdata_minimum_size() {
        let data = vec![0u8; 7];
        assert!(BigDataBlock::parse(&data, 0).is_err());
        assert!(!BigDataBlock::is_big_data(&data));
    }

    #[test]
    fn test_bigdata_invalid_signature() {
        let mut data = vec![0u8; 8];
        data[0..2].copy_from_slice(b"XX");
        assert!(BigDataBlock::parse(&data, 0).is_err());
    }

    #[test]
    fn test_bigdata_valid() {
        let mut data = vec![0u8; 8];
        data[0..2].copy_from_slice(b"db");
        data[2] = 2;
        data[4..8].copy_from_slice(&[0x20, 0x00, 0x00, 0x00]);

        let db = BigDataBlock::parse(&data, 0).unwrap();
        assert_eq!(db.segment_count, 2);
        assert_eq!(db.segment_list_offset, 0x20);

        let list = [0x40, 0, 0, 0, 0x80, 0x10, 0, 0];
        assert_eq!(db.segment_offsets(&list).unwrap(), vec![0x40, 0x1080]);
        assert!(db.segment_offsets(&list[..4]).is_err());
    }
}
