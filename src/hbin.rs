//! Hive bin (hbin) block parsing.
//!
//! Hive bins are 4KB-aligned blocks that contain registry cells. Each hbin
//! has a header followed by a sequence of cells.

use crate::error::{RegistryError, Result};
use crate::utils::{read_i32_le, read_u32_le, read_u64_le};

/// Expected signature for hive bins ("hbin").
pub const HBIN_SIGNATURE: &[u8; 4] = b"hbin";

/// Size of an hbin header.
pub const HBIN_HEADER_SIZE: usize = 0x20;

/// Hive bin header structure.
#[derive(Debug, Clone)]
pub struct HbinHeader {
    /// Offset of this hbin from the start of the hive bins (relative to 0x1000).
    pub offset: u32,

    /// Size of this hbin in bytes (including header).
    pub size: u32,

    /// Timestamp (Windows FILETIME), only meaningful in the first bin.
    pub timestamp: u64,
}

impl HbinHeader {
    /// Parses an hbin header from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too small, the signature is invalid,
    /// the stored offset does not match `expected_offset`, or the size is not
    /// a non-zero multiple of 4096.
    pub fn parse(data: &[u8], expected_offset: u32) -> Result<Self> {
        if data.len() < HBIN_HEADER_SIZE {
            return Err(RegistryError::TruncatedData {
                offset: expected_offset,
                expected: HBIN_HEADER_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..4] != HBIN_SIGNATURE {
            return Err(RegistryError::invalid_signature(HBIN_SIGNATURE, &data[0..4]));
        }

        let offset = read_u32_le(data, 0x04)?;
        let size = read_u32_le(data, 0x08)?;

        if offset != expected_offset {
            return Err(RegistryError::InvalidFormat(format!(
                "Hbin offset mismatch: expected {:#x}, found {:#x}",
                expected_offset, offset
            )));
        }

        if size == 0 || size % 0x1000 != 0 {
            return Err(RegistryError::InvalidFormat(format!(
                "Hbin at {:#x} has invalid size {:#x}",
                offset, size
            )));
        }

        Ok(HbinHeader {
            offset,
            size,
            timestamp: read_u64_le(data, 0x14)?,
        })
    }

    /// Returns the size of the data area (excluding the header).
    pub fn data_size(&self) -> u32 {
        self.size.saturating_sub(HBIN_HEADER_SIZE as u32)
    }
}

/// Iterator over the hbins of a hive's bin area (everything after the base block).
pub struct HbinIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> HbinIterator<'a> {
    /// Creates an iterator over `data`, which starts at the first hbin.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for HbinIterator<'a> {
    type Item = Result<(HbinHeader, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.offset..];
        match HbinHeader::parse(remaining, self.offset as u32) {
            Ok(header) => {
                let end = (header.size as usize).min(remaining.len());
                self.offset += header.size as usize;
                Some(Ok((header, &remaining[..end])))
            }
            // Trailing padding after the last bin
            Err(RegistryError::InvalidSignature { .. }) => None,
            Err(e) => {
                self.offset = self.data.len();
                Some(Err(e))
            }
        }
    }
}

/// Iterator over cells within one hbin.
pub struct HbinCellIterator<'a> {
    bin: &'a [u8],
    offset: usize,
    hbin_offset: u32,
}

impl<'a> HbinCellIterator<'a> {
    /// Creates a new cell iterator for an hbin.
    ///
    /// # Arguments
    ///
    /// * `bin` - The whole hbin, header included.
    /// * `hbin_offset` - The offset of this hbin from the first hbin.
    pub fn new(bin: &'a [u8], hbin_offset: u32) -> Self {
        Self {
            bin,
            offset: HBIN_HEADER_SIZE,
            hbin_offset,
        }
    }
}

impl<'a> Iterator for HbinCellIterator<'a> {
    type Item = Result<CellInfo<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + 4 > self.bin.len() {
            return None;
        }

        let cell_offset = self.hbin_offset + self.offset as u32;
        let size = match read_i32_le(self.bin, self.offset) {
            Ok(s) => s,
            Err(e) => return Some(Err(e)),
        };

        let abs_size = size.unsigned_abs() as usize;
        if abs_size < 8 || abs_size % 8 != 0 {
            // Stop here: the next cell boundary is unknowable.
            self.offset = self.bin.len();
            return Some(Err(RegistryError::invalid_cell_size(size, cell_offset)));
        }

        let data_end = self.offset + abs_size;
        if data_end > self.bin.len() {
            let actual = self.bin.len() - self.offset;
            self.offset = self.bin.len();
            return Some(Err(RegistryError::TruncatedData {
                offset: cell_offset,
                expected: abs_size,
                actual,
            }));
        }

        let cell_info = CellInfo {
            offset: cell_offset,
            size: abs_size as u32,
            is_allocated: size < 0,
            data: &self.bin[self.offset + 4..data_end],
        };

        self.offset = data_end;
        Some(Ok(cell_info))
    }
}

/// Information about a cell within an hbin.
#[derive(Debug)]
pub struct CellInfo<'a> {
    /// Offset of this cell from the first hbin.
    pub offset: u32,

    /// Size of the cell (including the size field).
    pub size: u32,

    /// Whether this cell is allocated (true) or free (false).
    pub is_allocated: bool,

    /// Cell data (excluding the size field).
    pub data: &'a [u8],
}

impl<'a> CellInfo<'a> {
    /// Returns the cell type signature (first 2 bytes of data).
    pub fn cell_type(&self) -> Option<[u8; 2]> {
        if self.data.len() >= 2 {
            Some([self.data[0], self.data[1]])
        } else {
            None
        }
    }
}
