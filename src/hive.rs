//! Hive sources: one opened hive with a lazily populated record arena.
//!
//! A [`HiveSource`] owns the hive bytes (memory-mapped or in memory) and
//! hands out parsed records by cell offset. Parsed key records live in an
//! arena keyed by offset; each entry carries one-time "populated" slots for
//! its subkey and value offset lists, so repeated enumeration never re-parses
//! an index cell. Failed parses are not cached: a corrupt cell keeps failing
//! on access without poisoning anything else in the hive.

use crate::bigdata::{BigDataBlock, MAX_DIRECT_DATA_SIZE};
use crate::error::{RegistryError, Result};
use crate::hbin::{HbinCellIterator, HbinHeader, HbinIterator};
use crate::header::{BaseBlock, BASE_BLOCK_SIZE};
use crate::key::KeyCell;
use crate::node::KeyNode;
use crate::options::HiveOptions;
use crate::subkey_list::SubkeyList;
use crate::utils::{cell_offset_to_absolute, is_cell_offset, read_i32_le, read_u32_le, read_utf16_string};
use crate::value::ValueCell;
use encoding_rs::Encoding;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};

/// Deepest ri nesting accepted before the index is treated as corrupt.
const MAX_INDEX_DEPTH: usize = 8;

/// Hive bytes, either memory-mapped or owned.
enum HiveData {
    /// Memory-mapped file data.
    Mapped(Mmap),
    /// Owned data (buffers and reader streams).
    Owned(Vec<u8>),
}

impl HiveData {
    fn as_slice(&self) -> &[u8] {
        match self {
            HiveData::Mapped(mmap) => mmap,
            HiveData::Owned(data) => data,
        }
    }
}

/// One parsed key record plus its lazily filled offset lists.
#[derive(Debug)]
pub(crate) struct KeyEntry {
    pub(crate) offset: u32,
    pub(crate) cell: KeyCell,
    subkeys: OnceLock<Vec<u32>>,
    values: OnceLock<Vec<u32>>,
}

/// Cell usage counters for one hive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HiveStatistics {
    /// Number of hive bins.
    pub hbin_count: usize,
    /// Allocated cells.
    pub allocated_cells: usize,
    /// Free cells.
    pub free_cells: usize,
    /// Bytes in allocated cells, size fields included.
    pub allocated_bytes: u64,
    /// Bytes in free cells.
    pub free_bytes: u64,
    /// Allocated nk cells.
    pub key_cells: usize,
    /// Allocated vk cells.
    pub value_cells: usize,
}

/// One physical hive, opened read-only.
///
/// # Lifetime
///
/// The source owns its stream. [`HiveSource::close`] releases it
/// deterministically; every data-reading call afterwards returns
/// [`RegistryError::UseAfterClose`]. Dropping the last reference also
/// releases it.
pub struct HiveSource {
    /// Where the hive came from (file path or caller-supplied label).
    label: String,

    /// Parsed base block header.
    base_block: BaseBlock,

    /// Header problems tolerated in lenient mode.
    header_issues: Vec<RegistryError>,

    /// Codepage of compressed names.
    codepage: &'static Encoding,

    /// Hive bytes; `None` once closed.
    data: RwLock<Option<HiveData>>,

    /// Arena of parsed key records (offset -> entry).
    keys: RwLock<HashMap<u32, Arc<KeyEntry>>>,

    /// Arena of parsed value records (offset -> record).
    values: RwLock<HashMap<u32, Arc<ValueCell>>>,
}

impl std::fmt::Debug for HiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HiveSource")
            .field("label", &self.label)
            .field("root_cell_offset", &self.base_block.root_cell_offset)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl HiveSource {
    /// Opens a registry hive file with default options.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use reg_vfs::HiveSource;
    ///
    /// let hive = HiveSource::open("SYSTEM").unwrap();
    /// println!("{}", hive.base_block());
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, &HiveOptions::default())
    }

    /// Opens a registry hive file.
    ///
    /// Only the `regf` signature is mandatory. Checksum and version problems
    /// fail the open when `options.strict_header` is set and are logged
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too small, or lacks the
    /// hive signature.
    #[instrument(skip(path, options), fields(path = %path.as_ref().display()))]
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: &HiveOptions) -> Result<Self> {
        info!("Opening registry hive");
        let file = File::open(&path)?;

        // Validate file size BEFORE creating memory map
        let file_size = file.metadata()?.len() as usize;
        if file_size < BASE_BLOCK_SIZE {
            return Err(RegistryError::HiveTooSmall {
                size: file_size,
                minimum: BASE_BLOCK_SIZE,
            });
        }

        // SAFETY: This is safe because:
        // 1. The file is opened in read-only mode (no write access)
        // 2. The file size has been validated to be at least BASE_BLOCK_SIZE
        // 3. The mmap is owned by the HiveSource and dropped on close
        // 4. All access to the mmap is bounds-checked via cell_data()
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(size = mmap.len(), "Memory mapped hive file");

        let label = path.as_ref().display().to_string();
        Self::from_data(HiveData::Mapped(mmap), label, options)
    }

    /// Creates a hive source from an in-memory buffer.
    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        Self::from_vec_with_options(data, "<memory>", &HiveOptions::default())
    }

    /// Creates a hive source from an in-memory buffer with a label and options.
    pub fn from_vec_with_options(
        data: Vec<u8>,
        label: impl Into<String>,
        options: &HiveOptions,
    ) -> Result<Self> {
        Self::from_data(HiveData::Owned(data), label.into(), options)
    }

    /// Reads a whole stream into memory and opens it as a hive.
    pub fn from_reader<R: Read>(
        mut reader: R,
        label: impl Into<String>,
        options: &HiveOptions,
    ) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_vec_with_options(data, label, options)
    }

    fn from_data(data: HiveData, label: String, options: &HiveOptions) -> Result<Self> {
        let codepage = options.codepage()?;
        let base_block = BaseBlock::parse(data.as_slice())?;

        let mut header_issues = base_block.validate(data.as_slice());
        if options.strict_header && !header_issues.is_empty() {
            return Err(header_issues.remove(0));
        }
        for issue in &header_issues {
            warn!(hive = %label, %issue, "Tolerating hive header problem");
        }

        debug!(
            hive = %label,
            version = %format!("{}.{}", base_block.major_version, base_block.minor_version),
            root = %format!("{:#x}", base_block.root_cell_offset),
            "Hive header parsed"
        );

        Ok(Self {
            label,
            base_block,
            header_issues,
            codepage,
            data: RwLock::new(Some(data)),
            keys: RwLock::new(HashMap::new()),
            values: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the label (file path or caller-supplied name).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns a reference to the base block header.
    pub fn base_block(&self) -> &BaseBlock {
        &self.base_block
    }

    /// Header problems that were tolerated at open.
    pub fn header_issues(&self) -> &[RegistryError] {
        &self.header_issues
    }

    /// Returns the codepage used for compressed names.
    pub fn codepage(&self) -> &'static Encoding {
        self.codepage
    }

    /// Returns the offset of the root key cell.
    pub fn root_cell_offset(&self) -> u32 {
        self.base_block.root_cell_offset
    }

    /// Returns the root key of this hive, outside any registry namespace.
    ///
    /// Paths of the returned tree are relative to the hive root, which has
    /// the empty path.
    pub fn root_key(self: &Arc<Self>) -> Result<KeyNode> {
        KeyNode::hive_root(Arc::clone(self))
    }

    /// Resolves a path relative to the hive root.
    pub fn get_key_by_path(self: &Arc<Self>, path: &str) -> Result<KeyNode> {
        self.root_key()?.subkey_by_path(path)
    }

    /// Releases the hive bytes and clears the record arenas.
    pub fn close(&self) {
        let released = self
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        self.keys.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.values.write().unwrap_or_else(PoisonError::into_inner).clear();

        if released {
            info!(hive = %self.label, "Closed hive source");
        }
    }

    /// Returns true once [`HiveSource::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Fails with `UseAfterClose` if the source has been closed.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    fn closed_error(&self) -> RegistryError {
        RegistryError::use_after_close(format!("hive '{}'", self.label))
    }

    /// Runs `f` against the hive bytes while holding the read lock.
    fn with_data<T>(&self, f: impl FnOnce(&[u8]) -> Result<T>) -> Result<T> {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(data) => f(data.as_slice()),
            None => Err(self.closed_error()),
        }
    }

    /// Returns the bytes of the cell at `offset`, size field excluded.
    ///
    /// # Errors
    ///
    /// Returns a decode error for offsets outside the hive and for cells whose
    /// size field is corrupt.
    pub fn open_cell(&self, offset: u32) -> Result<Vec<u8>> {
        self.with_data(|data| cell_data(data, offset).map(<[u8]>::to_vec))
    }

    /// Total size of the hive bytes.
    pub fn size(&self) -> Result<usize> {
        self.with_data(|data| Ok(data.len()))
    }

    /// Returns the arena entry for the key record at `offset`, parsing it on first use.
    pub(crate) fn key_entry(&self, offset: u32) -> Result<Arc<KeyEntry>> {
        if let Some(entry) = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&offset)
        {
            self.ensure_open()?;
            return Ok(Arc::clone(entry));
        }

        debug!(offset = %format!("{:#x}", offset), "Parsing key node");
        let cell = self.with_data(|data| KeyCell::parse(cell_data(data, offset)?, offset, self.codepage))?;
        let entry = Arc::new(KeyEntry {
            offset,
            cell,
            subkeys: OnceLock::new(),
            values: OnceLock::new(),
        });

        Ok(Arc::clone(
            self.keys
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(offset)
                .or_insert(entry),
        ))
    }

    /// Offsets of the subkey records of `entry`, ri indexes flattened.
    pub(crate) fn subkey_offsets(&self, entry: &KeyEntry) -> Result<Vec<u32>> {
        if let Some(offsets) = entry.subkeys.get() {
            self.ensure_open()?;
            return Ok(offsets.clone());
        }

        let offsets = if entry.cell.has_subkeys() {
            self.with_data(|data| {
                // subkey_count is untrusted; the list cells bound the result
                let mut offsets = Vec::new();
                collect_subkey_offsets(data, entry.cell.subkey_list_offset, 0, &mut offsets)?;
                Ok(offsets)
            })?
        } else {
            Vec::new()
        };

        Ok(entry.subkeys.get_or_init(|| offsets).clone())
    }

    /// Offsets of the value records of `entry`.
    pub(crate) fn value_offsets(&self, entry: &KeyEntry) -> Result<Vec<u32>> {
        if let Some(offsets) = entry.values.get() {
            self.ensure_open()?;
            return Ok(offsets.clone());
        }

        let offsets = if entry.cell.has_values() {
            let list_offset = entry.cell.value_list_offset;
            let count = entry.cell.value_count as usize;
            self.with_data(|data| {
                let list = cell_data(data, list_offset)?;
                if list.len() < count * 4 {
                    return Err(RegistryError::TruncatedData {
                        offset: list_offset,
                        expected: count * 4,
                        actual: list.len(),
                    });
                }
                (0..count).map(|i| read_u32_le(list, i * 4)).collect()
            })?
        } else {
            Vec::new()
        };

        Ok(entry.values.get_or_init(|| offsets).clone())
    }

    /// Returns the value record at `offset`, parsing it on first use.
    pub(crate) fn value_cell(&self, offset: u32) -> Result<Arc<ValueCell>> {
        if let Some(cell) = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&offset)
        {
            self.ensure_open()?;
            return Ok(Arc::clone(cell));
        }

        let cell = Arc::new(
            self.with_data(|data| ValueCell::parse(cell_data(data, offset)?, offset, self.codepage))?,
        );
        Ok(Arc::clone(
            self.values
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(offset)
                .or_insert(cell),
        ))
    }

    /// Reads the raw payload of a value record.
    ///
    /// Handles inline data, single-cell data and db big-data records.
    pub(crate) fn value_data(&self, vk: &ValueCell) -> Result<Vec<u8>> {
        if vk.is_inline_data() {
            self.ensure_open()?;
            return Ok(vk.inline_data());
        }

        if vk.data_length == 0 || !is_cell_offset(vk.data_offset) {
            self.ensure_open()?;
            return Ok(Vec::new());
        }

        self.with_data(|data| {
            let cell = cell_data(data, vk.data_offset)?;
            if vk.data_length > MAX_DIRECT_DATA_SIZE
                && self.base_block.supports_big_data()
                && BigDataBlock::is_big_data(cell)
            {
                return read_big_data(data, vk.data_offset, vk.data_length);
            }

            let length = vk.data_length as usize;
            if cell.len() < length {
                return Err(RegistryError::TruncatedData {
                    offset: vk.data_offset,
                    expected: length,
                    actual: cell.len(),
                });
            }
            Ok(cell[..length].to_vec())
        })
    }

    /// Reads the class name of a key record, if it has one.
    pub(crate) fn class_name(&self, key: &KeyCell) -> Result<Option<String>> {
        if !key.has_class_name() {
            self.ensure_open()?;
            return Ok(None);
        }

        self.with_data(|data| {
            let cell = cell_data(data, key.class_name_offset)?;
            let length = key.class_name_length as usize;
            if cell.len() < length {
                return Err(RegistryError::TruncatedData {
                    offset: key.class_name_offset,
                    expected: length,
                    actual: cell.len(),
                });
            }
            read_utf16_string(&cell[..length], key.class_name_offset).map(Some)
        })
    }

    /// Lists the hive bins.
    pub fn hbins(&self) -> Result<Vec<HbinHeader>> {
        self.with_data(|data| {
            HbinIterator::new(&data[BASE_BLOCK_SIZE..])
                .map(|bin| bin.map(|(header, _)| header))
                .collect()
        })
    }

    /// Walks every bin and cell and counts allocations.
    pub fn statistics(&self) -> Result<HiveStatistics> {
        self.with_data(|data| {
            let mut stats = HiveStatistics::default();
            for bin in HbinIterator::new(&data[BASE_BLOCK_SIZE..]) {
                let (header, bytes) = bin?;
                stats.hbin_count += 1;

                for cell in HbinCellIterator::new(bytes, header.offset) {
                    let cell = cell?;
                    if cell.is_allocated {
                        stats.allocated_cells += 1;
                        stats.allocated_bytes += u64::from(cell.size);
                        match cell.cell_type() {
                            Some([b'n', b'k']) => stats.key_cells += 1,
                            Some([b'v', b'k']) => stats.value_cells += 1,
                            _ => {}
                        }
                    } else {
                        stats.free_cells += 1;
                        stats.free_bytes += u64::from(cell.size);
                    }
                }
            }
            Ok(stats)
        })
    }
}

impl Drop for HiveSource {
    fn drop(&mut self) {
        debug!(hive = %self.label, "Dropping hive source");
    }
}

/// Returns the cell at `offset` (relative to the first hbin), size field excluded.
fn cell_data(data: &[u8], offset: u32) -> Result<&[u8]> {
    let abs_offset = cell_offset_to_absolute(offset)? as usize;

    if abs_offset + 4 > data.len() {
        return Err(RegistryError::invalid_offset(offset, data.len()));
    }

    let size = read_i32_le(data, abs_offset)?;
    let abs_size = size.unsigned_abs() as usize;
    if abs_size < 8 {
        return Err(RegistryError::invalid_cell_size(size, offset));
    }

    let data_end = abs_offset + abs_size;
    if data_end > data.len() {
        return Err(RegistryError::TruncatedData {
            offset,
            expected: abs_size,
            actual: data.len() - abs_offset,
        });
    }

    Ok(&data[abs_offset + 4..data_end])
}

/// Recursively collects key offsets from a subkey list, descending through ri indexes.
fn collect_subkey_offsets(data: &[u8], list_offset: u32, depth: usize, out: &mut Vec<u32>) -> Result<()> {
    if !is_cell_offset(list_offset) {
        return Ok(());
    }
    if depth > MAX_INDEX_DEPTH {
        return Err(RegistryError::format_error(format!(
            "Subkey index at {:#x} nested deeper than {} levels",
            list_offset, MAX_INDEX_DEPTH
        )));
    }

    let list = SubkeyList::parse(cell_data(data, list_offset)?, list_offset)?;
    if list.is_index_root() {
        for sublist in list.offsets() {
            collect_subkey_offsets(data, sublist, depth + 1, out)?;
        }
    } else {
        out.extend(list.offsets());
    }
    Ok(())
}

/// Reassembles a value stored through a db record.
fn read_big_data(data: &[u8], offset: u32, expected_length: u32) -> Result<Vec<u8>> {
    let header = BigDataBlock::parse(cell_data(data, offset)?, offset)?;
    debug!(
        offset = %format!("{:#x}", offset),
        segments = header.segment_count,
        "Reading big data block"
    );

    let list = cell_data(data, header.segment_list_offset)?;
    let expected = expected_length as usize;
    let reachable = header.segment_count as usize * MAX_DIRECT_DATA_SIZE as usize;
    if expected > reachable {
        return Err(RegistryError::TruncatedData {
            offset,
            expected,
            actual: reachable,
        });
    }
    let mut value = Vec::with_capacity(expected);

    for segment_offset in header.segment_offsets(list)? {
        let segment = cell_data(data, segment_offset)?;
        let take = segment
            .len()
            .min(MAX_DIRECT_DATA_SIZE as usize)
            .min(expected - value.len());
        value.extend_from_slice(&segment[..take]);
        if value.len() == expected {
            break;
        }
    }

    if value.len() < expected {
        return Err(RegistryError::TruncatedData {
            offset,
            expected,
            actual: value.len(),
        });
    }
    Ok(value)
}
