//! Registry value (vk) parsing and typed data decoding.

use crate::cell::ValueType;
use crate::error::{RegistryError, Result};
use crate::utils::{read_ascii_string, read_u16_le, read_u32_le, read_utf16_string};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use encoding_rs::{Encoding, UTF_16LE};
use std::collections::HashMap;
use std::fmt;

/// High bit of the vk data length: data lives in the offset field.
const DATA_INLINE_FLAG: u32 = 0x8000_0000;

/// vk flag: value name is stored in the 8-bit codepage.
const VALUE_COMP_NAME: u16 = 0x0001;

/// Value key (vk) record.
#[derive(Debug, Clone)]
pub struct ValueCell {
    /// Length of value data in bytes.
    pub data_length: u32,

    /// True when the data is stored in `data_offset` itself.
    pub inline: bool,

    /// Offset to value data (or inline data).
    pub data_offset: u32,

    /// Value data type.
    pub data_type: ValueType,

    /// Flags (0x0001 = name is ASCII).
    pub flags: u16,

    /// Value name; empty for the key's default value.
    pub name: String,
}

impl ValueCell {
    /// Parses a value key from cell data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or truncated.
    pub fn parse(data: &[u8], offset: u32, codepage: &'static Encoding) -> Result<Self> {
        if data.len() < 20 {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: 20,
                actual: data.len(),
            });
        }

        if &data[0..2] != b"vk" {
            return Err(RegistryError::InvalidFormat(format!(
                "Expected 'vk' signature at offset {:#x}",
                offset
            )));
        }

        let name_length = read_u16_le(data, 0x02)? as usize;
        let data_length_raw = read_u32_le(data, 0x04)?;
        let flags = read_u16_le(data, 0x10)?;

        let name_end = 0x14 + name_length;
        if name_end > data.len() {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: name_end,
                actual: data.len(),
            });
        }

        let name_data = &data[0x14..name_end];
        let name = if flags & VALUE_COMP_NAME != 0 {
            read_ascii_string(name_data, codepage)
        } else {
            read_utf16_string(name_data, offset)?
        };

        Ok(ValueCell {
            data_length: data_length_raw & !DATA_INLINE_FLAG,
            inline: data_length_raw & DATA_INLINE_FLAG != 0,
            data_offset: read_u32_le(data, 0x08)?,
            data_type: ValueType::from_u32(read_u32_le(data, 0x0C)?),
            flags,
            name,
        })
    }

    /// Returns true if the data is stored inline (in the data_offset field).
    pub fn is_inline_data(&self) -> bool {
        self.inline
    }

    /// Extracts inline data (at most 4 bytes).
    pub fn inline_data(&self) -> Vec<u8> {
        let bytes = self.data_offset.to_le_bytes();
        bytes[..(self.data_length as usize).min(4)].to_vec()
    }

    /// Returns true for the key's unnamed default value.
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}

/// Decoded registry value data.
///
/// Every type tag has an arm. Tags without a structured interpretation keep
/// their raw bytes, and unrecognised tags land in [`ValueData::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueData {
    /// REG_NONE payload, uninterpreted.
    None(Vec<u8>),

    /// String value.
    String(String),

    /// Expandable string value, environment tokens left verbatim.
    ExpandString(String),

    /// Binary data.
    Binary(Vec<u8>),

    /// 32-bit integer.
    Dword(u32),

    /// 32-bit big-endian integer.
    DwordBigEndian(u32),

    /// Symbolic link target path.
    Link(String),

    /// Multiple strings.
    MultiString(Vec<String>),

    /// REG_RESOURCE_LIST payload, uninterpreted.
    ResourceList(Vec<u8>),

    /// REG_FULL_RESOURCE_DESCRIPTOR payload, uninterpreted.
    FullResourceDescriptor(Vec<u8>),

    /// REG_RESOURCE_REQUIREMENTS_LIST payload, uninterpreted.
    ResourceRequirementsList(Vec<u8>),

    /// 64-bit integer.
    Qword(u64),

    /// Unrecognised type tag; raw bytes passed through.
    Unknown {
        /// The raw type tag.
        data_type: u32,
        /// The payload.
        data: Vec<u8>,
    },
}

impl ValueData {
    /// Decodes value data based on the declared value type.
    ///
    /// # Arguments
    ///
    /// * `data` - Raw value data bytes.
    /// * `value_type` - Declared type of the value.
    /// * `name` - Value name, used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ValueDecode`] when the payload does not fit
    /// the declared type: wrong integer width, or malformed UTF-16.
    pub fn decode(data: &[u8], value_type: ValueType, name: &str) -> Result<Self> {
        let fail = |reason: String| RegistryError::ValueDecode {
            name: name.to_string(),
            data_type: value_type.name(),
            reason,
        };

        match value_type {
            ValueType::String => Ok(ValueData::String(decode_utf16z(data).map_err(fail)?)),
            ValueType::ExpandString => {
                Ok(ValueData::ExpandString(decode_utf16z(data).map_err(fail)?))
            }
            ValueType::Link => Ok(ValueData::Link(decode_utf16z(data).map_err(fail)?)),
            ValueType::MultiString => {
                Ok(ValueData::MultiString(decode_multi_string(data).map_err(fail)?))
            }

            ValueType::Dword | ValueType::DwordBigEndian => {
                if data.len() != 4 {
                    return Err(fail(format!("expected 4 bytes, found {}", data.len())));
                }
                if value_type == ValueType::Dword {
                    Ok(ValueData::Dword(LittleEndian::read_u32(data)))
                } else {
                    Ok(ValueData::DwordBigEndian(BigEndian::read_u32(data)))
                }
            }

            ValueType::Qword => {
                if data.len() != 8 {
                    return Err(fail(format!("expected 8 bytes, found {}", data.len())));
                }
                Ok(ValueData::Qword(LittleEndian::read_u64(data)))
            }

            ValueType::None => Ok(ValueData::None(data.to_vec())),
            ValueType::Binary => Ok(ValueData::Binary(data.to_vec())),
            ValueType::ResourceList => Ok(ValueData::ResourceList(data.to_vec())),
            ValueType::FullResourceDescriptor => {
                Ok(ValueData::FullResourceDescriptor(data.to_vec()))
            }
            ValueType::ResourceRequirementsList => {
                Ok(ValueData::ResourceRequirementsList(data.to_vec()))
            }
            ValueType::Unknown(tag) => Ok(ValueData::Unknown {
                data_type: tag,
                data: data.to_vec(),
            }),
        }
    }

    /// Returns the integer for DWORD and QWORD data.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ValueData::Dword(d) | ValueData::DwordBigEndian(d) => Some(u64::from(*d)),
            ValueData::Qword(q) => Some(*q),
            _ => None,
        }
    }

    /// Returns the text for string, expandable string and link data.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ValueData::String(s) | ValueData::ExpandString(s) | ValueData::Link(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true when the tag was not recognised and the bytes were passed through.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, ValueData::Unknown { .. })
    }
}

impl fmt::Display for ValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueData::String(s) | ValueData::ExpandString(s) | ValueData::Link(s) => {
                write!(f, "{}", s)
            }
            ValueData::Dword(d) | ValueData::DwordBigEndian(d) => {
                write!(f, "{} (0x{:08X})", d, d)
            }
            ValueData::Qword(q) => write!(f, "{} (0x{:016X})", q, q),
            ValueData::MultiString(strings) => write!(f, "{}", strings.join(", ")),
            ValueData::None(b)
            | ValueData::Binary(b)
            | ValueData::ResourceList(b)
            | ValueData::FullResourceDescriptor(b)
            | ValueData::ResourceRequirementsList(b)
            | ValueData::Unknown { data: b, .. } => write!(f, "{}", hex::encode(b)),
        }
    }
}

/// Splits a byte payload into UTF-16 code units.
///
/// A dangling odd byte is tolerated only when a null unit precedes it.
fn utf16_units(data: &[u8]) -> std::result::Result<Vec<u16>, String> {
    let chunks = data.chunks_exact(2);
    let has_remainder = !chunks.remainder().is_empty();
    let units: Vec<u16> = chunks.map(LittleEndian::read_u16).collect();

    if has_remainder && !units.contains(&0) {
        return Err(format!("odd payload length {} without terminator", data.len()));
    }
    Ok(units)
}

fn units_to_string(units: &[u16]) -> std::result::Result<String, String> {
    let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
    UTF_16LE
        .decode_without_bom_handling_and_without_replacement(&bytes)
        .map(|s| s.into_owned())
        .ok_or_else(|| "malformed UTF-16".to_string())
}

/// Decodes a null-terminated UTF-16LE string; anything after the first null is ignored.
fn decode_utf16z(data: &[u8]) -> std::result::Result<String, String> {
    let units = utf16_units(data)?;
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    units_to_string(&units[..end])
}

/// Decodes REG_MULTI_SZ: strings separated by nulls, trailing empty strings dropped.
fn decode_multi_string(data: &[u8]) -> std::result::Result<Vec<String>, String> {
    let units = utf16_units(data)?;
    let mut strings = units
        .split(|&u| u == 0)
        .map(units_to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    while strings.last().map_or(false, |s| s.is_empty()) {
        strings.pop();
    }
    Ok(strings)
}

/// Expands `%NAME%` tokens using `variables`, matching names case-insensitively.
///
/// Tokens without a definition are left verbatim, as Windows does.
///
/// ```rust
/// # use std::collections::HashMap;
/// # use reg_vfs::value::expand_environment_strings;
/// let mut vars = HashMap::new();
/// vars.insert("SystemRoot".to_string(), "C:\\Windows".to_string());
/// assert_eq!(
///     expand_environment_strings("%systemroot%\\System32\\%UNSET%", &vars),
///     "C:\\Windows\\System32\\%UNSET%"
/// );
/// ```
pub fn expand_environment_strings(input: &str, variables: &HashMap<String, String>) -> String {
    let lookup: HashMap<String, &str> = variables
        .iter()
        .map(|(k, v)| (k.to_uppercase(), v.as_str()))
        .collect();

    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('%') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) => {
                let token = &after[..end];
                match lookup.get(&token.to_uppercase()) {
                    Some(value) if !token.is_empty() => {
                        output.push_str(value);
                        rest = &after[end + 1..];
                    }
                    _ => {
                        // Keep the first '%' and rescan from the second one.
                        output.push('%');
                        output.push_str(token);
                        rest = &after[end..];
                    }
                }
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    output.push_str(rest);
    output
}
