//! Unit tests for parsing specific structures.

use reg_vfs::*;

#[test]
fn test_base_block_constants() {
    assert_eq!(header::BASE_BLOCK_SIZE, 4096);
    assert_eq!(header::REGF_SIGNATURE, b"regf");
    assert_eq!(header::CHECKSUM_OFFSET, 0x1FC);
}

#[test]
fn test_hbin_constants() {
    assert_eq!(hbin::HBIN_HEADER_SIZE, 32);
    assert_eq!(hbin::HBIN_SIGNATURE, b"hbin");
    assert_eq!(bigdata::MAX_DIRECT_DATA_SIZE, 16344);
}

#[test]
fn test_cell_type_signatures() {
    assert_eq!(CellType::KeyNode.signature(), b"nk");
    assert_eq!(CellType::ValueKey.signature(), b"vk");
    assert_eq!(CellType::Security.signature(), b"sk");
    assert_eq!(CellType::IndexLeaf.signature(), b"li");
    assert_eq!(CellType::FastLeaf.signature(), b"lf");
    assert_eq!(CellType::HashLeaf.signature(), b"lh");
    assert_eq!(CellType::IndexRoot.signature(), b"ri");
    assert_eq!(CellType::DataBlock.signature(), b"db");
}

#[test]
fn test_cell_type_from_signature() {
    assert_eq!(CellType::from_signature(b"nk").unwrap(), CellType::KeyNode);
    assert_eq!(CellType::from_signature(b"vk").unwrap(), CellType::ValueKey);

    let err = CellType::from_signature(b"XX").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}

#[test]
fn test_value_type_names() {
    assert_eq!(ValueType::None.name(), "REG_NONE");
    assert_eq!(ValueType::String.name(), "REG_SZ");
    assert_eq!(ValueType::ExpandString.name(), "REG_EXPAND_SZ");
    assert_eq!(ValueType::Binary.name(), "REG_BINARY");
    assert_eq!(ValueType::Dword.name(), "REG_DWORD");
    assert_eq!(ValueType::DwordBigEndian.name(), "REG_DWORD_BIG_ENDIAN");
    assert_eq!(ValueType::Link.name(), "REG_LINK");
    assert_eq!(ValueType::MultiString.name(), "REG_MULTI_SZ");
    assert_eq!(ValueType::Qword.name(), "REG_QWORD");
}

#[test]
fn test_value_type_from_u32() {
    assert_eq!(ValueType::from_u32(0), ValueType::None);
    assert_eq!(ValueType::from_u32(1), ValueType::String);
    assert_eq!(ValueType::from_u32(2), ValueType::ExpandString);
    assert_eq!(ValueType::from_u32(3), ValueType::Binary);
    assert_eq!(ValueType::from_u32(4), ValueType::Dword);
    assert_eq!(ValueType::from_u32(11), ValueType::Qword);
    assert_eq!(ValueType::from_u32(999), ValueType::Unknown(999));
    assert_eq!(ValueType::from_u32(0xFFFF_0011).to_u32(), 0xFFFF_0011);
}

#[test]
fn test_key_node_flags() {
    let flags = KeyNodeFlags::new(0);
    assert!(!flags.is_compressed());
    assert!(!flags.is_volatile());
    assert!(!flags.is_root());

    let flags = KeyNodeFlags::new(KeyNodeFlags::COMP_NAME | KeyNodeFlags::ROOT_KEY);
    assert!(flags.is_compressed());
    assert!(flags.is_root());
    assert!(!flags.is_volatile());

    assert!(KeyNodeFlags::new(KeyNodeFlags::SYM_LINK).is_symlink());
}

#[test]
fn test_subkey_list_types() {
    assert_eq!(SubkeyListType::from_signature(b"li").unwrap(), SubkeyListType::IndexLeaf);
    assert_eq!(SubkeyListType::from_signature(b"lf").unwrap(), SubkeyListType::FastLeaf);
    assert_eq!(SubkeyListType::from_signature(b"lh").unwrap(), SubkeyListType::HashLeaf);
    assert_eq!(SubkeyListType::from_signature(b"ri").unwrap(), SubkeyListType::IndexRoot);
    assert!(SubkeyListType::from_signature(b"XX").is_err());
}

#[test]
fn test_offset_conversion() {
    use utils::{cell_offset_to_absolute, is_cell_offset};

    assert_eq!(cell_offset_to_absolute(0x20).unwrap(), 0x1020);
    assert_eq!(cell_offset_to_absolute(0x1000).unwrap(), 0x2000);
    assert!(cell_offset_to_absolute(u32::MAX).is_err());

    assert!(is_cell_offset(0x20));
    assert!(!is_cell_offset(0));
    assert!(!is_cell_offset(utils::NO_CELL));
}

#[test]
fn test_error_kinds() {
    let err = RegistryError::invalid_signature(b"regf", b"XXXX");
    assert_eq!(err.kind(), ErrorKind::Format);

    let err = RegistryError::invalid_offset(0x1234, 0x1000);
    assert_eq!(err.kind(), ErrorKind::Decode);

    let err = RegistryError::invalid_cell_size(-8, 0x2000);
    assert!(err.is_decode_error());

    let err = RegistryError::use_after_close("SYSTEM");
    assert_eq!(err.kind(), ErrorKind::UseAfterClose);
}

#[test]
fn test_value_data_display() {
    assert_eq!(ValueData::None(Vec::new()).to_string(), "");
    assert_eq!(ValueData::String("Hello".to_string()).to_string(), "Hello");
    assert_eq!(ValueData::Dword(0x12345678).to_string(), "305419896 (0x12345678)");
    assert_eq!(ValueData::Binary(vec![0x01, 0x02, 0x03]).to_string(), "010203");
    assert_eq!(
        ValueData::MultiString(vec!["a".to_string(), "b".to_string()]).to_string(),
        "a, b"
    );
}

#[test]
fn test_value_data_decode() {
    let data = ValueData::decode(&7u32.to_le_bytes(), ValueType::Dword, "Start").unwrap();
    assert_eq!(data.as_u64(), Some(7));

    let err = ValueData::decode(&[1, 2], ValueType::Qword, "Short").unwrap_err();
    assert!(err.is_decode_error());
}

#[test]
fn test_cell_type_is_subkey_list() {
    assert!(CellType::IndexLeaf.is_subkey_list());
    assert!(CellType::FastLeaf.is_subkey_list());
    assert!(CellType::HashLeaf.is_subkey_list());
    assert!(CellType::IndexRoot.is_subkey_list());

    assert!(!CellType::KeyNode.is_subkey_list());
    assert!(!CellType::ValueKey.is_subkey_list());
    assert!(!CellType::Security.is_subkey_list());
}

#[test]
fn test_key_path_parsing() {
    let parsed = KeyPath::parse("hklm\\\\System\\Select\\").unwrap();
    assert_eq!(parsed.canonical(), "HKEY_LOCAL_MACHINE\\System\\Select");

    assert_eq!(RootKey::from_name("HKCU"), Some(RootKey::CurrentUser));
    assert_eq!(RootKey::CurrentUser.name(), "HKEY_CURRENT_USER");
    assert!(KeyPath::parse("").unwrap().root.is_none());
    assert!(KeyPath::parse("HKEY_NOWHERE\\Software").unwrap_err().is_not_found());
}
