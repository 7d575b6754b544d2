//! Builds small, valid regf hives in memory for tests and benchmarks.

#![allow(dead_code)]

use reg_vfs::utils::calculate_checksum;

pub const REG_SZ: u32 = 1;
pub const REG_EXPAND_SZ: u32 = 2;
pub const REG_BINARY: u32 = 3;
pub const REG_DWORD: u32 = 4;
pub const REG_DWORD_BIG_ENDIAN: u32 = 5;
pub const REG_LINK: u32 = 6;
pub const REG_MULTI_SZ: u32 = 7;
pub const REG_QWORD: u32 = 11;

/// 2020-01-01T00:00:00Z as a FILETIME.
pub const JAN_2020: u64 = 132_223_104_000_000_000;

const BIG_DATA_SEGMENT: usize = 16344;

/// Subkey index record written for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Lf,
    Lh,
    Li,
    /// An ri record over two li halves.
    Ri,
}

#[derive(Debug, Clone)]
pub struct TestValue {
    pub name: String,
    pub data_type: u32,
    pub data: Vec<u8>,
}

/// A key of a hive under construction.
#[derive(Debug, Clone)]
pub struct TestKey {
    pub name: String,
    pub class: Option<String>,
    pub last_written: u64,
    pub values: Vec<TestValue>,
    pub children: Vec<TestKey>,
    pub list_kind: ListKind,
    pub bad_child: bool,
    pub truncated_subkey_list: bool,
    pub bad_value: bool,
}

pub fn utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

pub fn multi_sz(strings: &[&str]) -> Vec<u8> {
    let mut data: Vec<u8> = strings.iter().flat_map(|s| utf16z(s)).collect();
    data.extend_from_slice(&[0, 0]);
    data
}

impl TestKey {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class: None,
            last_written: JAN_2020,
            values: Vec::new(),
            children: Vec::new(),
            list_kind: ListKind::Lh,
            bad_child: false,
            truncated_subkey_list: false,
            bad_value: false,
        }
    }

    pub fn child(mut self, key: TestKey) -> Self {
        self.children.push(key);
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.class = Some(class.to_string());
        self
    }

    pub fn written(mut self, filetime: u64) -> Self {
        self.last_written = filetime;
        self
    }

    pub fn list(mut self, kind: ListKind) -> Self {
        self.list_kind = kind;
        self
    }

    pub fn raw_value(mut self, name: &str, data_type: u32, data: Vec<u8>) -> Self {
        self.values.push(TestValue {
            name: name.to_string(),
            data_type,
            data,
        });
        self
    }

    pub fn string(self, name: &str, value: &str) -> Self {
        self.raw_value(name, REG_SZ, utf16z(value))
    }

    pub fn expand_string(self, name: &str, value: &str) -> Self {
        self.raw_value(name, REG_EXPAND_SZ, utf16z(value))
    }

    pub fn multi_string(self, name: &str, values: &[&str]) -> Self {
        self.raw_value(name, REG_MULTI_SZ, multi_sz(values))
    }

    pub fn dword(self, name: &str, value: u32) -> Self {
        self.raw_value(name, REG_DWORD, value.to_le_bytes().to_vec())
    }

    pub fn qword(self, name: &str, value: u64) -> Self {
        self.raw_value(name, REG_QWORD, value.to_le_bytes().to_vec())
    }

    pub fn binary(self, name: &str, data: &[u8]) -> Self {
        self.raw_value(name, REG_BINARY, data.to_vec())
    }

    /// Adds a subkey index entry pointing at a cell that is not a key record.
    pub fn with_bad_child(mut self) -> Self {
        self.bad_child = true;
        self
    }

    /// Writes a subkey index whose element count overruns its cell.
    pub fn with_truncated_subkey_list(mut self) -> Self {
        self.truncated_subkey_list = true;
        self
    }

    /// Adds a value list entry pointing at a cell that is not a value record.
    pub fn with_bad_value(mut self) -> Self {
        self.bad_value = true;
        self
    }
}

/// Serialises a [`TestKey`] tree into regf bytes.
pub struct HiveBuilder {
    root: TestKey,
    minor_version: u32,
    file_name: String,
    bins: Vec<u8>,
}

fn is_ascii_name(name: &str) -> bool {
    name.is_ascii()
}

fn put(buf: &mut [u8], pos: usize, bytes: &[u8]) {
    buf[pos..pos + bytes.len()].copy_from_slice(bytes);
}

impl HiveBuilder {
    pub fn new(root: TestKey) -> Self {
        Self {
            root,
            minor_version: 5,
            file_name: String::new(),
            bins: Vec::new(),
        }
    }

    pub fn minor_version(mut self, minor: u32) -> Self {
        self.minor_version = minor;
        self
    }

    pub fn file_name(mut self, name: &str) -> Self {
        self.file_name = name.to_string();
        self
    }

    /// Appends an allocated cell and returns its offset relative to the first bin.
    fn alloc(&mut self, payload: &[u8]) -> u32 {
        let size = (payload.len() + 4 + 7) & !7;
        let offset = self.bins.len() as u32;
        self.bins.extend_from_slice(&(-(size as i32)).to_le_bytes());
        self.bins.extend_from_slice(payload);
        self.bins.resize(offset as usize + size, 0);
        offset
    }

    fn write_value(&mut self, value: &TestValue) -> u32 {
        let length = value.data.len();
        let (length_field, data_offset) = if length <= 4 {
            let mut inline = [0u8; 4];
            inline[..length].copy_from_slice(&value.data);
            (length as u32 | 0x8000_0000, u32::from_le_bytes(inline))
        } else if length > BIG_DATA_SEGMENT && self.minor_version >= 4 {
            let segments: Vec<u32> = value
                .data
                .chunks(BIG_DATA_SEGMENT)
                .map(|chunk| self.alloc(chunk))
                .collect();
            let list: Vec<u8> = segments.iter().flat_map(|o| o.to_le_bytes()).collect();
            let list_offset = self.alloc(&list);
            let mut db = b"db".to_vec();
            db.extend_from_slice(&(segments.len() as u16).to_le_bytes());
            db.extend_from_slice(&list_offset.to_le_bytes());
            (length as u32, self.alloc(&db))
        } else {
            (length as u32, self.alloc(&value.data))
        };

        let compressed = is_ascii_name(&value.name);
        let name_bytes: Vec<u8> = if compressed {
            value.name.bytes().collect()
        } else {
            value.name.encode_utf16().flat_map(u16::to_le_bytes).collect()
        };

        let mut vk = vec![0u8; 0x14];
        put(&mut vk, 0, b"vk");
        put(&mut vk, 0x02, &(name_bytes.len() as u16).to_le_bytes());
        put(&mut vk, 0x04, &length_field.to_le_bytes());
        put(&mut vk, 0x08, &data_offset.to_le_bytes());
        put(&mut vk, 0x0C, &value.data_type.to_le_bytes());
        put(&mut vk, 0x10, &(compressed as u16).to_le_bytes());
        vk.extend_from_slice(&name_bytes);
        self.alloc(&vk)
    }

    fn write_subkey_list(&mut self, kind: ListKind, offsets: &[u32]) -> u32 {
        match kind {
            ListKind::Lf | ListKind::Lh => {
                let mut list = if kind == ListKind::Lf { b"lf".to_vec() } else { b"lh".to_vec() };
                list.extend_from_slice(&(offsets.len() as u16).to_le_bytes());
                for offset in offsets {
                    list.extend_from_slice(&offset.to_le_bytes());
                    list.extend_from_slice(&0u32.to_le_bytes());
                }
                self.alloc(&list)
            }
            ListKind::Li => {
                let mut list = b"li".to_vec();
                list.extend_from_slice(&(offsets.len() as u16).to_le_bytes());
                for offset in offsets {
                    list.extend_from_slice(&offset.to_le_bytes());
                }
                self.alloc(&list)
            }
            ListKind::Ri => {
                let middle = offsets.len() / 2;
                let first = self.write_subkey_list(ListKind::Li, &offsets[..middle]);
                let second = self.write_subkey_list(ListKind::Li, &offsets[middle..]);
                let mut list = b"ri".to_vec();
                list.extend_from_slice(&2u16.to_le_bytes());
                list.extend_from_slice(&first.to_le_bytes());
                list.extend_from_slice(&second.to_le_bytes());
                self.alloc(&list)
            }
        }
    }

    fn write_key(&mut self, key: &TestKey, is_root: bool) -> u32 {
        let mut child_offsets: Vec<u32> = key
            .children
            .iter()
            .map(|child| self.write_key(child, false))
            .collect();
        if key.bad_child {
            child_offsets.push(self.alloc(b"xx-not-a-key-record"));
        }

        let subkey_list = if key.truncated_subkey_list {
            let mut list = b"lh".to_vec();
            list.extend_from_slice(&200u16.to_le_bytes());
            for offset in &child_offsets {
                list.extend_from_slice(&offset.to_le_bytes());
                list.extend_from_slice(&0u32.to_le_bytes());
            }
            self.alloc(&list)
        } else if child_offsets.is_empty() {
            u32::MAX
        } else {
            self.write_subkey_list(key.list_kind, &child_offsets)
        };

        let mut value_offsets: Vec<u32> = key.values.iter().map(|v| self.write_value(v)).collect();
        if key.bad_value {
            value_offsets.push(self.alloc(b"zz-not-a-value-record"));
        }
        let value_list = if value_offsets.is_empty() {
            u32::MAX
        } else {
            let list: Vec<u8> = value_offsets.iter().flat_map(|o| o.to_le_bytes()).collect();
            self.alloc(&list)
        };

        let (class_offset, class_length) = match &key.class {
            Some(class) => {
                let bytes: Vec<u8> = class.encode_utf16().flat_map(u16::to_le_bytes).collect();
                (self.alloc(&bytes), bytes.len() as u16)
            }
            None => (u32::MAX, 0),
        };

        let compressed = is_ascii_name(&key.name);
        let name_bytes: Vec<u8> = if compressed {
            key.name.bytes().collect()
        } else {
            key.name.encode_utf16().flat_map(u16::to_le_bytes).collect()
        };
        let mut flags = if compressed { 0x0020u16 } else { 0 };
        if is_root {
            flags |= 0x0004 | 0x0008;
        }

        let mut nk = vec![0u8; 0x4C];
        put(&mut nk, 0, b"nk");
        put(&mut nk, 0x02, &flags.to_le_bytes());
        put(&mut nk, 0x04, &key.last_written.to_le_bytes());
        put(&mut nk, 0x14, &(child_offsets.len() as u32).to_le_bytes());
        put(&mut nk, 0x1C, &subkey_list.to_le_bytes());
        put(&mut nk, 0x20, &u32::MAX.to_le_bytes());
        put(&mut nk, 0x24, &(value_offsets.len() as u32).to_le_bytes());
        put(&mut nk, 0x28, &value_list.to_le_bytes());
        put(&mut nk, 0x2C, &u32::MAX.to_le_bytes());
        put(&mut nk, 0x30, &class_offset.to_le_bytes());
        put(&mut nk, 0x48, &(name_bytes.len() as u16).to_le_bytes());
        put(&mut nk, 0x4A, &class_length.to_le_bytes());
        nk.extend_from_slice(&name_bytes);
        self.alloc(&nk)
    }

    pub fn build(mut self) -> Vec<u8> {
        // Room for the hbin header.
        self.bins = vec![0u8; 0x20];
        let root = self.root.clone();
        let root_offset = self.write_key(&root, true);

        let used = self.bins.len();
        let bin_size = (used + 8 + 0xFFF) & !0xFFF;
        let free = bin_size - used;
        self.bins.resize(bin_size, 0);
        put(&mut self.bins, used, &(free as i32).to_le_bytes());
        put(&mut self.bins, 0, b"hbin");
        put(&mut self.bins, 0x08, &(bin_size as u32).to_le_bytes());

        let mut data = vec![0u8; 0x1000];
        put(&mut data, 0, b"regf");
        put(&mut data, 0x04, &1u32.to_le_bytes());
        put(&mut data, 0x08, &1u32.to_le_bytes());
        put(&mut data, 0x0C, &JAN_2020.to_le_bytes());
        put(&mut data, 0x14, &1u32.to_le_bytes());
        put(&mut data, 0x18, &self.minor_version.to_le_bytes());
        put(&mut data, 0x20, &1u32.to_le_bytes());
        put(&mut data, 0x24, &root_offset.to_le_bytes());
        put(&mut data, 0x28, &(bin_size as u32).to_le_bytes());
        put(&mut data, 0x2C, &1u32.to_le_bytes());
        let file_name: Vec<u8> = self
            .file_name
            .encode_utf16()
            .take(63)
            .flat_map(u16::to_le_bytes)
            .collect();
        put(&mut data, 0x30, &file_name);
        let checksum = calculate_checksum(&data);
        put(&mut data, 0x1FC, &checksum.to_le_bytes());

        data.extend_from_slice(&self.bins);
        data
    }
}

/// Builds a hive with the default format version.
pub fn build_hive(root: TestKey) -> Vec<u8> {
    HiveBuilder::new(root).build()
}

/// A SYSTEM hive selecting `ControlSet00<current>`.
pub fn system_hive_with_current(current: u32) -> Vec<u8> {
    let control_set = |number: u32, computer: &str| {
        TestKey::new(&format!("ControlSet{:03}", number))
            .child(
                TestKey::new("Control").child(
                    TestKey::new("ComputerName")
                        .child(TestKey::new("ComputerName").string("ComputerName", computer)),
                ),
            )
            .child(
                TestKey::new("Services")
                    .child(
                        TestKey::new("Tcpip")
                            .dword("Start", number + 1)
                            .expand_string("ImagePath", "%SystemRoot%\\System32\\drivers\\tcpip.sys"),
                    )
                    .child(TestKey::new("Dhcp").dword("Start", 2)),
            )
            .child(
                TestKey::new("Hardware Profiles").child(
                    TestKey::new("Current").child(
                        TestKey::new("Software")
                            .child(TestKey::new("Fonts").dword("LogPixels", 96 * number)),
                    ),
                ),
            )
    };

    build_hive(
        TestKey::new("CMI-CreateHive{2A7FB991-7BBE-4F9D-B91E-7CB51D4737F5}")
            .child(
                TestKey::new("Select")
                    .dword("Current", current)
                    .dword("Default", 1)
                    .dword("LastKnownGood", 2),
            )
            .child(control_set(1, "WKSTN-01"))
            .child(control_set(2, "WKSTN-OLD"))
            .child(TestKey::new("MountedDevices").binary("\\DosDevices\\C:", &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x11])),
    )
}

/// A SYSTEM hive whose `Select\Current` is 1.
pub fn system_hive() -> Vec<u8> {
    system_hive_with_current(1)
}

pub const ALICE_SID: &str = "S-1-5-21-1111-2222-3333-1001";

/// A SOFTWARE hive with machine classes and a profile list.
pub fn software_hive() -> Vec<u8> {
    build_hive(
        TestKey::new("CMI-CreateHive{199DAFC2-6F16-4946-BF90-5A3FC3A60902}")
            .child(
                TestKey::new("Classes")
                    .child(TestKey::new(".txt").string("", "txtfile").string("Content Type", "text/plain"))
                    .child(TestKey::new("txtfile").string("", "Text Document")),
            )
            .child(
                TestKey::new("Microsoft")
                    .child(
                        TestKey::new("Windows").child(
                            TestKey::new("CurrentVersion")
                                .string("ProgramFilesDir", "C:\\Program Files")
                                .child(TestKey::new("App Paths")),
                        ),
                    )
                    .child(
                        TestKey::new("Windows NT").child(
                            TestKey::new("CurrentVersion")
                                .string("ProductName", "Windows 10 Pro")
                                .child(
                                    TestKey::new("ProfileList")
                                        .child(
                                            TestKey::new("S-1-5-18").expand_string(
                                                "ProfileImagePath",
                                                "%systemroot%\\system32\\config\\systemprofile",
                                            ),
                                        )
                                        .child(
                                            TestKey::new(ALICE_SID)
                                                .expand_string("ProfileImagePath", "C:\\Users\\alice"),
                                        ),
                                ),
                        ),
                    ),
            ),
    )
}

/// An NTUSER.DAT hive.
pub fn ntuser_hive() -> Vec<u8> {
    build_hive(
        TestKey::new("ROOT")
            .child(
                TestKey::new("Software").child(
                    TestKey::new("Microsoft").child(
                        TestKey::new("Windows").child(
                            TestKey::new("CurrentVersion")
                                .child(TestKey::new("Explorer"))
                                .child(TestKey::new("Run").string("OneDrive", "C:\\OneDrive.exe /background")),
                        ),
                    ),
                ),
            )
            .child(TestKey::new("Environment").string("TEMP", "%USERPROFILE%\\AppData\\Local\\Temp")),
    )
}

/// A UsrClass.dat hive overriding `.txt`.
pub fn usrclass_hive() -> Vec<u8> {
    build_hive(
        TestKey::new("S-1-5-21-1111-2222-3333-1001_Classes")
            .child(
                TestKey::new("Local Settings").child(
                    TestKey::new("Software").child(
                        TestKey::new("Microsoft")
                            .child(TestKey::new("Windows").child(TestKey::new("CurrentVersion"))),
                    ),
                ),
            )
            .child(TestKey::new(".TXT").string("", "userfile"))
            .child(TestKey::new("userext").string("", "User Extension")),
    )
}
