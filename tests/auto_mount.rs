//! Opening standard hives through a file reader.

mod common;

use common::*;
use reg_vfs::{FileSystemReader, MemoryReader, Registry, RegistryFileReader, RegistryOptions, HiveOptions};
use std::fs;
use std::path::PathBuf;

const SYSTEM_PATH: &str = "C:\\Windows\\System32\\config\\SYSTEM";
const SOFTWARE_PATH: &str = "C:\\Windows\\System32\\config\\SOFTWARE";

fn machine_reader() -> MemoryReader {
    MemoryReader::new()
        .with_file(SYSTEM_PATH, system_hive())
        .with_file(SOFTWARE_PATH, software_hive())
}

#[test]
fn test_auto_mount_on_lookup() {
    let registry = Registry::with_reader(machine_reader(), RegistryOptions::default());
    assert!(registry.mounts().is_empty());

    let select = registry.get_key_by_path("HKLM\\System\\Select").unwrap();
    assert_eq!(select.path(), "HKEY_LOCAL_MACHINE\\System\\Select");

    let paths: Vec<String> = registry.mounts().iter().map(|m| m.path().to_string()).collect();
    assert_eq!(paths, vec!["HKEY_LOCAL_MACHINE\\System"]);
}

#[test]
fn test_auto_mount_on_enumeration() {
    let registry = Registry::with_reader(machine_reader(), RegistryOptions::default());
    let hklm = registry.get_key_by_path("HKLM").unwrap();
    let names: Vec<String> = hklm.subkeys().unwrap().iter().map(|k| k.name().to_string()).collect();
    assert_eq!(names, vec!["Software", "System"]);
}

#[test]
fn test_auto_mount_for_virtual_roots() {
    let registry = Registry::with_reader(machine_reader(), RegistryOptions::default());

    let txt = registry.get_key_by_path("HKCR\\.txt").unwrap();
    assert_eq!(txt.value("").unwrap().data().unwrap().as_str(), Some("txtfile"));

    let fonts = registry.get_key_by_path("HKCC\\Software\\Fonts").unwrap();
    assert_eq!(fonts.path(), "HKEY_CURRENT_CONFIG\\Software\\Fonts");
}

#[test]
fn test_auto_mount_disabled() {
    let registry = Registry::with_reader(
        machine_reader(),
        RegistryOptions::default().with_auto_mount(false),
    );
    assert!(registry.get_key_by_path("HKLM\\System\\Select").unwrap_err().is_not_found());
    assert!(registry.mounts().is_empty());
}

#[test]
fn test_explicit_mount_wins_over_auto_mount() {
    let registry = Registry::with_reader(machine_reader(), RegistryOptions::default());
    registry.map_bytes(system_hive_with_current(2), "SYSTEM", None).unwrap();

    let ccs = registry.get_key_by_path("HKLM\\System\\CurrentControlSet").unwrap();
    assert_eq!(ccs.alias_target(), Some("HKEY_LOCAL_MACHINE\\System\\ControlSet002"));
    assert_eq!(
        registry
            .mounts()
            .iter()
            .filter(|m| m.path() == "HKEY_LOCAL_MACHINE\\System")
            .count(),
        1
    );
}

#[test]
fn test_auto_mount_after_unmap() {
    let registry = Registry::with_reader(machine_reader(), RegistryOptions::default());
    let manual = registry.map_bytes(system_hive_with_current(2), "SYSTEM", None).unwrap();

    let ccs = registry.get_key_by_path("HKLM\\System\\CurrentControlSet").unwrap();
    assert_eq!(ccs.alias_target(), Some("HKEY_LOCAL_MACHINE\\System\\ControlSet002"));

    registry.unmap(&manual).unwrap();
    assert!(registry.mounts().is_empty());

    // the standard SYSTEM hive is opened from the reader instead
    let ccs = registry.get_key_by_path("HKLM\\System\\CurrentControlSet").unwrap();
    assert_eq!(ccs.alias_target(), Some("HKEY_LOCAL_MACHINE\\System\\ControlSet001"));
    let mounts = registry.mounts();
    assert_eq!(mounts.len(), 1);
    assert_ne!(mounts[0].registration(), manual.registration());
}

#[test]
fn test_user_hives_need_a_profile_variable() {
    let reader = machine_reader()
        .with_variable("UserProfile", "C:\\Users\\alice")
        .with_file("C:\\Users\\alice\\NTUSER.DAT", ntuser_hive());
    let registry = Registry::with_reader(reader, RegistryOptions::default());

    let run = registry
        .get_key_by_path("HKCU\\Software\\Microsoft\\Windows\\CurrentVersion\\Run")
        .unwrap();
    assert_eq!(run.value_count().unwrap(), 1);

    let without = Registry::with_reader(machine_reader(), RegistryOptions::default());
    assert!(without.get_key_by_path("HKCU\\Environment").unwrap_err().is_not_found());
}

#[test]
fn test_map_user_profiles() {
    let reader = machine_reader()
        .with_file("C:\\Users\\alice\\NTUSER.DAT", ntuser_hive())
        .with_file(
            "C:\\Users\\alice\\AppData\\Local\\Microsoft\\Windows\\UsrClass.dat",
            usrclass_hive(),
        );
    let registry = Registry::with_reader(reader, RegistryOptions::default());

    let mounted = registry.map_user_profiles().unwrap();
    let paths: Vec<String> = mounted.iter().map(|m| m.path().to_string()).collect();
    assert_eq!(
        paths,
        vec![
            format!("HKEY_USERS\\{}", ALICE_SID),
            format!("HKEY_USERS\\{}_Classes", ALICE_SID)
        ]
    );

    let env = registry
        .get_key_by_path(&format!("HKU\\{}\\Environment", ALICE_SID))
        .unwrap();
    assert_eq!(env.value("TEMP").unwrap().data().unwrap().as_str(), Some("%USERPROFILE%\\AppData\\Local\\Temp"));

    // profiles already mounted are skipped
    assert!(registry.map_user_profiles().unwrap().is_empty());
}

#[test]
fn test_map_user_profiles_without_reader() {
    let registry = Registry::new();
    registry.map_bytes(software_hive(), "SOFTWARE", None).unwrap();
    assert!(registry.map_user_profiles().unwrap().is_empty());
}

#[test]
fn test_memory_reader_rejects_garbage() {
    let reader = MemoryReader::new().with_file(SYSTEM_PATH, vec![0u8; 8192]);
    assert!(reader.open("%SystemRoot%\\System32\\config\\SYSTEM", &HiveOptions::default()).is_err());

    // an unreadable standard hive is logged, not fatal
    let registry = Registry::with_reader(reader, RegistryOptions::default());
    assert!(registry.get_key_by_path("HKLM\\System").unwrap_err().is_not_found());
}

struct TempVolume(PathBuf);

impl TempVolume {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!("reg-vfs-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        Self(root)
    }
}

impl Drop for TempVolume {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

#[test]
fn test_file_system_reader() {
    let volume = TempVolume::new("fs-reader");
    let config = volume.0.join("windows").join("system32").join("CONFIG");
    fs::create_dir_all(&config).unwrap();
    fs::write(config.join("system"), system_hive()).unwrap();

    let reader = FileSystemReader::new(&volume.0);
    assert_eq!(
        reader.resolve("%SystemRoot%\\System32\\config\\SYSTEM"),
        Some(config.join("system"))
    );
    assert_eq!(reader.resolve("%SystemRoot%\\System32\\config\\SOFTWARE"), None);

    let registry = Registry::with_reader(reader, RegistryOptions::default());
    let tcpip = registry
        .get_key_by_path("HKLM\\System\\CurrentControlSet\\Services\\Tcpip")
        .unwrap();
    assert_eq!(tcpip.value("Start").unwrap().data().unwrap().as_u64(), Some(2));
}

#[test]
fn test_map_file() {
    let volume = TempVolume::new("map-file");
    let path = volume.0.join("NTUSER.DAT");
    fs::write(&path, ntuser_hive()).unwrap();

    let registry = Registry::new();
    let mount = registry.map_file(&path, None).unwrap();
    assert_eq!(mount.path(), "HKEY_CURRENT_USER");
    assert!(mount.source().label().ends_with("NTUSER.DAT"));

    let missing = registry.map_file(volume.0.join("absent"), None).unwrap_err();
    assert_eq!(missing.kind(), reg_vfs::ErrorKind::Io);
}
