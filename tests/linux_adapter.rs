//! Linux adapter integration tests.
//!
//! The loopback test needs root and the usual util-linux/dosfstools tools.
//!
//! Run all tests: `cargo test --test linux_adapter`
//! Run ignored tests: `sudo cargo test --test linux_adapter -- --ignored`

#![cfg(target_os = "linux")]

use std::fs;
use std::path::Path;
use std::process::Command;

use logshuttle::adapters::LinuxAdapter;
use logshuttle::core::{
    DeviceEnumerator, DeviceInfo, HardwareError, MountManager, MountOps, SupportedFilesystem,
    UnmountMode,
};
use nix::unistd::Uid;
use tempfile::NamedTempFile;

fn is_root() -> bool {
    Uid::effective().is_root()
}

fn has_tool(name: &str, arg: &str) -> bool {
    Command::new(name).arg(arg).output().is_ok()
}

/// Back a loop device with a vfat-formatted temp file. Returns the loop
/// device path (e.g. /dev/loop0) on success.
fn setup_loopback(file_path: &str, size_mb: u64) -> Option<String> {
    let result = Command::new("dd")
        .args([
            "if=/dev/zero",
            &format!("of={}", file_path),
            "bs=1M",
            &format!("count={}", size_mb),
        ])
        .output()
        .ok()?;
    if !result.status.success() {
        eprintln!("dd failed: {}", String::from_utf8_lossy(&result.stderr));
        return None;
    }

    let result = Command::new("mkfs.vfat").arg(file_path).output().ok()?;
    if !result.status.success() {
        eprintln!("mkfs.vfat failed: {}", String::from_utf8_lossy(&result.stderr));
        return None;
    }

    let output = Command::new("losetup")
        .args(["--find", "--show", file_path])
        .output()
        .ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        eprintln!("losetup failed: {}", String::from_utf8_lossy(&output.stderr));
        None
    }
}

fn teardown_loopback(loop_device: &str) {
    let _ = Command::new("losetup").args(["-d", loop_device]).output();
}

#[test]
fn test_list_devices_after_init() {
    let mut adapter = LinuxAdapter::new();
    if let Err(e) = adapter.init() {
        eprintln!("Skipping: udev unavailable ({})", e);
        return;
    }

    let result = adapter.list_devices(5);
    assert!(result.is_ok(), "list_devices should not error: {:?}", result.err());
    for device in result.unwrap() {
        assert!(device.device_path.starts_with("/dev"));
        assert!(!device.vendor.is_empty());
    }

    adapter.teardown();
    assert!(matches!(adapter.list_devices(5), Err(HardwareError::NotInitialized)));
}

#[test]
fn test_init_is_idempotent() {
    let mut adapter = LinuxAdapter::new();
    if adapter.init().is_err() {
        eprintln!("Skipping: udev unavailable");
        return;
    }
    adapter.init().unwrap();
    assert!(adapter.is_initialized());
    adapter.teardown();
    adapter.teardown();
    assert!(!adapter.is_initialized());
}

#[test]
fn test_mount_table_is_readable() {
    let adapter = LinuxAdapter::new();
    let table = adapter.mount_table().unwrap();
    assert!(table.iter().any(|entry| entry.target == Path::new("/")));
}

#[test]
#[ignore = "requires root privileges and losetup/mkfs.vfat"]
fn test_mount_cycle_on_loopback() {
    if !is_root() {
        eprintln!("Skipping: requires root");
        return;
    }
    if !has_tool("losetup", "--version") || !has_tool("mkfs.vfat", "--help") {
        eprintln!("Skipping: losetup or mkfs.vfat not available");
        return;
    }

    let temp_file = NamedTempFile::new().expect("create temp file");
    let file_path = temp_file.path().to_string_lossy().to_string();
    let loop_device = match setup_loopback(&file_path, 32) {
        Some(dev) => dev,
        None => {
            eprintln!("Failed to set up loopback device");
            return;
        }
    };

    let media = tempfile::tempdir().unwrap();
    let adapter = LinuxAdapter::new();
    let mounts = MountManager::new(&adapter, media.path());

    let mut device = DeviceInfo::new(&loop_device);
    let result = mounts.ensure_mounted(&mut device);

    let outcome = result.map(|mount_point| {
        let space = adapter.space(&mount_point).unwrap();
        fs::write(mount_point.join("NI_probe.txt"), b"probe").unwrap();
        let mode = mounts.unmount(&mount_point).unwrap();
        (mount_point, space, mode)
    });

    teardown_loopback(&loop_device);

    let (mount_point, space, mode) = outcome.expect("loopback should mount as vfat");
    assert_eq!(device.fs_type.as_deref(), Some(SupportedFilesystem::Vfat.as_str()));
    assert!(space.total_bytes > 0);
    assert_eq!(mode, UnmountMode::Graceful);
    assert!(mount_point.starts_with(media.path()));
}
