use std::path::{Path, PathBuf};

use logshuttle::adapters::{SimulatedAdapter, SimulatedLine};
use logshuttle::core::{
    DeviceEnumerator, MountOps, SignalLine, SupportedFilesystem, UnmountMode,
};

#[test]
fn test_list_devices_empty() {
    let (adapter, _controller) = SimulatedAdapter::new();
    let devices = adapter.list_devices(5).unwrap();
    assert!(devices.is_empty());
}

#[test]
fn test_add_device() {
    let (adapter, controller) = SimulatedAdapter::new();
    controller.add_device("sda1", "vfat", 8);

    let devices = adapter.list_devices(5).unwrap();
    assert_eq!(devices.len(), 1);

    let device = &devices[0];
    assert_eq!(device.device_path, PathBuf::from("/dev/sda1"));
    assert_eq!(device.size_total, 8 * 1024 * 1024 * 1024);
    assert_eq!(device.vendor, "Simulated");
    assert!(!device.is_mounted);
    assert!(device.mount_point.is_none());
}

#[test]
fn test_list_respects_max_results() {
    let (adapter, controller) = SimulatedAdapter::new();
    for name in ["sda1", "sdb1", "sdc1"] {
        controller.add_device(name, "vfat", 4);
    }

    assert_eq!(adapter.list_devices(2).unwrap().len(), 2);
    assert_eq!(adapter.list_devices(5).unwrap().len(), 3);
}

#[test]
fn test_remove_device_drops_its_mount() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("usb_sda1");
    std::fs::create_dir(&target).unwrap();

    let (adapter, controller) = SimulatedAdapter::new();
    controller.add_device("sda1", "vfat", 8);
    adapter
        .mount(Path::new("/dev/sda1"), &target, SupportedFilesystem::Vfat)
        .unwrap();
    assert_eq!(controller.mounted_points(), vec![target.clone()]);

    controller.remove_device("sda1");
    assert!(adapter.list_devices(5).unwrap().is_empty());
    assert!(controller.mounted_points().is_empty());
}

#[test]
fn test_mount_requires_matching_filesystem() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("usb_sda1");
    std::fs::create_dir(&target).unwrap();

    let (adapter, controller) = SimulatedAdapter::new();
    controller.add_device("sda1", "exfat", 8);

    let device = Path::new("/dev/sda1");
    assert!(adapter.mount(device, &target, SupportedFilesystem::Vfat).is_err());
    adapter.mount(device, &target, SupportedFilesystem::Exfat).unwrap();

    let listed = &adapter.list_devices(5).unwrap()[0];
    assert!(listed.is_mounted);
    assert_eq!(listed.mount_point.as_deref(), Some(target.as_path()));
    assert_eq!(listed.fs_type.as_deref(), Some("exfat"));
    assert!(adapter.is_writable(&target));

    let table = adapter.mount_table().unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].source, "/dev/sda1");
    assert_eq!(table[0].fs_type, "exfat");
}

#[test]
fn test_busy_device_needs_force() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("usb_sda1");
    std::fs::create_dir(&target).unwrap();

    let (adapter, controller) = SimulatedAdapter::new();
    controller.add_device("sda1", "vfat", 8);
    adapter
        .mount(Path::new("/dev/sda1"), &target, SupportedFilesystem::Vfat)
        .unwrap();

    controller.set_busy(true);
    assert!(adapter.unmount(&target, UnmountMode::Graceful).is_err());
    adapter.unmount(&target, UnmountMode::Forced).unwrap();

    assert_eq!(
        controller.unmount_attempts(),
        vec![
            (target.clone(), UnmountMode::Graceful),
            (target.clone(), UnmountMode::Forced),
        ]
    );
    assert!(controller.mounted_points().is_empty());
}

#[test]
fn test_space_is_capped_by_capacity() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("usb_sda1");
    std::fs::create_dir(&target).unwrap();

    let (adapter, controller) = SimulatedAdapter::new();
    controller.add_device("sda1", "vfat", 1);
    adapter
        .mount(Path::new("/dev/sda1"), &target, SupportedFilesystem::Vfat)
        .unwrap();

    controller.set_free_bytes(u64::MAX);
    let space = adapter.space(&target).unwrap();
    assert_eq!(space.free_bytes, space.total_bytes);

    controller.set_free_bytes(5 * 1024 * 1024);
    assert_eq!(adapter.space(&target).unwrap().free_mb(), 5);

    assert!(adapter.space(temp.path()).is_err());
}

#[test]
fn test_simulated_line_counts_beeps() {
    let mut line = SimulatedLine::new();
    line.open().unwrap();
    for level in [false, true, false, true, false] {
        line.set_level(level).unwrap();
    }
    line.close().unwrap();

    assert_eq!(line.beeps(), 2);
    assert_eq!(line.levels().len(), 5);
}
