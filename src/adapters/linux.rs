use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags, mount, umount, umount2};
use nix::sys::statvfs::statvfs;
use nix::unistd::{AccessFlags, access, sync};
use tracing::{debug, info, trace};

use crate::core::hardware::{
    DeviceEnumerator, DeviceInfo, HardwareError, MountEntry, MountOps, SpaceInfo,
    SupportedFilesystem, UNKNOWN, UnmountMode, parse_mount_table,
};

const MOUNT_TABLE: &str = "/proc/mounts";
const SECTOR_SIZE: u64 = 512;

/// udev-backed device discovery plus direct mount(2)/umount(2) calls.
pub struct LinuxAdapter {
    udev: Option<udev::Udev>,
    mount_table: PathBuf,
}

impl Default for LinuxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxAdapter {
    pub fn new() -> Self {
        Self {
            udev: None,
            mount_table: PathBuf::from(MOUNT_TABLE),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.udev.is_some()
    }

    fn read_mount_table(&self) -> io::Result<Vec<MountEntry>> {
        let content = fs::read_to_string(&self.mount_table)?;
        Ok(parse_mount_table(&content))
    }

    fn describe(&self, device: &udev::Device, devnode: &Path, mounts: &[MountEntry]) -> DeviceInfo {
        let mut info = DeviceInfo::new(devnode);

        let devnode_str = devnode.to_string_lossy();
        if let Some(entry) = mounts.iter().find(|m| m.source == devnode_str) {
            info.is_mounted = true;
            info.mount_point = Some(entry.target.clone());
            info.fs_type = Some(entry.fs_type.clone());
        }

        if let Ok(Some(usb)) = device.parent_with_subsystem_devtype("usb", "usb_device") {
            info.vendor = attribute_string(&usb, "manufacturer").unwrap_or_else(|| UNKNOWN.to_string());
            info.model = attribute_string(&usb, "product").unwrap_or_else(|| UNKNOWN.to_string());
        }

        info.size_total = attribute_string(device, "size")
            .and_then(|s| s.parse::<u64>().ok())
            .map(|sectors| sectors * SECTOR_SIZE)
            .unwrap_or(0);

        info
    }
}

impl DeviceEnumerator for LinuxAdapter {
    fn init(&mut self) -> Result<(), HardwareError> {
        if self.udev.is_some() {
            debug!("udev context already initialized");
            return Ok(());
        }
        self.udev = Some(udev::Udev::new()?);
        info!("udev context initialized");
        Ok(())
    }

    fn teardown(&mut self) {
        if self.udev.take().is_some() {
            info!("udev context released");
        }
    }

    fn list_devices(&self, max_results: usize) -> Result<Vec<DeviceInfo>, HardwareError> {
        let udev = self.udev.clone().ok_or(HardwareError::NotInitialized)?;

        let mut enumerator = udev::Enumerator::with_udev(udev)?;
        enumerator.match_subsystem("block")?;
        enumerator.match_property("DEVTYPE", "partition")?;

        let mounts = self.read_mount_table().unwrap_or_else(|e| {
            debug!(error = %e, "Mount table unavailable, treating devices as unmounted");
            Vec::new()
        });

        let mut devices = Vec::new();
        for device in enumerator.scan_devices()? {
            if devices.len() >= max_results {
                break;
            }

            if !matches!(device.parent_with_subsystem_devtype("usb", "usb_device"), Ok(Some(_))) {
                trace!(sysname = ?device.sysname(), "Skipping non-USB partition");
                continue;
            }
            if !is_removable(&device) {
                continue;
            }
            let Some(devnode) = device.devnode() else {
                continue;
            };

            let info = self.describe(&device, devnode, &mounts);
            info!(
                device = %info.device_path.display(),
                vendor = %info.vendor,
                model = %info.model,
                size_mb = info.size_total / (1024 * 1024),
                "USB device found"
            );
            devices.push(info);
        }

        Ok(devices)
    }
}

impl MountOps for LinuxAdapter {
    fn mount(&self, device: &Path, target: &Path, fs: SupportedFilesystem) -> io::Result<()> {
        mount(
            Some(device),
            target,
            Some(fs.as_str()),
            MsFlags::MS_NOATIME,
            None::<&str>,
        )
        .map_err(io::Error::from)
    }

    fn unmount(&self, target: &Path, mode: UnmountMode) -> io::Result<()> {
        match mode {
            UnmountMode::Graceful => umount(target),
            UnmountMode::Forced => umount2(target, MntFlags::MNT_FORCE),
        }
        .map_err(io::Error::from)
    }

    fn sync_all(&self) {
        sync();
    }

    fn space(&self, target: &Path) -> io::Result<SpaceInfo> {
        let stat = statvfs(target).map_err(io::Error::from)?;
        let fragment = stat.fragment_size() as u64;
        Ok(SpaceInfo {
            free_bytes: stat.blocks_available() as u64 * fragment,
            total_bytes: stat.blocks() as u64 * fragment,
        })
    }

    fn is_writable(&self, path: &Path) -> bool {
        access(path, AccessFlags::W_OK).is_ok()
    }

    fn mount_table(&self) -> io::Result<Vec<MountEntry>> {
        self.read_mount_table()
    }
}

/// The removable flag lives on the disk, so partitions usually inherit it
/// from their parent.
fn is_removable(device: &udev::Device) -> bool {
    if flag_set(device.attribute_value("removable")) {
        return true;
    }
    match device.parent_with_subsystem_devtype("block", "disk") {
        Ok(Some(disk)) => flag_set(disk.attribute_value("removable")),
        _ => false,
    }
}

fn flag_set(value: Option<&OsStr>) -> bool {
    value.map(|v| v.to_string_lossy().trim() == "1").unwrap_or(false)
}

fn attribute_string(device: &udev::Device, name: &str) -> Option<String> {
    device
        .attribute_value(name)
        .map(|v| v.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removable_flag_parsing() {
        assert!(flag_set(Some(OsStr::new("1\n"))));
        assert!(!flag_set(Some(OsStr::new("0"))));
        assert!(!flag_set(None));
    }

    #[test]
    fn listing_requires_init() {
        let adapter = LinuxAdapter::new();
        assert!(matches!(
            adapter.list_devices(5),
            Err(HardwareError::NotInitialized)
        ));
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut adapter = LinuxAdapter::new();
        adapter.teardown();
        adapter.teardown();
        assert!(!adapter.is_initialized());
    }
}
