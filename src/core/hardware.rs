use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Placeholder for vendor/model strings the kernel does not report.
pub const UNKNOWN: &str = "unknown";

/// A removable partition as seen during one enumeration pass.
///
/// Values are snapshots: `is_mounted` can go stale the moment the operator
/// pulls the stick, so callers re-enumerate rather than cache these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_path: PathBuf,
    pub mount_point: Option<PathBuf>,
    pub fs_type: Option<String>,
    pub size_total: u64,
    pub is_mounted: bool,
    pub vendor: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
            mount_point: None,
            fs_type: None,
            size_total: 0,
            is_mounted: false,
            vendor: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
        }
    }

    /// Last component of the device node, e.g. `sda1` for `/dev/sda1`.
    pub fn leaf_name(&self) -> String {
        self.device_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// Mount point used when the kernel reports none: `{media_root}/usb_{leaf}`.
    pub fn default_mount_point(&self, media_root: &Path) -> PathBuf {
        media_root.join(format!("usb_{}", self.leaf_name()))
    }
}

/// Filesystems tried when mounting, in this exact order.
pub const MOUNT_FALLBACK_ORDER: [SupportedFilesystem; 6] = [
    SupportedFilesystem::Vfat,
    SupportedFilesystem::Exfat,
    SupportedFilesystem::Ntfs,
    SupportedFilesystem::Ext4,
    SupportedFilesystem::Ext3,
    SupportedFilesystem::Ext2,
];

/// Filesystems the export path knows how to mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFilesystem {
    Vfat,
    Exfat,
    Ntfs,
    Ext4,
    Ext3,
    Ext2,
}

impl SupportedFilesystem {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vfat" | "fat32" | "fat16" => Some(Self::Vfat),
            "exfat" => Some(Self::Exfat),
            "ntfs" => Some(Self::Ntfs),
            "ext4" => Some(Self::Ext4),
            "ext3" => Some(Self::Ext3),
            "ext2" => Some(Self::Ext2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vfat => "vfat",
            Self::Exfat => "exfat",
            Self::Ntfs => "ntfs",
            Self::Ext4 => "ext4",
            Self::Ext3 => "ext3",
            Self::Ext2 => "ext2",
        }
    }
}

impl std::fmt::Display for SupportedFilesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountMode {
    Graceful,
    Forced,
}

/// One line of the kernel mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
}

/// Free and total capacity of a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceInfo {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

impl SpaceInfo {
    pub fn free_mb(&self) -> u64 {
        self.free_bytes / (1024 * 1024)
    }

    pub fn total_mb(&self) -> u64 {
        self.total_bytes / (1024 * 1024)
    }
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("device context not initialized")]
    NotInitialized,
    #[error("device enumeration failed: {0}")]
    Query(#[from] io::Error),
}

/// Source of removable-device snapshots.
pub trait DeviceEnumerator {
    /// Acquire the device context. Calling it again is a no-op.
    fn init(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    /// Release the device context. Calling it again is a no-op.
    fn teardown(&mut self) {}

    /// List removable partitions, at most `max_results` of them.
    /// An empty list means nothing is plugged in, not an error.
    fn list_devices(&self, max_results: usize) -> Result<Vec<DeviceInfo>, HardwareError>;
}

/// Kernel-facing mount primitives. Everything here re-reads kernel state;
/// implementations keep no per-device bookkeeping.
pub trait MountOps {
    fn mount(&self, device: &Path, target: &Path, fs: SupportedFilesystem) -> io::Result<()>;

    fn unmount(&self, target: &Path, mode: UnmountMode) -> io::Result<()>;

    /// Flush all dirty buffers to stable storage.
    fn sync_all(&self);

    fn space(&self, target: &Path) -> io::Result<SpaceInfo>;

    fn is_writable(&self, path: &Path) -> bool;

    fn mount_table(&self) -> io::Result<Vec<MountEntry>>;
}

/// Everything the export path needs from the platform.
pub trait HardwareAdapter: DeviceEnumerator + MountOps {
    fn as_enumerator(&self) -> &dyn DeviceEnumerator;

    fn as_mount_ops(&self) -> &dyn MountOps;
}

impl<T: DeviceEnumerator + MountOps> HardwareAdapter for T {
    fn as_enumerator(&self) -> &dyn DeviceEnumerator {
        self
    }

    fn as_mount_ops(&self) -> &dyn MountOps {
        self
    }
}

/// Parse `/proc/mounts` formatted text. Octal escapes (`\040` for space)
/// in the source and target columns are decoded.
pub fn parse_mount_table(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = parts.next()?;
            let target = parts.next()?;
            let fs_type = parts.next()?;
            Some(MountEntry {
                source: decode_mount_field(source),
                target: PathBuf::from(decode_mount_field(target)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

fn decode_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|oct| u8::from_str_radix(oct, 8).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mount_point_uses_leaf_name() {
        let device = DeviceInfo::new("/dev/sda1");
        assert_eq!(
            device.default_mount_point(Path::new("/media")),
            PathBuf::from("/media/usb_sda1")
        );
    }

    #[test]
    fn new_device_has_unknown_metadata() {
        let device = DeviceInfo::new("/dev/sdb1");
        assert_eq!(device.vendor, UNKNOWN);
        assert_eq!(device.model, UNKNOWN);
        assert!(device.fs_type.is_none());
        assert!(!device.is_mounted);
    }

    #[test]
    fn fallback_order_is_fixed() {
        let names: Vec<&str> = MOUNT_FALLBACK_ORDER.iter().map(|fs| fs.as_str()).collect();
        assert_eq!(names, ["vfat", "exfat", "ntfs", "ext4", "ext3", "ext2"]);
    }

    #[test]
    fn filesystem_aliases() {
        assert_eq!(SupportedFilesystem::from_str("FAT32"), Some(SupportedFilesystem::Vfat));
        assert_eq!(SupportedFilesystem::from_str("exfat"), Some(SupportedFilesystem::Exfat));
        assert_eq!(SupportedFilesystem::from_str("btrfs"), None);
    }

    #[test]
    fn parses_mount_table_with_escapes() {
        let table = "/dev/sda1 /media/usb\\040stick vfat rw,noatime 0 0\n\
                     proc /proc proc rw 0 0\n\
                     garbage\n";
        let entries = parse_mount_table(table);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, "/dev/sda1");
        assert_eq!(entries[0].target, PathBuf::from("/media/usb stick"));
        assert_eq!(entries[0].fs_type, "vfat");
        assert_eq!(entries[1].target, PathBuf::from("/proc"));
    }

    #[test]
    fn space_info_reports_megabytes() {
        let space = SpaceInfo {
            free_bytes: 15 * 1024 * 1024 + 10,
            total_bytes: 64 * 1024 * 1024,
        };
        assert_eq!(space.free_mb(), 15);
        assert_eq!(space.total_mb(), 64);
    }
}
