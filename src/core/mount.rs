//! Mount-point lifecycle: directory creation, filesystem fallback mounting,
//! space queries and graceful-then-forced unmounting.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::hardware::{DeviceInfo, MOUNT_FALLBACK_ORDER, MountOps, SpaceInfo, UnmountMode};
use super::models::ExportError;

/// Headroom required on the destination beyond the payload itself.
pub const SPACE_SAFETY_MARGIN: u64 = 10 * 1024 * 1024;

/// Settling delay between the pre-unmount sync and the unmount call.
pub const DEFAULT_UNMOUNT_SETTLE: Duration = Duration::from_millis(100);

pub struct MountManager<'a> {
    ops: &'a dyn MountOps,
    media_root: PathBuf,
    unmount_settle: Duration,
}

impl<'a> MountManager<'a> {
    pub fn new(ops: &'a dyn MountOps, media_root: impl Into<PathBuf>) -> Self {
        Self {
            ops,
            media_root: media_root.into(),
            unmount_settle: DEFAULT_UNMOUNT_SETTLE,
        }
    }

    pub fn with_unmount_settle(mut self, settle: Duration) -> Self {
        self.unmount_settle = settle;
        self
    }

    /// Make sure `device` is mounted somewhere writable and return the mount
    /// point. Updates `device` in place with the mount point, filesystem and
    /// mount state that resulted.
    pub fn ensure_mounted(&self, device: &mut DeviceInfo) -> Result<PathBuf, ExportError> {
        if device.is_mounted {
            if let Some(mount_point) = &device.mount_point {
                if self.ops.is_writable(mount_point) {
                    debug!(mount_point = %mount_point.display(), "Device already mounted and writable");
                    return Ok(mount_point.clone());
                }
                warn!(
                    mount_point = %mount_point.display(),
                    "Device mounted but not writable, remounting"
                );
            }
            device.is_mounted = false;
        }

        if device.mount_point.is_none() {
            device.mount_point = Some(device.default_mount_point(&self.media_root));
        }
        let mount_point = device.mount_point.clone().unwrap_or_default();

        create_mount_point(&mount_point)?;

        info!(
            device = %device.device_path.display(),
            mount_point = %mount_point.display(),
            "Mounting device"
        );

        for fs in MOUNT_FALLBACK_ORDER {
            debug!(fs = %fs, "Trying filesystem");
            match self.ops.mount(&device.device_path, &mount_point, fs) {
                Ok(()) => {
                    info!(fs = %fs, "Device mounted");
                    device.fs_type = Some(fs.as_str().to_string());
                    device.is_mounted = true;
                    if let Ok(space) = self.ops.space(&mount_point) {
                        info!(free_mb = space.free_mb(), "Free space on device");
                    }
                    return Ok(mount_point);
                }
                Err(e) => debug!(fs = %fs, error = %e, "Mount attempt failed"),
            }
        }

        warn!(device = %device.device_path.display(), "No filesystem in the fallback list matched");
        remove_mount_point(&mount_point);
        Err(ExportError::MountFailed(format!(
            "Unable to mount {}",
            device.device_path.display()
        )))
    }

    /// Sync, then unmount `mount_point`, escalating to a forced unmount once
    /// if the graceful attempt fails. The emptied directory is removed
    /// afterwards when possible.
    pub fn unmount(&self, mount_point: &Path) -> Result<UnmountMode, ExportError> {
        info!(mount_point = %mount_point.display(), "Unmounting device");

        self.ops.sync_all();
        if !self.unmount_settle.is_zero() {
            thread::sleep(self.unmount_settle);
        }

        let mode = match self.ops.unmount(mount_point, UnmountMode::Graceful) {
            Ok(()) => UnmountMode::Graceful,
            Err(e) => {
                warn!(error = %e, "Graceful unmount failed, forcing");
                self.ops
                    .unmount(mount_point, UnmountMode::Forced)
                    .map_err(|e| {
                        ExportError::MountFailed(format!(
                            "Failed to unmount {}: {}",
                            mount_point.display(),
                            e
                        ))
                    })?;
                UnmountMode::Forced
            }
        };

        info!(mode = ?mode, "Device unmounted");
        remove_mount_point(mount_point);
        Ok(mode)
    }

    pub fn space_info(&self, mount_point: &Path) -> std::io::Result<SpaceInfo> {
        self.ops.space(mount_point)
    }

    /// True when `required_bytes` plus the safety margin fits in free space.
    pub fn has_space(&self, mount_point: &Path, required_bytes: u64) -> bool {
        match self.ops.space(mount_point) {
            Ok(space) => {
                let required = required_bytes.saturating_add(SPACE_SAFETY_MARGIN);
                debug!(available = space.free_bytes, required, "Checking free space");
                space.free_bytes >= required
            }
            Err(e) => {
                warn!(mount_point = %mount_point.display(), error = %e, "Failed to query free space");
                false
            }
        }
    }

    /// Unmount and remove leftover `usb*` directories under the media root.
    /// Returns how many were unmounted.
    pub fn cleanup_orphaned_mount_points(&self) -> usize {
        info!(media_root = %self.media_root.display(), "Cleaning up orphaned mount points");

        let entries = match fs::read_dir(&self.media_root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "Media root not readable");
                return 0;
            }
        };

        let mounted = self.mounted_targets();
        let mut cleaned = 0;

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !is_usb_mount_name(&path) || !path.is_dir() {
                continue;
            }

            let mut released = true;
            if mounted.iter().any(|t| t == &path) {
                match self.ops.unmount(&path, UnmountMode::Graceful) {
                    Ok(()) => {
                        info!(mount_point = %path.display(), "Unmounted orphan");
                        cleaned += 1;
                    }
                    Err(e) => {
                        warn!(mount_point = %path.display(), error = %e, "Failed to unmount orphan");
                        released = false;
                    }
                }
            }

            if released {
                remove_mount_point(&path);
            }
        }

        info!(cleaned, "Orphan cleanup finished");
        cleaned
    }

    /// Unmount every USB mount the kernel reports under the media root,
    /// forcing where needed. Returns how many were unmounted.
    pub fn force_unmount_all(&self) -> usize {
        let table = match self.ops.mount_table() {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "Failed to read mount table");
                return 0;
            }
        };

        let targets: Vec<PathBuf> = table
            .into_iter()
            .filter(|entry| {
                entry.target.starts_with(&self.media_root)
                    && (is_usb_mount_name(&entry.target) || entry.source.starts_with("/dev/sd"))
            })
            .map(|entry| entry.target)
            .collect();

        info!(count = targets.len(), "Force-unmounting USB mounts");

        let mut unmounted = 0;
        for target in &targets {
            let result = self
                .ops
                .unmount(target, UnmountMode::Graceful)
                .or_else(|e| {
                    debug!(mount_point = %target.display(), error = %e, "Graceful unmount failed, forcing");
                    self.ops.unmount(target, UnmountMode::Forced)
                });

            match result {
                Ok(()) => unmounted += 1,
                Err(e) => warn!(mount_point = %target.display(), error = %e, "Failed to unmount"),
            }
            remove_mount_point(target);
        }

        info!(unmounted, total = targets.len(), "Force unmount finished");
        unmounted
    }

    fn mounted_targets(&self) -> Vec<PathBuf> {
        self.ops
            .mount_table()
            .map(|table| table.into_iter().map(|e| e.target).collect())
            .unwrap_or_default()
    }
}

fn is_usb_mount_name(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with("usb"))
        .unwrap_or(false)
}

fn create_mount_point(mount_point: &Path) -> Result<(), ExportError> {
    match fs::metadata(mount_point) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(ExportError::MountFailed(format!(
                "{} exists but is not a directory",
                mount_point.display()
            )));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ExportError::MountFailed(format!(
                "Cannot inspect {}: {}",
                mount_point.display(),
                e
            )));
        }
    }

    fs::create_dir_all(mount_point).map_err(|e| {
        ExportError::MountFailed(format!(
            "Failed to create mount point {}: {}",
            mount_point.display(),
            e
        ))
    })?;
    debug!(mount_point = %mount_point.display(), "Mount point created");
    Ok(())
}

/// Remove an (ideally empty) mount-point directory; never fails the caller.
fn remove_mount_point(mount_point: &Path) {
    match fs::remove_dir(mount_point) {
        Ok(()) => debug!(mount_point = %mount_point.display(), "Mount point removed"),
        Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::DirectoryNotEmpty => {}
        Err(e) => warn!(mount_point = %mount_point.display(), error = %e, "Could not remove mount point"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_mount_point_rejects_plain_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("usb_sda1");
        std::fs::write(&path, b"not a dir").unwrap();

        let err = create_mount_point(&path).unwrap_err();
        assert!(matches!(err, ExportError::MountFailed(_)));
    }

    #[test]
    fn create_mount_point_is_idempotent() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("usb_sda1");

        create_mount_point(&path).unwrap();
        create_mount_point(&path).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn remove_mount_point_keeps_non_empty_dirs() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("usb_sdb1");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep.txt"), b"x").unwrap();

        remove_mount_point(&path);
        assert!(path.exists());

        std::fs::remove_file(path.join("keep.txt")).unwrap();
        remove_mount_point(&path);
        assert!(!path.exists());
    }

    #[test]
    fn usb_mount_names() {
        assert!(is_usb_mount_name(Path::new("/media/usb_sda1")));
        assert!(is_usb_mount_name(Path::new("/media/usb0")));
        assert!(!is_usb_mount_name(Path::new("/media/cdrom")));
    }
}
