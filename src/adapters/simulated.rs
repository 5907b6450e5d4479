use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::core::feedback::SignalLine;
use crate::core::hardware::{
    DeviceEnumerator, DeviceInfo, HardwareError, MountEntry, MountOps, SpaceInfo,
    SupportedFilesystem, UnmountMode,
};

const GIB: u64 = 1024 * 1024 * 1024;

struct SimulatedDevice {
    name: String,
    /// Filesystem the stick is "formatted" with, as a free-form name.
    filesystem: String,
    capacity: u64,
}

struct SimulatedState {
    devices: Vec<SimulatedDevice>,
    /// mount point -> (device node, filesystem)
    mounts: HashMap<PathBuf, (PathBuf, SupportedFilesystem)>,
    free_bytes: u64,
    busy: bool,
    stuck: bool,
    mount_attempts: Vec<(PathBuf, SupportedFilesystem)>,
    unmount_attempts: Vec<(PathBuf, UnmountMode)>,
    syncs: usize,
}

impl Default for SimulatedState {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            mounts: HashMap::new(),
            free_bytes: GIB,
            busy: false,
            stuck: false,
            mount_attempts: Vec::new(),
            unmount_attempts: Vec::new(),
            syncs: 0,
        }
    }
}

/// Handle for plugging and unplugging simulated sticks and inspecting what
/// the adapter was asked to do.
#[derive(Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimulatedState>>,
}

impl Simulator {
    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        lock(&self.state)
    }

    pub fn add_device(&self, name: &str, filesystem: &str, size_gb: u64) {
        let mut state = self.state();
        state.devices.retain(|d| d.name != name);
        state.devices.push(SimulatedDevice {
            name: name.to_string(),
            filesystem: filesystem.to_string(),
            capacity: size_gb * GIB,
        });
        info!(device = name, filesystem, "(Simulator) Device inserted");
    }

    /// Pull the stick. Any mount it had disappears with it.
    pub fn remove_device(&self, name: &str) {
        let mut state = self.state();
        state.devices.retain(|d| d.name != name);
        let node = device_node(name);
        state.mounts.retain(|_, (dev, _)| *dev != node);
        info!(device = name, "(Simulator) Device removed");
    }

    pub fn set_free_bytes(&self, free_bytes: u64) {
        self.state().free_bytes = free_bytes;
    }

    /// Graceful unmounts fail while busy.
    pub fn set_busy(&self, busy: bool) {
        self.state().busy = busy;
    }

    /// Forced unmounts fail too while stuck.
    pub fn set_stuck(&self, stuck: bool) {
        self.state().stuck = stuck;
    }

    pub fn mount_attempts(&self) -> Vec<(PathBuf, SupportedFilesystem)> {
        self.state().mount_attempts.clone()
    }

    pub fn unmount_attempts(&self) -> Vec<(PathBuf, UnmountMode)> {
        self.state().unmount_attempts.clone()
    }

    pub fn mounted_points(&self) -> Vec<PathBuf> {
        self.state().mounts.keys().cloned().collect()
    }

    /// Pretend something outside the exporter already mounted `name`.
    pub fn premount(&self, name: &str, mount_point: &Path, fs: SupportedFilesystem) {
        self.state()
            .mounts
            .insert(mount_point.to_path_buf(), (device_node(name), fs));
    }

    pub fn sync_count(&self) -> usize {
        self.state().syncs
    }
}

/// In-memory stand-in for the Linux adapter. Mount points are real
/// directories; "mounting" only records the association, so exported files
/// land on the host filesystem.
pub struct SimulatedAdapter {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedAdapter {
    pub fn new() -> (Self, Simulator) {
        let state = Arc::new(Mutex::new(SimulatedState::default()));
        (
            Self {
                state: state.clone(),
            },
            Simulator { state },
        )
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        lock(&self.state)
    }
}

impl DeviceEnumerator for SimulatedAdapter {
    fn list_devices(&self, max_results: usize) -> Result<Vec<DeviceInfo>, HardwareError> {
        let state = self.state();
        let devices = state
            .devices
            .iter()
            .take(max_results)
            .map(|d| {
                let node = device_node(&d.name);
                let mut info = DeviceInfo::new(&node);
                info.size_total = d.capacity;
                info.vendor = "Simulated".to_string();
                info.model = "Flash Disk".to_string();
                if let Some((target, (_, fs))) = state.mounts.iter().find(|(_, (dev, _))| *dev == node) {
                    info.is_mounted = true;
                    info.mount_point = Some(target.clone());
                    info.fs_type = Some(fs.as_str().to_string());
                }
                info
            })
            .collect();
        Ok(devices)
    }
}

impl MountOps for SimulatedAdapter {
    fn mount(&self, device: &Path, target: &Path, fs: SupportedFilesystem) -> io::Result<()> {
        let mut state = self.state();
        state.mount_attempts.push((target.to_path_buf(), fs));

        let formatted = state
            .devices
            .iter()
            .find(|d| device_node(&d.name) == device)
            .map(|d| d.filesystem.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such device"))?;

        if SupportedFilesystem::from_str(&formatted) != Some(fs) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("wrong fs type, device is {}", formatted),
            ));
        }
        if state.mounts.contains_key(target) {
            return Err(io::Error::new(io::ErrorKind::ResourceBusy, "target busy"));
        }

        state
            .mounts
            .insert(target.to_path_buf(), (device.to_path_buf(), fs));
        Ok(())
    }

    fn unmount(&self, target: &Path, mode: UnmountMode) -> io::Result<()> {
        let mut state = self.state();
        state.unmount_attempts.push((target.to_path_buf(), mode));

        if !state.mounts.contains_key(target) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not mounted"));
        }
        let refused = match mode {
            UnmountMode::Graceful => state.busy || state.stuck,
            UnmountMode::Forced => state.stuck,
        };
        if refused {
            return Err(io::Error::new(io::ErrorKind::ResourceBusy, "target busy"));
        }

        state.mounts.remove(target);
        Ok(())
    }

    fn sync_all(&self) {
        self.state().syncs += 1;
    }

    fn space(&self, target: &Path) -> io::Result<SpaceInfo> {
        let state = self.state();
        let (device, _) = state
            .mounts
            .get(target)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not mounted"))?;
        let total_bytes = state
            .devices
            .iter()
            .find(|d| device_node(&d.name) == *device)
            .map(|d| d.capacity)
            .unwrap_or(0);
        Ok(SpaceInfo {
            free_bytes: state.free_bytes.min(total_bytes),
            total_bytes,
        })
    }

    fn is_writable(&self, path: &Path) -> bool {
        self.state().mounts.contains_key(path) && path.is_dir()
    }

    fn mount_table(&self) -> io::Result<Vec<MountEntry>> {
        Ok(self
            .state()
            .mounts
            .iter()
            .map(|(target, (device, fs))| MountEntry {
                source: device.to_string_lossy().into_owned(),
                target: target.clone(),
                fs_type: fs.as_str().to_string(),
            })
            .collect())
    }
}

/// Signal line that records every level change instead of driving hardware.
#[derive(Clone, Default)]
pub struct SimulatedLine {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl SimulatedLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> Vec<bool> {
        lock(&self.levels).clone()
    }

    /// Number of completed on/off beeps.
    pub fn beeps(&self) -> usize {
        lock(&self.levels)
            .windows(2)
            .filter(|w| w[0] && !w[1])
            .count()
    }
}

impl SignalLine for SimulatedLine {
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn set_level(&self, high: bool) -> io::Result<()> {
        lock(&self.levels).push(high);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn device_node(name: &str) -> PathBuf {
    PathBuf::from(format!("/dev/{}", name))
}

/// A poisoned lock only means a test thread panicked mid-update; the state is
/// still usable for inspection.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
