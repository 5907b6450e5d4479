pub mod clock;
pub mod exporter;
pub mod feedback;
pub mod hardware;
pub mod models;
pub mod monitor;
pub mod mount;
pub mod progress;

pub use clock::{Clock, FixedClock, SystemClock};
pub use exporter::{ExportIdentity, ExportSettings, Exporter, FilePattern};
pub use feedback::{BeepPattern, FeedbackError, FeedbackSink, SignalLine};
pub use hardware::{
    DeviceEnumerator, DeviceInfo, HardwareAdapter, HardwareError, MountEntry, MountOps,
    SpaceInfo, SupportedFilesystem, UnmountMode,
};
pub use models::{ErrorCode, ExportError, ExportOutcome};
pub use monitor::{HotplugMonitor, MonitorSettings, MonitorState, ScanResult};
pub use mount::MountManager;
pub use progress::{ExportCallbacks, LogCallbacks, NoopCallbacks, ProgressReporter};
