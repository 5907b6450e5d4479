//! Polling hotplug monitor that runs a bulk export whenever a stick appears.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::exporter::Exporter;
use super::models::ExportOutcome;
use super::progress::ExportCallbacks;

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// How often the cancellation flag is checked.
    pub poll_interval: Duration,
    /// Minimum time between device scans.
    pub scan_interval: Duration,
    /// Wait between detecting a new device and exporting to it.
    pub settle_delay: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            scan_interval: Duration::from_secs(3),
            settle_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    pub last_presence: bool,
    pub last_poll_time: Option<Instant>,
}

/// What a single scan observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Absent,
    Arrived(ExportOutcome),
    StillPresent,
    Removed,
    ScanFailed,
}

pub struct HotplugMonitor<'e, 'a> {
    exporter: &'e Exporter<'a>,
    settings: MonitorSettings,
    state: MonitorState,
}

impl<'e, 'a> HotplugMonitor<'e, 'a> {
    pub fn new(exporter: &'e Exporter<'a>, settings: MonitorSettings) -> Self {
        Self {
            exporter,
            settings,
            state: MonitorState::default(),
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Loop until `token` is cancelled. Cancellation is only observed between
    /// iterations; an export in progress always runs to completion.
    pub fn run(&mut self, source_dir: &Path, token: &CancellationToken, callbacks: &dyn ExportCallbacks) {
        info!(source = %source_dir.display(), "Hotplug monitor started");

        while !token.is_cancelled() {
            let due = self
                .state
                .last_poll_time
                .is_none_or(|t| t.elapsed() >= self.settings.scan_interval);
            if due {
                self.scan_once(source_dir, callbacks);
            }
            thread::sleep(self.settings.poll_interval);
        }

        info!("Hotplug monitor stopped");
    }

    /// Scan once and export on an absent-to-present transition.
    pub fn scan_once(&mut self, source_dir: &Path, callbacks: &dyn ExportCallbacks) -> ScanResult {
        self.state.last_poll_time = Some(Instant::now());

        let present = match self.exporter.detect_devices() {
            Ok(devices) => !devices.is_empty(),
            Err(e) => {
                warn!(error = %e, "Device scan failed");
                return ScanResult::ScanFailed;
            }
        };

        let result = match (self.state.last_presence, present) {
            (false, true) => {
                info!("USB device inserted, starting export");
                if !self.settings.settle_delay.is_zero() {
                    thread::sleep(self.settings.settle_delay);
                }
                let outcome = self.exporter.export_all(source_dir, callbacks);
                match &outcome {
                    ExportOutcome::Success { files_copied, .. } => {
                        info!(files_copied, "Automatic export succeeded")
                    }
                    ExportOutcome::Failure { code, message } => {
                        warn!(code = %code, "Automatic export failed: {}", message)
                    }
                }
                ScanResult::Arrived(outcome)
            }
            (true, true) => ScanResult::StillPresent,
            (true, false) => {
                info!("USB device removed");
                ScanResult::Removed
            }
            (false, false) => ScanResult::Absent,
        };

        debug!(present, "Scan complete");
        self.state.last_presence = present;
        result
    }
}
