//! Export cycles: find a stick, mount it, copy logs onto it, verify, unmount.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use filetime::FileTime;
use regex::Regex;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::feedback::FeedbackSink;
use super::hardware::{DeviceInfo, HardwareAdapter, HardwareError, UnmountMode};
use super::models::{ExportError, ExportOutcome};
use super::mount::{DEFAULT_UNMOUNT_SETTLE, MountManager};
use super::progress::{ExportCallbacks, ProgressReporter};

const DEFAULT_DEVICE_NAME: &str = "NI";
const DEFAULT_SERIAL: &str = "000000";

/// Progress band used for the data transfer itself.
const COPY_START_PERCENT: u8 = 20;
const COPY_END_PERCENT: u8 = 90;

/// Name and serial stamped into exported file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportIdentity {
    pub device_name: String,
    pub serial_number: String,
}

impl ExportIdentity {
    /// Blank values fall back to `NI` / `000000`.
    pub fn new(device_name: &str, serial_number: &str) -> Self {
        let pick = |value: &str, fallback: &str| {
            let value = value.trim();
            if value.is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };
        Self {
            device_name: pick(device_name, DEFAULT_DEVICE_NAME),
            serial_number: pick(serial_number, DEFAULT_SERIAL),
        }
    }
}

impl Default for ExportIdentity {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub identity: ExportIdentity,
    /// Glob (`*` and `?`) selecting logger files, e.g. `NI*.txt`.
    pub file_pattern: String,
    pub media_root: PathBuf,
    pub max_devices: usize,
    pub chunk_size: usize,
    /// Pause after the final sync, before unmounting.
    pub post_copy_settle: Duration,
    pub unmount_settle: Duration,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            identity: ExportIdentity::default(),
            file_pattern: "NI*.txt".to_string(),
            media_root: PathBuf::from("/media"),
            max_devices: 5,
            chunk_size: 8192,
            post_copy_settle: Duration::from_millis(500),
            unmount_settle: DEFAULT_UNMOUNT_SETTLE,
        }
    }
}

/// Shell-style file-name pattern.
#[derive(Debug, Clone)]
pub struct FilePattern {
    glob: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let mut expr = String::from("^");
        for c in glob.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');
        Ok(Self {
            glob: glob.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

/// `{device_name}_{serial}_{YYYYMMDD_HHMMSS}.txt`
pub fn destination_file_name(identity: &ExportIdentity, now: NaiveDateTime) -> String {
    format!(
        "{}_{}_{}.txt",
        identity.device_name,
        identity.serial_number,
        now.format("%Y%m%d_%H%M%S")
    )
}

pub struct Exporter<'a> {
    adapter: &'a dyn HardwareAdapter,
    mounts: MountManager<'a>,
    feedback: Option<&'a FeedbackSink>,
    clock: &'a dyn Clock,
    pattern: FilePattern,
    settings: ExportSettings,
}

impl<'a> Exporter<'a> {
    pub fn new(adapter: &'a dyn HardwareAdapter, settings: ExportSettings) -> Result<Self, ExportError> {
        let pattern = FilePattern::new(&settings.file_pattern).map_err(|e| {
            ExportError::InvalidParam(format!("bad file pattern '{}': {}", settings.file_pattern, e))
        })?;
        if settings.chunk_size == 0 {
            return Err(ExportError::InvalidParam("chunk size must be positive".to_string()));
        }

        let mounts = MountManager::new(adapter.as_mount_ops(), settings.media_root.clone())
            .with_unmount_settle(settings.unmount_settle);

        Ok(Self {
            adapter,
            mounts,
            feedback: None,
            clock: &SystemClock,
            pattern,
            settings,
        })
    }

    pub fn with_feedback(mut self, feedback: &'a FeedbackSink) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn mounts(&self) -> &MountManager<'a> {
        &self.mounts
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn detect_devices(&self) -> Result<Vec<DeviceInfo>, HardwareError> {
        self.adapter
            .as_enumerator()
            .list_devices(self.settings.max_devices)
    }

    /// First removable device currently attached.
    pub fn first_device(&self) -> Result<DeviceInfo, ExportError> {
        let devices = self
            .detect_devices()
            .map_err(|e| ExportError::NotFound(format!("USB detection failed: {}", e)))?;

        let device = devices
            .into_iter()
            .next()
            .ok_or_else(|| ExportError::NotFound("No USB device found".to_string()))?;

        info!(
            device = %device.device_path.display(),
            vendor = %device.vendor,
            model = %device.model,
            "Using USB device"
        );
        Ok(device)
    }

    /// Copy one log file onto `device` under a freshly generated name.
    pub fn export_one(
        &self,
        device: &DeviceInfo,
        source_file: &Path,
        callbacks: &dyn ExportCallbacks,
    ) -> ExportOutcome {
        let span = info_span!(
            "export_one",
            attempt = %Uuid::now_v7(),
            device = %device.device_path.display()
        );
        let _guard = span.enter();

        let reporter = ProgressReporter::new(callbacks);
        let result = self.run_export_one(device.clone(), source_file, &reporter);
        reporter.finish(result)
    }

    /// Detect the first attached device and run [`Exporter::export_one`] on it.
    pub fn export_to_first_device(
        &self,
        source_file: &Path,
        callbacks: &dyn ExportCallbacks,
    ) -> ExportOutcome {
        match self.first_device() {
            Ok(device) => self.export_one(&device, source_file, callbacks),
            Err(e) => ProgressReporter::new(callbacks).finish(Err(e)),
        }
    }

    /// Replace every logger file on the first attached device with the
    /// matching files from `source_dir`.
    pub fn export_all(&self, source_dir: &Path, callbacks: &dyn ExportCallbacks) -> ExportOutcome {
        let span = info_span!(
            "export_all",
            attempt = %Uuid::now_v7(),
            source = %source_dir.display()
        );
        let _guard = span.enter();

        let reporter = ProgressReporter::new(callbacks);
        let result = self.run_export_all(source_dir, &reporter);
        reporter.finish(result)
    }

    fn run_export_one(
        &self,
        mut device: DeviceInfo,
        source_file: &Path,
        reporter: &ProgressReporter<'_>,
    ) -> Result<(ExportOutcome, String), ExportError> {
        if source_file.as_os_str().is_empty() {
            return Err(ExportError::InvalidParam("source file path is empty".to_string()));
        }

        reporter.progress(0, "Checking source file...");
        let (source, source_len) = open_source(source_file)?;

        reporter.progress(5, "Mounting USB device...");
        let mount_point = self.mounts.ensure_mounted(&mut device)?;

        let copied = self.copy_single(source, source_len, &mount_point, reporter);

        if copied.is_ok() {
            reporter.progress(100, "Unmounting USB device...");
        }
        if let Err(e) = self.release(&mount_point) {
            warn!(error = %e, "Could not unmount USB device after export");
        }

        let destination = copied?;
        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok((
            ExportOutcome::Success {
                bytes_copied: source_len,
                files_copied: 1,
                destination_path: destination,
            },
            format!("File saved as: {}", file_name),
        ))
    }

    fn copy_single(
        &self,
        source: File,
        source_len: u64,
        mount_point: &Path,
        reporter: &ProgressReporter<'_>,
    ) -> Result<PathBuf, ExportError> {
        reporter.progress(10, "Checking free space on USB...");
        if !self.mounts.has_space(mount_point, source_len) {
            return Err(ExportError::CopyFailed("Insufficient space on USB device".to_string()));
        }

        reporter.progress(COPY_START_PERCENT, "Preparing copy...");
        let file_name = destination_file_name(&self.settings.identity, self.clock.now());
        let destination = unique_destination(mount_point, &file_name);
        info!(destination = %destination.display(), bytes = source_len, "Copying log file");

        let mut progress = CopyProgress::new(reporter, source_len);
        self.write_copy(source, &destination, source_len, &mut progress)?;

        reporter.progress(95, "Verifying copied file...");
        verify_length(&destination, source_len)?;

        info!(destination = %destination.display(), bytes = source_len, "Log file copied");
        Ok(destination)
    }

    fn run_export_all(
        &self,
        source_dir: &Path,
        reporter: &ProgressReporter<'_>,
    ) -> Result<(ExportOutcome, String), ExportError> {
        if source_dir.as_os_str().is_empty() {
            return Err(ExportError::InvalidParam("source directory is empty".to_string()));
        }

        reporter.progress(0, "Scanning log directory...");
        let sources = self.collect_sources(source_dir)?;
        let total_bytes: u64 = sources.iter().map(|(_, len)| *len).sum();
        info!(files = sources.len(), total_bytes, "Log files selected for export");

        reporter.progress(10, "Detecting USB device...");
        let mut device = self.first_device()?;

        reporter.progress(15, "Mounting USB device...");
        let mount_point = self.mounts.ensure_mounted(&mut device)?;

        let copied = self.refresh_destination(&mount_point, &sources, total_bytes, reporter);
        let released = self.release(&mount_point);

        let (bytes_copied, files_copied) = copied?;
        released.map_err(|e| {
            ExportError::CopyFailed(format!("Files copied but USB could not be unmounted: {}", e))
        })?;

        if let Some(feedback) = self.feedback {
            feedback.signal_success();
        }

        info!(files_copied, bytes_copied, "Bulk export complete");
        Ok((
            ExportOutcome::Success {
                bytes_copied,
                files_copied,
                destination_path: mount_point.clone(),
            },
            format!("{} file(s) exported to {}", files_copied, mount_point.display()),
        ))
    }

    /// Matching regular files in `source_dir`, sorted by name, with sizes.
    fn collect_sources(&self, source_dir: &Path) -> Result<Vec<(PathBuf, u64)>, ExportError> {
        let entries = fs::read_dir(source_dir).map_err(|e| {
            ExportError::NotFound(format!("Log directory {} not readable: {}", source_dir.display(), e))
        })?;

        let mut sources = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.pattern.matches(&name) {
                continue;
            }
            // Follows symlinks, so a linked log counts as a regular file.
            match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_file() => sources.push((entry.path(), meta.len())),
                Ok(_) => warn!(file = %name, "Skipping matching entry that is not a regular file"),
                Err(e) => warn!(file = %name, error = %e, "Skipping unreadable log file"),
            }
        }

        if sources.is_empty() {
            return Err(ExportError::NotFound(format!(
                "No files matching {} in {}",
                self.pattern.as_str(),
                source_dir.display()
            )));
        }

        sources.sort();
        Ok(sources)
    }

    fn refresh_destination(
        &self,
        mount_point: &Path,
        sources: &[(PathBuf, u64)],
        total_bytes: u64,
        reporter: &ProgressReporter<'_>,
    ) -> Result<(u64, usize), ExportError> {
        reporter.progress(18, "Removing previous exports...");
        let removed = self.remove_previous_exports(mount_point);
        debug!(removed, "Previous exports removed");

        if !self.mounts.has_space(mount_point, total_bytes) {
            return Err(ExportError::CopyFailed("Insufficient space on USB device".to_string()));
        }

        reporter.progress(COPY_START_PERCENT, "Copying log files...");
        let mut progress = CopyProgress::new(reporter, total_bytes);
        let mut bytes_copied = 0;
        let mut files_copied = 0;

        for (source_path, len) in sources {
            let Some(file_name) = source_path.file_name() else {
                continue;
            };
            let destination = mount_point.join(file_name);
            debug!(file = %source_path.display(), size = len, "Copying file");

            let source = File::open(source_path).map_err(|e| {
                ExportError::CopyFailed(format!("Cannot open {}: {}", source_path.display(), e))
            })?;
            self.write_copy(source, &destination, *len, &mut progress)?;
            verify_length(&destination, *len)?;
            preserve_mtime(source_path, &destination);

            bytes_copied += len;
            files_copied += 1;
        }

        reporter.progress(95, "Synchronizing USB device...");
        Ok((bytes_copied, files_copied))
    }

    /// Delete logger files already on the stick so the export is a full refresh.
    fn remove_previous_exports(&self, mount_point: &Path) -> usize {
        let entries = match fs::read_dir(mount_point) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(mount_point = %mount_point.display(), error = %e, "Cannot list USB contents");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file || !self.pattern.matches(&name) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to remove previous export"),
            }
        }
        removed
    }

    /// Stream exactly `len` bytes of `source` into a new file at
    /// `destination`. A partially written file is deleted on failure.
    fn write_copy<R: Read>(
        &self,
        source: R,
        destination: &Path,
        len: u64,
        progress: &mut CopyProgress<'_, '_>,
    ) -> Result<u64, ExportError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .map_err(|e| {
                ExportError::CopyFailed(format!("Cannot create {}: {}", destination.display(), e))
            })?;

        let label = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        progress.start_file(len);
        let written = self
            .stream(source, file, len, &label, progress)
            .and_then(|(copied, file)| file.sync_all().map(|()| copied));

        match written {
            Ok(copied) => Ok(copied),
            Err(e) => {
                warn!(destination = %destination.display(), error = %e, "Write to USB failed");
                discard_partial(destination);
                Err(ExportError::CopyFailed(format!(
                    "Error writing {} to USB: {}",
                    label, e
                )))
            }
        }
    }

    /// Copy up to `len` bytes in `chunk_size` pieces. Hands the flushed
    /// writer back so the caller can sync it.
    fn stream<R: Read, W: Write>(
        &self,
        source: R,
        destination: W,
        len: u64,
        label: &str,
        progress: &mut CopyProgress<'_, '_>,
    ) -> io::Result<(u64, W)> {
        let chunk_size = self.settings.chunk_size;
        let mut reader = BufReader::with_capacity(chunk_size, source).take(len);
        let mut writer = BufWriter::with_capacity(chunk_size, destination);
        let mut buffer = vec![0u8; chunk_size];
        let mut copied: u64 = 0;

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            writer.write_all(&buffer[..n])?;
            copied += n as u64;
            progress.advance(n as u64, label);
        }

        let destination = writer.into_inner().map_err(|e| e.into_error())?;
        Ok((copied, destination))
    }

    /// Final sync, settle, then unmount.
    fn release(&self, mount_point: &Path) -> Result<UnmountMode, ExportError> {
        self.adapter.as_mount_ops().sync_all();
        if !self.settings.post_copy_settle.is_zero() {
            thread::sleep(self.settings.post_copy_settle);
        }
        self.mounts.unmount(mount_point)
    }
}

/// Maps bytes written onto the 20–90% band, reporting on 5% steps. The
/// message carries the current file's own percentage.
struct CopyProgress<'r, 'a> {
    reporter: &'r ProgressReporter<'a>,
    total_bytes: u64,
    copied: u64,
    file_bytes: u64,
    file_copied: u64,
    last_reported: u8,
}

impl<'r, 'a> CopyProgress<'r, 'a> {
    fn new(reporter: &'r ProgressReporter<'a>, total_bytes: u64) -> Self {
        Self {
            reporter,
            total_bytes,
            copied: 0,
            file_bytes: 0,
            file_copied: 0,
            last_reported: COPY_START_PERCENT,
        }
    }

    fn start_file(&mut self, len: u64) {
        self.file_bytes = len;
        self.file_copied = 0;
    }

    fn advance(&mut self, bytes: u64, label: &str) {
        self.copied += bytes;
        self.file_copied += bytes;
        let percentage = scaled_copy_percentage(self.copied, self.total_bytes);
        if percentage != self.last_reported && percentage % 5 == 0 {
            let file_percentage =
                self.file_copied.min(self.file_bytes) * 100 / self.file_bytes.max(1);
            self.reporter
                .progress(percentage, &format!("Copying {}... {}%", label, file_percentage));
            self.last_reported = percentage;
        }
    }
}

fn scaled_copy_percentage(copied: u64, total: u64) -> u8 {
    if total == 0 {
        return COPY_END_PERCENT;
    }
    let span = u64::from(COPY_END_PERCENT - COPY_START_PERCENT);
    let scaled = copied.min(total) * span / total;
    COPY_START_PERCENT + scaled as u8
}

fn open_source(path: &Path) -> Result<(File, u64), ExportError> {
    let not_found = |e: io::Error| {
        ExportError::NotFound(format!("Log file {} not found or unreadable: {}", path.display(), e))
    };
    let file = File::open(path).map_err(not_found)?;
    let meta = file.metadata().map_err(not_found)?;
    if !meta.is_file() {
        return Err(ExportError::NotFound(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok((file, meta.len()))
}

/// Size-only integrity check; a mismatching destination is deleted.
fn verify_length(destination: &Path, expected: u64) -> Result<(), ExportError> {
    let actual = fs::metadata(destination).map(|m| m.len());
    match actual {
        Ok(len) if len == expected => Ok(()),
        Ok(len) => {
            discard_partial(destination);
            Err(ExportError::CopyFailed(format!(
                "Copied file has wrong size (source: {} bytes, destination: {} bytes)",
                expected, len
            )))
        }
        Err(e) => {
            discard_partial(destination);
            Err(ExportError::CopyFailed(format!(
                "Cannot verify {}: {}",
                destination.display(),
                e
            )))
        }
    }
}

fn discard_partial(destination: &Path) {
    match fs::remove_file(destination) {
        Ok(()) => debug!(destination = %destination.display(), "Removed partial file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(destination = %destination.display(), error = %e, "Failed to remove partial file"),
    }
}

/// Avoid clobbering an export made within the same second.
fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = file_name.strip_suffix(".txt").unwrap_or(file_name);
    (1..)
        .map(|n| dir.join(format!("{}_{}.txt", stem, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

fn preserve_mtime(source: &Path, destination: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let mtime = FileTime::from_last_modification_time(&meta);
    if let Err(e) = filetime::set_file_mtime(destination, mtime) {
        debug!(destination = %destination.display(), error = %e, "Could not preserve modification time");
    }
}
