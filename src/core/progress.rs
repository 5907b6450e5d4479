//! Progress and completion notifications for export attempts.
//!
//! Callers implement [`ExportCallbacks`] and override only the
//! notifications they care about. Inside the crate every attempt goes through
//! a [`ProgressReporter`], which keeps percentages monotonic and guarantees a
//! single terminal notification.

use std::cell::Cell;
use std::time::Duration;

use tracing::{error, info};

use super::models::{ErrorCode, ExportError, ExportOutcome};
use crate::logging::LogThrottle;

/// Receiver for export milestones. Every method defaults to a no-op, so an
/// implementation that leaves one out simply does not hear about it.
pub trait ExportCallbacks {
    fn on_progress(&self, _percentage: u8, _message: &str) {}

    /// `outcome` is always the `Success` variant.
    fn on_complete(&self, _outcome: &ExportOutcome, _message: &str) {}

    fn on_error(&self, _code: ErrorCode, _message: &str) {}
}

/// Headless callbacks that discard every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl ExportCallbacks for NoopCallbacks {}

/// Callbacks that write milestones to the tracing log.
pub struct LogCallbacks {
    throttle: LogThrottle,
}

impl LogCallbacks {
    pub fn new() -> Self {
        Self {
            throttle: LogThrottle::new(Duration::from_millis(500)),
        }
    }
}

impl Default for LogCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportCallbacks for LogCallbacks {
    fn on_progress(&self, percentage: u8, message: &str) {
        if percentage == 100 || self.throttle.should_log() {
            info!(percentage, "{}", message);
        }
    }

    fn on_complete(&self, outcome: &ExportOutcome, message: &str) {
        if let ExportOutcome::Success { bytes_copied, files_copied, .. } = outcome {
            info!(bytes_copied, files_copied, "Export complete: {}", message);
        }
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        error!(code = %code, "Export failed: {}", message);
    }
}

/// Per-attempt wrapper around the caller's callbacks.
pub struct ProgressReporter<'a> {
    callbacks: &'a dyn ExportCallbacks,
    last_percentage: Cell<u8>,
    finished: Cell<bool>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callbacks: &'a dyn ExportCallbacks) -> Self {
        Self {
            callbacks,
            last_percentage: Cell::new(0),
            finished: Cell::new(false),
        }
    }

    /// Forward a progress event, clamped to `last..=100`.
    pub fn progress(&self, percentage: u8, message: &str) {
        if self.finished.get() {
            return;
        }
        let percentage = percentage.min(100).max(self.last_percentage.get());
        self.last_percentage.set(percentage);
        self.callbacks.on_progress(percentage, message);
    }

    /// Fire the terminal callback for `result` and convert it to an outcome.
    /// Only the first call reaches the callbacks.
    pub fn finish(&self, result: Result<(ExportOutcome, String), ExportError>) -> ExportOutcome {
        let first = !self.finished.replace(true);
        match result {
            Ok((outcome, message)) => {
                if first {
                    self.callbacks.on_complete(&outcome, &message);
                }
                outcome
            }
            Err(err) => {
                let outcome = ExportOutcome::from(&err);
                if first {
                    self.callbacks.on_error(err.code(), &err.to_string());
                }
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        progress: RefCell<Vec<u8>>,
        completes: RefCell<Vec<(ExportOutcome, String)>>,
        errors: RefCell<Vec<ErrorCode>>,
    }

    impl ExportCallbacks for Recorder {
        fn on_progress(&self, percentage: u8, _message: &str) {
            self.progress.borrow_mut().push(percentage);
        }

        fn on_complete(&self, outcome: &ExportOutcome, message: &str) {
            self.completes
                .borrow_mut()
                .push((outcome.clone(), message.to_string()));
        }

        fn on_error(&self, code: ErrorCode, _message: &str) {
            self.errors.borrow_mut().push(code);
        }
    }

    fn success() -> (ExportOutcome, String) {
        (
            ExportOutcome::Success {
                bytes_copied: 10,
                files_copied: 1,
                destination_path: PathBuf::from("/media/usb_sda1/a.txt"),
            },
            "done".to_string(),
        )
    }

    #[test]
    fn progress_never_decreases() {
        let recorder = Recorder::default();
        let reporter = ProgressReporter::new(&recorder);

        reporter.progress(20, "a");
        reporter.progress(10, "b");
        reporter.progress(150, "c");

        assert_eq!(*recorder.progress.borrow(), vec![20, 20, 100]);
    }

    #[test]
    fn only_first_terminal_notification_is_delivered() {
        let recorder = Recorder::default();
        let reporter = ProgressReporter::new(&recorder);

        let outcome = reporter.finish(Ok(success()));
        assert!(outcome.is_success());
        reporter.finish(Err(ExportError::CopyFailed("late".to_string())));
        reporter.progress(50, "ignored");

        assert_eq!(*recorder.completes.borrow(), vec![success()]);
        assert!(recorder.errors.borrow().is_empty());
        assert!(recorder.progress.borrow().is_empty());
    }

    #[test]
    fn error_result_reaches_on_error() {
        let recorder = Recorder::default();
        let reporter = ProgressReporter::new(&recorder);

        let outcome = reporter.finish(Err(ExportError::NotFound("no device".to_string())));

        assert_eq!(outcome.error_code(), Some(ErrorCode::NotFound));
        assert_eq!(*recorder.errors.borrow(), vec![ErrorCode::NotFound]);
        assert!(recorder.completes.borrow().is_empty());
    }

    #[test]
    fn noop_callbacks_accept_everything() {
        let reporter = ProgressReporter::new(&NoopCallbacks);
        reporter.progress(40, "quiet");
        let outcome = reporter.finish(Err(ExportError::InvalidParam("empty".to_string())));
        assert_eq!(outcome.error_code(), Some(ErrorCode::InvalidParam));
    }
}
