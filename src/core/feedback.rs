//! Audible confirmation on the controller's buzzer line.

use std::io;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

/// A single active-high digital output.
pub trait SignalLine {
    /// Claim the line and configure it as an output.
    fn open(&mut self) -> io::Result<()>;

    fn set_level(&self, high: bool) -> io::Result<()>;

    /// Release the line.
    fn close(&mut self) -> io::Result<()>;
}

#[derive(Debug, Error)]
#[error("failed to initialize signal line: {0}")]
pub struct FeedbackError(#[from] io::Error);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeepPattern {
    pub cycles: u32,
    pub on: Duration,
    pub off: Duration,
}

impl Default for BeepPattern {
    fn default() -> Self {
        Self {
            cycles: 3,
            on: Duration::from_millis(200),
            off: Duration::from_millis(200),
        }
    }
}

pub struct FeedbackSink {
    line: Box<dyn SignalLine>,
    pattern: BeepPattern,
    initialized: bool,
}

impl FeedbackSink {
    pub fn new(line: Box<dyn SignalLine>, pattern: BeepPattern) -> Self {
        Self {
            line,
            pattern,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn init(&mut self) -> Result<(), FeedbackError> {
        if self.initialized {
            debug!("Signal line already initialized");
            return Ok(());
        }
        self.line.open()?;
        if let Err(e) = self.line.set_level(false) {
            warn!(error = %e, "Failed to drive signal line low after init");
        }
        self.initialized = true;
        info!("Signal line initialized");
        Ok(())
    }

    pub fn teardown(&mut self) {
        if !self.initialized {
            return;
        }
        let _ = self.line.set_level(false);
        if let Err(e) = self.line.close() {
            warn!(error = %e, "Failed to release signal line");
        }
        self.initialized = false;
        info!("Signal line released");
    }

    /// Play the success pattern. Errors are logged and swallowed.
    pub fn signal_success(&self) {
        if !self.initialized {
            warn!("Signal line not initialized, skipping success beep");
            return;
        }

        debug!(cycles = self.pattern.cycles, "Playing success beep");
        for _ in 0..self.pattern.cycles {
            if let Err(e) = self.line.set_level(true) {
                warn!(error = %e, "Failed to raise signal line");
                return;
            }
            thread::sleep(self.pattern.on);

            if let Err(e) = self.line.set_level(false) {
                warn!(error = %e, "Failed to lower signal line");
                return;
            }
            thread::sleep(self.pattern.off);
        }
    }
}

impl Drop for FeedbackSink {
    fn drop(&mut self) {
        self.teardown();
    }
}
