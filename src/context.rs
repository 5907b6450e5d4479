use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters;
use crate::config::AppConfig;
use crate::core::{
    BeepPattern, ExportError, Exporter, FeedbackSink, HardwareAdapter, HardwareError, SignalLine,
    SystemClock,
};

/// Everything one process needs to export: the hardware adapter, the buzzer
/// and the effective configuration. Built and used on a single thread.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    adapter: Box<dyn HardwareAdapter>,
    feedback: Option<FeedbackSink>,
    clock: SystemClock,
    initialized: bool,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let adapter = adapters::get_adapter(config.simulation);
        let line = config.feedback.enabled.then(|| {
            adapters::get_signal_line(
                config.simulation,
                &config.feedback.sysfs_root,
                config.feedback.gpio_pin,
            )
        });
        Self::with_parts(config, adapter, line)
    }

    /// Assemble a context from explicit parts, bypassing adapter selection.
    pub fn with_parts(
        config: AppConfig,
        adapter: Box<dyn HardwareAdapter>,
        line: Option<Box<dyn SignalLine>>,
    ) -> Self {
        let pattern: BeepPattern = config.beep_pattern();
        Self {
            config: Arc::new(config),
            adapter,
            feedback: line.map(|line| FeedbackSink::new(line, pattern)),
            clock: SystemClock,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Acquire udev and the feedback line. A buzzer that cannot be opened
    /// only costs the audible confirmation, so it is not fatal.
    pub fn init(&mut self) -> Result<(), HardwareError> {
        if self.initialized {
            return Ok(());
        }

        self.adapter.init()?;
        if let Some(feedback) = self.feedback.as_mut() {
            if let Err(e) = feedback.init() {
                warn!(error = %e, "Feedback line unavailable, continuing without beeps");
            }
        }

        self.initialized = true;
        info!(simulation = self.config.simulation, "Exporter context initialized");
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        if let Some(feedback) = self.feedback.as_mut() {
            feedback.teardown();
        }
        self.adapter.teardown();
        self.initialized = false;
        info!("Exporter context shut down");
    }

    pub fn feedback(&self) -> Option<&FeedbackSink> {
        self.feedback.as_ref()
    }

    pub fn exporter(&self) -> Result<Exporter<'_>, ExportError> {
        let exporter = Exporter::new(self.adapter.as_ref(), self.config.export_settings())?
            .with_clock(&self.clock);
        Ok(match self.feedback.as_ref() {
            Some(feedback) => exporter.with_feedback(feedback),
            None => exporter,
        })
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
