use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::exporter::{ExportIdentity, ExportSettings};
use crate::core::feedback::BeepPattern;
use crate::core::monitor::MonitorSettings;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/logshuttle/config.toml";
const ENV_PREFIX: &str = "LOGSHUTTLE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device_name: String,
    pub serial_number: String,
    pub source_dir: PathBuf,
    pub file_pattern: String,
    pub media_root: PathBuf,
    pub max_devices: usize,
    pub chunk_size: usize,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub monitor: MonitorConfig,
    pub mount: MountConfig,
    pub export: ExportConfig,
    pub feedback: FeedbackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub scan_interval_ms: u64,
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub unmount_settle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub post_copy_settle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub enabled: bool,
    pub gpio_pin: u32,
    pub sysfs_root: String,
    pub on_ms: u64,
    pub off_ms: u64,
    pub cycles: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_name: "NI00002".to_string(),
            serial_number: "000000".to_string(),
            source_dir: PathBuf::from("/home/nova"),
            file_pattern: "NI*.txt".to_string(),
            media_root: PathBuf::from("/media"),
            max_devices: 5,
            chunk_size: 8192,
            simulation: false,
            verbose: false,
            json_logs: false,
            monitor: MonitorConfig::default(),
            mount: MountConfig::default(),
            export: ExportConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            scan_interval_ms: 3000,
            settle_delay_ms: 2000,
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            unmount_settle_ms: 100,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            post_copy_settle_ms: 500,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gpio_pin: 18,
            sysfs_root: crate::adapters::gpio::DEFAULT_SYSFS_ROOT.to_string(),
            on_ms: 200,
            off_ms: 200,
            cycles: 3,
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file (if present), then `LOGSHUTTLE_*`
    /// environment variables, then CLI overrides.
    pub fn new<T: Serialize>(config_file: Option<&Path>, overrides: Option<&T>) -> Result<Self, figment::Error> {
        let path = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment.extract()
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            identity: ExportIdentity::new(&self.device_name, &self.serial_number),
            file_pattern: self.file_pattern.clone(),
            media_root: self.media_root.clone(),
            max_devices: self.max_devices,
            chunk_size: self.chunk_size,
            post_copy_settle: Duration::from_millis(self.export.post_copy_settle_ms),
            unmount_settle: Duration::from_millis(self.mount.unmount_settle_ms),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(self.monitor.poll_interval_ms),
            scan_interval: Duration::from_millis(self.monitor.scan_interval_ms),
            settle_delay: Duration::from_millis(self.monitor.settle_delay_ms),
        }
    }

    pub fn beep_pattern(&self) -> BeepPattern {
        BeepPattern {
            cycles: self.feedback.cycles,
            on: Duration::from_millis(self.feedback.on_ms),
            off: Duration::from_millis(self.feedback.off_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        source_dir: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        simulation: Option<bool>,
    }

    #[test]
    fn defaults_without_any_source() {
        Jail::expect_with(|jail| {
            let missing = jail.directory().join("missing.toml");
            let config = AppConfig::new(Some(&missing), None::<&Overrides>)?;
            assert_eq!(config, AppConfig::default());
            assert_eq!(config.file_pattern, "NI*.txt");
            assert_eq!(config.monitor.scan_interval_ms, 3000);
            Ok(())
        });
    }

    #[test]
    fn layers_file_env_and_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                    device_name = "NI00007"
                    media_root = "/mnt"

                    [feedback]
                    gpio_pin = 23
                "#,
            )?;
            jail.set_env("LOGSHUTTLE_SERIAL_NUMBER", "424242");
            jail.set_env("LOGSHUTTLE_MONITOR__SETTLE_DELAY_MS", "0");

            let overrides = Overrides {
                source_dir: Some(PathBuf::from("/data")),
                simulation: None,
            };
            let path = jail.directory().join("config.toml");
            let config = AppConfig::new(Some(&path), Some(&overrides))?;

            assert_eq!(config.device_name, "NI00007");
            assert_eq!(config.serial_number, "424242");
            assert_eq!(config.media_root, PathBuf::from("/mnt"));
            assert_eq!(config.source_dir, PathBuf::from("/data"));
            assert_eq!(config.feedback.gpio_pin, 23);
            assert_eq!(config.feedback.cycles, 3);
            assert_eq!(config.monitor.settle_delay_ms, 0);
            assert!(!config.simulation);
            Ok(())
        });
    }

    #[test]
    fn settings_conversion() {
        let config = AppConfig::default();
        let export = config.export_settings();
        assert_eq!(export.identity.device_name, "NI00002");
        assert_eq!(export.post_copy_settle, Duration::from_millis(500));
        assert_eq!(config.monitor_settings().poll_interval, Duration::from_secs(1));
        assert_eq!(config.beep_pattern(), BeepPattern::default());
    }
}
