//! Buzzer output through the sysfs GPIO interface.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::core::feedback::SignalLine;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// udev needs a moment to apply permissions on a freshly exported pin.
const EXPORT_SETTLE: Duration = Duration::from_millis(50);

pub struct SysfsGpioLine {
    root: PathBuf,
    pin: u32,
    exported_here: bool,
}

impl SysfsGpioLine {
    pub fn new(root: impl Into<PathBuf>, pin: u32) -> Self {
        Self {
            root: root.into(),
            pin,
            exported_here: false,
        }
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }
}

impl SignalLine for SysfsGpioLine {
    fn open(&mut self) -> io::Result<()> {
        if !self.pin_dir().exists() {
            match fs::write(self.root.join("export"), self.pin.to_string()) {
                Ok(()) => {
                    self.exported_here = true;
                    thread::sleep(EXPORT_SETTLE);
                }
                // Already exported by someone else.
                Err(e) if e.kind() == ErrorKind::ResourceBusy => {}
                Err(e) => return Err(e),
            }
        }
        fs::write(self.pin_dir().join("direction"), "out")?;
        debug!(pin = self.pin, "GPIO configured as output");
        Ok(())
    }

    fn set_level(&self, high: bool) -> io::Result<()> {
        fs::write(self.pin_dir().join("value"), if high { "1" } else { "0" })
    }

    fn close(&mut self) -> io::Result<()> {
        if self.exported_here {
            fs::write(self.root.join("unexport"), self.pin.to_string())?;
            self.exported_here = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn drives_value_file_of_existing_pin() {
        let temp = tempdir().unwrap();
        let pin_dir = temp.path().join("gpio18");
        fs::create_dir(&pin_dir).unwrap();

        let mut line = SysfsGpioLine::new(temp.path(), 18);
        line.open().unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("direction")).unwrap(), "out");

        line.set_level(true).unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("value")).unwrap(), "1");
        line.set_level(false).unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("value")).unwrap(), "0");

        line.close().unwrap();
        assert!(!temp.path().join("unexport").exists());
    }

    #[test]
    fn open_fails_when_pin_cannot_be_exported() {
        let temp = tempdir().unwrap();
        let mut line = SysfsGpioLine::new(temp.path().join("missing"), 18);
        assert!(line.open().is_err());
    }
}
