use crate::core::feedback::SignalLine;
use crate::core::hardware::HardwareAdapter;

pub mod gpio;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod simulated;

pub use gpio::SysfsGpioLine;
#[cfg(target_os = "linux")]
pub use linux::LinuxAdapter;
pub use simulated::{SimulatedAdapter, SimulatedLine, Simulator};

/// Pick the hardware adapter. In simulation mode, stdin drives the fake
/// devices: `add <name> [fs] [size_gb]`, `rm <name>`, `busy on|off`.
pub fn get_adapter(simulation: bool) -> Box<dyn HardwareAdapter> {
    #[cfg(target_os = "linux")]
    {
        if !simulation {
            return Box::new(linux::LinuxAdapter::new());
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = simulation;

    let (adapter, controller) = simulated::SimulatedAdapter::new();

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lines().map_while(Result::ok) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.first().copied() {
                Some("add") => {
                    let name = parts.get(1).copied().unwrap_or("sda1");
                    let fs = parts.get(2).copied().unwrap_or("vfat");
                    let size_gb = parts.get(3).and_then(|s| s.parse().ok()).unwrap_or(8);
                    controller.add_device(name, fs, size_gb);
                }
                Some("rm") => controller.remove_device(parts.get(1).copied().unwrap_or("sda1")),
                Some("busy") => controller.set_busy(parts.get(1).copied() == Some("on")),
                _ => println!("(Simulator) Use: 'add <name> [fs] [size_gb]', 'rm <name>' or 'busy on|off'"),
            }
        }
    });

    Box::new(adapter)
}

/// Pick the feedback line: the sysfs GPIO pin, or a recording fake.
pub fn get_signal_line(simulation: bool, sysfs_root: &str, pin: u32) -> Box<dyn SignalLine> {
    if simulation {
        Box::new(SimulatedLine::new())
    } else {
        Box::new(SysfsGpioLine::new(sysfs_root, pin))
    }
}
