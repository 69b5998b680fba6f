//! Kernel driver conflict detection
//!
//! Some platforms ship a serial driver for Garmin units that grabs the device
//! as soon as it is plugged in. While it is loaded the protocol engine cannot
//! use the device, so opening is refused before the bus is touched.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing::debug;

/// Capability check run before any USB access
pub trait KernelDriverCheck {
    /// Name of a loaded driver that would own the device, if any
    fn conflicting_driver(&self) -> Option<String>;
}

/// Platforms without a conflicting driver
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConflict;

impl KernelDriverCheck for NoConflict {
    fn conflicting_driver(&self) -> Option<String> {
        None
    }
}

/// Scans a Linux style module list (`/proc/modules`) for a driver name
#[derive(Debug, Clone)]
pub struct ProcModules {
    path: PathBuf,
    module: String,
}

impl ProcModules {
    pub const DEFAULT_PATH: &'static str = "/proc/modules";

    pub fn new(module: impl Into<String>) -> Self {
        Self::at(Self::DEFAULT_PATH, module)
    }

    /// Read the module list from `path` instead of the live one
    pub fn at(path: impl Into<PathBuf>, module: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            module: module.into(),
        }
    }
}

impl KernelDriverCheck for ProcModules {
    fn conflicting_driver(&self) -> Option<String> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                debug!("Cannot read {}: {}", self.path.display(), e);
                return None;
            }
        };

        module_listed(BufReader::new(file), &self.module).then(|| self.module.clone())
    }
}

/// True if any line of the module list mentions `module`
fn module_listed<R: BufRead>(reader: R, module: &str) -> bool {
    reader
        .lines()
        .map_while(Result::ok)
        .any(|line| line.contains(module))
}

/// The check appropriate for the platform this binary was built for
pub fn platform_check(module: &str) -> Box<dyn KernelDriverCheck> {
    if cfg!(target_os = "linux") {
        Box::new(ProcModules::new(module))
    } else {
        Box::new(NoConflict)
    }
}
