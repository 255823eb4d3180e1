//! Discovery configuration

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidConfig {
    /// Explicit adb binary; `None` searches PATH
    pub adb_path: Option<PathBuf>,
    /// Local ports handed out for debugger forwards
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub poll_interval_ms: u64,
    pub command_timeout_ms: u64,
}

impl AndroidConfig {
    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for AndroidConfig {
    fn default() -> Self {
        Self {
            adb_path: None,
            port_range_start: 4000,
            port_range_end: 5000,
            poll_interval_ms: 1000,
            command_timeout_ms: 10_000,
        }
    }
}
