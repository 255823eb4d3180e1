//! Parsers for adb shell output
//!
//! These encode the fixed column layout of the real commands. Lines that do
//! not reach the minimum column count (headers, blank lines, truncated rows)
//! are skipped, never treated as errors.

use lazy_regex::regex_captures;
use std::collections::HashMap;

/// Row of `ps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

/// Installed package from `dumpsys package packages`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub package_name: String,
    pub version_name: Option<String>,
}

/// Row of `adb devices -l`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDeviceEntry {
    pub serial: String,
    pub state: String,
    pub properties: HashMap<String, String>,
}

/// `USER PID PPID VSZ RSS WCHAN ADDR S NAME`
pub fn parse_processes(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 9 {
                return None;
            }
            let pid = columns[1].parse().ok()?;
            Some(ProcessEntry {
                pid,
                name: columns[8].to_string(),
            })
        })
        .collect()
}

/// `/proc/net/unix`: `Num RefCount Protocol Flags Type St Inode Path`
///
/// Keeps listening (`Flags == 00010000`), connected-state (`St == 01`)
/// abstract sockets and returns their names without the leading `@`.
pub fn parse_sockets(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 8 {
                return None;
            }
            if columns[3] != "00010000" || columns[5] != "01" {
                return None;
            }
            columns[7].strip_prefix('@').map(str::to_string)
        })
        .collect()
}

pub fn parse_packages(output: &str) -> Vec<PackageEntry> {
    let mut packages: Vec<PackageEntry> = Vec::new();
    for line in output.lines() {
        if let Some((_, name)) = regex_captures!(r"^\s*Package\s+\[(.+?)\]", line) {
            packages.push(PackageEntry {
                package_name: name.to_string(),
                version_name: None,
            });
            continue;
        }
        if let Some((_, version)) = regex_captures!(r"^\s*versionName=(.+?)\s*$", line) {
            // versionName belongs to the most recent Package header
            if let Some(current) = packages.last_mut() {
                if current.version_name.is_none() {
                    current.version_name = Some(version.to_string());
                }
            }
        }
    }
    packages
}

/// `adb devices -l`:
/// `emulator-5554 device product:sdk model:Pixel_5 device:generic transport_id:1`
pub fn parse_devices(output: &str) -> Vec<AdbDeviceEntry> {
    output
        .lines()
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let serial = columns.next()?;
            let state = columns.next()?;
            let properties = columns
                .filter_map(|kv| kv.split_once(':'))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Some(AdbDeviceEntry {
                serial: serial.to_string(),
                state: state.to_string(),
                properties,
            })
        })
        .collect()
}
