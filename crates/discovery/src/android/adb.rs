//! adb access
//!
//! Everything the Android bridge needs from adb goes through `AdbClient`, so
//! parsing and forwarding logic can be exercised without a device.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::error::{DiscoveryError, Result};

#[async_trait]
pub trait AdbClient: Send + Sync + 'static {
    /// Raw `adb devices -l` output
    async fn devices(&self) -> Result<String>;

    /// Raw stdout of `adb -s <serial> shell <command>`
    async fn shell(&self, serial: &str, command: &str) -> Result<String>;

    /// `adb -s <serial> forward <local> <remote>`
    async fn forward(&self, serial: &str, local: &str, remote: &str) -> Result<()>;

    /// `adb -s <serial> forward --remove <local>`
    async fn remove_forward(&self, serial: &str, local: &str) -> Result<()>;
}

/// `AdbClient` backed by the adb binary
#[derive(Debug, Clone)]
pub struct AdbCommand {
    program: PathBuf,
    timeout: Duration,
}

impl AdbCommand {
    /// Resolve the adb binary, either the explicit path or the one on PATH
    pub fn locate(explicit: Option<&Path>, timeout: Duration) -> Result<Self> {
        let program = match explicit {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => {
                return Err(DiscoveryError::ToolNotFound {
                    tool: "adb".to_string(),
                    searched: Some(path.to_path_buf()),
                })
            }
            None => which::which("adb").map_err(|_| DiscoveryError::ToolNotFound {
                tool: "adb".to_string(),
                searched: None,
            })?,
        };
        tracing::debug!("[AdbCommand] Using adb at {}", program.display());
        Ok(Self { program, timeout })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let command_line = format!("adb {}", args.join(" "));
        tracing::trace!("[AdbCommand] {}", command_line);

        let output = match tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DiscoveryError::ToolNotFound {
                    tool: "adb".to_string(),
                    searched: Some(self.program.clone()),
                })
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(DiscoveryError::CommandTimeout {
                    command: command_line,
                })
            }
        };

        if !output.status.success() {
            return Err(DiscoveryError::CommandFailed {
                command: command_line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl AdbClient for AdbCommand {
    async fn devices(&self) -> Result<String> {
        self.run(&["devices", "-l"]).await
    }

    async fn shell(&self, serial: &str, command: &str) -> Result<String> {
        self.run(&["-s", serial, "shell", command]).await
    }

    async fn forward(&self, serial: &str, local: &str, remote: &str) -> Result<()> {
        self.run(&["-s", serial, "forward", local, remote]).await?;
        Ok(())
    }

    async fn remove_forward(&self, serial: &str, local: &str) -> Result<()> {
        self.run(&["-s", serial, "forward", "--remove", local])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted adb for unit tests

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MockAdb {
        pub devices_output: Mutex<String>,
        /// (serial, command) -> stdout
        pub shell_outputs: Mutex<HashMap<(String, String), String>>,
        pub forwards: Mutex<Vec<(String, String, String)>>,
        pub removed: Mutex<Vec<(String, String)>>,
        /// Locals whose removal fails
        pub failing_removals: Mutex<Vec<String>>,
    }

    impl MockAdb {
        pub fn set_shell(&self, serial: &str, command: &str, output: &str) {
            self.shell_outputs
                .lock()
                .insert((serial.to_string(), command.to_string()), output.to_string());
        }
    }

    #[async_trait]
    impl AdbClient for MockAdb {
        async fn devices(&self) -> Result<String> {
            Ok(self.devices_output.lock().clone())
        }

        async fn shell(&self, serial: &str, command: &str) -> Result<String> {
            self.shell_outputs
                .lock()
                .get(&(serial.to_string(), command.to_string()))
                .cloned()
                .ok_or_else(|| DiscoveryError::CommandFailed {
                    command: command.to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "not scripted".to_string(),
                })
        }

        async fn forward(&self, serial: &str, local: &str, remote: &str) -> Result<()> {
            self.forwards
                .lock()
                .push((serial.to_string(), local.to_string(), remote.to_string()));
            Ok(())
        }

        async fn remove_forward(&self, serial: &str, local: &str) -> Result<()> {
            if self.failing_removals.lock().iter().any(|l| l == local) {
                return Err(DiscoveryError::CommandFailed {
                    command: format!("forward --remove {}", local),
                    status: "exit status: 1".to_string(),
                    stderr: "listener not found".to_string(),
                });
            }
            self.removed
                .lock()
                .push((serial.to_string(), local.to_string()));
            Ok(())
        }
    }
}
