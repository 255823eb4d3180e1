//! Android bridge
//!
//! Inspectable WebViews are found by scraping three shell commands and
//! joining them:
//!
//! ```text
//! ps                         → pid → process (package) name
//! cat /proc/net/unix         → listening abstract sockets (*_devtools_remote*)
//! dumpsys package packages   → package → versionName
//! ```
//!
//! A socket is reached through `adb forward tcp:<port> localabstract:<socket>`
//! and then speaks the client protocol natively.

pub mod adb;
pub mod forward;
pub mod parse;
pub mod webviews;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::AndroidConfig;
use crate::devices::DeviceLister;
use crate::error::Result;
use crate::model::{Device, DeviceType, Platform, Target};
use crate::tracked::{TrackedEvent, TrackedMap};
use crate::tracker::Tracker;

pub use adb::{AdbClient, AdbCommand};
pub use forward::{ForwardedSocket, PortForwarder, UnforwardReport};
pub use parse::{PackageEntry, ProcessEntry};
pub use webviews::{classify_socket, PageListing, WebView, WebViewSource, WebViewType};

const PS_COMMAND: &str = "ps";
const SOCKETS_COMMAND: &str = "cat /proc/net/unix";
const PACKAGES_COMMAND: &str = "dumpsys package packages";
const OS_VERSION_COMMAND: &str = "getprop ro.build.version.release";

pub struct AndroidBridge<A: AdbClient = AdbCommand> {
    adb: Arc<A>,
    forwarder: PortForwarder<A>,
    http: reqwest::Client,
    poll_interval: Duration,
}

impl AndroidBridge<AdbCommand> {
    /// Bridge over the real adb binary
    pub fn from_config(config: &AndroidConfig) -> Result<Self> {
        let adb = AdbCommand::locate(config.adb_path.as_deref(), config.command_timeout())?;
        Ok(Self::new(Arc::new(adb), config))
    }
}

impl<A: AdbClient> AndroidBridge<A> {
    pub fn new(adb: Arc<A>, config: &AndroidConfig) -> Self {
        Self {
            forwarder: PortForwarder::new(adb.clone(), config.port_range()),
            http: reqwest::Client::builder()
                .timeout(config.command_timeout())
                .build()
                .unwrap_or_default(),
            poll_interval: config.poll_interval(),
            adb,
        }
    }

    pub fn forwarder(&self) -> &PortForwarder<A> {
        &self.forwarder
    }

    /// Tracker over the webviews of `device_id`, polling at the configured
    /// Android interval
    pub fn webview_tracker(self: &Arc<Self>, device_id: &str) -> Tracker<WebViewSource<A>> {
        Tracker::new(WebViewSource::new(self.clone(), device_id), self.poll_interval)
    }

    /// Every debuggable socket on the device, classified
    pub async fn find_webviews(&self, device_id: &str) -> Result<Vec<WebView>> {
        let (processes, sockets, packages) = futures_util::future::join3(
            self.adb.shell(device_id, PS_COMMAND),
            self.adb.shell(device_id, SOCKETS_COMMAND),
            self.adb.shell(device_id, PACKAGES_COMMAND),
        )
        .await;

        let processes = parse::parse_processes(&processes?);
        let sockets = parse::parse_sockets(&sockets?);
        // Packages only feed version lookups; losing them must not lose webviews
        let packages = match packages {
            Ok(output) => parse::parse_packages(&output),
            Err(e) => {
                tracing::warn!("[AndroidBridge] Package listing failed on {}: {}", device_id, e);
                Vec::new()
            }
        };

        Ok(webviews::join_webviews(
            device_id,
            sockets,
            &processes,
            &packages,
        ))
    }

    /// Forward a local TCP port to `socket`, reusing an existing forward
    pub async fn forward_debugger(
        &self,
        device_id: &str,
        socket: &str,
        preferred_port: Option<u16>,
    ) -> Result<u16> {
        self.forwarder
            .forward_debugger(device_id, socket, preferred_port)
            .await
    }

    pub async fn unforward_all_debuggers(&self) -> UnforwardReport {
        self.forwarder.unforward_all_debuggers().await
    }

    pub async fn unforward_debuggers_for_device(&self, device_id: &str) -> UnforwardReport {
        self.forwarder.unforward_debuggers_for_device(device_id).await
    }

    /// Pages exposed by one webview, read from its `/json/list`
    pub async fn list_pages(&self, webview: &WebView) -> Result<Vec<Target>> {
        let port = self
            .forward_debugger(&webview.device_id, &webview.socket, None)
            .await?;
        let pages: Vec<PageListing> = self
            .http
            .get(format!("http://127.0.0.1:{}/json/list", port))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(webviews::listing_to_targets(webview, pages))
    }

    /// Tear down forwards of devices as they disappear from `devices`
    pub fn watch_device_removals(self: Arc<Self>, devices: &TrackedMap<Device>) -> JoinHandle<()> {
        let mut rx = devices.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(TrackedEvent::Removed(device)) if device.platform == Platform::Android => {
                        let report = self.unforward_debuggers_for_device(&device.id).await;
                        tracing::debug!(
                            "[AndroidBridge] Device {} gone, removed {} forwards ({} ignored)",
                            device.id,
                            report.removed.len(),
                            report.ignored.len()
                        );
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("[AndroidBridge] Missed {} device events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn os_version(&self, serial: &str) -> Option<String> {
        match self.adb.shell(serial, OS_VERSION_COMMAND).await {
            Ok(output) => Some(output.trim().to_string()).filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::debug!("[AndroidBridge] getprop failed on {}: {}", serial, e);
                None
            }
        }
    }
}

#[async_trait]
impl<A: AdbClient> DeviceLister for AndroidBridge<A> {
    fn platform_name(&self) -> &str {
        "android"
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let entries = parse::parse_devices(&self.adb.devices().await?);

        let mut devices = Vec::with_capacity(entries.len());
        for entry in entries {
            let online = entry.state == "device";
            let os_version = if online {
                self.os_version(&entry.serial).await
            } else {
                None
            };
            let name = entry
                .properties
                .get("model")
                .map(|model| model.replace('_', " "))
                .unwrap_or_else(|| entry.serial.clone());
            let device_type = if entry.serial.starts_with("emulator-") {
                DeviceType::Simulator
            } else {
                DeviceType::Physical
            };

            devices.push(Device {
                id: entry.serial,
                name,
                platform: Platform::Android,
                os_version,
                paired: entry.state != "unauthorized",
                locked: !online,
                device_type,
            });
        }
        Ok(devices)
    }
}
