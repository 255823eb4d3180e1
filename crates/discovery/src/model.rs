//! Inventory types - devices, apps and inspectable targets
//!
//! These are values, not handles. A poll produces a fresh set and the
//! tracked map diffs it against the previous one; nobody mutates an entry
//! in place.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tracked::Tracked;

/// Device identifier (UDID on iOS, adb serial on Android)
pub type DeviceId = String;

/// Application identifier as reported by the device
pub type AppId = String;

/// Composite target identifier: `device|app|page`
pub type TargetId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Physical,
    /// iOS simulator or Android emulator
    Simulator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub platform: Platform,
    pub os_version: Option<String>,
    pub paired: bool,
    pub locked: bool,
    pub device_type: DeviceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: AppId,
    /// Bundle identifier (iOS) or package name (Android)
    pub bundle_id: String,
    pub name: String,
    /// Set for proxied apps (e.g. WKWebView content hosted by another process)
    pub host_app_id: Option<AppId>,
    pub is_active: bool,
    pub is_proxy: bool,
    pub device_id: DeviceId,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Web,
    Page,
    JavaScript,
    ServiceWorker,
    Automation,
    Itml,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: TargetId,
    pub page_id: u64,
    pub app_id: AppId,
    pub device_id: DeviceId,
    pub title: String,
    pub url: String,
    pub target_type: TargetType,
    pub debuggable: bool,
    /// WebSocket endpoint when the target speaks the client protocol natively
    pub web_socket_debugger_url: Option<String>,
}

impl Target {
    pub fn composite_id(device_id: &str, app_id: &str, page: impl fmt::Display) -> TargetId {
        format!("{}|{}|{}", device_id, app_id, page)
    }
}

impl Tracked for Device {
    type Id = DeviceId;

    fn tracking_id(&self) -> DeviceId {
        self.id.clone()
    }
}

impl Tracked for App {
    type Id = AppId;

    fn tracking_id(&self) -> AppId {
        self.id.clone()
    }
}

impl Tracked for Target {
    type Id = TargetId;

    fn tracking_id(&self) -> TargetId {
        self.id.clone()
    }
}
