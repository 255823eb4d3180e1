//! Bridge configuration
//!
//! Every field has a default; a config file only needs the keys it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use discovery::AndroidConfig;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Session identifier, used in log lines
    pub id: String,

    /// Deadline for adapter-originated requests
    pub request_timeout_ms: u64,

    /// First adapter request id. Clients number from 1, so starting far
    /// above keeps the two id spaces apart.
    pub adapter_id_base: u64,

    /// Force target-based RPC mode on or off. `None` detects it from the
    /// first `Target.targetCreated`.
    pub target_based: Option<bool>,

    /// App and page discovery poll interval
    pub discovery_interval_ms: u64,

    /// Delay between screencast frames
    pub screencast_interval_ms: u64,

    pub android: AndroidConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            request_timeout_ms: 1000,
            adapter_id_base: 100_000_000,
            target_based: None,
            discovery_interval_ms: 1000,
            screencast_interval_ms: 100,
            android: AndroidConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&text)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn screencast_interval(&self) -> Duration {
        Duration::from_millis(self.screencast_interval_ms)
    }
}
