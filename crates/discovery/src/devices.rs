//! Device discovery - merges per-platform device listers into one snapshot

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::model::Device;
use crate::tracker::SnapshotSource;

/// One platform's view of attached devices.
///
/// Android is served by `AndroidBridge`; iOS devices come from the USB
/// multiplexing daemon client, which implements this trait outside the crate.
#[async_trait]
pub trait DeviceLister: Send + Sync {
    fn platform_name(&self) -> &str;

    async fn list_devices(&self) -> Result<Vec<Device>>;
}

/// Snapshot source over every registered lister.
///
/// A lister whose tooling is missing contributes nothing. Any other lister
/// error fails the whole pass, so the previous snapshot stays in place rather
/// than reporting every device of that platform as removed.
pub struct DeviceSource {
    listers: Vec<Arc<dyn DeviceLister>>,
}

impl DeviceSource {
    pub fn new(listers: Vec<Arc<dyn DeviceLister>>) -> Self {
        Self { listers }
    }
}

#[async_trait]
impl SnapshotSource for DeviceSource {
    type Item = Device;

    fn name(&self) -> &str {
        "devices"
    }

    async fn snapshot(&self) -> Result<Vec<Device>> {
        let results =
            futures_util::future::join_all(self.listers.iter().map(|l| l.list_devices())).await;

        let mut devices = Vec::new();
        for (lister, result) in self.listers.iter().zip(results) {
            match result {
                Ok(found) => devices.extend(found),
                Err(e) if e.is_tool_not_found() => {
                    tracing::trace!("[DeviceSource] {} unavailable: {}", lister.platform_name(), e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(devices)
    }
}
