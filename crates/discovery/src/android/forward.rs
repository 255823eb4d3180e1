//! Debugger port forwarding
//!
//! Invariant: at most one forward per (device, remote socket). Asking again
//! returns the recorded local port and does not touch adb.
//!
//! Teardown is best-effort. A failed `forward --remove` is recorded in the
//! returned `UnforwardReport` and logged; it never aborts the rest.

use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use super::adb::AdbClient;
use crate::error::{DiscoveryError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedSocket {
    pub device_id: String,
    pub local_port: u16,
    /// Abstract socket name on the device (no `@`)
    pub remote: String,
}

impl ForwardedSocket {
    pub fn local_spec(&self) -> String {
        format!("tcp:{}", self.local_port)
    }

    pub fn remote_spec(&self) -> String {
        format!("localabstract:{}", self.remote)
    }
}

/// Outcome of a teardown pass
#[derive(Debug, Default)]
pub struct UnforwardReport {
    pub removed: Vec<ForwardedSocket>,
    /// Forwards whose removal failed; they are forgotten anyway
    pub ignored: Vec<(ForwardedSocket, DiscoveryError)>,
}

impl UnforwardReport {
    pub fn is_clean(&self) -> bool {
        self.ignored.is_empty()
    }
}

pub struct PortForwarder<A: AdbClient> {
    adb: Arc<A>,
    port_range: RangeInclusive<u16>,
    // Held across the adb call so concurrent requests for the same socket
    // cannot both create a forward
    forwards: Mutex<Vec<ForwardedSocket>>,
}

impl<A: AdbClient> PortForwarder<A> {
    pub fn new(adb: Arc<A>, port_range: RangeInclusive<u16>) -> Self {
        Self {
            adb,
            port_range,
            forwards: Mutex::new(Vec::new()),
        }
    }

    pub async fn forward_debugger(
        &self,
        device_id: &str,
        remote: &str,
        preferred_port: Option<u16>,
    ) -> Result<u16> {
        let mut forwards = self.forwards.lock().await;

        if let Some(existing) = forwards
            .iter()
            .find(|f| f.device_id == device_id && f.remote == remote)
        {
            return Ok(existing.local_port);
        }

        let local_port = self.allocate_port(&forwards, preferred_port).await?;
        let forward = ForwardedSocket {
            device_id: device_id.to_string(),
            local_port,
            remote: remote.to_string(),
        };

        self.adb
            .forward(device_id, &forward.local_spec(), &forward.remote_spec())
            .await?;

        tracing::info!(
            "[PortForwarder] {} {} -> {}",
            device_id,
            forward.local_spec(),
            forward.remote_spec()
        );
        forwards.push(forward);
        Ok(local_port)
    }

    pub async fn unforward_debuggers_for_device(&self, device_id: &str) -> UnforwardReport {
        let targets: Vec<ForwardedSocket> = {
            let mut forwards = self.forwards.lock().await;
            let (matching, rest) = forwards
                .drain(..)
                .partition(|f: &ForwardedSocket| f.device_id == device_id);
            *forwards = rest;
            matching
        };
        self.remove_all(targets).await
    }

    pub async fn unforward_all_debuggers(&self) -> UnforwardReport {
        let targets = std::mem::take(&mut *self.forwards.lock().await);
        self.remove_all(targets).await
    }

    pub async fn forwarded(&self) -> Vec<ForwardedSocket> {
        self.forwards.lock().await.clone()
    }

    async fn remove_all(&self, targets: Vec<ForwardedSocket>) -> UnforwardReport {
        let mut report = UnforwardReport::default();
        for forward in targets {
            match self
                .adb
                .remove_forward(&forward.device_id, &forward.local_spec())
                .await
            {
                Ok(()) => report.removed.push(forward),
                Err(e) => {
                    tracing::warn!(
                        "[PortForwarder] Ignoring failed unforward of {} on {}: {}",
                        forward.local_spec(),
                        forward.device_id,
                        e
                    );
                    report.ignored.push((forward, e));
                }
            }
        }
        report
    }

    async fn allocate_port(
        &self,
        forwards: &[ForwardedSocket],
        preferred: Option<u16>,
    ) -> Result<u16> {
        let in_use = |port: u16| forwards.iter().any(|f| f.local_port == port);

        let candidates = preferred.into_iter().chain(self.port_range.clone());
        for port in candidates {
            if in_use(port) {
                continue;
            }
            if is_port_free(port).await {
                return Ok(port);
            }
        }

        Err(DiscoveryError::NoFreePort {
            start: *self.port_range.start(),
            end: *self.port_range.end(),
        })
    }
}

async fn is_port_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).await.is_ok()
}
