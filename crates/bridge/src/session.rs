//! Bridge Session - one client attached to one target
//!
//! ```text
//! client stream ──► (task per request) ──► adapter ──► to_target ──► target sink
//! target stream ──► resolve adapter replies ──┐
//!                   ordered worker ◄──────────┘ ──► to_client ──► client sink
//! ```
//!
//! Client requests are independent and may be translated concurrently.
//! Target traffic is processed strictly in arrival order, except replies to
//! the adapter's own requests, which are resolved on the spot so a
//! translator waiting on one never blocks the worker.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::adapter::{AdapterOutputs, ProtocolAdapter};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::events::{EventBus, SessionEvent, StopReason};
use crate::protocol::Message;
use crate::translators;

pub struct BridgeSession {
    config: BridgeConfig,
    adapter: Arc<ProtocolAdapter>,
    outputs: AdapterOutputs,
    events: EventBus,
}

impl BridgeSession {
    /// Adapter with every domain translator installed
    pub fn new(config: BridgeConfig) -> Self {
        let (adapter, outputs) = ProtocolAdapter::new(&config);
        translators::register_all(&adapter, &config);
        Self {
            config,
            adapter,
            outputs,
            events: EventBus::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<ProtocolAdapter> {
        &self.adapter
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Pump both sides until either closes, then reject whatever the
    /// adapter still waits for.
    pub async fn run<CS, CK, TS, TK>(
        self,
        mut client_stream: CS,
        mut client_sink: CK,
        mut target_stream: TS,
        mut target_sink: TK,
    ) -> StopReason
    where
        CS: Stream<Item = Message> + Unpin,
        CK: Sink<Message, Error = BridgeError> + Unpin,
        TS: Stream<Item = Message> + Unpin,
        TK: Sink<Message, Error = BridgeError> + Unpin,
    {
        let BridgeSession {
            config,
            adapter,
            outputs,
            events,
        } = self;
        let AdapterOutputs {
            mut to_target,
            mut to_client,
        } = outputs;
        let session_id = config.id;

        events.publish(SessionEvent::Started {
            session_id: session_id.clone(),
        });
        tracing::info!("[BridgeSession {}] Started", session_id);

        let (work_tx, mut work_rx) = mpsc::unbounded_channel::<Message>();
        let worker = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                while let Some(msg) = work_rx.recv().await {
                    adapter.on_target_message(msg).await;
                }
            })
        };

        let reason = tokio::select! {
            _ = async {
                while let Some(msg) = client_stream.next().await {
                    match msg {
                        Message::Request(request) => {
                            let adapter = adapter.clone();
                            tokio::spawn(async move { adapter.on_client_message(request).await });
                        }
                        other => tracing::warn!(
                            "[BridgeSession {}] Ignoring non-request from client ({:?})",
                            session_id,
                            other.method()
                        ),
                    }
                }
            } => StopReason::ClientClosed,
            _ = async {
                while let Some(msg) = target_stream.next().await {
                    if let Some(msg) = adapter.try_resolve_adapter_request(msg) {
                        let _ = work_tx.send(msg);
                    }
                }
            } => StopReason::TargetClosed,
            _ = async {
                while let Some(msg) = to_client.recv().await {
                    if let Err(e) = client_sink.send(msg).await {
                        tracing::warn!("[BridgeSession {}] Client write failed: {}", session_id, e);
                        break;
                    }
                }
            } => StopReason::ClientSinkFailed,
            _ = async {
                while let Some(msg) = to_target.recv().await {
                    if let Err(e) = target_sink.send(msg).await {
                        tracing::warn!("[BridgeSession {}] Target write failed: {}", session_id, e);
                        break;
                    }
                }
            } => StopReason::TargetSinkFailed,
        };

        worker.abort();
        adapter.shutdown();
        let _ = client_sink.close().await;
        let _ = target_sink.close().await;

        tracing::info!("[BridgeSession {}] Stopped: {:?}", session_id, reason);
        events.publish(SessionEvent::Stopped {
            session_id,
            reason,
        });
        reason
    }
}
