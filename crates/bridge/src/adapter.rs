//! Protocol Adapter - the per-session translation hub
//!
//! Design decisions:
//! 1. Two correlation maps. Client requests are remembered by id so their
//!    replies can be routed through the right pipeline; adapter requests
//!    (`make_request`) live in a `RequestMap` and never reach the client.
//! 2. Output is two unbounded channels. Whoever owns the transports drains
//!    them; delivery order is send order.
//! 3. Filter pipelines run stages in registration order. A failing or
//!    panicking stage drops the message, never the session.
//! 4. Translators get `&ProtocolAdapter` per call and hold no reference
//!    back to it.

use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::BridgeConfig;
use crate::correlation::RequestMap;
use crate::error::{BridgeError, Result};
use crate::filter::{FilterKey, MessageFilter};
use crate::protocol::{CDPRequest, CDPResponse, Message, RequestId};

/// Receiving ends of the adapter's two outputs
pub struct AdapterOutputs {
    pub to_target: mpsc::UnboundedReceiver<Message>,
    pub to_client: mpsc::UnboundedReceiver<Message>,
}

/// What the adapter remembers about an in-flight client request
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub method: String,
    pub params: Option<Value>,
}

pub struct ProtocolAdapter {
    session_id: String,
    request_timeout: Duration,

    /// Key: client request id
    client_requests: DashMap<RequestId, ClientRequest>,

    /// Requests issued by translators
    adapter_requests: RequestMap<Value>,

    filters: RwLock<HashMap<FilterKey, Vec<Arc<dyn MessageFilter>>>>,

    to_target: mpsc::UnboundedSender<Message>,
    to_client: mpsc::UnboundedSender<Message>,
}

impl ProtocolAdapter {
    pub fn new(config: &BridgeConfig) -> (Arc<Self>, AdapterOutputs) {
        let (to_target, target_rx) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();

        let adapter = Arc::new(Self {
            session_id: config.id.clone(),
            request_timeout: config.request_timeout(),
            client_requests: DashMap::new(),
            adapter_requests: RequestMap::new(config.adapter_id_base),
            filters: RwLock::new(HashMap::new()),
            to_target,
            to_client,
        });

        let outputs = AdapterOutputs {
            to_target: target_rx,
            to_client: client_rx,
        };
        (adapter, outputs)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append `filter` to the pipeline for `key`. Registering the same
    /// instance twice for one key is a no-op.
    pub fn add_filter(&self, key: FilterKey, filter: Arc<dyn MessageFilter>) {
        let mut filters = self.filters.write();
        let pipeline = filters.entry(key).or_default();
        if pipeline.iter().any(|existing| Arc::ptr_eq(existing, &filter)) {
            return;
        }
        pipeline.push(filter);
    }

    pub fn has_filters(&self, key: &FilterKey) -> bool {
        self.filters
            .read()
            .get(key)
            .is_some_and(|pipeline| !pipeline.is_empty())
    }

    pub fn send_to_target(&self, msg: Option<Message>) {
        let Some(msg) = msg else { return };
        if self.to_target.send(msg).is_err() {
            tracing::debug!("[ProtocolAdapter {}] Target output closed", self.session_id);
        }
    }

    pub fn send_to_client(&self, msg: Option<Message>) {
        let Some(msg) = msg else { return };
        if self.to_client.send(msg).is_err() {
            tracing::debug!("[ProtocolAdapter {}] Client output closed", self.session_id);
        }
    }

    pub fn fire_event_to_client(&self, method: impl Into<String>, params: Value) {
        self.send_to_client(Some(Message::event(method, Some(params))));
    }

    pub fn fire_result_to_client(&self, id: RequestId, result: Value) {
        self.send_to_client(Some(Message::result(id, result)));
    }

    pub fn fire_error_to_client(&self, id: RequestId, code: i64, message: impl Into<String>) {
        self.send_to_client(Some(Message::error(id, code, message)));
    }

    /// Params of the client request `id`, while its reply is outstanding
    pub fn client_request_params(&self, id: RequestId) -> Option<Value> {
        self.client_requests
            .get(&id)
            .and_then(|request| request.params.clone())
    }

    pub fn pending_client_requests(&self) -> usize {
        self.client_requests.len()
    }

    pub fn pending_adapter_requests(&self) -> usize {
        self.adapter_requests.len()
    }

    /// Send a request of our own to the target and wait for its result.
    ///
    /// Times out after the configured deadline. On timeout nothing is sent
    /// to the target; a late reply is dropped as unknown.
    pub async fn make_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let pending = self.adapter_requests.register();
        let request = Message::request(pending.id(), method, params);

        if self.to_target.send(request).is_err() {
            self.adapter_requests.cancel(pending.id());
            return Err(BridgeError::Closed);
        }

        self.adapter_requests
            .wait(pending, self.request_timeout, method)
            .await
    }

    pub async fn on_client_message(&self, request: CDPRequest) {
        let id = request.id;
        self.client_requests.insert(
            id,
            ClientRequest {
                method: request.method.clone(),
                params: request.params.clone(),
            },
        );

        let key = FilterKey::client(request.method.clone());
        match self.run_pipeline(&key, Message::Request(request)).await {
            Some(msg) => self.send_to_target(Some(msg)),
            // Answered locally (or dropped): no target reply will follow
            None => {
                self.client_requests.remove(&id);
            }
        }
    }

    /// Resolve `msg` if it answers a `make_request`. Returns the message
    /// back when it is anything else.
    pub fn try_resolve_adapter_request(&self, msg: Message) -> Option<Message> {
        match msg {
            Message::Response(response) if self.adapter_requests.contains(response.id) => {
                let CDPResponse { id, result, error } = response;
                let outcome = match error {
                    Some(error) => Err(BridgeError::Protocol {
                        code: error.code,
                        message: error.message,
                    }),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                self.adapter_requests.resolve(id, outcome);
                None
            }
            other => Some(other),
        }
    }

    pub async fn on_target_message(&self, msg: Message) {
        let Some(msg) = self.try_resolve_adapter_request(msg) else {
            return;
        };

        match msg {
            Message::Response(response) => {
                let id = response.id;
                let method = self
                    .client_requests
                    .get(&id)
                    .map(|request| request.method.clone());

                let Some(method) = method else {
                    tracing::warn!(
                        "[ProtocolAdapter {}] Reply {} matches no request, passing through",
                        self.session_id,
                        id
                    );
                    self.send_to_client(Some(Message::Response(response)));
                    return;
                };

                let key = FilterKey::target(method);
                let forwarded = self.run_pipeline(&key, Message::Response(response)).await;
                self.send_to_client(forwarded);
                self.client_requests.remove(&id);
            }
            Message::Event(event) => {
                let key = FilterKey::target(event.method.clone());
                let forwarded = self.run_pipeline(&key, Message::Event(event)).await;
                self.send_to_client(forwarded);
            }
            Message::Request(request) => {
                tracing::warn!(
                    "[ProtocolAdapter {}] Target sent a request ({}), passing through",
                    self.session_id,
                    request.method
                );
                self.send_to_client(Some(Message::Request(request)));
            }
        }
    }

    /// Reject outstanding adapter requests and forget client requests
    pub fn shutdown(&self) {
        self.adapter_requests.clear();
        self.client_requests.clear();
    }

    async fn run_pipeline(&self, key: &FilterKey, msg: Message) -> Option<Message> {
        // Snapshot so stages may register filters without deadlocking
        let stages: Vec<Arc<dyn MessageFilter>> = match self.filters.read().get(key) {
            Some(pipeline) => pipeline.clone(),
            None => return Some(msg),
        };

        let mut current = msg;
        for stage in stages {
            let outcome = AssertUnwindSafe(stage.filter(self, key, current))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(Some(next))) => current = next,
                Ok(Ok(None)) => return None,
                Ok(Err(e)) => {
                    tracing::warn!(
                        "[ProtocolAdapter {}] Filter {} failed on {}: {}",
                        self.session_id,
                        stage.name(),
                        key,
                        e
                    );
                    return None;
                }
                Err(_) => {
                    tracing::error!(
                        "[ProtocolAdapter {}] Filter {} panicked on {}",
                        self.session_id,
                        stage.name(),
                        key
                    );
                    return None;
                }
            }
        }
        Some(current)
    }
}
