//! Domain translators
//!
//! Each translator is one `MessageFilter` registered under a fixed set of
//! keys. Inside `filter` it dispatches on `(direction, method)`. The
//! patterns repeat across domains:
//!
//! - rename: method swapped, params passed through
//! - reshape: params or result rebuilt in the other protocol's schema
//! - fan-out: one client request becomes several `make_request` calls
//! - local: answered from here, the target never sees it

pub mod accessibility;
pub mod debugger;
pub mod dom_debugger;
pub mod emulation;
pub mod input;
pub mod io;
pub mod log;
pub mod network;
pub mod overlay;
pub mod page;
pub mod runtime;
pub mod screencast;

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::adapter::ProtocolAdapter;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::filter::{FilterKey, MessageFilter};
use crate::protocol::{CDPRequest, Message};

pub use accessibility::AccessibilityTranslator;
pub use debugger::DebuggerTranslator;
pub use dom_debugger::DomDebuggerTranslator;
pub use emulation::EmulationTranslator;
pub use input::InputTranslator;
pub use io::{IoTranslator, StreamStore};
pub use log::LogTranslator;
pub use network::NetworkTranslator;
pub use overlay::OverlayTranslator;
pub use page::PageTranslator;
pub use runtime::RuntimeTranslator;
pub use screencast::ScreencastTranslator;

/// A filter that knows which keys it serves
pub trait Translator: MessageFilter + 'static {
    fn keys(&self) -> Vec<FilterKey>;
}

/// Register `translator` under every key it serves
pub fn install<T: Translator>(adapter: &ProtocolAdapter, translator: Arc<T>) {
    for key in translator.keys() {
        adapter.add_filter(key, translator.clone());
    }
}

/// Install the full translation table
pub fn register_all(adapter: &Arc<ProtocolAdapter>, config: &BridgeConfig) {
    let streams = Arc::new(StreamStore::default());

    install(adapter, Arc::new(PageTranslator::default()));
    install(adapter, Arc::new(NetworkTranslator::new(streams.clone())));
    install(adapter, Arc::new(RuntimeTranslator::default()));
    install(adapter, Arc::new(DebuggerTranslator));
    install(adapter, Arc::new(DomDebuggerTranslator));
    install(adapter, Arc::new(EmulationTranslator));
    install(adapter, Arc::new(InputTranslator));
    install(adapter, Arc::new(OverlayTranslator));
    install(adapter, Arc::new(AccessibilityTranslator));
    install(adapter, Arc::new(LogTranslator));
    install(adapter, Arc::new(IoTranslator::new(streams)));
    install(
        adapter,
        Arc::new(ScreencastTranslator::new(
            Arc::downgrade(adapter),
            config.screencast_interval(),
        )),
    );
}

pub(crate) fn client_keys<'a>(methods: &'a [&'a str]) -> impl Iterator<Item = FilterKey> + 'a {
    methods.iter().map(|m| FilterKey::client(*m))
}

pub(crate) fn target_keys<'a>(methods: &'a [&'a str]) -> impl Iterator<Item = FilterKey> + 'a {
    methods.iter().map(|m| FilterKey::target(*m))
}

pub(crate) fn into_request(msg: Message) -> Result<CDPRequest> {
    match msg {
        Message::Request(request) => Ok(request),
        other => Err(BridgeError::Translator(format!(
            "expected a request, got {:?}",
            other
        ))),
    }
}

/// Same request under another method name
pub(crate) fn renamed(mut request: CDPRequest, method: &str) -> Option<Message> {
    request.method = method.to_string();
    Some(Message::Request(request))
}

/// Answer the client directly and stop the pipeline
pub(crate) fn answer(adapter: &ProtocolAdapter, id: u64, result: Value) -> Option<Message> {
    adapter.fire_result_to_client(id, result);
    None
}

/// Mutable `result` of a successful reply
pub(crate) fn result_mut(msg: &mut Message) -> Option<&mut Map<String, Value>> {
    match msg {
        Message::Response(response) if response.error.is_none() => {
            response.result.as_mut().and_then(Value::as_object_mut)
        }
        _ => None,
    }
}

/// Mutable `params` of an event
pub(crate) fn event_params_mut(msg: &mut Message) -> Option<&mut Map<String, Value>> {
    match msg {
        Message::Event(event) => event.params.as_mut().and_then(Value::as_object_mut),
        _ => None,
    }
}

pub(crate) fn param<'a>(request: &'a CDPRequest, name: &str) -> Option<&'a Value> {
    request.params.as_ref().and_then(|params| params.get(name))
}

pub(crate) fn required_str<'a>(request: &'a CDPRequest, name: &str) -> Result<&'a str> {
    param(request, name).and_then(Value::as_str).ok_or_else(|| {
        BridgeError::Translator(format!("{} requires a string '{}'", request.method, name))
    })
}

/// Move `from` to `to` inside an object, if present
pub(crate) fn rename_field(object: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = object.remove(from) {
        object.insert(to.to_string(), value);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::adapter::AdapterOutputs;

    pub fn adapter_with<T: Translator>(translator: T) -> (Arc<ProtocolAdapter>, AdapterOutputs) {
        let (adapter, outputs) = ProtocolAdapter::new(&BridgeConfig::default());
        install(&adapter, Arc::new(translator));
        (adapter, outputs)
    }

    pub fn request(id: u64, method: &str, params: Value) -> CDPRequest {
        CDPRequest {
            id,
            method: method.to_string(),
            params: Some(params),
        }
    }

    pub fn sent_request(outputs: &mut AdapterOutputs) -> CDPRequest {
        match outputs.to_target.try_recv() {
            Ok(Message::Request(request)) => request,
            other => panic!("Expected request to target, got {:?}", other),
        }
    }

    pub fn client_result(outputs: &mut AdapterOutputs) -> (u64, Value) {
        match outputs.to_client.try_recv() {
            Ok(Message::Response(response)) => {
                (response.id, response.result.unwrap_or(Value::Null))
            }
            other => panic!("Expected result for client, got {:?}", other),
        }
    }

    /// Answer adapter requests as they arrive, in order, with `replies`
    pub fn spawn_target(
        adapter: Arc<ProtocolAdapter>,
        mut to_target: tokio::sync::mpsc::UnboundedReceiver<Message>,
        replies: Vec<(&'static str, Value)>,
    ) -> tokio::task::JoinHandle<Vec<CDPRequest>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for (expected, reply) in replies {
                let Some(Message::Request(request)) = to_target.recv().await else {
                    break;
                };
                assert_eq!(request.method, expected);
                adapter.on_target_message(Message::result(request.id, reply)).await;
                seen.push(request);
            }
            seen
        })
    }
}
