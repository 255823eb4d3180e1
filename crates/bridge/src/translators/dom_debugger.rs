//! DOMDebugger domain

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{answer, client_keys, into_request, renamed, required_str, Translator};
use crate::adapter::ProtocolAdapter;
use crate::error::{BridgeError, Result};
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::{CDPRequest, Message};

const CLIENT: &[&str] = &[
    "DOMDebugger.getEventListeners",
    "DOMDebugger.setEventListenerBreakpoint",
    "DOMDebugger.removeEventListenerBreakpoint",
    "DOMDebugger.setInstrumentationBreakpoint",
    "DOMDebugger.removeInstrumentationBreakpoint",
];

pub struct DomDebuggerTranslator;

impl Translator for DomDebuggerTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(CLIENT).collect()
    }
}

#[async_trait]
impl MessageFilter for DomDebuggerTranslator {
    fn name(&self) -> &str {
        "dom_debugger"
    }

    async fn filter(
        &self,
        adapter: &ProtocolAdapter,
        key: &FilterKey,
        msg: Message,
    ) -> Result<Option<Message>> {
        if key.direction != Direction::FromClient {
            return Ok(Some(msg));
        }

        match key.method.as_str() {
            "DOMDebugger.getEventListeners" => {
                let request = into_request(msg)?;
                let object_id = required_str(&request, "objectId")?;
                let listeners = event_listeners(adapter, object_id).await?;
                Ok(answer(adapter, request.id, json!({ "listeners": listeners })))
            }
            "DOMDebugger.setEventListenerBreakpoint" => {
                event_breakpoint(into_request(msg)?, "DOMDebugger.setEventBreakpoint", "listener")
            }
            "DOMDebugger.removeEventListenerBreakpoint" => {
                event_breakpoint(into_request(msg)?, "DOMDebugger.removeEventBreakpoint", "listener")
            }
            "DOMDebugger.setInstrumentationBreakpoint" => event_breakpoint(
                into_request(msg)?,
                "DOMDebugger.setEventBreakpoint",
                "instrumentation",
            ),
            "DOMDebugger.removeInstrumentationBreakpoint" => event_breakpoint(
                into_request(msg)?,
                "DOMDebugger.removeEventBreakpoint",
                "instrumentation",
            ),
            _ => Ok(Some(msg)),
        }
    }
}

fn event_breakpoint(mut request: CDPRequest, method: &str, kind: &str) -> Result<Option<Message>> {
    let event_name = required_str(&request, "eventName")?.to_string();
    request.params = Some(json!({ "breakpointType": kind, "eventName": event_name }));
    Ok(renamed(request, method))
}

/// Listeners of a remote object, via its DOM node
async fn event_listeners(adapter: &ProtocolAdapter, object_id: &str) -> Result<Vec<Value>> {
    let node = adapter
        .make_request("DOM.requestNode", Some(json!({ "objectId": object_id })))
        .await?;
    let node_id = node
        .get("nodeId")
        .and_then(Value::as_u64)
        .ok_or_else(|| BridgeError::Translator(format!("no DOM node for {}", object_id)))?;

    let result = adapter
        .make_request(
            "DOM.getEventListenersForNode",
            Some(json!({ "nodeId": node_id })),
        )
        .await?;

    Ok(result
        .get("listeners")
        .and_then(Value::as_array)
        .map(|listeners| listeners.iter().map(reshape_listener).collect())
        .unwrap_or_default())
}

fn reshape_listener(listener: &Value) -> Value {
    let field = |name: &str| listener.get(name).cloned();
    let location = listener.get("location");

    let mut reshaped = json!({
        "type": field("type").unwrap_or_else(|| json!("")),
        "useCapture": field("useCapture").unwrap_or(json!(false)),
        "passive": field("passive").unwrap_or(json!(false)),
        "once": field("once").unwrap_or(json!(false)),
        "scriptId": location.and_then(|l| l.get("scriptId")).cloned().unwrap_or_else(|| json!("")),
        "lineNumber": location.and_then(|l| l.get("lineNumber")).cloned().unwrap_or(json!(0)),
        "columnNumber": location.and_then(|l| l.get("columnNumber")).cloned().unwrap_or(json!(0)),
    });
    if let (Some(handler), Some(object)) = (field("handlerObject"), reshaped.as_object_mut()) {
        object.insert("handler".to_string(), handler);
    }
    if let (Some(node_id), Some(object)) = (field("nodeId"), reshaped.as_object_mut()) {
        object.insert("backendNodeId".to_string(), node_id);
    }
    reshaped
}
