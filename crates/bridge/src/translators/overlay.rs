//! Overlay domain
//!
//! Highlighting lives on the DOM domain on the target side and accepts a
//! smaller highlight config.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{answer, client_keys, into_request, param, renamed, Translator};
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::{params_mut, Message};

/// Highlight config keys the target accepts
const HIGHLIGHT_KEYS: &[&str] = &[
    "showInfo",
    "contentColor",
    "paddingColor",
    "borderColor",
    "marginColor",
];

const LOCAL: &[&str] = &[
    "Overlay.enable",
    "Overlay.disable",
    "Overlay.setShowViewportSizeOnResize",
    "Overlay.setShowGridOverlays",
    "Overlay.setShowFlexOverlays",
];

pub struct OverlayTranslator;

impl Translator for OverlayTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(LOCAL)
            .chain(client_keys(&[
                "Overlay.highlightNode",
                "Overlay.hideHighlight",
                "Overlay.setInspectMode",
                "Overlay.setPausedInDebuggerMessage",
            ]))
            .collect()
    }
}

#[async_trait]
impl MessageFilter for OverlayTranslator {
    fn name(&self) -> &str {
        "overlay"
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
        let mut request = into_request(msg)?;

        match key.method.as_str() {
            "Overlay.highlightNode" => {
                let params = params_mut(&mut request.params)?;
                trim_highlight_config(params);
                super::rename_field(params, "backendNodeId", "nodeId");
                Ok(renamed(request, "DOM.highlightNode"))
            }
            "Overlay.hideHighlight" => Ok(renamed(request, "DOM.hideHighlight")),
            "Overlay.setInspectMode" => {
                let enabled = param(&request, "mode").and_then(Value::as_str) != Some("none");
                let params = params_mut(&mut request.params)?;
                params.remove("mode");
                params.insert("enabled".to_string(), json!(enabled));
                trim_highlight_config(params);
                Ok(renamed(request, "DOM.setInspectModeEnabled"))
            }
            "Overlay.setPausedInDebuggerMessage" => Ok(renamed(request, "Debugger.setOverlayMessage")),
            method if LOCAL.contains(&method) => Ok(answer(adapter, request.id, json!({}))),
            _ => Ok(Some(Message::Request(request))),
        }
    }
}

fn trim_highlight_config(params: &mut Map<String, Value>) {
    if let Some(config) = params.get_mut("highlightConfig").and_then(Value::as_object_mut) {
        config.retain(|key, _| HIGHLIGHT_KEYS.contains(&key.as_str()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translators::test_support::*;

    #[tokio::test]
    async fn test_highlight_node_reshaped() {
        let (adapter, mut outputs) = adapter_with(OverlayTranslator);
        adapter
            .on_client_message(request(
                1,
                "Overlay.highlightNode",
                json!({
                    "nodeId": 5,
                    "highlightConfig": {
                        "showInfo": true,
                        "contentColor": {"r": 1, "g": 2, "b": 3, "a": 0.5},
                        "showRulers": true,
                        "gridHighlightConfig": {}
                    }
                }),
            ))
            .await;

        let sent = sent_request(&mut outputs);
        assert_eq!(sent.method, "DOM.highlightNode");
        assert_eq!(
            sent.params,
            Some(json!({
                "nodeId": 5,
                "highlightConfig": {"showInfo": true, "contentColor": {"r": 1, "g": 2, "b": 3, "a": 0.5}}
            }))
        );
    }

    #[tokio::test]
    async fn test_inspect_mode() {
        let (adapter, mut outputs) = adapter_with(OverlayTranslator);
        adapter
            .on_client_message(request(2, "Overlay.setInspectMode", json!({"mode": "searchForNode"})))
            .await;
        let sent = sent_request(&mut outputs);
        assert_eq!(sent.method, "DOM.setInspectModeEnabled");
        assert_eq!(sent.params, Some(json!({"enabled": true})));

        adapter
            .on_client_message(request(3, "Overlay.setInspectMode", json!({"mode": "none"})))
            .await;
        assert_eq!(sent_request(&mut outputs).params, Some(json!({"enabled": false})));
    }

    #[tokio::test]
    async fn test_enable_is_local() {
        let (adapter, mut outputs) = adapter_with(OverlayTranslator);
        adapter
            .on_client_message(request(4, "Overlay.enable", json!({})))
            .await;
        assert_eq!(client_result(&mut outputs), (4, json!({})));
    }
}
