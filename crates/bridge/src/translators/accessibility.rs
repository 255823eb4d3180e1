//! Accessibility domain
//!
//! The target exposes per-node accessibility properties only. A partial
//! tree request is answered with the one node it names.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{answer, client_keys, into_request, param, Translator};
use crate::adapter::ProtocolAdapter;
use crate::error::{BridgeError, Result};
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::Message;

/// Boolean node properties surfaced as AX properties
const BOOLEAN_PROPERTIES: &[&str] = &[
    "disabled", "focused", "busy", "required", "expanded", "selected", "pressed", "checked",
];

pub struct AccessibilityTranslator;

impl Translator for AccessibilityTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(&[
            "Accessibility.enable",
            "Accessibility.disable",
            "Accessibility.getPartialAXTree",
        ])
        .collect()
    }
}

#[async_trait]
impl MessageFilter for AccessibilityTranslator {
    fn name(&self) -> &str {
        "accessibility"
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
        let request = into_request(msg)?;

        match key.method.as_str() {
            "Accessibility.getPartialAXTree" => {
                let node_id = match param(&request, "nodeId")
                    .or_else(|| param(&request, "backendNodeId"))
                    .and_then(Value::as_u64)
                {
                    Some(node_id) => node_id,
                    None => {
                        let object_id = param(&request, "objectId")
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                BridgeError::Translator(
                                    "getPartialAXTree needs a node or object id".to_string(),
                                )
                            })?;
                        let node = adapter
                            .make_request("DOM.requestNode", Some(json!({ "objectId": object_id })))
                            .await?;
                        node.get("nodeId").and_then(Value::as_u64).ok_or_else(|| {
                            BridgeError::Translator(format!("no DOM node for {}", object_id))
                        })?
                    }
                };

                let result = adapter
                    .make_request(
                        "DOM.getAccessibilityPropertiesForNode",
                        Some(json!({ "nodeId": node_id })),
                    )
                    .await?;
                let properties = result.get("properties").cloned().unwrap_or(Value::Null);
                Ok(answer(
                    adapter,
                    request.id,
                    json!({ "nodes": [ax_node(node_id, &properties)] }),
                ))
            }
            _ => Ok(answer(adapter, request.id, json!({}))),
        }
    }
}

fn ax_node(node_id: u64, properties: &Value) -> Value {
    let flag = |name: &str| properties.get(name).and_then(Value::as_bool).unwrap_or(false);
    let text = |name: &str| {
        properties
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let exists = properties.get("exists").and_then(Value::as_bool).unwrap_or(true);
    let ignored = !exists || flag("hidden") || flag("ignored");

    let ax_properties: Vec<Value> = BOOLEAN_PROPERTIES
        .iter()
        .filter(|name| properties.get(**name).is_some())
        .map(|name| json!({ "name": name, "value": { "type": "boolean", "value": flag(name) } }))
        .collect();

    let child_ids: Vec<String> = properties
        .get("childNodeIds")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().map(|id| id.to_string()).collect())
        .unwrap_or_default();

    json!({
        "nodeId": node_id.to_string(),
        "ignored": ignored,
        "role": { "type": "role", "value": text("role") },
        "name": { "type": "computedString", "value": text("label") },
        "properties": ax_properties,
        "childIds": child_ids,
        "backendDOMNodeId": node_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translators::test_support::*;

    #[tokio::test]
    async fn test_partial_tree_from_node_properties() {
        let (adapter, outputs) = adapter_with(AccessibilityTranslator);
        let mut to_client = outputs.to_client;
        let target = spawn_target(
            adapter.clone(),
            outputs.to_target,
            vec![(
                "DOM.getAccessibilityPropertiesForNode",
                json!({"properties": {
                    "exists": true, "label": "Submit", "role": "button",
                    "disabled": false, "focused": true, "childNodeIds": [8, 9]
                }}),
            )],
        );

        adapter
            .on_client_message(request(1, "Accessibility.getPartialAXTree", json!({"nodeId": 7})))
            .await;
        target.await.unwrap();

        let Message::Response(response) = to_client.try_recv().unwrap() else {
            panic!("Expected response");
        };
        let node = &response.result.unwrap()["nodes"][0];
        assert_eq!(node["nodeId"], "7");
        assert_eq!(node["ignored"], false);
        assert_eq!(node["role"]["value"], "button");
        assert_eq!(node["name"]["value"], "Submit");
        assert_eq!(node["childIds"], json!(["8", "9"]));
        assert_eq!(node["properties"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_enable_is_local() {
        let (adapter, mut outputs) = adapter_with(AccessibilityTranslator);
        adapter
            .on_client_message(request(2, "Accessibility.enable", json!({})))
            .await;
        assert_eq!(client_result(&mut outputs), (2, json!({})));
        assert!(outputs.to_target.try_recv().is_err());
    }
}
