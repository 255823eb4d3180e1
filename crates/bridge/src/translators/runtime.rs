//! Runtime domain
//!
//! Evaluation replies from the target report a throw as `wasThrown` with
//! the thrown value as `result`. The client expects `exceptionDetails`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::{
    answer, client_keys, event_params_mut, into_request, result_mut, target_keys, Translator,
};
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::{Message, RequestId};

/// Evaluate params the target does not understand
const UNSUPPORTED_EVALUATE_PARAMS: &[&str] = &[
    "awaitPromise",
    "throwOnSideEffect",
    "timeout",
    "disableBreaks",
    "replMode",
    "allowUnsafeEvalBlockedByCSP",
    "uniqueContextId",
    "generateWebDriverValue",
    "serializationOptions",
];

const LOCAL: &[&str] = &[
    "Runtime.compileScript",
    "Runtime.runIfWaitingForDebugger",
    "Runtime.getIsolateId",
    "Runtime.addBinding",
    "Runtime.removeBinding",
];

#[derive(Default)]
pub struct RuntimeTranslator {
    last_expression: Mutex<Option<String>>,
}

impl Translator for RuntimeTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(LOCAL)
            .chain(client_keys(&["Runtime.evaluate"]))
            .chain(target_keys(&[
                "Runtime.evaluate",
                "Runtime.getProperties",
                "Runtime.executionContextCreated",
            ]))
            .collect()
    }
}

#[async_trait]
impl MessageFilter for RuntimeTranslator {
    fn name(&self) -> &str {
        "runtime"
    }

    async fn filter(
        &self,
        adapter: &ProtocolAdapter,
        key: &FilterKey,
        mut msg: Message,
    ) -> Result<Option<Message>> {
        match (key.direction, key.method.as_str()) {
            (Direction::FromClient, "Runtime.evaluate") => {
                let mut request = into_request(msg)?;
                if let Some(params) = request.params.as_mut().and_then(Value::as_object_mut) {
                    trim_evaluate_params(params);
                    *self.last_expression.lock() = params
                        .get("expression")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
                Ok(Some(Message::Request(request)))
            }
            (Direction::FromClient, "Runtime.getIsolateId") => {
                let request = into_request(msg)?;
                Ok(answer(adapter, request.id, json!({ "id": adapter.session_id() })))
            }
            (Direction::FromClient, method) if LOCAL.contains(&method) => {
                let request = into_request(msg)?;
                Ok(answer(adapter, request.id, json!({})))
            }
            (Direction::FromTarget, "Runtime.evaluate") => {
                let id = msg.id().unwrap_or_default();
                let expression = self.expression_for(adapter, id);
                if let Some(result) = result_mut(&mut msg) {
                    reshape_thrown(result, expression.as_deref());
                }
                Ok(Some(msg))
            }
            (Direction::FromTarget, "Runtime.getProperties") => {
                let id = msg.id().unwrap_or_default();
                let accessors_only = adapter
                    .client_request_params(id)
                    .and_then(|params| params.get("accessorPropertiesOnly").and_then(Value::as_bool))
                    .unwrap_or(false);
                if let Some(result) = result_mut(&mut msg) {
                    filter_properties(result, accessors_only);
                }
                Ok(Some(msg))
            }
            (Direction::FromTarget, "Runtime.executionContextCreated") => {
                if let Some(context) = event_params_mut(&mut msg)
                    .and_then(|params| params.get_mut("context"))
                    .and_then(Value::as_object_mut)
                {
                    reshape_context(context);
                }
                Ok(Some(msg))
            }
            _ => Ok(Some(msg)),
        }
    }
}

impl RuntimeTranslator {
    /// The expression behind reply `id`, falling back to the last one seen
    fn expression_for(&self, adapter: &ProtocolAdapter, id: RequestId) -> Option<String> {
        adapter
            .client_request_params(id)
            .and_then(|params| params.get("expression").and_then(Value::as_str).map(str::to_string))
            .or_else(|| self.last_expression.lock().clone())
    }
}

fn trim_evaluate_params(params: &mut Map<String, Value>) {
    for name in UNSUPPORTED_EVALUATE_PARAMS {
        params.remove(*name);
    }
    super::rename_field(params, "silent", "doNotPauseOnExceptionsAndMuteConsole");
    super::rename_field(params, "userGesture", "emulateUserGesture");
}

fn reshape_thrown(result: &mut Map<String, Value>, expression: Option<&str>) {
    let thrown = result
        .remove("wasThrown")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !thrown {
        return;
    }

    let mut exception = result.get("result").cloned().unwrap_or(Value::Null);
    let description = exception
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    let text = match (&description, expression) {
        (Some(description), _) => format!("Uncaught {}", description),
        (None, Some(expression)) => {
            let expression: String = expression.chars().take(100).collect();
            if let Some(object) = exception.as_object_mut() {
                object.insert(
                    "description".to_string(),
                    json!(format!("Exception while evaluating: {}", expression)),
                );
            }
            "Uncaught".to_string()
        }
        (None, None) => "Uncaught".to_string(),
    };

    result.insert(
        "exceptionDetails".to_string(),
        json!({
            "exceptionId": 1,
            "text": text,
            "lineNumber": 0,
            "columnNumber": 0,
            "exception": exception,
        }),
    );
}

fn filter_properties(result: &mut Map<String, Value>, accessors_only: bool) {
    let Some(properties) = result.get_mut("properties").and_then(Value::as_array_mut) else {
        return;
    };
    if accessors_only {
        properties.retain(|p| p.get("get").is_some() || p.get("set").is_some());
    }
    for property in properties.iter_mut().filter_map(Value::as_object_mut) {
        property.remove("nativeGetter");
        property
            .entry("configurable")
            .or_insert_with(|| json!(false));
        property
            .entry("enumerable")
            .or_insert_with(|| json!(false));
    }
}

/// `{id, isPageContext, name, frameId}` -> `{id, origin, name, uniqueId, auxData}`
fn reshape_context(context: &mut Map<String, Value>) {
    let is_default = context
        .remove("isPageContext")
        .and_then(|v| v.as_bool())
        .or_else(|| context.get("type").and_then(Value::as_str).map(|t| t == "normal"))
        .unwrap_or(false);
    let frame_id = context.remove("frameId").unwrap_or(Value::Null);
    context.remove("type");

    let unique_id = context
        .get("id")
        .map(|id| id.to_string())
        .unwrap_or_default();
    context.entry("origin").or_insert_with(|| json!(""));
    context.insert("uniqueId".to_string(), json!(unique_id));
    context.insert(
        "auxData".to_string(),
        json!({
            "isDefault": is_default,
            "type": if is_default { "default" } else { "isolated" },
            "frameId": frame_id,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translators::test_support::*;

    #[tokio::test]
    async fn test_evaluate_params_trimmed() {
        let (adapter, mut outputs) = adapter_with(RuntimeTranslator::default());
        adapter
            .on_client_message(request(
                1,
                "Runtime.evaluate",
                json!({"expression": "1+1", "awaitPromise": true, "silent": true, "replMode": true}),
            ))
            .await;

        let sent = sent_request(&mut outputs);
        assert_eq!(
            sent.params,
            Some(json!({"expression": "1+1", "doNotPauseOnExceptionsAndMuteConsole": true}))
        );
    }

    #[tokio::test]
    async fn test_thrown_result_gets_exception_details() {
        let (adapter, mut outputs) = adapter_with(RuntimeTranslator::default());
        adapter
            .on_client_message(request(2, "Runtime.evaluate", json!({"expression": "boom()"})))
            .await;
        let _ = sent_request(&mut outputs);

        adapter
            .on_target_message(Message::result(
                2,
                json!({"result": {"type": "object", "className": "ReferenceError"}, "wasThrown": true}),
            ))
            .await;

        let (_, result) = client_result(&mut outputs);
        assert!(result.get("wasThrown").is_none());
        let details = &result["exceptionDetails"];
        assert_eq!(details["text"], "Uncaught");
        assert_eq!(
            details["exception"]["description"],
            "Exception while evaluating: boom()"
        );
    }

    #[test]
    fn test_thrown_with_description() {
        let mut result = json!({"result": {"type": "object", "description": "Error: x"}, "wasThrown": true});
        reshape_thrown(result.as_object_mut().unwrap(), None);
        assert_eq!(result["exceptionDetails"]["text"], "Uncaught Error: x");

        let mut clean = json!({"result": {"type": "number", "value": 2}, "wasThrown": false});
        reshape_thrown(clean.as_object_mut().unwrap(), None);
        assert_eq!(clean, json!({"result": {"type": "number", "value": 2}}));
    }

    #[tokio::test]
    async fn test_get_properties_uses_request_params() {
        let (adapter, mut outputs) = adapter_with(RuntimeTranslator::default());
        adapter
            .on_client_message(request(
                3,
                "Runtime.getProperties",
                json!({"objectId": "o", "accessorPropertiesOnly": true}),
            ))
            .await;
        let _ = sent_request(&mut outputs);

        adapter
            .on_target_message(Message::result(
                3,
                json!({"properties": [
                    {"name": "a", "value": {"type": "number"}},
                    {"name": "b", "get": {"type": "function"}, "nativeGetter": true}
                ]}),
            ))
            .await;

        let (_, result) = client_result(&mut outputs);
        let properties = result["properties"].as_array().unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0]["name"], "b");
        assert!(properties[0].get("nativeGetter").is_none());
    }

    #[tokio::test]
    async fn test_context_created_reshaped() {
        let (adapter, mut outputs) = adapter_with(RuntimeTranslator::default());
        adapter
            .on_target_message(Message::event(
                "Runtime.executionContextCreated",
                Some(json!({"context": {"id": 7, "isPageContext": true, "name": "", "frameId": "F1"}})),
            ))
            .await;

        let Message::Event(event) = outputs.to_client.try_recv().unwrap() else {
            panic!("Expected event");
        };
        let context = &event.params.unwrap()["context"];
        assert_eq!(context["uniqueId"], "7");
        assert_eq!(context["auxData"]["isDefault"], true);
        assert_eq!(context["auxData"]["frameId"], "F1");
        assert!(context.get("isPageContext").is_none());
    }

    #[tokio::test]
    async fn test_isolate_id_is_local() {
        let (adapter, mut outputs) = adapter_with(RuntimeTranslator::default());
        adapter
            .on_client_message(request(5, "Runtime.getIsolateId", json!({})))
            .await;
        let (id, result) = client_result(&mut outputs);
        assert_eq!(id, 5);
        assert_eq!(result["id"], adapter.session_id());
    }
}
