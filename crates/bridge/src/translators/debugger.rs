//! Debugger domain

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{
    answer, client_keys, event_params_mut, into_request, renamed, result_mut, target_keys,
    Translator,
};
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::{params_mut, Message};

const CLIENT: &[&str] = &[
    "Debugger.setBreakpointByUrl",
    "Debugger.setBreakpoint",
    "Debugger.setAsyncCallStackDepth",
    "Debugger.setSkipAllPauses",
    "Debugger.setBlackboxPatterns",
    "Debugger.canSetScriptSource",
    "Debugger.getPossibleBreakpoints",
];

const TARGET: &[&str] = &["Debugger.enable", "Debugger.scriptParsed", "Debugger.paused"];

pub struct DebuggerTranslator;

impl Translator for DebuggerTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(CLIENT).chain(target_keys(TARGET)).collect()
    }
}

#[async_trait]
impl MessageFilter for DebuggerTranslator {
    fn name(&self) -> &str {
        "debugger"
    }

    async fn filter(
        &self,
        adapter: &ProtocolAdapter,
        key: &FilterKey,
        mut msg: Message,
    ) -> Result<Option<Message>> {
        match (key.direction, key.method.as_str()) {
            (Direction::FromClient, "Debugger.setBreakpointByUrl" | "Debugger.setBreakpoint") => {
                let mut request = into_request(msg)?;
                nest_condition(params_mut(&mut request.params)?);
                Ok(Some(Message::Request(request)))
            }
            (Direction::FromClient, "Debugger.setAsyncCallStackDepth") => {
                let mut request = into_request(msg)?;
                super::rename_field(params_mut(&mut request.params)?, "maxDepth", "depth");
                Ok(renamed(request, "Debugger.setAsyncStackTraceDepth"))
            }
            (Direction::FromClient, "Debugger.setSkipAllPauses") => {
                let mut request = into_request(msg)?;
                let params = params_mut(&mut request.params)?;
                let skip = params.remove("skip").and_then(|v| v.as_bool()).unwrap_or(false);
                params.insert("active".to_string(), json!(!skip));
                Ok(renamed(request, "Debugger.setBreakpointsActive"))
            }
            (Direction::FromClient, "Debugger.setBlackboxPatterns") => {
                let request = into_request(msg)?;
                Ok(answer(adapter, request.id, json!({})))
            }
            (Direction::FromClient, "Debugger.canSetScriptSource") => {
                let request = into_request(msg)?;
                Ok(answer(adapter, request.id, json!({ "result": false })))
            }
            (Direction::FromClient, "Debugger.getPossibleBreakpoints") => {
                let request = into_request(msg)?;
                Ok(answer(adapter, request.id, json!({ "locations": [] })))
            }
            (Direction::FromTarget, "Debugger.enable") => {
                if let Some(result) = result_mut(&mut msg) {
                    result
                        .entry("debuggerId")
                        .or_insert_with(|| json!(format!("{}.debugger", adapter.session_id())));
                }
                Ok(Some(msg))
            }
            (Direction::FromTarget, "Debugger.scriptParsed") => {
                if let Some(params) = event_params_mut(&mut msg) {
                    fill_script_defaults(params);
                }
                Ok(Some(msg))
            }
            (Direction::FromTarget, "Debugger.paused") => {
                if let Some(frames) = event_params_mut(&mut msg)
                    .and_then(|params| params.get_mut("callFrames"))
                    .and_then(Value::as_array_mut)
                {
                    for frame in frames.iter_mut().filter_map(Value::as_object_mut) {
                        map_scope_chain(frame);
                    }
                }
                Ok(Some(msg))
            }
            _ => Ok(Some(msg)),
        }
    }
}

/// `condition` moves under `options`
fn nest_condition(params: &mut Map<String, Value>) {
    if let Some(condition) = params.remove("condition") {
        let options = params
            .entry("options")
            .or_insert_with(|| json!({}));
        if let Some(options) = options.as_object_mut() {
            options.insert("condition".to_string(), condition);
        }
    }
}

fn fill_script_defaults(params: &mut Map<String, Value>) {
    let has_source_url = params
        .get("sourceURL")
        .and_then(Value::as_str)
        .is_some_and(|url| !url.is_empty());
    let url = params
        .get("url")
        .cloned()
        .unwrap_or_else(|| json!(""));

    params.entry("url").or_insert_with(|| json!(""));
    params.entry("executionContextId").or_insert_with(|| json!(1));
    params.entry("hash").or_insert_with(|| json!(""));
    params.entry("isModule").or_insert_with(|| json!(false));
    params.entry("scriptLanguage").or_insert_with(|| json!("JavaScript"));
    params.entry("embedderName").or_insert_with(|| url);
    params.insert("hasSourceURL".to_string(), json!(has_source_url));
}

/// Target scope types -> client scope types. The innermost closure of a
/// frame is its local scope.
fn map_scope_chain(frame: &mut Map<String, Value>) {
    let Some(scopes) = frame.get_mut("scopeChain").and_then(Value::as_array_mut) else {
        return;
    };
    let mut seen_local = false;
    for scope in scopes.iter_mut().filter_map(Value::as_object_mut) {
        let mapped = match scope.get("type").and_then(Value::as_str) {
            Some("closure") if !seen_local => {
                seen_local = true;
                "local"
            }
            Some("closure" | "functionName") => "closure",
            Some("globalLexicalEnvironment") => "script",
            Some("nestedLexical") => "block",
            Some("with") => "with",
            Some("catch") => "catch",
            Some("global") => "global",
            _ => continue,
        };
        scope.insert("type".to_string(), json!(mapped));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translators::test_support::*;

    #[tokio::test]
    async fn test_breakpoint_condition_nested() {
        let (adapter, mut outputs) = adapter_with(DebuggerTranslator);
        adapter
            .on_client_message(request(
                1,
                "Debugger.setBreakpointByUrl",
                json!({"lineNumber": 3, "url": "app.js", "condition": "x > 1"}),
            ))
            .await;

        let sent = sent_request(&mut outputs);
        assert_eq!(sent.method, "Debugger.setBreakpointByUrl");
        assert_eq!(
            sent.params,
            Some(json!({"lineNumber": 3, "url": "app.js", "options": {"condition": "x > 1"}}))
        );
    }

    #[tokio::test]
    async fn test_renames() {
        let (adapter, mut outputs) = adapter_with(DebuggerTranslator);

        adapter
            .on_client_message(request(1, "Debugger.setAsyncCallStackDepth", json!({"maxDepth": 32})))
            .await;
        let sent = sent_request(&mut outputs);
        assert_eq!(sent.method, "Debugger.setAsyncStackTraceDepth");
        assert_eq!(sent.params, Some(json!({"depth": 32})));

        adapter
            .on_client_message(request(2, "Debugger.setSkipAllPauses", json!({"skip": true})))
            .await;
        let sent = sent_request(&mut outputs);
        assert_eq!(sent.method, "Debugger.setBreakpointsActive");
        assert_eq!(sent.params, Some(json!({"active": false})));
    }

    #[tokio::test]
    async fn test_local_answers() {
        let (adapter, mut outputs) = adapter_with(DebuggerTranslator);
        adapter
            .on_client_message(request(4, "Debugger.setBlackboxPatterns", json!({"patterns": []})))
            .await;
        assert_eq!(client_result(&mut outputs), (4, json!({})));
        assert!(outputs.to_target.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_paused_scope_types() {
        let (adapter, mut outputs) = adapter_with(DebuggerTranslator);
        adapter
            .on_target_message(Message::event(
                "Debugger.paused",
                Some(json!({"callFrames": [{"scopeChain": [
                    {"type": "closure"},
                    {"type": "closure"},
                    {"type": "globalLexicalEnvironment"},
                    {"type": "global"}
                ]}], "reason": "other"})),
            ))
            .await;

        let Message::Event(event) = outputs.to_client.try_recv().unwrap() else {
            panic!("Expected event");
        };
        let types: Vec<String> = event.params.unwrap()["callFrames"][0]["scopeChain"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, ["local", "closure", "script", "global"]);
    }

    #[test]
    fn test_script_parsed_defaults() {
        let mut params = json!({"scriptId": "1", "url": "app.js", "startLine": 0});
        fill_script_defaults(params.as_object_mut().unwrap());
        assert_eq!(params["embedderName"], "app.js");
        assert_eq!(params["hasSourceURL"], false);
        assert_eq!(params["isModule"], false);
    }
}
