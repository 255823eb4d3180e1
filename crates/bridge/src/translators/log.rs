//! Log domain
//!
//! The target reports every console and log entry as
//! `Console.messageAdded`. Console API calls become
//! `Runtime.consoleAPICalled`; everything else becomes `Log.entryAdded`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{answer, client_keys, into_request, renamed, target_keys, Translator};
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::Message;

const RENAMED: &[(&str, &str)] = &[
    ("Log.enable", "Console.enable"),
    ("Log.disable", "Console.disable"),
    ("Log.clear", "Console.clearMessages"),
];

const LOCAL: &[&str] = &["Log.startViolationsReport", "Log.stopViolationsReport"];

pub struct LogTranslator;

impl Translator for LogTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        RENAMED
            .iter()
            .map(|(from, _)| FilterKey::client(*from))
            .chain(client_keys(LOCAL))
            .chain(target_keys(&["Console.messageAdded"]))
            .collect()
    }
}

#[async_trait]
impl MessageFilter for LogTranslator {
    fn name(&self) -> &str {
        "log"
    }

    async fn filter(
        &self,
        adapter: &ProtocolAdapter,
        key: &FilterKey,
        msg: Message,
    ) -> Result<Option<Message>> {
        let method = key.method.as_str();
        match key.direction {
            Direction::FromClient => {
                let request = into_request(msg)?;
                if let Some((_, to)) = RENAMED.iter().find(|(from, _)| *from == method) {
                    return Ok(renamed(request, to));
                }
                if LOCAL.contains(&method) {
                    return Ok(answer(adapter, request.id, json!({})));
                }
                Ok(Some(Message::Request(request)))
            }
            Direction::FromTarget if method == "Console.messageAdded" => {
                match msg {
                    Message::Event(event) => {
                        let message = event
                            .params
                            .as_ref()
                            .and_then(|params| params.get("message"))
                            .cloned()
                            .unwrap_or(Value::Null);
                        Ok(Some(translate_console_message(&message)))
                    }
                    other => Ok(Some(other)),
                }
            }
            Direction::FromTarget => Ok(Some(msg)),
        }
    }
}

fn translate_console_message(message: &Value) -> Message {
    let text = |name: &str| message.get(name).and_then(Value::as_str).unwrap_or_default();
    let source = text("source");
    let level = text("level");
    let timestamp = message
        .get("timestamp")
        .cloned()
        .unwrap_or_else(|| json!(0));
    let call_frames = message
        .get("stackTrace")
        .and_then(|trace| trace.get("callFrames").or(Some(trace)))
        .cloned()
        .filter(Value::is_array)
        .unwrap_or_else(|| json!([]));

    if source == "console-api" {
        let args = message
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!([{ "type": "string", "value": text("text") }]));
        return Message::event(
            "Runtime.consoleAPICalled",
            Some(json!({
                "type": console_api_type(text("type"), level),
                "args": args,
                "executionContextId": 1,
                "timestamp": timestamp,
                "stackTrace": { "callFrames": call_frames },
            })),
        );
    }

    let mut entry = json!({
        "source": log_source(source),
        "level": log_level(level),
        "text": text("text"),
        "timestamp": timestamp,
        "url": text("url"),
        "lineNumber": message.get("line").cloned().unwrap_or_else(|| json!(0)),
        "stackTrace": { "callFrames": call_frames },
    });
    if let (Some(request_id), Some(object)) = (message.get("networkRequestId"), entry.as_object_mut()) {
        object.insert("networkRequestId".to_string(), request_id.clone());
    }
    Message::event("Log.entryAdded", Some(json!({ "entry": entry })))
}

fn console_api_type<'a>(kind: &'a str, level: &'a str) -> &'a str {
    match (kind, level) {
        ("log", "error") => "error",
        ("log", "warning") => "warning",
        ("log", "debug") => "debug",
        ("log", "info") => "info",
        ("timing", _) => "timeEnd",
        ("image", _) | ("", _) => "log",
        (kind, _) => kind,
    }
}

fn log_source(source: &str) -> &str {
    match source {
        "xml" | "javascript" | "network" | "storage" | "appcache" | "rendering" | "security"
        | "other" => source,
        "css" => "rendering",
        "content-blocker" => "security",
        _ => "other",
    }
}

fn log_level(level: &str) -> &str {
    match level {
        "warning" => "warning",
        "error" => "error",
        "debug" => "verbose",
        _ => "info",
    }
}
