//! Input domain
//!
//! The target has no input injection, so mouse and touch input is replayed
//! by evaluating a script that dispatches synthetic DOM events at the point.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{answer, client_keys, into_request, param, required_str, Translator};
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::{CDPRequest, Message};

pub struct InputTranslator;

impl Translator for InputTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(&[
            "Input.emulateTouchFromMouseEvent",
            "Input.dispatchMouseEvent",
            "Input.dispatchKeyEvent",
        ])
        .collect()
    }
}

#[async_trait]
impl MessageFilter for InputTranslator {
    fn name(&self) -> &str {
        "input"
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

        let touch = match key.method.as_str() {
            "Input.emulateTouchFromMouseEvent" => true,
            "Input.dispatchMouseEvent" => false,
            "Input.dispatchKeyEvent" => return Ok(answer(adapter, request.id, json!({}))),
            _ => return Ok(Some(Message::Request(request))),
        };

        if let Some(expression) = dispatch_script(&request, touch)? {
            adapter
                .make_request(
                    "Runtime.evaluate",
                    Some(json!({ "expression": expression, "returnByValue": true })),
                )
                .await?;
        }
        Ok(answer(adapter, request.id, json!({})))
    }
}

fn number(request: &CDPRequest, name: &str) -> f64 {
    param(request, name).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Script replaying one mouse event, or `None` for events with no DOM
/// counterpart
pub(crate) fn dispatch_script(request: &CDPRequest, touch: bool) -> Result<Option<String>> {
    let kind = required_str(request, "type")?;
    let (x, y) = (number(request, "x"), number(request, "y"));

    if kind == "mouseWheel" {
        let (dx, dy) = (number(request, "deltaX"), number(request, "deltaY"));
        return Ok(Some(format!("window.scrollBy({}, {})", dx, dy)));
    }

    let events: &[&str] = match (kind, touch) {
        ("mousePressed", false) => &["mousedown"],
        ("mouseReleased", false) => &["mouseup", "click"],
        ("mouseMoved", false) => &["mousemove"],
        ("mousePressed", true) => &["touchstart"],
        ("mouseReleased", true) => &["touchend", "click"],
        ("mouseMoved", true) => &["touchmove"],
        _ => return Ok(None),
    };

    let dispatches: String = events
        .iter()
        .map(|name| {
            format!(
                "t.dispatchEvent(new MouseEvent('{}', {{bubbles: true, cancelable: true, clientX: {}, clientY: {}}}));",
                name, x, y
            )
        })
        .collect();

    Ok(Some(format!(
        "(function() {{ var t = document.elementFromPoint({}, {}) || document.body; {} }})()",
        x, y, dispatches
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translators::test_support::*;

    #[test]
    fn test_mouse_release_clicks() {
        let script = dispatch_script(
            &request(1, "Input.dispatchMouseEvent", json!({"type": "mouseReleased", "x": 10, "y": 20})),
            false,
        )
        .unwrap()
        .unwrap();
        assert!(script.contains("elementFromPoint(10, 20)"));
        assert!(script.contains("'mouseup'"));
        assert!(script.contains("'click'"));
    }

    #[test]
    fn test_touch_and_wheel() {
        let script = dispatch_script(
            &request(1, "Input.emulateTouchFromMouseEvent", json!({"type": "mousePressed", "x": 1, "y": 2})),
            true,
        )
        .unwrap()
        .unwrap();
        assert!(script.contains("'touchstart'"));

        let script = dispatch_script(
            &request(1, "Input.emulateTouchFromMouseEvent", json!({"type": "mouseWheel", "deltaX": 0, "deltaY": 120})),
            true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(script, "window.scrollBy(0, 120)");
    }

    #[tokio::test]
    async fn test_dispatch_evaluates_then_answers() {
        let (adapter, outputs) = adapter_with(InputTranslator);
        let mut to_client = outputs.to_client;
        let target = spawn_target(
            adapter.clone(),
            outputs.to_target,
            vec![("Runtime.evaluate", json!({"result": {"type": "undefined"}}))],
        );

        adapter
            .on_client_message(request(
                6,
                "Input.dispatchMouseEvent",
                json!({"type": "mousePressed", "x": 5, "y": 5, "button": "left"}),
            ))
            .await;
        target.await.unwrap();

        assert!(matches!(to_client.try_recv().unwrap(), Message::Response(r) if r.id == 6));
    }

    #[tokio::test]
    async fn test_key_events_are_local() {
        let (adapter, mut outputs) = adapter_with(InputTranslator);
        adapter
            .on_client_message(request(2, "Input.dispatchKeyEvent", json!({"type": "keyDown"})))
            .await;
        assert_eq!(client_result(&mut outputs), (2, json!({})));
    }
}
