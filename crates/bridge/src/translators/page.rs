//! Page domain

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use super::{answer, client_keys, into_request, result_mut, target_keys, Translator};
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::Message;

const LOCAL: &[&str] = &[
    "Page.setAdBlockingEnabled",
    "Page.setLifecycleEventsEnabled",
    "Page.setBypassCSP",
    "Page.setDownloadBehavior",
    "Page.addScriptToEvaluateOnNewDocument",
    "Page.removeScriptToEvaluateOnNewDocument",
];

#[derive(Default)]
pub struct PageTranslator {
    next_script_id: AtomicU64,
}

impl Translator for PageTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(LOCAL)
            .chain(client_keys(&["Page.getNavigationHistory"]))
            .chain(target_keys(&["Page.getResourceTree"]))
            .collect()
    }
}

#[async_trait]
impl MessageFilter for PageTranslator {
    fn name(&self) -> &str {
        "page"
    }

    async fn filter(
        &self,
        adapter: &ProtocolAdapter,
        key: &FilterKey,
        mut msg: Message,
    ) -> Result<Option<Message>> {
        match (key.direction, key.method.as_str()) {
            (Direction::FromClient, "Page.getNavigationHistory") => {
                let request = into_request(msg)?;
                let history = navigation_history(adapter).await?;
                Ok(answer(adapter, request.id, history))
            }
            (Direction::FromClient, "Page.addScriptToEvaluateOnNewDocument") => {
                let request = into_request(msg)?;
                let identifier = self.next_script_id.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(answer(
                    adapter,
                    request.id,
                    json!({ "identifier": identifier.to_string() }),
                ))
            }
            (Direction::FromClient, method) if LOCAL.contains(&method) => {
                let request = into_request(msg)?;
                Ok(answer(adapter, request.id, json!({})))
            }
            (Direction::FromTarget, "Page.getResourceTree") => {
                if let Some(tree) = result_mut(&mut msg)
                    .and_then(|result| result.get_mut("frameTree"))
                    .and_then(Value::as_object_mut)
                {
                    patch_frame_tree(tree);
                }
                Ok(Some(msg))
            }
            _ => Ok(Some(msg)),
        }
    }
}

/// The target keeps no history we can read, so report the current entry
async fn navigation_history(adapter: &ProtocolAdapter) -> Result<Value> {
    let (url, title) = futures_util::future::try_join(
        evaluate_string(adapter, "window.location.href"),
        evaluate_string(adapter, "document.title"),
    )
    .await?;

    Ok(json!({
        "currentIndex": 0,
        "entries": [{
            "id": 0,
            "url": url,
            "userTypedURL": url,
            "title": title,
            "transitionType": "typed",
        }],
    }))
}

pub(crate) async fn evaluate_string(adapter: &ProtocolAdapter, expression: &str) -> Result<String> {
    let result = adapter
        .make_request(
            "Runtime.evaluate",
            Some(json!({ "expression": expression, "returnByValue": true })),
        )
        .await?;
    Ok(result
        .pointer("/result/value")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

fn patch_frame_tree(tree: &mut Map<String, Value>) {
    if let Some(frame) = tree.get_mut("frame").and_then(Value::as_object_mut) {
        if !frame.contains_key("securityOrigin") {
            let origin = frame
                .get("url")
                .and_then(Value::as_str)
                .and_then(|url| Url::parse(url).ok())
                .map(|url| url.origin().ascii_serialization())
                .unwrap_or_default();
            frame.insert("securityOrigin".to_string(), json!(origin));
        }
        frame
            .entry("mimeType")
            .or_insert_with(|| json!("text/html"));
    }

    if let Some(children) = tree.get_mut("childFrames").and_then(Value::as_array_mut) {
        for child in children.iter_mut().filter_map(Value::as_object_mut) {
            patch_frame_tree(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translators::test_support::*;

    #[tokio::test]
    async fn test_local_methods_never_reach_target() {
        let (adapter, mut outputs) = adapter_with(PageTranslator::default());

        adapter
            .on_client_message(request(3, "Page.setLifecycleEventsEnabled", json!({"enabled": true})))
            .await;
        assert_eq!(client_result(&mut outputs), (3, json!({})));

        adapter
            .on_client_message(request(4, "Page.addScriptToEvaluateOnNewDocument", json!({"source": "1"})))
            .await;
        assert_eq!(client_result(&mut outputs), (4, json!({"identifier": "1"})));
        assert!(outputs.to_target.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_navigation_history_fans_out() {
        let (adapter, outputs) = adapter_with(PageTranslator::default());
        let mut to_client = outputs.to_client;
        let target = spawn_target(
            adapter.clone(),
            outputs.to_target,
            vec![
                ("Runtime.evaluate", json!({"result": {"type": "string", "value": "https://example.com/"}})),
                ("Runtime.evaluate", json!({"result": {"type": "string", "value": "Example"}})),
            ],
        );

        adapter
            .on_client_message(request(9, "Page.getNavigationHistory", json!({})))
            .await;
        target.await.unwrap();

        match to_client.try_recv().unwrap() {
            Message::Response(response) => {
                let result = response.result.unwrap();
                assert_eq!(result["currentIndex"], 0);
                assert_eq!(result["entries"][0]["url"], "https://example.com/");
                assert_eq!(result["entries"][0]["title"], "Example");
            }
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resource_tree_defaults() {
        let (adapter, mut outputs) = adapter_with(PageTranslator::default());
        adapter
            .on_client_message(request(1, "Page.getResourceTree", json!({})))
            .await;
        let _ = sent_request(&mut outputs);

        adapter
            .on_target_message(Message::result(
                1,
                json!({"frameTree": {
                    "frame": {"id": "1", "url": "https://example.com:8443/a/b"},
                    "childFrames": [{"frame": {"id": "2", "url": "about:blank", "mimeType": "text/plain"}}],
                    "resources": []
                }}),
            ))
            .await;

        let (_, result) = client_result(&mut outputs);
        let frame = &result["frameTree"]["frame"];
        assert_eq!(frame["securityOrigin"], "https://example.com:8443");
        assert_eq!(frame["mimeType"], "text/html");
        assert_eq!(result["frameTree"]["childFrames"][0]["frame"]["mimeType"], "text/plain");
    }
}
