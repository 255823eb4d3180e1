//! Network domain
//!
//! Cookies live on the Page domain on the target side, and deletion there
//! is per cookie, so clearing is a fan-out.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::io::StreamStore;
use super::{
    answer, client_keys, into_request, param, renamed, required_str, result_mut, target_keys,
    Translator,
};
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::{params_mut, Message};

const CLIENT: &[&str] = &[
    "Network.getCookies",
    "Network.getAllCookies",
    "Network.deleteCookie",
    "Network.deleteCookies",
    "Network.clearBrowserCookies",
    "Network.setCacheDisabled",
    "Network.setUserAgentOverride",
    "Network.canEmulateNetworkConditions",
    "Network.emulateNetworkConditions",
    "Network.loadNetworkResource",
];

pub struct NetworkTranslator {
    streams: Arc<StreamStore>,
}

impl NetworkTranslator {
    pub fn new(streams: Arc<StreamStore>) -> Self {
        Self { streams }
    }

    async fn load_network_resource(&self, adapter: &ProtocolAdapter, frame_id: &str, url: &str) -> Value {
        let content = adapter
            .make_request(
                "Page.getResourceContent",
                Some(json!({ "frameId": frame_id, "url": url })),
            )
            .await;

        match content {
            Ok(content) => {
                let data = content
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let base64_encoded = content
                    .get("base64Encoded")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let handle = self.streams.create(data, base64_encoded);
                json!({ "resource": { "success": true, "httpStatusCode": 200, "stream": handle } })
            }
            Err(e) => {
                tracing::debug!("[NetworkTranslator] Could not load {}: {}", url, e);
                json!({ "resource": {
                    "success": false,
                    "netError": -2,
                    "netErrorName": "net::ERR_FAILED",
                }})
            }
        }
    }
}

impl Translator for NetworkTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(CLIENT)
            .chain(target_keys(&["Network.getCookies", "Network.getAllCookies"]))
            .collect()
    }
}

#[async_trait]
impl MessageFilter for NetworkTranslator {
    fn name(&self) -> &str {
        "network"
    }

    async fn filter(
        &self,
        adapter: &ProtocolAdapter,
        key: &FilterKey,
        mut msg: Message,
    ) -> Result<Option<Message>> {
        match (key.direction, key.method.as_str()) {
            (Direction::FromClient, "Network.getCookies" | "Network.getAllCookies") => {
                Ok(renamed(into_request(msg)?, "Page.getCookies"))
            }
            (Direction::FromTarget, "Network.getCookies" | "Network.getAllCookies") => {
                if let Some(cookies) = result_mut(&mut msg)
                    .and_then(|result| result.get_mut("cookies"))
                    .and_then(Value::as_array_mut)
                {
                    for cookie in cookies.iter_mut().filter_map(Value::as_object_mut) {
                        reshape_cookie(cookie);
                    }
                }
                Ok(Some(msg))
            }
            (Direction::FromClient, "Network.deleteCookie" | "Network.deleteCookies") => {
                let mut request = into_request(msg)?;
                let name = required_str(&request, "name")?.to_string();
                let url = match param(&request, "url").and_then(Value::as_str) {
                    Some(url) => url.to_string(),
                    None => {
                        let domain = param(&request, "domain").and_then(Value::as_str).unwrap_or_default();
                        let path = param(&request, "path").and_then(Value::as_str).unwrap_or("/");
                        cookie_url(domain, path, false)
                    }
                };
                request.params = Some(json!({ "cookieName": name, "url": url }));
                Ok(renamed(request, "Page.deleteCookie"))
            }
            (Direction::FromClient, "Network.clearBrowserCookies") => {
                let request = into_request(msg)?;
                clear_cookies(adapter).await?;
                Ok(answer(adapter, request.id, json!({})))
            }
            (Direction::FromClient, "Network.setCacheDisabled") => {
                let mut request = into_request(msg)?;
                let params = params_mut(&mut request.params)?;
                super::rename_field(params, "cacheDisabled", "disabled");
                Ok(renamed(request, "Network.setResourceCachingDisabled"))
            }
            (Direction::FromClient, "Network.setUserAgentOverride") => {
                let mut request = into_request(msg)?;
                let user_agent = required_str(&request, "userAgent")?.to_string();
                request.params = Some(json!({ "value": user_agent }));
                Ok(renamed(request, "Page.overrideUserAgent"))
            }
            (Direction::FromClient, "Network.canEmulateNetworkConditions") => {
                let request = into_request(msg)?;
                Ok(answer(adapter, request.id, json!({ "result": false })))
            }
            (Direction::FromClient, "Network.emulateNetworkConditions") => {
                let request = into_request(msg)?;
                Ok(answer(adapter, request.id, json!({})))
            }
            (Direction::FromClient, "Network.loadNetworkResource") => {
                let request = into_request(msg)?;
                let frame_id = param(&request, "frameId").and_then(Value::as_str).unwrap_or_default();
                let url = required_str(&request, "url")?;
                let result = self.load_network_resource(adapter, frame_id, url).await;
                Ok(answer(adapter, request.id, result))
            }
            _ => Ok(Some(msg)),
        }
    }
}

fn cookie_url(domain: &str, path: &str, secure: bool) -> String {
    let scheme = if secure { "https" } else { "http" };
    format!("{}://{}{}", scheme, domain.trim_start_matches('.'), path)
}

/// Target cookies carry `expires` in milliseconds and no priority
fn reshape_cookie(cookie: &mut Map<String, Value>) {
    let session = cookie.get("session").and_then(Value::as_bool).unwrap_or(false);
    let expires = if session {
        -1.0
    } else {
        cookie.get("expires").and_then(Value::as_f64).unwrap_or(0.0) / 1000.0
    };
    cookie.insert("expires".to_string(), json!(expires));

    if cookie.get("sameSite").and_then(Value::as_str) == Some("None") {
        cookie.remove("sameSite");
    }
    cookie.entry("priority").or_insert_with(|| json!("Medium"));
    cookie.entry("sameParty").or_insert_with(|| json!(false));
    if !cookie.contains_key("size") {
        let size = ["name", "value"]
            .iter()
            .filter_map(|field| cookie.get(*field).and_then(Value::as_str))
            .map(str::len)
            .sum::<usize>();
        cookie.insert("size".to_string(), json!(size));
    }
}

async fn clear_cookies(adapter: &ProtocolAdapter) -> Result<()> {
    let result = adapter.make_request("Page.getCookies", None).await?;
    let cookies = result
        .get("cookies")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let deletions = cookies.iter().filter_map(|cookie| {
        let name = cookie.get("name")?.as_str()?;
        let domain = cookie.get("domain").and_then(Value::as_str).unwrap_or_default();
        let path = cookie.get("path").and_then(Value::as_str).unwrap_or("/");
        let secure = cookie.get("secure").and_then(Value::as_bool).unwrap_or(false);
        Some(adapter.make_request(
            "Page.deleteCookie",
            Some(json!({ "cookieName": name, "url": cookie_url(domain, path, secure) })),
        ))
    });

    for outcome in futures_util::future::join_all(deletions).await {
        if let Err(e) = outcome {
            tracing::debug!("[NetworkTranslator] Cookie deletion failed: {}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translators::test_support::*;

    fn translator() -> NetworkTranslator {
        NetworkTranslator::new(Arc::new(StreamStore::default()))
    }

    #[tokio::test]
    async fn test_get_cookies_renamed_and_reshaped() {
        let (adapter, mut outputs) = adapter_with(translator());
        adapter
            .on_client_message(request(1, "Network.getCookies", json!({})))
            .await;
        assert_eq!(sent_request(&mut outputs).method, "Page.getCookies");

        adapter
            .on_target_message(Message::result(
                1,
                json!({"cookies": [
                    {"name": "a", "value": "1", "domain": "example.com", "path": "/",
                     "expires": 1700000000000.0, "session": false, "sameSite": "None"},
                    {"name": "b", "value": "22", "domain": "example.com", "path": "/",
                     "expires": 0, "session": true, "sameSite": "Lax"}
                ]}),
            ))
            .await;

        let (id, result) = client_result(&mut outputs);
        assert_eq!(id, 1);
        let cookies = result["cookies"].as_array().unwrap();
        assert_eq!(cookies[0]["expires"], json!(1700000000.0));
        assert!(cookies[0].get("sameSite").is_none());
        assert_eq!(cookies[0]["priority"], "Medium");
        assert_eq!(cookies[0]["size"], 2);
        assert_eq!(cookies[1]["expires"], json!(-1.0));
        assert_eq!(cookies[1]["sameSite"], "Lax");
    }

    #[tokio::test]
    async fn test_delete_cookies_builds_url() {
        let (adapter, mut outputs) = adapter_with(translator());
        adapter
            .on_client_message(request(
                2,
                "Network.deleteCookies",
                json!({"name": "sid", "domain": ".example.com", "path": "/app"}),
            ))
            .await;

        let sent = sent_request(&mut outputs);
        assert_eq!(sent.method, "Page.deleteCookie");
        assert_eq!(
            sent.params,
            Some(json!({"cookieName": "sid", "url": "http://example.com/app"}))
        );
    }

    #[tokio::test]
    async fn test_clear_browser_cookies_deletes_each() {
        let (adapter, outputs) = adapter_with(translator());
        let mut to_client = outputs.to_client;
        let target = spawn_target(
            adapter.clone(),
            outputs.to_target,
            vec![
                ("Page.getCookies", json!({"cookies": [
                    {"name": "a", "domain": "example.com", "path": "/", "secure": true},
                    {"name": "b", "domain": ".other.org", "path": "/x"}
                ]})),
                ("Page.deleteCookie", json!({})),
                ("Page.deleteCookie", json!({})),
            ],
        );

        adapter
            .on_client_message(request(5, "Network.clearBrowserCookies", json!({})))
            .await;

        let seen = target.await.unwrap();
        assert_eq!(
            seen[1].params,
            Some(json!({"cookieName": "a", "url": "https://example.com/"}))
        );
        assert_eq!(
            seen[2].params,
            Some(json!({"cookieName": "b", "url": "http://other.org/x"}))
        );
        assert!(matches!(to_client.try_recv().unwrap(), Message::Response(r) if r.id == 5));
    }

    #[tokio::test]
    async fn test_renames_and_capabilities() {
        let (adapter, mut outputs) = adapter_with(translator());

        adapter
            .on_client_message(request(1, "Network.setCacheDisabled", json!({"cacheDisabled": true})))
            .await;
        let sent = sent_request(&mut outputs);
        assert_eq!(sent.method, "Network.setResourceCachingDisabled");
        assert_eq!(sent.params, Some(json!({"disabled": true})));

        adapter
            .on_client_message(request(2, "Network.setUserAgentOverride", json!({"userAgent": "UA"})))
            .await;
        let sent = sent_request(&mut outputs);
        assert_eq!(sent.method, "Page.overrideUserAgent");
        assert_eq!(sent.params, Some(json!({"value": "UA"})));

        adapter
            .on_client_message(request(3, "Network.canEmulateNetworkConditions", json!({})))
            .await;
        assert_eq!(client_result(&mut outputs), (3, json!({"result": false})));
    }

    #[tokio::test]
    async fn test_load_network_resource_opens_stream() {
        let streams = Arc::new(StreamStore::default());
        let (adapter, outputs) = adapter_with(NetworkTranslator::new(streams.clone()));
        let mut to_client = outputs.to_client;
        let target = spawn_target(
            adapter.clone(),
            outputs.to_target,
            vec![(
                "Page.getResourceContent",
                json!({"content": "body {}", "base64Encoded": false}),
            )],
        );

        adapter
            .on_client_message(request(
                8,
                "Network.loadNetworkResource",
                json!({"frameId": "F", "url": "https://example.com/a.css", "options": {}}),
            ))
            .await;
        target.await.unwrap();

        let Message::Response(response) = to_client.try_recv().unwrap() else {
            panic!("Expected response");
        };
        let resource = &response.result.unwrap()["resource"];
        assert_eq!(resource["success"], true);
        let handle = resource["stream"].as_str().unwrap();
        assert!(streams.contains(handle));
    }
}
