//! WebView classification and page listing

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::adb::AdbClient;
use super::parse::{PackageEntry, ProcessEntry};
use super::AndroidBridge;
use crate::error::Result;
use crate::model::{App, Target, TargetType};
use crate::tracker::SnapshotSource;

pub const CHROME_SOCKET: &str = "chrome_devtools_remote";
pub const CHROME_PACKAGE: &str = "com.android.chrome";
const WEBVIEW_SOCKET_PREFIX: &str = "webview_devtools_remote_";
const DEVTOOLS_SOCKET_SUFFIX: &str = "_devtools_remote";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebViewType {
    /// The system browser
    Chrome,
    /// An app's embedded WebView
    WebView,
    /// Crosswalk or another hybrid runtime naming its socket after the package
    Crosswalk,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebView {
    pub device_id: String,
    pub socket: String,
    pub webview_type: WebViewType,
    pub package_name: Option<String>,
    pub version_name: Option<String>,
}

/// Decide what kind of debuggable endpoint `socket` is and who owns it
pub fn classify_socket(socket: &str, processes: &[ProcessEntry]) -> (WebViewType, Option<String>) {
    if socket == CHROME_SOCKET {
        return (WebViewType::Chrome, Some(CHROME_PACKAGE.to_string()));
    }

    if let Some(pid) = socket.strip_prefix(WEBVIEW_SOCKET_PREFIX) {
        let package = pid.parse::<u32>().ok().and_then(|pid| {
            processes
                .iter()
                .find(|p| p.pid == pid)
                .map(|p| p.name.clone())
        });
        return (WebViewType::WebView, package);
    }

    if let Some(package) = socket.strip_suffix(DEVTOOLS_SOCKET_SUFFIX) {
        let package = (!package.is_empty()).then(|| package.to_string());
        return (WebViewType::Crosswalk, package);
    }

    (WebViewType::Unknown, None)
}

pub(crate) fn join_webviews(
    device_id: &str,
    sockets: Vec<String>,
    processes: &[ProcessEntry],
    packages: &[PackageEntry],
) -> Vec<WebView> {
    sockets
        .into_iter()
        .filter(|socket| socket.contains("devtools_remote"))
        .map(|socket| {
            let (webview_type, package_name) = classify_socket(&socket, processes);
            let version_name = package_name.as_ref().and_then(|name| {
                packages
                    .iter()
                    .find(|p| &p.package_name == name)
                    .and_then(|p| p.version_name.clone())
            });
            WebView {
                device_id: device_id.to_string(),
                socket,
                webview_type,
                package_name,
                version_name,
            }
        })
        .collect()
}

/// Entry of the `/json/list` endpoint served on a forwarded socket
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageListing {
    pub id: String,
    #[serde(rename = "type", default)]
    pub page_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

pub(crate) fn listing_to_targets(webview: &WebView, pages: Vec<PageListing>) -> Vec<Target> {
    pages
        .into_iter()
        .enumerate()
        .map(|(index, page)| {
            let target_type = match page.page_type.as_str() {
                "page" => TargetType::Page,
                "service_worker" => TargetType::ServiceWorker,
                _ => TargetType::Unknown,
            };
            Target {
                id: Target::composite_id(&webview.device_id, &webview.socket, &page.id),
                page_id: index as u64 + 1,
                app_id: webview.socket.clone(),
                device_id: webview.device_id.clone(),
                title: page.title,
                url: page.url,
                target_type,
                // A page already attached elsewhere has no debugger url
                debuggable: page.web_socket_debugger_url.is_some(),
                web_socket_debugger_url: page.web_socket_debugger_url,
            }
        })
        .collect()
}

pub(crate) fn webview_to_app(webview: &WebView, targets: Vec<Target>) -> App {
    let bundle_id = webview
        .package_name
        .clone()
        .unwrap_or_else(|| webview.socket.clone());
    let name = match &webview.version_name {
        Some(version) => format!("{} ({})", bundle_id, version),
        None => bundle_id.clone(),
    };
    App {
        id: webview.socket.clone(),
        bundle_id,
        name,
        host_app_id: None,
        is_active: true,
        is_proxy: webview.webview_type == WebViewType::WebView,
        device_id: webview.device_id.clone(),
        targets,
    }
}

/// Apps (one per debuggable socket) and their pages on one Android device
pub struct WebViewSource<A: AdbClient> {
    bridge: Arc<AndroidBridge<A>>,
    device_id: String,
    name: String,
}

impl<A: AdbClient> WebViewSource<A> {
    pub fn new(bridge: Arc<AndroidBridge<A>>, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            bridge,
            name: format!("webviews:{}", device_id),
            device_id,
        }
    }
}

#[async_trait]
impl<A: AdbClient> SnapshotSource for WebViewSource<A> {
    type Item = App;

    fn name(&self) -> &str {
        &self.name
    }

    async fn snapshot(&self) -> Result<Vec<App>> {
        let webviews = self.bridge.find_webviews(&self.device_id).await?;

        let listings = futures_util::future::join_all(
            webviews.iter().map(|webview| self.bridge.list_pages(webview)),
        )
        .await;

        Ok(webviews
            .iter()
            .zip(listings)
            .map(|(webview, pages)| {
                let targets = pages.unwrap_or_else(|e| {
                    tracing::debug!(
                        "[WebViewSource] No page listing for {}: {}",
                        webview.socket,
                        e
                    );
                    Vec::new()
                });
                webview_to_app(webview, targets)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processes() -> Vec<ProcessEntry> {
        vec![ProcessEntry {
            pid: 1234,
            name: "com.example.app".to_string(),
        }]
    }

    #[test]
    fn test_classify_chrome() {
        assert_eq!(
            classify_socket("chrome_devtools_remote", &processes()),
            (WebViewType::Chrome, Some("com.android.chrome".to_string()))
        );
    }

    #[test]
    fn test_classify_webview_by_pid() {
        assert_eq!(
            classify_socket("webview_devtools_remote_1234", &processes()),
            (WebViewType::WebView, Some("com.example.app".to_string()))
        );
        // Unknown pid still classifies, without a package
        assert_eq!(
            classify_socket("webview_devtools_remote_999", &processes()),
            (WebViewType::WebView, None)
        );
    }

    #[test]
    fn test_classify_crosswalk() {
        assert_eq!(
            classify_socket("com.example.hybrid_devtools_remote", &processes()),
            (WebViewType::Crosswalk, Some("com.example.hybrid".to_string()))
        );
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(
            classify_socket("devtools_remote_weird", &processes()),
            (WebViewType::Unknown, None)
        );
    }

    #[test]
    fn test_join_looks_up_versions() {
        let packages = vec![PackageEntry {
            package_name: "com.example.app".to_string(),
            version_name: Some("1.2.3".to_string()),
        }];
        let webviews = join_webviews(
            "serial",
            vec![
                "webview_devtools_remote_1234".to_string(),
                "com.example.hybrid_devtools_remote".to_string(),
                "some_unrelated_socket".to_string(),
            ],
            &processes(),
            &packages,
        );

        assert_eq!(webviews.len(), 2);
        assert_eq!(webviews[0].version_name.as_deref(), Some("1.2.3"));
        // Package not installed-listed: version left empty, call still succeeds
        assert_eq!(webviews[1].package_name.as_deref(), Some("com.example.hybrid"));
        assert_eq!(webviews[1].version_name, None);
    }

    #[test]
    fn test_listing_to_targets() {
        let webview = WebView {
            device_id: "serial".to_string(),
            socket: "chrome_devtools_remote".to_string(),
            webview_type: WebViewType::Chrome,
            package_name: Some("com.android.chrome".to_string()),
            version_name: None,
        };
        let pages: Vec<PageListing> = serde_json::from_str(
            r#"[
                {"id": "A1", "type": "page", "title": "Example", "url": "https://example.com",
                 "webSocketDebuggerUrl": "ws://127.0.0.1:4000/devtools/page/A1"},
                {"id": "B2", "type": "service_worker", "title": "", "url": "https://example.com/sw.js"}
            ]"#,
        )
        .unwrap();

        let targets = listing_to_targets(&webview, pages);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, "serial|chrome_devtools_remote|A1");
        assert_eq!(targets[0].target_type, TargetType::Page);
        assert!(targets[0].debuggable);
        assert_eq!(targets[1].target_type, TargetType::ServiceWorker);
        assert!(!targets[1].debuggable);
    }
}
