//! iOS webinspector connection and inventory
//!
//! ```text
//! device stream ──► RpcFrameCodec ──► RpcMessageHandler ──► RpcEvent
//!                                                             │
//!                     ┌───────────────────────────────────────┤
//!                     ▼                                       ▼
//!            InspectorInventory                      page routes (sender id)
//!         (TrackedMap<App>, polled)                 PageStream / PageSink
//! ```
//!
//! All outbound traffic goes through one command channel drained by a
//! single writer task, so envelopes leave in the order they were queued.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use uuid::Uuid;

use discovery::{App, DiscoveryError, SnapshotSource, Target, TrackedMap};

use crate::error::{BridgeError, Result};
use crate::protocol::Message;
use crate::rpc::{
    RpcApplication, RpcCommand, RpcEvent, RpcFrameCodec, RpcMessageBuilder, RpcMessageHandler,
    RpcMode, RpcPage,
};

#[derive(Default)]
struct InventoryState {
    apps: BTreeMap<String, RpcApplication>,
    pages: HashMap<String, Vec<RpcPage>>,
}

struct InventoryInner {
    device_id: String,
    name: String,
    state: Mutex<InventoryState>,
    items: Arc<TrackedMap<App>>,
    commands: mpsc::UnboundedSender<RpcCommand>,
}

/// Applications and pages of one device, assembled from RPC events.
///
/// Cloning shares the same inventory.
#[derive(Clone)]
pub struct InspectorInventory {
    inner: Arc<InventoryInner>,
}

impl InspectorInventory {
    pub fn new(device_id: impl Into<String>, commands: mpsc::UnboundedSender<RpcCommand>) -> Self {
        let device_id = device_id.into();
        Self {
            inner: Arc::new(InventoryInner {
                name: format!("inspector:{}", device_id),
                device_id,
                state: Mutex::new(InventoryState::default()),
                items: Arc::new(TrackedMap::new()),
                commands,
            }),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn items(&self) -> &Arc<TrackedMap<App>> {
        &self.inner.items
    }

    /// Fold one event into the inventory. Returns false for events that do
    /// not describe apps or pages.
    pub fn apply(&self, event: &RpcEvent) -> bool {
        let mut listings = Vec::new();
        {
            let mut state = self.inner.state.lock();
            match event {
                RpcEvent::ApplicationList(apps) => {
                    state.apps = apps.iter().map(|a| (a.id.clone(), a.clone())).collect();
                    let InventoryState { apps, pages } = &mut *state;
                    pages.retain(|id, _| apps.contains_key(id));
                    listings.extend(apps.keys().cloned());
                }
                RpcEvent::ApplicationConnected(app) => {
                    state.apps.insert(app.id.clone(), app.clone());
                    listings.push(app.id.clone());
                }
                RpcEvent::ApplicationUpdated(app) => {
                    state.apps.insert(app.id.clone(), app.clone());
                }
                RpcEvent::ApplicationDisconnected(app) => {
                    state.apps.remove(&app.id);
                    state.pages.remove(&app.id);
                }
                RpcEvent::Listing { app_id, pages } => {
                    if !state.apps.contains_key(app_id) {
                        tracing::debug!(
                            "[InspectorInventory] Listing for unknown app {}, ignored",
                            app_id
                        );
                        return true;
                    }
                    state.pages.insert(app_id.clone(), pages.clone());
                }
                _ => return false,
            }
        }

        for app_id in listings {
            self.request(RpcCommand::ForwardGetListing { app_id });
        }
        self.inner.items.update_set(self.apps());
        true
    }

    /// Current apps with their pages as targets
    pub fn apps(&self) -> Vec<App> {
        let state = self.inner.state.lock();
        let device_id = &self.inner.device_id;
        state
            .apps
            .values()
            .map(|app| {
                let targets = state
                    .pages
                    .get(&app.id)
                    .map(|pages| {
                        pages
                            .iter()
                            .map(|page| page_to_target(device_id, &app.id, page))
                            .collect()
                    })
                    .unwrap_or_default();
                App {
                    id: app.id.clone(),
                    bundle_id: app.bundle_id.clone(),
                    name: app.name.clone(),
                    host_app_id: app.host_id.clone(),
                    is_active: app.is_active,
                    is_proxy: app.is_proxy,
                    device_id: device_id.clone(),
                    targets,
                }
            })
            .collect()
    }

    /// Forget everything, e.g. after the device went away
    pub fn clear(&self) {
        *self.inner.state.lock() = InventoryState::default();
        self.inner.items.clear();
    }

    fn request(&self, command: RpcCommand) -> bool {
        self.inner.commands.send(command).is_ok()
    }
}

fn page_to_target(device_id: &str, app_id: &str, page: &RpcPage) -> Target {
    Target {
        id: Target::composite_id(device_id, app_id, page.page_id),
        page_id: page.page_id,
        app_id: app_id.to_string(),
        device_id: device_id.to_string(),
        title: page.title.clone(),
        url: page.url.clone(),
        target_type: page.page_type,
        // Another inspector already holds the page
        debuggable: page.connection_id.is_none(),
        web_socket_debugger_url: None,
    }
}

#[async_trait]
impl SnapshotSource for InspectorInventory {
    type Item = App;

    fn name(&self) -> &str {
        &self.inner.name
    }

    /// Ask the device for fresh data and report what is known so far. The
    /// answers arrive as events and are folded in by `apply`.
    async fn snapshot(&self) -> discovery::Result<Vec<App>> {
        if !self.request(RpcCommand::GetConnectedApplications) {
            return Err(DiscoveryError::Source(format!(
                "inspector connection to {} is closed",
                self.inner.device_id
            )));
        }
        let app_ids: Vec<String> = self.inner.state.lock().apps.keys().cloned().collect();
        for app_id in app_ids {
            self.request(RpcCommand::ForwardGetListing { app_id });
        }
        Ok(self.apps())
    }
}

struct PageRoute {
    tx: mpsc::UnboundedSender<Message>,
    /// Current target in target-based mode
    target_id: Arc<Mutex<Option<String>>>,
}

/// One framed webinspector connection to a device
pub struct InspectorConnection {
    builder: Arc<RpcMessageBuilder>,
    commands: mpsc::UnboundedSender<RpcCommand>,
    inventory: InspectorInventory,
    routes: Arc<DashMap<String, PageRoute>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl InspectorConnection {
    /// Frame `stream`, start the reader and writer tasks and send the
    /// identifier/application-list handshake.
    pub fn connect<S>(stream: S, device_id: impl Into<String>, mode: Arc<RpcMode>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connection_id = Uuid::now_v7().to_string();
        let builder = Arc::new(RpcMessageBuilder::new(connection_id, mode.clone()));
        let handler = RpcMessageHandler::new(mode);
        let (commands, mut command_rx) = mpsc::unbounded_channel::<RpcCommand>();
        let inventory = InspectorInventory::new(device_id, commands.clone());
        let routes: Arc<DashMap<String, PageRoute>> = Arc::new(DashMap::new());

        let (mut sink, mut frames) = Framed::new(stream, RpcFrameCodec).split();

        let writer = {
            let builder = builder.clone();
            tokio::spawn(async move {
                while let Some(command) = command_rx.recv().await {
                    let envelope = match builder.build(command) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            tracing::warn!("[InspectorConnection] Cannot encode command: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(envelope).await {
                        tracing::warn!("[InspectorConnection] Write failed: {}", e);
                        break;
                    }
                }
            })
        };

        let reader = {
            let inventory = inventory.clone();
            let routes = routes.clone();
            tokio::spawn(async move {
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(envelope) => {
                            if let Some(event) = handler.handle_message(&envelope) {
                                route_event(&inventory, &routes, event);
                            }
                        }
                        Err(e) => {
                            tracing::warn!("[InspectorConnection] Read failed: {}", e);
                            break;
                        }
                    }
                }
                tracing::info!(
                    "[InspectorConnection] Device {} disconnected",
                    inventory.device_id()
                );
                // Dropping the senders ends every page stream
                routes.clear();
                inventory.clear();
            })
        };

        let _ = commands.send(RpcCommand::ReportIdentifier);
        let _ = commands.send(RpcCommand::GetConnectedApplications);

        Self {
            builder,
            commands,
            inventory,
            routes,
            reader,
            writer,
        }
    }

    pub fn connection_id(&self) -> &str {
        self.builder.connection_id()
    }

    pub fn inventory(&self) -> &InspectorInventory {
        &self.inventory
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_finished() || self.commands.is_closed()
    }

    /// Attach to a page. Messages written to the sink are forwarded to the
    /// page; its traffic comes out of the stream.
    pub fn open_page(
        &self,
        app_id: impl Into<String>,
        page_id: u64,
    ) -> Result<(PageStream, PageSink)> {
        let app_id = app_id.into();
        let sender_id = Uuid::now_v7().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let target_id = Arc::new(Mutex::new(None));

        self.routes.insert(
            sender_id.clone(),
            PageRoute {
                tx,
                target_id: target_id.clone(),
            },
        );
        let setup = RpcCommand::ForwardSocketSetup {
            app_id: app_id.clone(),
            page_id,
            sender_id: sender_id.clone(),
        };
        if self.commands.send(setup).is_err() {
            self.routes.remove(&sender_id);
            return Err(BridgeError::Closed);
        }
        tracing::debug!(
            "[InspectorConnection] Opened page {}:{} as {}",
            app_id,
            page_id,
            sender_id
        );

        let sink = PageSink {
            app_id,
            page_id,
            sender_id,
            target_id,
            commands: self.commands.clone(),
            routes: self.routes.clone(),
            closed: false,
        };
        Ok((PageStream { rx }, sink))
    }

    /// Toggle the device-side highlight of a page
    pub fn indicate_webview(
        &self,
        app_id: impl Into<String>,
        page_id: u64,
        enabled: bool,
    ) -> Result<()> {
        self.commands
            .send(RpcCommand::ForwardIndicateWebView {
                app_id: app_id.into(),
                page_id,
                enabled,
            })
            .map_err(|_| BridgeError::Closed)
    }

    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
        self.routes.clear();
    }
}

impl Drop for InspectorConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn route_event(
    inventory: &InspectorInventory,
    routes: &DashMap<String, PageRoute>,
    event: RpcEvent,
) {
    if inventory.apply(&event) {
        return;
    }

    match event {
        RpcEvent::Data {
            sender_id, message, ..
        } => match routes.get(&sender_id) {
            Some(route) => {
                let _ = route.tx.send(message);
            }
            None => tracing::debug!(
                "[InspectorConnection] Data for unknown connection {}, dropped",
                sender_id
            ),
        },
        RpcEvent::TargetCreated {
            sender_id,
            target_id,
            provisional,
            ..
        } => {
            if let Some(route) = routes.get(&sender_id) {
                let mut current = route.target_id.lock();
                // A provisional target only becomes current once committed
                if current.is_none() || !provisional {
                    *current = Some(target_id);
                }
            }
        }
        RpcEvent::TargetCommitted {
            sender_id,
            new_target_id,
            ..
        } => {
            if let Some(route) = routes.get(&sender_id) {
                *route.target_id.lock() = Some(new_target_id);
            }
        }
        RpcEvent::TargetDestroyed {
            sender_id,
            target_id,
            ..
        } => {
            if let Some(route) = routes.get(&sender_id) {
                let mut current = route.target_id.lock();
                if current.as_deref() == Some(target_id.as_str()) {
                    *current = None;
                }
            }
        }
        RpcEvent::Setup(info) => {
            tracing::debug!("[InspectorConnection] Setup: {:?}", info);
        }
        _ => {}
    }
}

/// Inbound traffic of one attached page
pub struct PageStream {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Stream for PageStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

/// Outbound side of one attached page. Closing it detaches from the page.
pub struct PageSink {
    app_id: String,
    page_id: u64,
    sender_id: String,
    target_id: Arc<Mutex<Option<String>>>,
    commands: mpsc::UnboundedSender<RpcCommand>,
    routes: Arc<DashMap<String, PageRoute>>,
    closed: bool,
}

impl PageSink {
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn target_id(&self) -> Option<String> {
        self.target_id.lock().clone()
    }

    fn detach(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.routes.remove(&self.sender_id);
        let _ = self.commands.send(RpcCommand::ForwardDidClose {
            app_id: self.app_id.clone(),
            page_id: self.page_id,
            sender_id: self.sender_id.clone(),
        });
    }
}

impl Sink<Message> for PageSink {
    type Error = BridgeError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.closed || self.commands.is_closed() {
            return Poll::Ready(Err(BridgeError::Closed));
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, message: Message) -> Result<()> {
        if self.closed {
            return Err(BridgeError::Closed);
        }
        self.commands
            .send(RpcCommand::ForwardSocketData {
                app_id: self.app_id.clone(),
                page_id: self.page_id,
                sender_id: self.sender_id.clone(),
                target_id: self.target_id(),
                message,
            })
            .map_err(|_| BridgeError::Closed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.detach();
        Poll::Ready(Ok(()))
    }
}

impl Drop for PageSink {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::keys::*;
    use discovery::{TargetType, TrackedEvent};
    use plist::{Dictionary, Value as Plist};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    fn app(id: &str) -> RpcApplication {
        RpcApplication {
            id: id.to_string(),
            bundle_id: "com.apple.mobilesafari".to_string(),
            name: "Safari".to_string(),
            host_id: None,
            is_proxy: false,
            is_active: true,
            is_ready: true,
        }
    }

    fn page(page_id: u64, connection_id: Option<&str>) -> RpcPage {
        RpcPage {
            page_id,
            title: "Example".to_string(),
            url: "https://example.com".to_string(),
            page_type: TargetType::Web,
            connection_id: connection_id.map(str::to_string),
        }
    }

    fn inventory() -> (InspectorInventory, mpsc::UnboundedReceiver<RpcCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InspectorInventory::new("udid", tx), rx)
    }

    #[tokio::test]
    async fn test_inventory_assembles_apps_and_targets() {
        let (inventory, mut commands) = inventory();

        assert!(inventory.apply(&RpcEvent::ApplicationList(vec![app("PID:1")])));
        assert_eq!(
            commands.recv().await,
            Some(RpcCommand::ForwardGetListing {
                app_id: "PID:1".to_string()
            })
        );

        inventory.apply(&RpcEvent::Listing {
            app_id: "PID:1".to_string(),
            pages: vec![page(1, None), page(2, Some("someone-else"))],
        });

        let apps = inventory.items().values();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].device_id, "udid");
        let targets = &apps[0].targets;
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, "udid|PID:1|1");
        assert!(targets[0].debuggable);
        assert!(!targets[1].debuggable);
    }

    #[tokio::test]
    async fn test_inventory_disconnect_removes_app() {
        let (inventory, _commands) = inventory();
        let mut events = inventory.items().subscribe();

        inventory.apply(&RpcEvent::ApplicationConnected(app("PID:1")));
        inventory.apply(&RpcEvent::ApplicationDisconnected(app("PID:1")));

        assert!(inventory.items().is_empty());
        assert!(matches!(events.recv().await, Ok(TrackedEvent::Added(_))));
        assert!(matches!(events.recv().await, Ok(TrackedEvent::Updated(_))));
        assert!(matches!(events.recv().await, Ok(TrackedEvent::Removed(_))));
    }

    #[tokio::test]
    async fn test_listing_for_unknown_app_is_ignored() {
        let (inventory, _commands) = inventory();
        inventory.apply(&RpcEvent::Listing {
            app_id: "PID:9".to_string(),
            pages: vec![page(1, None)],
        });
        assert!(inventory.apps().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_requests_fresh_data() {
        let (inventory, mut commands) = inventory();
        inventory.apply(&RpcEvent::ApplicationUpdated(app("PID:1")));

        let apps = inventory.snapshot().await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(commands.recv().await, Some(RpcCommand::GetConnectedApplications));
        assert_eq!(
            commands.recv().await,
            Some(RpcCommand::ForwardGetListing {
                app_id: "PID:1".to_string()
            })
        );

        drop(commands);
        assert!(inventory.snapshot().await.is_err());
    }

    /// The device end of a duplex pipe, speaking raw envelopes
    struct FakeDevice {
        framed: Framed<DuplexStream, RpcFrameCodec>,
    }

    impl FakeDevice {
        async fn next_selector(&mut self) -> (String, Dictionary) {
            let envelope = tokio::time::timeout(Duration::from_secs(1), self.framed.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let dict = envelope.into_dictionary().unwrap();
            let selector = dict.get(SELECTOR).and_then(Plist::as_string).unwrap().to_string();
            let argument = dict
                .get(ARGUMENT)
                .and_then(Plist::as_dictionary)
                .cloned()
                .unwrap_or_default();
            (selector, argument)
        }

        async fn send(&mut self, selector: &str, argument: Dictionary) {
            let mut envelope = Dictionary::new();
            envelope.insert(SELECTOR.to_string(), Plist::String(selector.to_string()));
            envelope.insert(ARGUMENT.to_string(), Plist::Dictionary(argument));
            self.framed.send(envelope).await.unwrap();
        }
    }

    fn connect(target_based: Option<bool>) -> (InspectorConnection, FakeDevice) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let mode = Arc::new(RpcMode::new(target_based));
        let connection = InspectorConnection::connect(ours, "udid", mode);
        let device = FakeDevice {
            framed: Framed::new(theirs, RpcFrameCodec),
        };
        (connection, device)
    }

    fn data_argument(sender_id: &str, json: &str) -> Dictionary {
        let mut argument = Dictionary::new();
        argument.insert(APPLICATION_ID.to_string(), Plist::String("PID:1".to_string()));
        argument.insert(DESTINATION.to_string(), Plist::String(sender_id.to_string()));
        argument.insert(
            MESSAGE_DATA.to_string(),
            Plist::Data(json.as_bytes().to_vec()),
        );
        argument
    }

    #[tokio::test]
    async fn test_handshake_and_page_traffic() {
        let (connection, mut device) = connect(Some(false));

        assert_eq!(device.next_selector().await.0, "_rpc_reportIdentifier:");
        assert_eq!(device.next_selector().await.0, "_rpc_getConnectedApplications:");

        let (mut stream, mut sink) = connection.open_page("PID:1", 3).unwrap();
        let (selector, setup) = device.next_selector().await;
        assert_eq!(selector, "_rpc_forwardSocketSetup:");
        assert_eq!(
            setup.get(SENDER).and_then(Plist::as_string),
            Some(sink.sender_id())
        );

        sink.send(Message::request(1, "Page.reload", None)).await.unwrap();
        let (selector, data) = device.next_selector().await;
        assert_eq!(selector, "_rpc_forwardSocketData:");
        let bytes = data.get(SOCKET_DATA).and_then(Plist::as_data).unwrap();
        assert_eq!(
            Message::from_json(std::str::from_utf8(bytes).unwrap()).unwrap().method(),
            Some("Page.reload")
        );

        let sender_id = sink.sender_id().to_string();
        device
            .send(
                "_rpc_applicationSentData:",
                data_argument(&sender_id, r#"{"id":1,"result":{}}"#),
            )
            .await;
        let reply = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.id(), Some(1));

        sink.close().await.unwrap();
        assert_eq!(device.next_selector().await.0, "_rpc_forwardDidClose:");
    }

    #[tokio::test]
    async fn test_target_id_follows_lifecycle() {
        let (connection, mut device) = connect(None);
        device.next_selector().await;
        device.next_selector().await;

        let (_stream, sink) = connection.open_page("PID:1", 3).unwrap();
        device.next_selector().await;
        let sender_id = sink.sender_id().to_string();

        device
            .send(
                "_rpc_applicationSentData:",
                data_argument(
                    &sender_id,
                    r#"{"method":"Target.targetCreated","params":{"targetInfo":{"targetId":"page-1","type":"page"}}}"#,
                ),
            )
            .await;
        device
            .send(
                "_rpc_applicationSentData:",
                data_argument(
                    &sender_id,
                    r#"{"method":"Target.didCommitProvisionalTarget","params":{"oldTargetId":"page-1","newTargetId":"page-2"}}"#,
                ),
            )
            .await;

        let mut target = None;
        for _ in 0..50 {
            target = sink.target_id();
            if target.as_deref() == Some("page-2") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(target.as_deref(), Some("page-2"));
    }

    #[tokio::test]
    async fn test_undecodable_frame_keeps_connection() {
        use tokio::io::AsyncWriteExt;

        let (connection, mut device) = connect(Some(false));
        device.next_selector().await;
        device.next_selector().await;
        let (mut stream, sink) = connection.open_page("PID:1", 3).unwrap();
        device.next_selector().await;

        let io = device.framed.get_mut();
        io.write_all(&5u32.to_be_bytes()).await.unwrap();
        io.write_all(b"junk!").await.unwrap();
        io.flush().await.unwrap();

        let sender_id = sink.sender_id().to_string();
        device
            .send(
                "_rpc_applicationSentData:",
                data_argument(&sender_id, r#"{"id":4,"result":{}}"#),
            )
            .await;
        let reply = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.id(), Some(4));
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn test_device_hangup_ends_page_streams() {
        let (connection, device) = connect(Some(false));
        let (mut stream, _sink) = connection.open_page("PID:1", 3).unwrap();

        drop(device);
        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }
}
