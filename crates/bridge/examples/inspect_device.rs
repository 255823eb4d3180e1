//! Inspect a device and serve one of its pages to a debugger frontend
//!
//! ```text
//! cargo run --example inspect_device -- android
//! cargo run --example inspect_device -- ios 127.0.0.1:27753
//! ```
//!
//! The iOS mode expects a webinspector socket already reachable over TCP
//! (a simulator's inspector, or a device tunnelled through usbmuxd).

use bridge::{websocket_transport, BridgeConfig, BridgeSession, InspectorConnection, RpcMode};
use discovery::{AndroidBridge, DeviceLister, Tracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

const FRONTEND_ADDR: &str = "127.0.0.1:9222";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::default();
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("android") => android(&config).await,
        Some("ios") => {
            let addr = args.next().unwrap_or_else(|| "127.0.0.1:27753".to_string());
            ios(config, &addr).await
        }
        _ => {
            eprintln!("usage: inspect_device (android | ios [addr])");
            Ok(())
        }
    }
}

async fn android(config: &BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bridge = Arc::new(AndroidBridge::from_config(&config.android)?);

    for device in bridge.list_devices().await? {
        println!("{} ({}) {:?}", device.name, device.id, device.os_version);
        if device.locked {
            continue;
        }

        let tracker = bridge.webview_tracker(&device.id);
        tracker.start().await?;
        for app in tracker.items().values() {
            println!("  {} [{}]", app.name, app.id);
            for target in &app.targets {
                println!(
                    "    {} {} {:?}",
                    target.title, target.url, target.web_socket_debugger_url
                );
            }
        }
        tracker.stop();
    }

    let report = bridge.unforward_all_debuggers().await;
    println!("Removed {} forwards", report.removed.len());
    Ok(())
}

async fn ios(config: BridgeConfig, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpStream::connect(addr).await?;
    let mode = Arc::new(RpcMode::new(config.target_based));
    let connection = InspectorConnection::connect(stream, "simulator", mode);

    // Listings arrive as events; give a couple of polls time to land
    let inventory = connection.inventory().clone();
    let tracker = Tracker::with_map(
        inventory.clone(),
        config.discovery_interval(),
        inventory.items().clone(),
    );
    tokio::time::sleep(Duration::from_millis(500)).await;
    tracker.start().await?;
    tokio::time::sleep(config.discovery_interval() * 2).await;
    tracker.stop();
    let apps = inventory.apps();

    let mut first_page = None;
    for app in inventory.items().values() {
        println!("{} [{}]", app.name, app.id);
        for target in &app.targets {
            println!("  {}: {} {}", target.page_id, target.title, target.url);
            if first_page.is_none() && target.debuggable {
                first_page = Some((app.id.clone(), target.page_id));
            }
        }
    }
    let Some((app_id, page_id)) = first_page else {
        println!("No debuggable page among {} apps", apps.len());
        return Ok(());
    };

    let listener = TcpListener::bind(FRONTEND_ADDR).await?;
    println!("Waiting for a frontend on ws://{}", FRONTEND_ADDR);
    let (socket, _) = listener.accept().await?;
    let ws = tokio_tungstenite::accept_async(socket).await?;
    let (client_stream, client_sink) = websocket_transport(ws);

    let (page_stream, page_sink) = connection.open_page(app_id, page_id)?;
    let session = BridgeSession::new(config);
    let reason = session
        .run(client_stream, client_sink, page_stream, page_sink)
        .await;
    println!("Session ended: {:?}", reason);
    Ok(())
}
