//! Screencast
//!
//! The target cannot stream frames, so a running screencast polls
//! `Page.snapshotRect` and fires `Page.screencastFrame` whenever the image
//! changes. Acks are recorded but do not gate the next frame.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::page::evaluate_string;
use super::{answer, client_keys, into_request, param, Translator};
use crate::adapter::ProtocolAdapter;
use crate::error::{BridgeError, Result};
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::Message;

const VIEWPORT_EXPRESSION: &str = "JSON.stringify({width: window.innerWidth, height: window.innerHeight, scrollX: window.scrollX, scrollY: window.scrollY})";

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Viewport {
    width: f64,
    height: f64,
    #[serde(default)]
    scroll_x: f64,
    #[serde(default)]
    scroll_y: f64,
}

#[derive(Default)]
pub struct FrameCounters {
    last_sent: AtomicU64,
    last_acked: AtomicU64,
}

impl FrameCounters {
    pub fn last_sent(&self) -> u64 {
        self.last_sent.load(Ordering::SeqCst)
    }

    pub fn last_acked(&self) -> u64 {
        self.last_acked.load(Ordering::SeqCst)
    }
}

struct ScreencastSession {
    task: JoinHandle<()>,
    counters: Arc<FrameCounters>,
}

pub struct ScreencastTranslator {
    adapter: Weak<ProtocolAdapter>,
    interval: Duration,
    session: Mutex<Option<ScreencastSession>>,
}

impl ScreencastTranslator {
    pub fn new(adapter: Weak<ProtocolAdapter>, interval: Duration) -> Self {
        Self {
            adapter,
            interval,
            session: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Counters of the running session
    pub fn counters(&self) -> Option<Arc<FrameCounters>> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.counters.clone())
    }

    fn start(&self, every_nth_frame: u64) {
        let counters = Arc::new(FrameCounters::default());
        let task = tokio::spawn(frame_loop(
            self.adapter.clone(),
            self.interval,
            every_nth_frame.max(1),
            counters.clone(),
        ));

        let previous = self
            .session
            .lock()
            .replace(ScreencastSession { task, counters });
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    fn stop(&self) {
        if let Some(session) = self.session.lock().take() {
            session.task.abort();
        }
    }
}

impl Drop for ScreencastTranslator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Translator for ScreencastTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(&[
            "Page.startScreencast",
            "Page.stopScreencast",
            "Page.screencastFrameAck",
        ])
        .collect()
    }
}

#[async_trait]
impl MessageFilter for ScreencastTranslator {
    fn name(&self) -> &str {
        "screencast"
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
            "Page.startScreencast" => {
                let every_nth = param(&request, "everyNthFrame")
                    .and_then(Value::as_u64)
                    .unwrap_or(1);
                self.start(every_nth);
            }
            "Page.stopScreencast" => self.stop(),
            "Page.screencastFrameAck" => {
                let frame = param(&request, "sessionId")
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                if let Some(counters) = self.counters() {
                    counters.last_acked.store(frame, Ordering::SeqCst);
                }
            }
            _ => return Ok(Some(Message::Request(request))),
        }
        Ok(answer(adapter, request.id, json!({})))
    }
}

async fn frame_loop(
    adapter: Weak<ProtocolAdapter>,
    interval: Duration,
    every_nth_frame: u64,
    counters: Arc<FrameCounters>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_image: Option<String> = None;
    let mut ticks: u64 = 0;

    loop {
        ticker.tick().await;
        let Some(adapter) = adapter.upgrade() else {
            break;
        };
        ticks += 1;
        if ticks % every_nth_frame != 0 {
            continue;
        }

        let (viewport, image) = match capture(&adapter).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("[Screencast] Frame capture failed: {}", e);
                continue;
            }
        };
        if last_image.as_deref() == Some(image.as_str()) {
            continue;
        }

        let frame = counters.last_sent.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        adapter.fire_event_to_client(
            "Page.screencastFrame",
            json!({
                "data": image,
                "sessionId": frame,
                "metadata": {
                    "offsetTop": 0,
                    "pageScaleFactor": 1,
                    "deviceWidth": viewport.width,
                    "deviceHeight": viewport.height,
                    "scrollOffsetX": viewport.scroll_x,
                    "scrollOffsetY": viewport.scroll_y,
                    "timestamp": timestamp,
                },
            }),
        );
        last_image = Some(image);
    }
}

/// Viewport metrics and a base64 PNG of the visible area
async fn capture(adapter: &ProtocolAdapter) -> Result<(Viewport, String)> {
    let viewport: Viewport = serde_json::from_str(&evaluate_string(adapter, VIEWPORT_EXPRESSION).await?)?;

    let snapshot = adapter
        .make_request(
            "Page.snapshotRect",
            Some(json!({
                "x": 0,
                "y": 0,
                "width": viewport.width,
                "height": viewport.height,
                "coordinateSystem": "Viewport",
            })),
        )
        .await?;

    let data_url = snapshot
        .get("dataURL")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::Translator("snapshot without dataURL".to_string()))?;
    let image = data_url
        .split_once(',')
        .map(|(_, data)| data)
        .unwrap_or(data_url);
    Ok((viewport, image.to_string()))
}
