//! Tracker - fixed-interval polling into a TrackedMap
//!
//! ```text
//! Stopped --start()--> Starting --first pass--> Listening --stop()--> Stopped
//! ```
//!
//! A pass that fails (or panics) is logged and the schedule keeps going.

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{DiscoveryError, Result};
use crate::tracked::{Tracked, TrackedDiff, TrackedMap};

/// Something that can produce a full snapshot on demand
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    type Item: Tracked;

    /// Human-readable name for logging
    fn name(&self) -> &str;

    async fn snapshot(&self) -> Result<Vec<Self::Item>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Stopped,
    Starting,
    Listening,
}

pub struct Tracker<S: SnapshotSource> {
    source: Arc<S>,
    items: Arc<TrackedMap<S::Item>>,
    interval: Duration,
    state: Mutex<TrackerState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: SnapshotSource> Tracker<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Self::with_map(source, interval, Arc::new(TrackedMap::new()))
    }

    /// Feed an existing map (e.g. one shared with other consumers)
    pub fn with_map(source: S, interval: Duration, items: Arc<TrackedMap<S::Item>>) -> Self {
        Self {
            source: Arc::new(source),
            items,
            interval,
            state: Mutex::new(TrackerState::Stopped),
            task: Mutex::new(None),
        }
    }

    pub fn items(&self) -> &Arc<TrackedMap<S::Item>> {
        &self.items
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn state(&self) -> TrackerState {
        *self.state.lock()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one discovery pass now, then keep polling every `interval`
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != TrackerState::Stopped {
                return Err(DiscoveryError::AlreadyStarted);
            }
            *state = TrackerState::Starting;
        }

        tracing::debug!("[Tracker:{}] Starting", self.source.name());
        poll_once(&self.source, &self.items).await;

        let mut state = self.state.lock();
        if *state != TrackerState::Starting {
            // stop() raced the first pass. A start() that ran after it owns
            // the schedule now, so spawning here would leak a second task.
            return Ok(());
        }

        let source = self.source.clone();
        let items = self.items.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the initial pass already ran
            interval.tick().await;
            loop {
                interval.tick().await;
                poll_once(&source, &items).await;
            }
        });

        *self.task.lock() = Some(handle);
        *state = TrackerState::Listening;
        tracing::info!(
            "[Tracker:{}] Listening every {:?}",
            self.source.name(),
            self.interval
        );
        Ok(())
    }

    /// Cancel the schedule. No-op when not started.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state == TrackerState::Stopped {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        *state = TrackerState::Stopped;
        tracing::info!("[Tracker:{}] Stopped", self.source.name());
    }

    /// One pass outside the schedule
    pub async fn refresh(&self) -> Option<TrackedDiff<S::Item>> {
        poll_once(&self.source, &self.items).await
    }
}

impl<S: SnapshotSource> Drop for Tracker<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn poll_once<S: SnapshotSource>(
    source: &Arc<S>,
    items: &TrackedMap<S::Item>,
) -> Option<TrackedDiff<S::Item>> {
    match AssertUnwindSafe(source.snapshot()).catch_unwind().await {
        Ok(Ok(snapshot)) => {
            let diff = items.update_set(snapshot);
            if !diff.is_empty() {
                tracing::debug!(
                    "[Tracker:{}] +{} ~{} -{}",
                    source.name(),
                    diff.added.len(),
                    diff.changed.len(),
                    diff.removed.len()
                );
            }
            Some(diff)
        }
        Ok(Err(e)) => {
            tracing::warn!("[Tracker:{}] Discovery pass failed: {}", source.name(), e);
            None
        }
        Err(_) => {
            tracing::error!("[Tracker:{}] Discovery pass panicked", source.name());
            None
        }
    }
}
