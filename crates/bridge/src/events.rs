//! Event Bus - session lifecycle notifications
//!
//! Design: plain enum over a tokio broadcast channel. Publishing never
//! blocks and never fails; slow subscribers lag.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a session stopped pumping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    ClientClosed,
    TargetClosed,
    ClientSinkFailed,
    TargetSinkFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    Started { session_id: String },
    Stopped { session_id: String, reason: StopReason },
}

pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event); // No subscribers is fine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
