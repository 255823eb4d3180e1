//! Filter registration keys and the pipeline stage trait
//!
//! A pipeline is the ordered list of stages registered for one
//! `(direction, method)` key. Each stage gets the previous stage's output.

use async_trait::async_trait;
use std::fmt;

use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::protocol::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client request on its way to the target
    FromClient,
    /// Target reply or event on its way to the client
    FromTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub direction: Direction,
    pub method: String,
}

impl FilterKey {
    pub fn client(method: impl Into<String>) -> Self {
        Self {
            direction: Direction::FromClient,
            method: method.into(),
        }
    }

    pub fn target(method: impl Into<String>) -> Self {
        Self {
            direction: Direction::FromTarget,
            method: method.into(),
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.direction {
            Direction::FromClient => "client",
            Direction::FromTarget => "target",
        };
        write!(f, "{}::{}", side, self.method)
    }
}

/// One pipeline stage
///
/// Return `Ok(Some(msg))` to continue with `msg`, `Ok(None)` to stop
/// forwarding (usually after answering the client directly). An `Err` or a
/// panic also stops forwarding; the adapter logs it and carries on.
///
/// For target replies `key.method` is the method of the client request the
/// reply answers, since replies carry no method of their own.
#[async_trait]
pub trait MessageFilter: Send + Sync {
    fn name(&self) -> &str;

    async fn filter(
        &self,
        adapter: &ProtocolAdapter,
        key: &FilterKey,
        msg: Message,
    ) -> Result<Option<Message>>;
}
