//! Error types for discovery
//!
//! Flat hierarchy. Transport failures (missing adb, failing shell commands)
//! are kept distinct from parse/IO noise so callers can tell "platform not
//! available" apart from "device misbehaved".

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Tool not found: {tool}")]
    ToolNotFound { tool: String, searched: Option<PathBuf> },

    #[error("Command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Command `{command}` timed out")]
    CommandTimeout { command: String },

    #[error("No free TCP port in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("Tracker already started")]
    AlreadyStarted,

    #[error("Source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DiscoveryError {
    /// True when the underlying platform tooling is missing entirely
    pub fn is_tool_not_found(&self) -> bool {
        matches!(self, DiscoveryError::ToolNotFound { .. })
    }
}
