//! Bridge error types
//!
//! One flat enum. Most of these never reach the end user: timeouts and
//! translator failures are logged and recovered at the adapter boundary.

use thiserror::Error;

use crate::protocol::RequestId;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Request {id} ({method}) timed out")]
    Timeout { method: String, id: RequestId },

    #[error("Connection closed")]
    Closed,

    #[error("Protocol error: {code} - {message}")]
    Protocol { code: i64, message: String },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Translator error: {0}")]
    Translator(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Discovery error: {0}")]
    Discovery(#[from] discovery::DiscoveryError),
}
