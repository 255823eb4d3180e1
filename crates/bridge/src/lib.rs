//! Mobile web inspector bridge
//!
//! Lets a Chrome-protocol debugger frontend drive pages on iOS and Android
//! devices. Client traffic passes through a `ProtocolAdapter` whose domain
//! translators rewrite what the device's inspector does not understand;
//! iOS pages are reached over the webinspector plist RPC.
//!
//! ```text
//! frontend ──ws──► client ──► BridgeSession ──► ProtocolAdapter ──► translators
//!                                   │
//!                                   ▼
//!                      ios::InspectorConnection ──► rpc (plist frames) ──► device
//! ```
//!
//! # Architecture
//!
//! 1. **Data first**: messages are a closed enum; filters are keyed by
//!    direction and method, not by string convention.
//! 2. **No cycles**: translators borrow the adapter per call.
//! 3. **Failures stay local**: a broken translator or malformed peer message
//!    costs one message, never the session.

pub mod adapter;
pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod filter;
pub mod ios;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod translators;

pub use adapter::{AdapterOutputs, ProtocolAdapter};
pub use client::websocket_transport;
pub use config::BridgeConfig;
pub use correlation::RequestMap;
pub use error::{BridgeError, Result};
pub use events::{EventBus, SessionEvent, StopReason};
pub use filter::{Direction, FilterKey, MessageFilter};
pub use ios::{InspectorConnection, InspectorInventory, PageSink, PageStream};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse, Message, ProtocolError, RequestId};
pub use rpc::{RpcCommand, RpcEvent, RpcFrameCodec, RpcMessageBuilder, RpcMessageHandler, RpcMode};
pub use session::BridgeSession;
pub use translators::register_all;
