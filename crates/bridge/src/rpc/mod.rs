//! Remote inspector RPC
//!
//! The device side speaks plist envelopes:
//!
//! ```text
//! { __selector: "_rpc_applicationSentData:",
//!   __argument: { WIRApplicationIdentifierKey: "PID:42",
//!                 WIRDestinationKey: "<sender>",
//!                 WIRMessageDataKey: <json bytes> } }
//! ```
//!
//! `handler` turns inbound envelopes into `RpcEvent`s, `builder` turns
//! `RpcCommand`s into envelopes, `codec` frames them on the wire.
//!
//! Newer devices are "target-based": page traffic is wrapped in
//! `Target.dispatchMessageFromTarget` / `Target.sendMessageToTarget` and
//! addressed to a target id. The mode is shared by handler and builder.

pub mod builder;
pub mod codec;
pub mod handler;

use std::sync::atomic::{AtomicBool, Ordering};

use discovery::TargetType;

use crate::protocol::Message;

pub use builder::RpcMessageBuilder;
pub use codec::RpcFrameCodec;
pub use handler::RpcMessageHandler;

pub(crate) mod keys {
    pub const SELECTOR: &str = "__selector";
    pub const ARGUMENT: &str = "__argument";

    pub const CONNECTION_ID: &str = "WIRConnectionIdentifierKey";
    pub const APPLICATION_ID: &str = "WIRApplicationIdentifierKey";
    pub const APPLICATION_DICTIONARY: &str = "WIRApplicationDictionaryKey";
    pub const BUNDLE_ID: &str = "WIRApplicationBundleIdentifierKey";
    pub const APPLICATION_NAME: &str = "WIRApplicationNameKey";
    pub const HOST_APPLICATION_ID: &str = "WIRHostApplicationIdentifierKey";
    pub const IS_PROXY: &str = "WIRIsApplicationProxyKey";
    pub const IS_ACTIVE: &str = "WIRIsApplicationActiveKey";
    pub const IS_READY: &str = "WIRIsApplicationReadyKey";
    pub const LISTING: &str = "WIRListingKey";
    pub const PAGE_ID: &str = "WIRPageIdentifierKey";
    pub const TITLE: &str = "WIRTitleKey";
    pub const URL: &str = "WIRURLKey";
    pub const TYPE: &str = "WIRTypeKey";
    pub const SENDER: &str = "WIRSenderKey";
    pub const DESTINATION: &str = "WIRDestinationKey";
    pub const MESSAGE_DATA: &str = "WIRMessageDataKey";
    pub const SOCKET_DATA: &str = "WIRSocketDataKey";
    pub const AUTOMATICALLY_PAUSE: &str = "WIRAutomaticallyPause";
    pub const INDICATE_ENABLED: &str = "WIRIndicateEnabledKey";
    pub const SIMULATOR_NAME: &str = "WIRSimulatorNameKey";
    pub const SIMULATOR_BUILD: &str = "WIRSimulatorBuildKey";
    pub const SIMULATOR_VERSION: &str = "WIRSimulatorProductVersionKey";
}

/// Whether page traffic is wrapped in `Target.*` envelopes
#[derive(Debug, Default)]
pub struct RpcMode {
    forced: Option<bool>,
    detected: AtomicBool,
}

impl RpcMode {
    /// `Some` pins the mode; `None` waits for the first `Target.targetCreated`
    pub fn new(forced: Option<bool>) -> Self {
        Self {
            forced,
            detected: AtomicBool::new(false),
        }
    }

    pub fn is_target_based(&self) -> bool {
        self.forced
            .unwrap_or_else(|| self.detected.load(Ordering::SeqCst))
    }

    /// Record that the device created a target. True on the first call that
    /// flipped the mode.
    pub(crate) fn observe_target_created(&self) -> bool {
        if self.forced.is_some() {
            return false;
        }
        !self.detected.swap(true, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcApplication {
    pub id: String,
    pub bundle_id: String,
    pub name: String,
    pub host_id: Option<String>,
    pub is_proxy: bool,
    pub is_active: bool,
    pub is_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcPage {
    pub page_id: u64,
    pub title: String,
    pub url: String,
    pub page_type: TargetType,
    /// Connection already attached to this page, if any
    pub connection_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetupInfo {
    pub simulator_name: Option<String>,
    pub simulator_build: Option<String>,
    pub simulator_version: Option<String>,
}

/// A decoded inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub enum RpcEvent {
    Setup(SetupInfo),
    ApplicationList(Vec<RpcApplication>),
    ApplicationConnected(RpcApplication),
    ApplicationUpdated(RpcApplication),
    ApplicationDisconnected(RpcApplication),
    Listing {
        app_id: String,
        pages: Vec<RpcPage>,
    },
    /// Page protocol traffic for the connection `sender_id`
    Data {
        app_id: String,
        sender_id: String,
        message: Message,
    },
    TargetCreated {
        app_id: String,
        sender_id: String,
        target_id: String,
        provisional: bool,
    },
    TargetCommitted {
        app_id: String,
        sender_id: String,
        old_target_id: Option<String>,
        new_target_id: String,
    },
    TargetDestroyed {
        app_id: String,
        sender_id: String,
        target_id: String,
    },
}

/// An outbound envelope, before encoding
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCommand {
    ReportIdentifier,
    GetConnectedApplications,
    ForwardGetListing {
        app_id: String,
    },
    ForwardSocketSetup {
        app_id: String,
        page_id: u64,
        sender_id: String,
    },
    ForwardSocketData {
        app_id: String,
        page_id: u64,
        sender_id: String,
        /// Destination target in target-based mode
        target_id: Option<String>,
        message: Message,
    },
    ForwardDidClose {
        app_id: String,
        page_id: u64,
        sender_id: String,
    },
    ForwardIndicateWebView {
        app_id: String,
        page_id: u64,
        enabled: bool,
    },
}

pub(crate) fn target_type_from_wir(wir: &str) -> TargetType {
    match wir {
        "WIRTypeWeb" => TargetType::Web,
        "WIRTypeWebPage" => TargetType::Page,
        "WIRTypeJavaScript" => TargetType::JavaScript,
        "WIRTypeServiceWorker" => TargetType::ServiceWorker,
        "WIRTypeAutomation" => TargetType::Automation,
        "WIRTypeITML" => TargetType::Itml,
        _ => TargetType::Unknown,
    }
}
