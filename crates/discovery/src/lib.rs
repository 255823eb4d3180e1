//! Device, app and page discovery
//!
//! Every source here produces full snapshots; `TrackedMap` turns consecutive
//! snapshots into added/changed/removed events and `Tracker` drives a source
//! on a fixed interval.
//!
//! ```text
//! DeviceLister(s) ──► DeviceSource ──┐
//!                                    ├─► Tracker ──► TrackedMap ──► events
//! AndroidBridge ───► WebViewSource ──┘
//! ```

pub mod android;
pub mod config;
pub mod devices;
pub mod error;
pub mod model;
pub mod tracked;
pub mod tracker;

pub use android::{AndroidBridge, WebView, WebViewType};
pub use config::AndroidConfig;
pub use devices::{DeviceLister, DeviceSource};
pub use error::{DiscoveryError, Result};
pub use model::{App, Device, DeviceType, Platform, Target, TargetType};
pub use tracked::{Change, Tracked, TrackedDiff, TrackedEvent, TrackedMap};
pub use tracker::{SnapshotSource, Tracker, TrackerState};
