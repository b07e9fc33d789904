//! Motion Relay
//!
//! Watches a home camera system for motion and relays alerts, optionally
//! with photo or video attachments, to a chat bot that also answers
//! interactive commands (current photo, current video, disconnect).
//!
//! # Architecture
//!
//! A `CameraSource` produces `MotionEvent`s, a `NotificationSink` delivers
//! them, and the `Coordinator` owns the loop between the two:
//!
//! 1. **Edge-triggered alerts**: polled sources emit one event per idle to
//!    active transition of a camera, never while motion is sustained.
//! 2. **Isolated failures**: a failed alert, attachment or command is
//!    logged and never stops the loop or the command listener.
//! 3. **One-way disconnect**: once the chat disconnects the relay, the
//!    connection flag stays down until the process restarts.
//!
//! # Module Structure
//!
//! - `source`: camera event sources (Blink cloud polling, local directory watch)
//! - `sink`: notification sinks (Telegram bot) and the chat command surface
//! - `coordinator`: lifecycle state machine and run loop
//! - `media`: media references, downloads and on-demand fetch
//! - `config`: layered file + environment configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod sink;
pub mod source;

pub use coordinator::{Coordinator, LoopSettings, Outcome, Phase};
pub use error::{RelayError, RelayResult};
pub use media::{MediaFetcher, MediaFile, MediaKind, MediaRef};
pub use sink::{
    ChatApi, ChatSink, Command, ConnectionState, NotificationSink, Response, TelegramApi,
};
#[cfg(feature = "backend-blink")]
pub use source::blink::{BlinkClient, BlinkCredentials};
#[cfg(feature = "backend-local")]
pub use source::local::LocalSource;
pub use source::{CameraApi, CameraSource, CloudSource, MotionTracker};

// -------------------- Cameras and Events --------------------

/// Name of a camera as the backend reports it. Stable across restarts.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(name: impl Into<String>) -> Self {
        CameraId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(name: &str) -> Self {
        CameraId(name.to_string())
    }
}

impl From<String> for CameraId {
    fn from(name: String) -> Self {
        CameraId(name)
    }
}

/// A detected motion on one camera. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MotionEvent {
    pub camera_id: CameraId,
    pub observed_at: DateTime<Utc>,
    pub media: Option<MediaRef>,
}

impl MotionEvent {
    pub fn new(camera_id: CameraId, media: Option<MediaRef>) -> Self {
        Self {
            camera_id,
            observed_at: Utc::now(),
            media,
        }
    }
}

pub(crate) fn join_cameras<'a>(cameras: impl IntoIterator<Item = &'a CameraId>) -> String {
    let names: Vec<&str> = cameras.into_iter().map(|c| c.as_str()).collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}
