//! Camera event sources.
//!
//! This module provides the two backends that feed the relay:
//! - Blink cloud cameras, polled on a fixed interval (feature: backend-blink)
//! - A local storage directory with one subdirectory per camera, watched
//!   for new recordings (feature: backend-local)
//!
//! Both produce `MotionEvent`s through the `CameraSource` trait, and both
//! expose a `MediaFetcher` for on-demand photos and videos.
//!
//! Sources MUST NOT:
//! - Delete or move recordings they did not download themselves
//! - Block the filesystem watcher on the run loop

#[cfg(feature = "backend-blink")]
pub mod blink;
pub mod cloud;
#[cfg(feature = "backend-local")]
pub mod local;
mod tracker;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RelayResult;
use crate::media::MediaFetcher;
use crate::{CameraId, MotionEvent};

pub use cloud::{CameraApi, CloudSource};
pub use tracker::MotionTracker;

/// A producer of motion events, driven by the coordinator's run loop.
pub trait CameraSource {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Enumerate cameras. Called once at startup; calling it again with
    /// unchanged backing state yields the same set.
    fn discover(&mut self) -> RelayResult<BTreeSet<CameraId>>;

    /// Next batch of events. May block for a bounded time (a remote refresh
    /// or a short queue wait) and may return an empty batch.
    fn next_events(&mut self) -> RelayResult<Vec<MotionEvent>>;

    /// Pause between two `next_events` calls.
    fn cycle_delay(&self) -> Duration;

    /// On-demand media capability, shareable with the command listener.
    fn media_fetcher(&self) -> Arc<dyn MediaFetcher>;
}
