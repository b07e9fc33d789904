//! Polled cloud camera source.
//!
//! The cloud backend only exposes a per-camera "motion detected" flag that
//! is refreshed by a blocking remote call. `CloudSource` turns those flags
//! into events with `MotionTracker` and paces itself with a fixed poll
//! interval to stay within the vendor's rate limits.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::{CameraSource, MotionTracker};
use crate::error::RelayResult;
use crate::media::MediaFetcher;
use crate::{join_cameras, CameraId, MotionEvent};

/// Narrow interface to a cloud camera vendor.
pub trait CameraApi: MediaFetcher {
    /// All cameras on the account.
    fn cameras(&self) -> RelayResult<Vec<CameraId>>;

    /// Refresh and report the current motion flag of every camera.
    fn motion_samples(&self) -> RelayResult<Vec<(CameraId, bool)>>;
}

pub struct CloudSource<A: CameraApi + 'static> {
    api: Arc<A>,
    tracker: MotionTracker,
    poll_interval: Duration,
}

impl<A: CameraApi + 'static> CloudSource<A> {
    pub fn new(api: Arc<A>, poll_interval: Duration) -> Self {
        Self {
            api,
            tracker: MotionTracker::new(),
            poll_interval,
        }
    }
}

impl<A: CameraApi + 'static> CameraSource for CloudSource<A> {
    fn name(&self) -> &'static str {
        "cloud"
    }

    fn discover(&mut self) -> RelayResult<BTreeSet<CameraId>> {
        let cameras: BTreeSet<CameraId> = self.api.cameras()?.into_iter().collect();
        for camera in &cameras {
            self.tracker.register(camera.clone());
        }
        log::info!("cloud cameras: {}", join_cameras(&cameras));
        Ok(cameras)
    }

    fn next_events(&mut self) -> RelayResult<Vec<MotionEvent>> {
        let samples = self.api.motion_samples()?;
        // the camera set is fixed at discovery
        let samples: Vec<(CameraId, bool)> = samples
            .into_iter()
            .filter(|(camera, _)| {
                let known = self.tracker.is_tracked(camera);
                if !known {
                    log::debug!("ignoring camera {} added after discovery", camera);
                }
                known
            })
            .collect();
        Ok(self.tracker.update(samples, Utc::now()))
    }

    fn cycle_delay(&self) -> Duration {
        self.poll_interval
    }

    fn media_fetcher(&self) -> Arc<dyn MediaFetcher> {
        self.api.clone()
    }
}
