use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::media::{MediaKind, MediaRef};
use crate::{CameraId, MotionEvent};

/// Per-camera rising-edge detector for polled motion flags.
///
/// An event fires when a camera reports motion and its previous sample did
/// not. The stored flag is overwritten with every sample, so sustained
/// motion stays silent until it drops and rises again.
#[derive(Debug, Default)]
pub struct MotionTracker {
    last_active: HashMap<CameraId, bool>,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a camera with an inactive baseline. Known cameras keep
    /// their current state.
    pub fn register(&mut self, camera: CameraId) {
        self.last_active.entry(camera).or_insert(false);
    }

    pub fn is_tracked(&self, camera: &CameraId) -> bool {
        self.last_active.contains_key(camera)
    }

    /// Record one sample; true when it is a rising edge.
    pub fn observe(&mut self, camera: &CameraId, active: bool) -> bool {
        let previous = self
            .last_active
            .insert(camera.clone(), active)
            .unwrap_or(false);
        active && !previous
    }

    /// Apply one poll cycle of samples and return the transition events.
    /// Each event asks for the motion recording on delivery.
    pub fn update<I>(&mut self, samples: I, observed_at: DateTime<Utc>) -> Vec<MotionEvent>
    where
        I: IntoIterator<Item = (CameraId, bool)>,
    {
        let mut events = Vec::new();
        for (camera, active) in samples {
            if self.observe(&camera, active) {
                log::debug!("motion started on {}", camera);
                events.push(MotionEvent {
                    media: Some(MediaRef::Fetch {
                        camera_id: camera.clone(),
                        kind: MediaKind::MotionClip,
                    }),
                    camera_id: camera,
                    observed_at,
                });
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(samples: &[bool]) -> Vec<usize> {
        let camera = CameraId::from("front_door");
        let mut tracker = MotionTracker::new();
        tracker.register(camera.clone());
        let mut fired = Vec::new();
        for (i, active) in samples.iter().copied().enumerate() {
            let events = tracker.update([(camera.clone(), active)], Utc::now());
            assert!(events.len() <= 1);
            if !events.is_empty() {
                fired.push(i);
            }
        }
        fired
    }

    #[test]
    fn one_event_per_run_of_motion() {
        assert_eq!(
            edges(&[false, false, true, true, true, false, true]),
            vec![2, 6]
        );
    }

    #[test]
    fn sustained_motion_is_silent() {
        assert_eq!(edges(&[true, true, true, true]), vec![0]);
        assert!(edges(&[false, false, false]).is_empty());
    }

    #[test]
    fn alternating_samples_fire_each_rise() {
        assert_eq!(edges(&[true, false, true, false, true]), vec![0, 2, 4]);
    }

    #[test]
    fn unregistered_camera_starts_inactive() {
        let mut tracker = MotionTracker::new();
        let camera = CameraId::from("garage");
        assert!(!tracker.is_tracked(&camera));
        assert!(tracker.observe(&camera, true));
        assert!(!tracker.observe(&camera, true));
    }

    #[test]
    fn register_does_not_reset_state() {
        let mut tracker = MotionTracker::new();
        let camera = CameraId::from("porch");
        tracker.register(camera.clone());
        assert!(tracker.observe(&camera, true));
        tracker.register(camera.clone());
        assert!(!tracker.observe(&camera, true));
    }

    #[test]
    fn cameras_are_independent() {
        let mut tracker = MotionTracker::new();
        let a = CameraId::from("a");
        let b = CameraId::from("b");
        let now = Utc::now();

        let first = tracker.update([(a.clone(), true), (b.clone(), false)], now);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].camera_id, a);
        assert_eq!(
            first[0].media,
            Some(MediaRef::Fetch {
                camera_id: a.clone(),
                kind: MediaKind::MotionClip
            })
        );

        let second = tracker.update([(a.clone(), true), (b.clone(), true)], now);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].camera_id, b);
    }
}
