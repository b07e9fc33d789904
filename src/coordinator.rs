//! Lifecycle coordinator.
//!
//! Owns the run loop between a `CameraSource` and a `NotificationSink`:
//! discovery, the command listener thread, the poll/alert cycle and the
//! way out of it. State moves `Idle -> Initializing -> Running -> Stopped`
//! and never back.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::RelayError;
use crate::sink::NotificationSink;
use crate::source::CameraSource;
use crate::{join_cameras, MotionEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Initializing,
    Running,
    Stopped,
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The chat (or a signal) disconnected the relay.
    Disconnected,
    /// Discovery failed; the loop never started.
    InitializationFailed(RelayError),
    /// The source kept failing past the configured limit.
    SourceFailed(RelayError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Disconnected)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Disconnected => f.write_str("disconnected"),
            Outcome::InitializationFailed(e) => write!(f, "could not initialize: {}", e),
            Outcome::SourceFailed(e) => write!(f, "camera source failed: {}", e),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Pause after a failed poll, instead of the source's cycle delay.
    pub error_backoff: Duration,
    /// Consecutive failed polls before giving up. 0 retries forever.
    pub max_consecutive_failures: u32,
    /// Granularity at which sleeps re-check the connection flag.
    pub sleep_slice: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_secs(60),
            max_consecutive_failures: 10,
            sleep_slice: Duration::from_millis(250),
        }
    }
}

pub struct Coordinator<S: CameraSource, K: NotificationSink + 'static> {
    source: S,
    sink: Arc<K>,
    settings: LoopSettings,
    phase: Phase,
    listener: Option<JoinHandle<()>>,
}

impl<S: CameraSource, K: NotificationSink + 'static> Coordinator<S, K> {
    pub fn new(source: S, sink: Arc<K>, settings: LoopSettings) -> Self {
        Self {
            source,
            sink,
            settings,
            phase: Phase::Idle,
            listener: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run until disconnected or until the source gives up. Blocks the
    /// calling thread; the command listener runs on its own thread.
    pub fn run(&mut self) -> Outcome {
        self.phase = Phase::Initializing;
        let cameras = match self.source.discover() {
            Ok(cameras) => cameras,
            Err(e) => {
                log::error!("{} source could not initialize: {}", self.source.name(), e);
                self.phase = Phase::Stopped;
                return Outcome::InitializationFailed(e);
            }
        };
        log::info!(
            "{} source ready, cameras: {}",
            self.source.name(),
            join_cameras(&cameras)
        );

        if let Err(e) = self.spawn_listener() {
            log::error!("{}", e);
            self.phase = Phase::Stopped;
            return Outcome::InitializationFailed(e);
        }

        self.phase = Phase::Running;
        let outcome = self.run_loop();
        self.phase = Phase::Stopped;
        log::info!("relay stopped: {}", outcome);
        outcome
    }

    /// Handle of the command listener thread, if it was started.
    pub fn take_listener(&mut self) -> Option<JoinHandle<()>> {
        self.listener.take()
    }

    fn spawn_listener(&mut self) -> Result<(), RelayError> {
        let sink = self.sink.clone();
        let join = thread::Builder::new()
            .name("command-listener".into())
            .spawn(move || {
                if let Err(e) = sink.listen() {
                    log::error!("command listener stopped: {}", e);
                }
            })
            .map_err(|e| {
                RelayError::SinkDeliveryFailed(format!("cannot start command listener: {}", e))
            })?;
        self.listener = Some(join);
        Ok(())
    }

    fn run_loop(&mut self) -> Outcome {
        let mut failures = 0u32;
        loop {
            if !self.sink.is_connected() {
                return Outcome::Disconnected;
            }
            match self.source.next_events() {
                Ok(events) => {
                    failures = 0;
                    self.forward(events);
                    self.pause(self.source.cycle_delay());
                }
                Err(e) => {
                    failures += 1;
                    let limit = self.settings.max_consecutive_failures;
                    if limit > 0 && failures >= limit {
                        log::error!(
                            "{} source failed {} times in a row: {}",
                            self.source.name(),
                            failures,
                            e
                        );
                        return Outcome::SourceFailed(e);
                    }
                    log::warn!(
                        "{} poll failed ({} in a row), retrying in {:?}: {}",
                        self.source.name(),
                        failures,
                        self.settings.error_backoff,
                        e
                    );
                    self.pause(self.settings.error_backoff);
                }
            }
        }
    }

    fn forward(&self, events: Vec<MotionEvent>) {
        for event in events {
            // a disconnect can land mid-batch
            if !self.sink.is_connected() {
                return;
            }
            log::debug!(
                "motion on {} at {}",
                event.camera_id,
                event.observed_at.to_rfc3339()
            );
            if let Err(e) = self.sink.send_alert(&event.camera_id, event.media.as_ref()) {
                log::warn!("alert for {} lost: {}", event.camera_id, e);
            }
        }
    }

    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.sink.is_connected() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(self.settings.sleep_slice));
        }
    }
}
