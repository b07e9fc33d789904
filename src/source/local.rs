//! Local storage directory source.
//!
//! This module provides `LocalSource` for recorders that drop clips into a
//! directory tree: one subdirectory per camera under a storage root. A
//! recursive filesystem watcher reports recordings as they arrive; each one
//! with a known media extension becomes a motion event for the camera whose
//! subdirectory contains it.
//!
//! A recording counts as arrived when its writer closes it, when it is
//! renamed into place, or, on platforms that report neither, once its size
//! and modification time have stopped changing for the settle delay. A
//! created file alone is still being written and is only held as pending.
//!
//! The watcher callback runs on the watcher's own thread. It only pushes
//! signals into a bounded queue with `try_send` and never waits for the run
//! loop; when the queue is full the signal is dropped with a warning.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::CameraSource;
use crate::error::{RelayError, RelayResult};
use crate::media::{MediaFetcher, MediaFile, MediaKind, MediaRef};
use crate::{join_cameras, CameraId, MotionEvent};

const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Repeat completion signals for a path inside this window are one recording.
const REPEAT_WINDOW: Duration = Duration::from_secs(10);

/// What the watcher learned about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSignal {
    path: PathBuf,
    /// The file is complete: closed after writing, or moved into place.
    finished: bool,
}

fn signal_for(event: &Event) -> Option<FileSignal> {
    let finished = match event.kind {
        EventKind::Create(CreateKind::Folder) => return None,
        EventKind::Create(_) => false,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => true,
        // backends that cannot tell the two ends of a rename apart
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            if !event.paths.last().map(|p| p.is_file()).unwrap_or(false) {
                return None;
            }
            true
        }
        _ => return None,
    };
    // renames report [from, to]
    let path = event.paths.last()?.clone();
    Some(FileSignal { path, finished })
}

#[derive(Debug)]
struct Pending {
    len: u64,
    modified: Option<SystemTime>,
    stable_since: Instant,
}

pub struct LocalSource {
    root: PathBuf,
    cameras: BTreeSet<CameraId>,
    tx: SyncSender<FileSignal>,
    rx: Receiver<FileSignal>,
    watcher: Option<RecommendedWatcher>,
    receive_timeout: Duration,
    settle_delay: Duration,
    pending: HashMap<PathBuf, Pending>,
    /// When each path was last relayed. A rename arrives as both `To` and
    /// `Both`, and a settled file may still be closed afterwards.
    reported: HashMap<PathBuf, Instant>,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(queue_capacity.max(1));
        Self {
            root: root.into(),
            cameras: BTreeSet::new(),
            tx,
            rx,
            watcher: None,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            pending: HashMap::new(),
            reported: HashMap::new(),
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn start_watcher(&self) -> RelayResult<RecommendedWatcher> {
        let tx = self.tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("filesystem watch error: {}", e);
                    return;
                }
            };
            let Some(signal) = signal_for(&event) else {
                return;
            };
            match tx.try_send(signal) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(signal)) => {
                    log::warn!("event queue full; dropping {}", signal.path.display());
                }
            }
        })
        .map_err(|e| RelayError::SourceUnavailable(format!("cannot start watcher: {}", e)))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| {
                RelayError::SourceUnavailable(format!(
                    "cannot watch {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
        Ok(watcher)
    }

    fn accept(&mut self, signal: FileSignal, now: Instant, ready: &mut Vec<PathBuf>) {
        if MediaKind::from_path(&signal.path).is_none() {
            return;
        }
        if !signal.finished {
            self.reported.remove(&signal.path);
            self.pending.entry(signal.path).or_insert(Pending {
                len: 0,
                modified: None,
                stable_since: now,
            });
            return;
        }
        self.pending.remove(&signal.path);
        let repeat = self
            .reported
            .get(&signal.path)
            .map(|at| now.saturating_duration_since(*at) < REPEAT_WINDOW)
            .unwrap_or(false);
        if !repeat {
            self.reported.insert(signal.path.clone(), now);
            ready.push(signal.path);
        }
    }

    /// Release pending files that are non-empty and unchanged for the
    /// settle delay. Files that disappeared are forgotten.
    fn settle_pending(&mut self, now: Instant) -> Vec<PathBuf> {
        let settle_delay = self.settle_delay;
        let mut ready = Vec::new();
        self.pending.retain(|path, pending| {
            let Ok(meta) = std::fs::metadata(path) else {
                return false;
            };
            let modified = meta.modified().ok();
            if meta.len() != pending.len || modified != pending.modified {
                pending.len = meta.len();
                pending.modified = modified;
                pending.stable_since = now;
                return true;
            }
            if pending.len > 0 && now.saturating_duration_since(pending.stable_since) >= settle_delay
            {
                ready.push(path.clone());
                return false;
            }
            true
        });
        for path in &ready {
            self.reported.insert(path.clone(), now);
        }
        self.reported
            .retain(|_, at| now.saturating_duration_since(*at) < REPEAT_WINDOW);
        ready
    }

    /// Map an arrived file to its camera. Files outside a known camera
    /// directory, or without a media extension, yield nothing.
    pub fn event_for_path(&self, path: &Path) -> Option<MotionEvent> {
        let kind = MediaKind::from_path(path)?;
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut components = relative.components();
        let camera = match components.next()? {
            Component::Normal(name) => CameraId::new(name.to_str()?),
            _ => return None,
        };
        // a file directly under the root belongs to no camera
        components.next()?;
        if !self.cameras.contains(&camera) {
            log::debug!("ignoring {} (no camera '{}')", path.display(), camera);
            return None;
        }
        Some(MotionEvent::new(
            camera,
            Some(MediaRef::File {
                path: path.to_path_buf(),
                kind,
            }),
        ))
    }
}

impl CameraSource for LocalSource {
    fn name(&self) -> &'static str {
        "local"
    }

    fn discover(&mut self) -> RelayResult<BTreeSet<CameraId>> {
        if !self.root.is_dir() {
            return Err(RelayError::SourceUnavailable(format!(
                "storage path {} is not a directory",
                self.root.display()
            )));
        }
        if let Ok(canonical) = self.root.canonicalize() {
            self.root = canonical;
        }
        self.cameras = match list_camera_dirs(&self.root) {
            Ok(cameras) => cameras,
            Err(e) => {
                log::error!("could not list cameras in {}: {}", self.root.display(), e);
                BTreeSet::new()
            }
        };
        if self.watcher.is_none() {
            self.watcher = Some(self.start_watcher()?);
            log::info!("watching {} for new recordings", self.root.display());
        }
        log::info!("local cameras: {}", join_cameras(&self.cameras));
        Ok(self.cameras.clone())
    }

    fn next_events(&mut self) -> RelayResult<Vec<MotionEvent>> {
        let mut ready = Vec::new();
        match self.rx.recv_timeout(self.receive_timeout) {
            Ok(signal) => self.accept(signal, Instant::now(), &mut ready),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RelayError::SourceUnavailable("watch queue closed".into()))
            }
        }
        while let Ok(signal) = self.rx.try_recv() {
            self.accept(signal, Instant::now(), &mut ready);
        }
        ready.extend(self.settle_pending(Instant::now()));
        Ok(ready
            .iter()
            .filter_map(|path| self.event_for_path(path))
            .collect())
    }

    fn cycle_delay(&self) -> Duration {
        Duration::ZERO
    }

    fn media_fetcher(&self) -> Arc<dyn MediaFetcher> {
        Arc::new(LocalFetcher {
            root: self.root.clone(),
        })
    }
}

fn list_camera_dirs(root: &Path) -> std::io::Result<BTreeSet<CameraId>> {
    let mut cameras = BTreeSet::new();
    for entry in std::fs::read_dir(root)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("skipping unreadable entry in {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.path().is_dir() {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) => {
                cameras.insert(CameraId::new(name));
            }
            None => log::warn!("skipping non UTF-8 camera directory {:?}", entry.file_name()),
        }
    }
    Ok(cameras)
}

/// Serves the newest existing recording of a camera. The local backend has
/// no way to trigger a live capture.
pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn camera_dir(&self, camera: &CameraId) -> RelayResult<PathBuf> {
        let name = camera.as_str();
        let plain = !name.is_empty()
            && Path::new(name)
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && Path::new(name).components().count() == 1;
        let dir = self.root.join(name);
        if !plain || !dir.is_dir() {
            return Err(RelayError::UnknownCamera(name.to_string()));
        }
        Ok(dir)
    }
}

impl MediaFetcher for LocalFetcher {
    fn fetch(&self, camera: &CameraId, kind: MediaKind) -> RelayResult<MediaFile> {
        let dir = self.camera_dir(camera)?;
        let mut newest: Option<(SystemTime, PathBuf, MediaKind)> = None;
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|e| RelayError::media(camera.as_str(), e))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(found) = MediaKind::from_path(&path) else {
                    continue;
                };
                if !kind.accepts(found) {
                    continue;
                }
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                if newest.as_ref().map(|(t, _, _)| modified > *t).unwrap_or(true) {
                    newest = Some((modified, path, found));
                }
            }
        }
        let (_, path, found) = newest.ok_or_else(|| {
            RelayError::media(camera.as_str(), format!("no {} recorded yet", kind.label()))
        })?;
        Ok(MediaFile::existing(path, found))
    }
}
