//! Blink cloud camera client.
//!
//! This module provides `BlinkClient`, the `CameraApi` used by the cloud
//! source. It speaks the Blink REST API with a pre-issued session token
//! read from the secrets file written by the Blink login flow; logging in
//! and two-factor verification are left to that flow.
//!
//! The client is responsible for:
//! - Listing cameras (regular cameras, minis and doorbells)
//! - Deriving per-camera motion flags from newly recorded clips
//! - Requesting live snapshots and clips, and downloading them to
//!   temporary files
//!
//! The client MUST NOT:
//! - Log the session token
//! - Keep downloaded media after the caller drops it

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Deserialize;

use super::CameraApi;
use crate::config::BlinkSettings;
use crate::error::{RelayError, RelayResult};
use crate::media::{MediaFetcher, MediaFile, MediaKind};
use crate::CameraId;

const BLINK_DOMAIN: &str = "immedia-semi.com";
const MAX_JSON_BYTES: u64 = 4 * 1024 * 1024;
const MAX_MEDIA_BYTES: u64 = 64 * 1024 * 1024;
const CLIP_LOOKBACK_SECS: i64 = 5;

/// Session credentials from the Blink secrets file. Extra keys are ignored.
#[derive(Clone, Deserialize)]
pub struct BlinkCredentials {
    pub token: String,
    pub account_id: u64,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

impl std::fmt::Debug for BlinkCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlinkCredentials")
            .field("token", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("region_id", &self.region_id)
            .field("host", &self.host)
            .finish()
    }
}

impl BlinkCredentials {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read Blink secrets {}: {}", path.display(), e))?;
        let creds: Self = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid Blink secrets {}: {}", path.display(), e))?;
        if creds.token.trim().is_empty() {
            return Err(anyhow!("Blink secrets {} carry no token", path.display()));
        }
        creds.base_url()?;
        Ok(creds)
    }

    /// REST endpoint for the account's region.
    pub fn base_url(&self) -> Result<String> {
        if let Some(region) = self.region_id.as_deref().map(str::trim) {
            if !region.is_empty() {
                return Ok(format!("https://rest-{}.{}", region, BLINK_DOMAIN));
            }
        }
        match self.host.as_deref().map(str::trim) {
            Some(host) if host.starts_with("https://") || host.starts_with("http://") => {
                Ok(host.trim_end_matches('/').to_string())
            }
            Some(host) if !host.is_empty() => {
                Ok(format!("https://{}", host.trim_end_matches('/')))
            }
            _ => Err(anyhow!("Blink secrets need a region_id or host")),
        }
    }
}

// -------------------- Wire Format --------------------

#[derive(Debug, Deserialize)]
pub struct Homescreen {
    #[serde(default)]
    pub cameras: Vec<HomescreenDevice>,
    #[serde(default)]
    pub owls: Vec<HomescreenDevice>,
    #[serde(default)]
    pub doorbells: Vec<HomescreenDevice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomescreenDevice {
    pub id: u64,
    pub name: String,
    pub network_id: u64,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPage {
    #[serde(default)]
    pub media: Vec<MediaEntry>,
}

/// One recorded clip from the media list.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaEntry {
    pub device_name: String,
    /// Download path relative to the REST endpoint.
    pub media: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Camera,
    Mini,
    Doorbell,
}

#[derive(Clone, Debug)]
pub struct BlinkCamera {
    pub id: u64,
    pub network_id: u64,
    pub thumbnail: Option<String>,
    pub kind: DeviceKind,
}

pub fn parse_homescreen(body: &[u8]) -> RelayResult<BTreeMap<CameraId, BlinkCamera>> {
    let homescreen: Homescreen = serde_json::from_slice(body)
        .map_err(|e| RelayError::SourceUnavailable(format!("invalid homescreen: {}", e)))?;
    let mut cameras = BTreeMap::new();
    let groups = [
        (homescreen.cameras, DeviceKind::Camera),
        (homescreen.owls, DeviceKind::Mini),
        (homescreen.doorbells, DeviceKind::Doorbell),
    ];
    for (devices, kind) in groups {
        for device in devices {
            cameras.insert(
                CameraId::new(device.name),
                BlinkCamera {
                    id: device.id,
                    network_id: device.network_id,
                    thumbnail: device.thumbnail,
                    kind,
                },
            );
        }
    }
    Ok(cameras)
}

pub fn parse_media_page(body: &[u8]) -> RelayResult<Vec<MediaEntry>> {
    let page: MediaPage = serde_json::from_slice(body)
        .map_err(|e| RelayError::SourceUnavailable(format!("invalid media list: {}", e)))?;
    Ok(page.media)
}

/// Motion flag per known camera: true when the listing holds a clip that
/// was recorded inside the window and has not been seen before. Also
/// returns the newest such clip per camera.
///
/// Clips are listed only once their upload finishes, while `created_at` is
/// the start of the recording, so the window has to reach back past the
/// previous refresh. `seen` keeps a clip listed twice from counting twice.
pub fn motion_flags(
    cameras: &BTreeMap<CameraId, BlinkCamera>,
    entries: &[MediaEntry],
    window_start: DateTime<Utc>,
    seen: &HashMap<String, DateTime<Utc>>,
) -> (Vec<(CameraId, bool)>, HashMap<CameraId, MediaEntry>) {
    let mut newest: HashMap<CameraId, MediaEntry> = HashMap::new();
    for entry in entries {
        if entry.deleted || entry.created_at < window_start || seen.contains_key(&entry.media) {
            continue;
        }
        let camera = CameraId::new(entry.device_name.clone());
        if !cameras.contains_key(&camera) {
            continue;
        }
        let replace = newest
            .get(&camera)
            .map(|current| entry.created_at > current.created_at)
            .unwrap_or(true);
        if replace {
            newest.insert(camera, entry.clone());
        }
    }
    let samples = cameras
        .keys()
        .map(|camera| (camera.clone(), newest.contains_key(camera)))
        .collect();
    (samples, newest)
}

/// Thumbnail paths come without an extension on most firmware.
fn thumbnail_path(raw: &str) -> String {
    let (path, query) = match raw.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw, None),
    };
    let path = if path.ends_with(".jpg") {
        path.to_string()
    } else {
        format!("{}.jpg", path)
    };
    match query {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    }
}

fn media_suffix(path: &str, kind: MediaKind) -> String {
    let path = path.split('?').next().unwrap_or(path);
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some(ext) if MediaKind::from_path(Path::new(path)).is_some() => format!(".{}", ext),
        _ => kind.default_suffix().to_string(),
    }
}

// -------------------- Client --------------------

/// Read at most `limit` bytes. A longer body is an error, never a
/// truncated download.
fn read_capped(reader: impl Read, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("body exceeds {} bytes", limit),
        ));
    }
    Ok(body)
}

#[derive(Default)]
struct BlinkState {
    cameras: BTreeMap<CameraId, BlinkCamera>,
    last_refresh: Option<DateTime<Utc>>,
    latest_clips: HashMap<CameraId, String>,
    /// Clip path to recording time, for clips already reported.
    seen_clips: HashMap<String, DateTime<Utc>>,
}

impl BlinkState {
    fn remember_clips(&mut self, entries: &[MediaEntry]) {
        for entry in entries.iter().filter(|e| !e.deleted) {
            self.seen_clips.insert(entry.media.clone(), entry.created_at);
        }
    }

    /// Turn one media listing into motion samples and advance the ledger of
    /// seen clips.
    fn record_poll(
        &mut self,
        entries: &[MediaEntry],
        window_start: DateTime<Utc>,
    ) -> Vec<(CameraId, bool)> {
        let (samples, newest) = motion_flags(&self.cameras, entries, window_start, &self.seen_clips);
        self.remember_clips(entries);
        self.seen_clips.retain(|_, created| *created >= window_start);
        for (camera, entry) in newest {
            self.latest_clips.insert(camera, entry.media);
        }
        samples
    }
}

pub struct BlinkClient {
    agent: ureq::Agent,
    base_url: String,
    credentials: BlinkCredentials,
    capture_settle: Duration,
    motion_lookback: TimeDelta,
    state: Mutex<BlinkState>,
}

impl BlinkClient {
    pub fn new(credentials: BlinkCredentials, settings: &BlinkSettings) -> Result<Self> {
        let base_url = credentials.base_url()?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(settings.request_timeout)
            .build();
        Ok(Self {
            agent,
            base_url,
            credentials,
            capture_settle: settings.capture_settle,
            motion_lookback: TimeDelta::from_std(settings.motion_lookback)
                .map_err(|e| anyhow!("invalid motion lookback: {}", e))?,
            state: Mutex::new(BlinkState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, BlinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_bytes(&self, path: &str, query: &[(&str, &str)], limit: u64) -> Result<Vec<u8>> {
        let mut request = self
            .agent
            .get(&self.url(path))
            .set("TOKEN_AUTH", &self.credentials.token);
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = request.call().map_err(|e| anyhow!("GET {}: {}", path, e))?;
        read_capped(response.into_reader(), limit).map_err(|e| anyhow!("GET {}: {}", path, e))
    }

    fn post(&self, path: &str) -> Result<()> {
        self.agent
            .post(&self.url(path))
            .set("TOKEN_AUTH", &self.credentials.token)
            .call()
            .map_err(|e| anyhow!("POST {}: {}", path, e))?;
        Ok(())
    }

    fn refresh_homescreen(&self) -> RelayResult<BTreeMap<CameraId, BlinkCamera>> {
        let path = format!(
            "/api/v3/accounts/{}/homescreen",
            self.credentials.account_id
        );
        let body = self
            .get_bytes(&path, &[], MAX_JSON_BYTES)
            .map_err(|e| RelayError::SourceUnavailable(e.to_string()))?;
        let cameras = parse_homescreen(&body)?;
        self.state().cameras = cameras.clone();
        Ok(cameras)
    }

    fn changed_media(&self, since: DateTime<Utc>) -> RelayResult<Vec<MediaEntry>> {
        let path = format!(
            "/api/v1/accounts/{}/media/changed",
            self.credentials.account_id
        );
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let body = self
            .get_bytes(&path, &[("since", since.as_str()), ("page", "1")], MAX_JSON_BYTES)
            .map_err(|e| RelayError::SourceUnavailable(e.to_string()))?;
        parse_media_page(&body)
    }

    fn camera(&self, camera: &CameraId) -> RelayResult<BlinkCamera> {
        self.state()
            .cameras
            .get(camera)
            .cloned()
            .ok_or_else(|| RelayError::UnknownCamera(camera.to_string()))
    }

    fn device_path(&self, device: &BlinkCamera, action: &str) -> String {
        match device.kind {
            DeviceKind::Camera => format!(
                "/network/{}/camera/{}/{}",
                device.network_id, device.id, action
            ),
            DeviceKind::Mini | DeviceKind::Doorbell => {
                let group = if device.kind == DeviceKind::Mini {
                    "owls"
                } else {
                    "doorbells"
                };
                format!(
                    "/api/v1/accounts/{}/networks/{}/{}/{}/{}",
                    self.credentials.account_id, device.network_id, group, device.id, action
                )
            }
        }
    }

    fn snap_picture(&self, camera: &CameraId) -> RelayResult<MediaFile> {
        let device = self.camera(camera)?;
        self.post(&self.device_path(&device, "thumbnail"))
            .map_err(|e| RelayError::media(camera.as_str(), e))?;
        std::thread::sleep(self.capture_settle);
        let cameras = self
            .refresh_homescreen()
            .map_err(|e| RelayError::media(camera.as_str(), e))?;
        let thumbnail = cameras
            .get(camera)
            .and_then(|c| c.thumbnail.clone())
            .ok_or_else(|| RelayError::media(camera.as_str(), "no thumbnail available"))?;
        self.download(camera, &thumbnail_path(&thumbnail), MediaKind::Photo)
    }

    fn record_video(&self, camera: &CameraId) -> RelayResult<MediaFile> {
        let device = self.camera(camera)?;
        let requested = Utc::now();
        self.post(&self.device_path(&device, "clip"))
            .map_err(|e| RelayError::media(camera.as_str(), e))?;
        std::thread::sleep(self.capture_settle);
        let entries = self
            .changed_media(requested - TimeDelta::seconds(CLIP_LOOKBACK_SECS))
            .map_err(|e| RelayError::media(camera.as_str(), e))?;
        let clip = entries
            .into_iter()
            .filter(|entry| !entry.deleted && entry.device_name == camera.as_str())
            .max_by_key(|entry| entry.created_at)
            .ok_or_else(|| RelayError::media(camera.as_str(), "clip not available yet"))?;
        self.download(camera, &clip.media, MediaKind::Video)
    }

    fn motion_clip(&self, camera: &CameraId) -> RelayResult<MediaFile> {
        let path = {
            let state = self.state();
            if !state.cameras.contains_key(camera) {
                return Err(RelayError::UnknownCamera(camera.to_string()));
            }
            state.latest_clips.get(camera).cloned()
        };
        let path =
            path.ok_or_else(|| RelayError::media(camera.as_str(), "no motion clip recorded"))?;
        self.download(camera, &path, MediaKind::MotionClip)
    }

    fn download(&self, camera: &CameraId, path: &str, kind: MediaKind) -> RelayResult<MediaFile> {
        let bytes = self
            .get_bytes(path, &[], MAX_MEDIA_BYTES)
            .map_err(|e| RelayError::media(camera.as_str(), e))?;
        if bytes.is_empty() {
            return Err(RelayError::media(camera.as_str(), "empty download"));
        }
        log::debug!("downloaded {} bytes of {} from {}", bytes.len(), kind.label(), camera);
        MediaFile::temporary(kind, &media_suffix(path, kind), &bytes)
            .map_err(|e| RelayError::media(camera.as_str(), e))
    }
}

impl MediaFetcher for BlinkClient {
    fn fetch(&self, camera: &CameraId, kind: MediaKind) -> RelayResult<MediaFile> {
        match kind {
            MediaKind::Photo => self.snap_picture(camera),
            MediaKind::Video => self.record_video(camera),
            MediaKind::MotionClip => self.motion_clip(camera),
        }
    }
}

impl CameraApi for BlinkClient {
    fn cameras(&self) -> RelayResult<Vec<CameraId>> {
        let started = Utc::now();
        let cameras = self.refresh_homescreen()?;
        if self.state().last_refresh.is_none() {
            // clips already listed at startup are not new motion
            let recent = match self.changed_media(started - self.motion_lookback) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("could not read recent clips: {}", e);
                    Vec::new()
                }
            };
            let mut state = self.state();
            state.remember_clips(&recent);
            state.last_refresh = Some(started);
        }
        Ok(cameras.into_keys().collect())
    }

    fn motion_samples(&self) -> RelayResult<Vec<(CameraId, bool)>> {
        let started = Utc::now();
        let last_refresh = self.state().last_refresh.unwrap_or(started);
        let window_start = last_refresh - self.motion_lookback;
        let entries = self.changed_media(window_start)?;

        let mut state = self.state();
        let samples = state.record_poll(&entries, window_start);
        state.last_refresh = Some(started);
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOMESCREEN: &str = r#"{
        "account": {"id": 1234},
        "cameras": [
            {"id": 11, "name": "front_door", "network_id": 7, "thumbnail": "/media/e001/account/1234/network/7/camera/11/clip_abc"}
        ],
        "owls": [
            {"id": 21, "name": "garage", "network_id": 7, "thumbnail": null}
        ],
        "doorbells": []
    }"#;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    fn entry(camera: &str, media: &str, created: &str, deleted: bool) -> MediaEntry {
        MediaEntry {
            device_name: camera.to_string(),
            media: media.to_string(),
            created_at: at(created),
            deleted,
        }
    }

    #[test]
    fn homescreen_lists_cameras_and_minis() {
        let cameras = parse_homescreen(HOMESCREEN.as_bytes()).unwrap();
        assert_eq!(cameras.len(), 2);
        let front = &cameras[&CameraId::from("front_door")];
        assert_eq!(front.kind, DeviceKind::Camera);
        assert_eq!(front.network_id, 7);
        assert_eq!(cameras[&CameraId::from("garage")].kind, DeviceKind::Mini);
    }

    #[test]
    fn malformed_homescreen_is_unavailable() {
        let err = parse_homescreen(b"{not json").unwrap_err();
        assert!(matches!(err, RelayError::SourceUnavailable(_)));
    }

    #[test]
    fn media_page_parses_blink_timestamps() {
        let body = r#"{"media": [
            {"device_name": "front_door", "media": "/api/v2/clip.mp4",
             "created_at": "2024-05-01T10:00:03+00:00", "deleted": false, "id": 9}
        ]}"#;
        let entries = parse_media_page(body.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].created_at, at("2024-05-01T10:00:03Z"));
    }

    #[test]
    fn motion_flags_only_count_new_clips() {
        let cameras = parse_homescreen(HOMESCREEN.as_bytes()).unwrap();
        let since = at("2024-05-01T10:00:00Z");
        let entries = vec![
            entry("front_door", "/old.mp4", "2024-05-01T09:59:00Z", false),
            entry("front_door", "/a.mp4", "2024-05-01T10:00:10Z", false),
            entry("front_door", "/b.mp4", "2024-05-01T10:00:20Z", false),
            entry("garage", "/gone.mp4", "2024-05-01T10:00:30Z", true),
            entry("shed", "/unknown.mp4", "2024-05-01T10:00:30Z", false),
        ];
        let (samples, newest) = motion_flags(&cameras, &entries, since, &HashMap::new());
        assert_eq!(
            samples,
            vec![
                (CameraId::from("front_door"), true),
                (CameraId::from("garage"), false)
            ]
        );
        assert_eq!(newest[&CameraId::from("front_door")].media, "/b.mp4");
        assert!(!newest.contains_key(&CameraId::from("shed")));
    }

    #[test]
    fn clip_listed_after_the_refresh_still_counts() {
        let cameras = parse_homescreen(HOMESCREEN.as_bytes()).unwrap();
        let mut state = BlinkState {
            cameras,
            ..Default::default()
        };
        let lookback = TimeDelta::seconds(60);
        let porch_clip = entry("front_door", "/late.mp4", "2024-05-01T10:00:02Z", false);

        // recording started at 10:00:02, upload finished after the 10:00:05 refresh
        let first = state.record_poll(&[], at("2024-05-01T10:00:05Z") - lookback);
        assert!(first.iter().all(|(_, active)| !active));

        let second = state.record_poll(
            std::slice::from_ref(&porch_clip),
            at("2024-05-01T10:00:35Z") - lookback,
        );
        assert!(second.contains(&(CameraId::from("front_door"), true)));
        assert_eq!(
            state.latest_clips[&CameraId::from("front_door")],
            "/late.mp4"
        );

        // still inside the window on the next poll, but already reported
        let third = state.record_poll(
            std::slice::from_ref(&porch_clip),
            at("2024-05-01T10:00:50Z") - lookback,
        );
        assert!(third.contains(&(CameraId::from("front_door"), false)));
    }

    #[test]
    fn seen_clips_expire_with_the_window() {
        let mut state = BlinkState::default();
        state.remember_clips(&[
            entry("front_door", "/old.mp4", "2024-05-01T09:00:00Z", false),
            entry("front_door", "/new.mp4", "2024-05-01T10:00:00Z", false),
            entry("front_door", "/gone.mp4", "2024-05-01T10:00:00Z", true),
        ]);
        state.record_poll(&[], at("2024-05-01T09:59:00Z"));
        assert_eq!(
            state.seen_clips.keys().collect::<Vec<_>>(),
            vec![&"/new.mp4".to_string()]
        );
    }

    #[test]
    fn oversized_body_is_rejected() {
        let body = vec![7u8; 16];
        assert_eq!(read_capped(&body[..], 16).unwrap().len(), 16);
        let err = read_capped(&body[..], 15).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn thumbnail_gets_jpg_extension() {
        assert_eq!(thumbnail_path("/media/thumb"), "/media/thumb.jpg");
        assert_eq!(thumbnail_path("/media/thumb.jpg"), "/media/thumb.jpg");
        assert_eq!(
            thumbnail_path("/api/v3/media/thumb?ts=1&ext="),
            "/api/v3/media/thumb.jpg?ts=1&ext="
        );
    }

    #[test]
    fn suffix_follows_download_path() {
        assert_eq!(media_suffix("/clip.mp4?x=1", MediaKind::Video), ".mp4");
        assert_eq!(media_suffix("/clip", MediaKind::MotionClip), ".mp4");
        assert_eq!(media_suffix("/thumb.jpg", MediaKind::Photo), ".jpg");
    }

    #[test]
    fn base_url_prefers_region() {
        let creds: BlinkCredentials = serde_json::from_str(
            r#"{"token": "t", "account_id": 1, "region_id": "u014", "host": "ignored", "uid": "x"}"#,
        )
        .unwrap();
        assert_eq!(creds.base_url().unwrap(), "https://rest-u014.immedia-semi.com");

        let creds: BlinkCredentials =
            serde_json::from_str(r#"{"token": "t", "account_id": 1, "host": "rest-e002.immedia-semi.com/"}"#)
                .unwrap();
        assert_eq!(creds.base_url().unwrap(), "https://rest-e002.immedia-semi.com");
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let creds: BlinkCredentials =
            serde_json::from_str(r#"{"token": "secret-token", "account_id": 1, "region_id": "u1"}"#)
                .unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn credentials_load_rejects_empty_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, r#"{"token": " ", "account_id": 1, "region_id": "u1"}"#).unwrap();
        assert!(BlinkCredentials::load(&path).is_err());
    }
}
