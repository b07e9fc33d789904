//! Media references and materialized media files.
//!
//! A `MediaRef` is what an event carries: either a handle that asks the
//! camera backend for content on demand, or a path to a file that already
//! exists on disk. Resolving a reference yields a `MediaFile` that the sink
//! reads and uploads. Files downloaded for a single delivery live in a
//! temporary file and are removed when the `MediaFile` is dropped.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{RelayError, RelayResult};
use crate::CameraId;

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// A still image; live snapshot for cloud cameras.
    Photo,
    /// A short clip; freshly recorded for cloud cameras.
    Video,
    /// The recording that accompanied the most recent motion event.
    MotionClip,
}

impl MediaKind {
    /// Infer the kind of a file on disk from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Photo)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn is_photo(self) -> bool {
        self == MediaKind::Photo
    }

    /// Whether a file of kind `found` satisfies a request for `self`.
    pub fn accepts(self, found: MediaKind) -> bool {
        self.is_photo() == found.is_photo()
    }

    pub fn label(self) -> &'static str {
        if self.is_photo() {
            "photo"
        } else {
            "video"
        }
    }

    pub fn default_suffix(self) -> &'static str {
        if self.is_photo() {
            ".jpg"
        } else {
            ".mp4"
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaRef {
    /// Ask the camera backend for content when the alert is delivered.
    Fetch { camera_id: CameraId, kind: MediaKind },
    /// A file already materialized by the backend.
    File { path: PathBuf, kind: MediaKind },
}

impl MediaRef {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaRef::Fetch { kind, .. } | MediaRef::File { kind, .. } => *kind,
        }
    }
}

/// Media content ready to be read by a sink.
#[derive(Debug)]
pub struct MediaFile {
    kind: MediaKind,
    storage: Storage,
}

#[derive(Debug)]
enum Storage {
    Existing(PathBuf),
    Temporary(NamedTempFile),
}

impl MediaFile {
    /// Wrap a file owned by someone else. It is never deleted.
    pub fn existing(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            kind,
            storage: Storage::Existing(path.into()),
        }
    }

    /// Write downloaded bytes to a temporary file removed on drop.
    pub fn temporary(kind: MediaKind, suffix: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("motion_")
            .suffix(suffix)
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self {
            kind,
            storage: Storage::Temporary(file),
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        match &self.storage {
            Storage::Existing(path) => path,
            Storage::Temporary(file) => file.path(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.storage, Storage::Temporary(_))
    }

    pub fn file_name(&self) -> String {
        self.path()
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("motion{}", self.kind.default_suffix()))
    }

    pub fn content_type(&self) -> &'static str {
        content_type_for(self.path(), self.kind)
    }

    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path())
    }
}

pub fn content_type_for(path: &Path, kind: MediaKind) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ if kind.is_photo() => "image/jpeg",
        _ => "video/mp4",
    }
}

/// On-demand media capability exposed by a camera backend.
///
/// Shared between the run loop (alert attachments) and the command
/// listener (get-photo / get-video), so implementations must be thread safe.
pub trait MediaFetcher: Send + Sync {
    /// Produce media of `kind` for `camera`.
    ///
    /// Returns `UnknownCamera` for names the backend does not know, and
    /// `MediaFetchFailed` for everything else that goes wrong.
    fn fetch(&self, camera: &CameraId, kind: MediaKind) -> RelayResult<MediaFile>;
}

/// Turn a reference carried by an event into readable content.
pub fn resolve(media: &MediaRef, fetcher: &dyn MediaFetcher) -> RelayResult<MediaFile> {
    match media {
        MediaRef::Fetch { camera_id, kind } => fetcher.fetch(camera_id, *kind),
        MediaRef::File { path, kind } => {
            if !path.is_file() {
                return Err(RelayError::media(
                    path.display().to_string(),
                    "file no longer exists",
                ));
            }
            Ok(MediaFile::existing(path.clone(), *kind))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoFetch;

    impl MediaFetcher for NoFetch {
        fn fetch(&self, camera: &CameraId, _kind: MediaKind) -> RelayResult<MediaFile> {
            Err(RelayError::UnknownCamera(camera.to_string()))
        }
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(
            MediaKind::from_path(Path::new("a/b/clip.MP4")),
            Some(MediaKind::Video)
        );
        assert_eq!(
            MediaKind::from_path(Path::new("snap.jpeg")),
            Some(MediaKind::Photo)
        );
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn motion_clip_accepts_videos_only() {
        assert!(MediaKind::MotionClip.accepts(MediaKind::Video));
        assert!(!MediaKind::MotionClip.accepts(MediaKind::Photo));
        assert!(MediaKind::Photo.accepts(MediaKind::Photo));
    }

    #[test]
    fn temporary_file_removed_on_drop() {
        let file = MediaFile::temporary(MediaKind::Photo, ".jpg", b"jpeg-bytes").unwrap();
        let path = file.path().to_path_buf();
        assert!(file.is_temporary());
        assert_eq!(file.read().unwrap(), b"jpeg-bytes");
        assert_eq!(file.content_type(), "image/jpeg");
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn resolve_missing_file_fails() {
        let media = MediaRef::File {
            path: PathBuf::from("/nonexistent/motion-relay/clip.mp4"),
            kind: MediaKind::Video,
        };
        let err = resolve(&media, &NoFetch).unwrap_err();
        assert!(matches!(err, RelayError::MediaFetchFailed { .. }));
    }

    #[test]
    fn resolve_existing_file_keeps_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"mp4").unwrap();
        let media = MediaRef::File {
            path: path.clone(),
            kind: MediaKind::Video,
        };
        let file = resolve(&media, &NoFetch).unwrap();
        assert!(!file.is_temporary());
        drop(file);
        assert!(path.exists());
    }
}
