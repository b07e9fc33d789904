//! Error taxonomy shared by sources, sinks and the coordinator.

use thiserror::Error;

pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The camera backend could not be reached or opened.
    /// Fatal during discovery, retried with backoff inside the run loop.
    #[error("camera source unavailable: {0}")]
    SourceUnavailable(String),

    /// Photo or video could not be produced. Degrades an alert to text only.
    #[error("could not fetch media from {camera}: {reason}")]
    MediaFetchFailed { camera: String, reason: String },

    #[error("Camera '{0}' not found")]
    UnknownCamera(String),

    /// Command issued without its camera argument. Carries the command name.
    #[error("Please specify a camera name: /{0} <camera_name>")]
    MissingArgument(&'static str),

    #[error("chat delivery failed: {0}")]
    SinkDeliveryFailed(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    pub fn media(camera: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RelayError::MediaFetchFailed {
            camera: camera.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that are answered in the chat and need no operator attention.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            RelayError::UnknownCamera(_) | RelayError::MissingArgument(_)
        )
    }
}
