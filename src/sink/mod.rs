//! Notification sinks.
//!
//! A sink delivers motion alerts to a chat and answers the chat's commands.
//! The chat backend itself sits behind `ChatApi`, so `ChatSink` holds the
//! relay's semantics (alert layout, command handling, disconnect) while
//! `TelegramApi` only speaks HTTP.

mod command;
mod multipart;
pub mod telegram;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RelayError, RelayResult};
use crate::media::{self, MediaFetcher, MediaFile, MediaKind, MediaRef};
use crate::CameraId;

pub use command::{Command, Response, DISCONNECTED_TEXT, DISCONNECT_CONFIRMATION, HELP_TEXT};
pub use multipart::Multipart;
pub use telegram::TelegramApi;

const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(25);

/// Process-wide "still connected" flag.
///
/// Starts connected and can only go down: there is no way back to
/// connected short of a restart. Clones share the same flag.
#[derive(Clone, Debug)]
pub struct ConnectionState(Arc<AtomicBool>);

impl ConnectionState {
    pub fn new() -> Self {
        ConnectionState(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns true if this call performed the disconnect.
    pub fn disconnect(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

pub trait NotificationSink: Send + Sync {
    /// Deliver one alert. The text part decides success; a failed
    /// attachment is logged and swallowed. No-op once disconnected.
    fn send_alert(&self, camera: &CameraId, media: Option<&MediaRef>) -> RelayResult<()>;

    fn handle_command(&self, command: Command) -> Response;

    fn is_connected(&self) -> bool;

    /// Blocking command loop, run on its own thread by the coordinator.
    /// Returns after the sink has been disconnected.
    fn listen(&self) -> RelayResult<()>;
}

/// Narrow interface to a chat backend bound to a single chat.
pub trait ChatApi: Send + Sync {
    fn send_text(&self, text: &str) -> RelayResult<()>;

    fn send_media(&self, media: &MediaFile, caption: &str) -> RelayResult<()>;

    /// Wait up to `timeout` for incoming message texts from the chat.
    fn receive(&self, timeout: Duration) -> RelayResult<Vec<String>>;
}

pub struct ChatSink<A: ChatApi> {
    api: A,
    fetcher: Arc<dyn MediaFetcher>,
    connection: ConnectionState,
    receive_timeout: Duration,
}

impl<A: ChatApi> ChatSink<A> {
    pub fn new(api: A, fetcher: Arc<dyn MediaFetcher>, connection: ConnectionState) -> Self {
        Self {
            api,
            fetcher,
            connection,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    fn media_reply(&self, camera: Option<CameraId>, kind: MediaKind) -> Response {
        let Some(camera) = camera else {
            return Response::Error(
                RelayError::MissingArgument(Command::media_request(kind)).to_string(),
            );
        };
        match self.fetcher.fetch(&camera, kind) {
            Ok(file) => {
                let caption = if kind.is_photo() {
                    format!("Current photo from {}", camera)
                } else {
                    format!("Latest video from {}", camera)
                };
                Response::Media { file, caption }
            }
            Err(e) if e.is_user_facing() => {
                log::debug!("{} rejected: {}", Command::media_request(kind), e);
                Response::Error(e.to_string())
            }
            Err(e) => {
                log::warn!("{} for {} failed: {}", Command::media_request(kind), camera, e);
                Response::Error(format!("Error getting {}: {}", kind.label(), e))
            }
        }
    }

    fn deliver(&self, response: &Response) -> RelayResult<()> {
        match response {
            Response::Text(text) | Response::Error(text) => self.api.send_text(text),
            Response::Media { file, caption } => self.api.send_media(file, caption),
        }
    }
}

impl<A: ChatApi> NotificationSink for ChatSink<A> {
    fn send_alert(&self, camera: &CameraId, media: Option<&MediaRef>) -> RelayResult<()> {
        if !self.connection.is_connected() {
            return Ok(());
        }
        self.api
            .send_text(&format!("🚨 Motion detected on camera: {}", camera))?;

        if let Some(media) = media {
            match media::resolve(media, self.fetcher.as_ref()) {
                Ok(file) => {
                    let caption = format!("Motion {} from {}", file.kind().label(), camera);
                    if let Err(e) = self.api.send_media(&file, &caption) {
                        log::warn!("alert attachment for {} not delivered: {}", camera, e);
                    }
                }
                Err(e) => log::warn!("alert for {} sent without media: {}", camera, e),
            }
        }
        log::info!("alert sent for camera {}", camera);
        Ok(())
    }

    fn handle_command(&self, command: Command) -> Response {
        if !self.connection.is_connected() {
            return Response::Text(DISCONNECTED_TEXT.to_string());
        }
        match command {
            Command::Help => Response::Text(HELP_TEXT.to_string()),
            Command::Disconnect => {
                self.connection.disconnect();
                log::info!("disconnect requested from chat");
                Response::Text(DISCONNECT_CONFIRMATION.to_string())
            }
            Command::GetPhoto(camera) => self.media_reply(camera, MediaKind::Photo),
            Command::GetVideo(camera) => self.media_reply(camera, MediaKind::Video),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn listen(&self) -> RelayResult<()> {
        log::info!("command listener started");
        while self.connection.is_connected() {
            let messages = match self.api.receive(self.receive_timeout) {
                Ok(messages) => messages,
                Err(e) => {
                    log::warn!("receiving commands failed: {}", e);
                    std::thread::sleep(RECEIVE_RETRY_DELAY);
                    continue;
                }
            };
            for text in messages {
                let Some(command) = Command::parse(&text) else {
                    continue;
                };
                log::debug!("command /{}", command.name());
                let response = self.handle_command(command);
                if let Err(e) = self.deliver(&response) {
                    log::warn!("reply not delivered: {}", e);
                }
            }
        }
        log::info!("command listener stopped");
        Ok(())
    }
}
