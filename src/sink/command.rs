//! Chat command surface: parsing and replies.

use crate::media::{MediaFile, MediaKind};
use crate::CameraId;

pub const HELP_TEXT: &str = "\
🤖 Available Commands

📸 /get-photo <camera_name>
   Get a current photo from the specified camera
   Example: /get-photo front_door

🎥 /get-video <camera_name>
   Get a short video from the specified camera
   Example: /get-video backyard

⏹ /disconnect
   Stop all monitoring until the relay is restarted

ℹ️ /help
   Show this help message

Underscore forms (/get_photo, /get_video) work as well.";

pub const DISCONNECTED_TEXT: &str = "Bot is disconnected. Please restart the application.";

pub const DISCONNECT_CONFIRMATION: &str =
    "Bot disconnected. The application will stop monitoring until restarted.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    GetPhoto(Option<CameraId>),
    GetVideo(Option<CameraId>),
    Disconnect,
    Help,
}

impl Command {
    /// Parse a chat message. Returns `None` for plain text and for commands
    /// the relay does not know; those are left to the chat framework.
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let name = words.next()?.strip_prefix('/')?;
        // "/cmd@my_bot" in group chats
        let name = name.split('@').next().unwrap_or(name);
        let camera = words.next().map(CameraId::from);
        match name {
            "get-photo" | "get_photo" | "getphoto" | "dgetphoto" => Some(Command::GetPhoto(camera)),
            "get-video" | "get_video" | "getvideo" | "dgetvideo" => Some(Command::GetVideo(camera)),
            "disconnect" | "ddisconnect" => Some(Command::Disconnect),
            "help" | "dhelp" | "start" => Some(Command::Help),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::GetPhoto(_) => "get-photo",
            Command::GetVideo(_) => "get-video",
            Command::Disconnect => "disconnect",
            Command::Help => "help",
        }
    }

    pub(crate) fn media_request(kind: MediaKind) -> &'static str {
        if kind.is_photo() {
            "get-photo"
        } else {
            "get-video"
        }
    }
}

/// Reply to a command, delivered to the chat by the listener.
#[derive(Debug)]
pub enum Response {
    Text(String),
    /// A user-facing error: bad arguments, unknown camera, failed capture.
    Error(String),
    Media { file: MediaFile, caption: String },
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Response::Text(text) | Response::Error(text) => text,
            Response::Media { caption, .. } => caption,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camera_argument() {
        assert_eq!(
            Command::parse("/get-photo front_door"),
            Some(Command::GetPhoto(Some(CameraId::from("front_door"))))
        );
        assert_eq!(
            Command::parse("/get_video   backyard extra"),
            Some(Command::GetVideo(Some(CameraId::from("backyard"))))
        );
    }

    #[test]
    fn missing_argument_is_none() {
        assert_eq!(Command::parse("/get-photo"), Some(Command::GetPhoto(None)));
    }

    #[test]
    fn accepts_legacy_and_bot_suffixed_names() {
        assert_eq!(Command::parse("/dgetphoto porch"), Command::parse("/get-photo porch"));
        assert_eq!(Command::parse("/disconnect@relay_bot"), Some(Command::Disconnect));
        assert_eq!(Command::parse("/start"), Some(Command::Help));
        assert_eq!(Command::parse("/dhelp"), Some(Command::Help));
    }

    #[test]
    fn names_are_case_sensitive() {
        assert_eq!(Command::parse("/Get-Photo porch"), None);
        assert_eq!(Command::parse("/DISCONNECT"), None);
    }

    #[test]
    fn ignores_plain_text_and_unknown_commands() {
        assert_eq!(Command::parse("hello there"), None);
        assert_eq!(Command::parse("/reboot"), None);
        assert_eq!(Command::parse(""), None);
    }
}
