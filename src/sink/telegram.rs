//! Telegram Bot API transport.
//!
//! Implements `ChatApi` over the Bot HTTP API: `sendMessage` for text,
//! `sendPhoto` / `sendVideo` multipart uploads for media, and `getUpdates`
//! long polling for commands. The transport is bound to one chat; updates
//! from any other chat are dropped.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{ChatApi, Multipart};
use crate::config::TelegramSettings;
use crate::error::{RelayError, RelayResult};
use crate::media::MediaFile;

const UPLOAD_TIMEOUT_FACTOR: u32 = 4;

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Split a batch of updates into the next polling offset and the message
/// texts that came from `chat_id`.
pub fn accept_updates(updates: Vec<Update>, chat_id: &str) -> (Option<i64>, Vec<String>) {
    let next_offset = updates.iter().map(|u| u.update_id + 1).max();
    let mut texts = Vec::new();
    for update in updates {
        let Some(message) = update.message else {
            continue;
        };
        if message.chat.id.to_string() != chat_id.trim() {
            log::warn!("ignoring message from unexpected chat {}", message.chat.id);
            continue;
        }
        if let Some(text) = message.text {
            texts.push(text);
        }
    }
    (next_offset, texts)
}

pub struct TelegramApi {
    agent: ureq::Agent,
    endpoint: String,
    bot_token: String,
    chat_id: String,
    request_timeout: Duration,
    offset: AtomicI64,
}

impl TelegramApi {
    pub fn new(settings: &TelegramSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(settings.request_timeout)
            .build();
        Self {
            agent,
            endpoint: format!(
                "{}/bot{}",
                settings.api_base.trim_end_matches('/'),
                settings.bot_token
            ),
            bot_token: settings.bot_token.clone(),
            chat_id: settings.chat_id.clone(),
            request_timeout: settings.request_timeout,
            offset: AtomicI64::new(0),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    /// Transport errors embed the request URL, which carries the token.
    fn describe(&self, method: &str, err: ureq::Error) -> RelayError {
        let detail = match err {
            ureq::Error::Status(code, response) => {
                let reason = response
                    .into_json::<ApiReply<serde_json::Value>>()
                    .ok()
                    .and_then(|reply| reply.description)
                    .unwrap_or_default();
                format!("HTTP {} {}", code, reason)
            }
            other => other.to_string(),
        };
        RelayError::SinkDeliveryFailed(format!(
            "{}: {}",
            method,
            detail.replace(&self.bot_token, "<redacted>")
        ))
    }

    fn read_reply<T: DeserializeOwned>(
        &self,
        method: &str,
        response: ureq::Response,
    ) -> RelayResult<Option<T>> {
        let reply: ApiReply<T> = response.into_json().map_err(|e| {
            RelayError::SinkDeliveryFailed(format!("{}: unreadable reply: {}", method, e))
        })?;
        if !reply.ok {
            return Err(RelayError::SinkDeliveryFailed(format!(
                "{}: {}",
                method,
                reply.description.unwrap_or_else(|| "request rejected".into())
            )));
        }
        Ok(reply.result)
    }
}

impl ChatApi for TelegramApi {
    fn send_text(&self, text: &str) -> RelayResult<()> {
        let response = self
            .agent
            .post(&self.method_url("sendMessage"))
            .send_json(json!({
                "chat_id": self.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .map_err(|e| self.describe("sendMessage", e))?;
        self.read_reply::<serde_json::Value>("sendMessage", response)?;
        Ok(())
    }

    fn send_media(&self, media: &MediaFile, caption: &str) -> RelayResult<()> {
        let (method, field) = if media.kind().is_photo() {
            ("sendPhoto", "photo")
        } else {
            ("sendVideo", "video")
        };
        let data = media.read().map_err(|e| {
            RelayError::SinkDeliveryFailed(format!(
                "{}: cannot read {}: {}",
                method,
                media.path().display(),
                e
            ))
        })?;
        let (content_type, body) = Multipart::new()
            .text("chat_id", &self.chat_id)
            .text("caption", caption)
            .file(field, &media.file_name(), media.content_type(), &data)
            .finish();
        let response = self
            .agent
            .post(&self.method_url(method))
            .timeout(self.request_timeout * UPLOAD_TIMEOUT_FACTOR)
            .set("Content-Type", &content_type)
            .send_bytes(&body)
            .map_err(|e| self.describe(method, e))?;
        self.read_reply::<serde_json::Value>(method, response)?;
        log::debug!("uploaded {} ({} bytes)", media.file_name(), data.len());
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> RelayResult<Vec<String>> {
        let response = self
            .agent
            .get(&self.method_url("getUpdates"))
            .query("offset", &self.offset.load(Ordering::SeqCst).to_string())
            .query("timeout", &timeout.as_secs().to_string())
            .query("allowed_updates", r#"["message"]"#)
            .timeout(timeout + self.request_timeout)
            .call()
            .map_err(|e| self.describe("getUpdates", e))?;
        let updates: Vec<Update> = self
            .read_reply("getUpdates", response)?
            .unwrap_or_default();
        let (next_offset, texts) = accept_updates(updates, &self.chat_id);
        if let Some(offset) = next_offset {
            self.offset.fetch_max(offset, Ordering::SeqCst);
        }
        Ok(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPDATES: &str = r#"{"ok": true, "result": [
        {"update_id": 100, "message": {"message_id": 1, "chat": {"id": 4242, "type": "private"}, "text": "/get-photo porch"}},
        {"update_id": 101, "message": {"message_id": 2, "chat": {"id": 999, "type": "private"}, "text": "/disconnect"}},
        {"update_id": 102, "edited_message": {"message_id": 1, "chat": {"id": 4242}}},
        {"update_id": 103, "message": {"message_id": 3, "chat": {"id": 4242, "type": "private"}}}
    ]}"#;

    #[test]
    fn only_configured_chat_is_accepted() {
        let reply: ApiReply<Vec<Update>> = serde_json::from_str(UPDATES).unwrap();
        assert!(reply.ok);
        let (offset, texts) = accept_updates(reply.result.unwrap(), "4242");
        assert_eq!(offset, Some(104));
        assert_eq!(texts, vec!["/get-photo porch".to_string()]);
    }

    #[test]
    fn empty_batch_keeps_offset() {
        let (offset, texts) = accept_updates(Vec::new(), "4242");
        assert_eq!(offset, None);
        assert!(texts.is_empty());
    }

    #[test]
    fn error_reply_carries_description() {
        let reply: ApiReply<serde_json::Value> =
            serde_json::from_str(r#"{"ok": false, "error_code": 400, "description": "Bad Request: chat not found"}"#)
                .unwrap();
        assert!(!reply.ok);
        assert!(reply.result.is_none());
        assert_eq!(reply.description.as_deref(), Some("Bad Request: chat not found"));
    }

    #[test]
    fn endpoint_includes_token() {
        let api = TelegramApi::new(&TelegramSettings {
            bot_token: "123:abc".into(),
            chat_id: "4242".into(),
            api_base: "https://api.telegram.org/".into(),
            request_timeout: Duration::from_secs(5),
        });
        assert_eq!(
            api.method_url("getMe"),
            "https://api.telegram.org/bot123:abc/getMe"
        );
    }
}
