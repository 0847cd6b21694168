//! The Telegram capability consumed by the rest of the crate.
//!
//! The MTProto client is an external collaborator: everything above this
//! trait is written against it, the grammers adapter implements it, and the
//! test suite substitutes an in-memory fake.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// A new-message event as delivered by the client.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub chat_id: i64,
    pub message_id: i32,
    pub sender_id: i64,
    /// `true` when the owner account sent this message.
    pub outgoing: bool,
    pub text: String,
    /// Id of the message this one replies to, if any.
    pub reply_to: Option<i32>,
    /// Whether the message carries a voice note.
    pub is_voice: bool,
}

impl MessageEvent {
    /// Does the text look like a slash command?
    pub fn is_command(&self) -> bool {
        self.text.starts_with('/')
    }
}

/// Handle of a message this process sent or edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub id: i32,
}

/// One message out of a chat history fetch.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub sender_id: i64,
    pub outgoing: bool,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// The logged-in identity.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Markdown,
    Html,
}

/// How an uploaded file should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Photo,
    VoiceNote,
}

/// Operations the dispatcher needs from the Telegram client.
///
/// Errors map onto [`crate::error::SakaiError::Telegram`], except a no-op
/// edit which must surface as [`crate::error::SakaiError::NotModified`].
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Pull the next new-message event; `None` means the client shut down.
    async fn next_event(&self) -> Result<Option<MessageEvent>>;

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
        parse_mode: Option<ParseMode>,
    ) -> Result<SentMessage>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()>;

    async fn send_file(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
        reply_to: Option<i32>,
        kind: FileKind,
    ) -> Result<SentMessage>;

    /// Forward one message, optionally into a forum topic.
    async fn forward_message(
        &self,
        from_chat: i64,
        message_id: i32,
        to_chat: i64,
        top_msg_id: Option<i32>,
    ) -> Result<()>;

    /// Fetch a single message by id (used to resolve reply targets).
    async fn get_message(&self, chat_id: i64, message_id: i32) -> Result<Option<MessageEvent>>;

    /// Most recent messages, newest first.
    async fn get_history(&self, chat_id: i64, limit: usize) -> Result<Vec<HistoryMessage>>;

    /// Download the voice note attached to a message.
    async fn download_voice(&self, chat_id: i64, message_id: i32, dest: &Path) -> Result<()>;

    /// Best display name for a peer.
    async fn display_name(&self, peer_id: i64) -> Result<String>;

    /// Lightweight "who am I" used as the liveness probe.
    async fn me(&self) -> Result<UserInfo>;

    fn is_connected(&self) -> bool;

    async fn reconnect(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> MessageEvent {
        MessageEvent {
            chat_id: 1,
            message_id: 1,
            sender_id: 1,
            outgoing: true,
            text: text.to_string(),
            reply_to: None,
            is_voice: false,
        }
    }

    #[test]
    fn test_is_command() {
        assert!(event("/prompt=hi").is_command());
        assert!(!event("hello").is_command());
        assert!(!event("").is_command());
    }
}
