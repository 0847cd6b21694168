//! grammers-backed implementation of the [`TelegramApi`] capability.
//!
//! This is the only module that touches MTProto types. Peer access objects
//! (`PackedChat`) are collected from dialogs at startup and from every
//! incoming message, since most operations need one to address a chat.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use grammers_client::session::Session;
use grammers_client::types::{Chat, Media, Message, PackedChat};
use grammers_client::{Client, Config as ClientConfig, InitParams, InputMessage, SignInError, Update};
use grammers_tl_types as tl;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::error::{Result, SakaiError};

use super::api::{
    FileKind, HistoryMessage, MessageEvent, ParseMode, SentMessage, TelegramApi, UserInfo,
};

pub struct MtProtoClient {
    client: Client,
    session_path: PathBuf,
    chats: Mutex<HashMap<i64, PackedChat>>,
    connected: AtomicBool,
}

impl MtProtoClient {
    /// Connect and, if needed, walk through the interactive login.
    pub async fn connect(config: &TelegramConfig, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let session_path = data_dir.join(format!("{}.session", config.session_name));

        let session = Session::load_file_or_create(&session_path)
            .map_err(|e| SakaiError::Telegram(format!("could not load session: {}", e)))?;

        let client = Client::connect(ClientConfig {
            session,
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            params: InitParams {
                catch_up: false,
                ..Default::default()
            },
        })
        .await
        .map_err(|e| SakaiError::Telegram(format!("could not connect: {}", e)))?;

        let authorized = client
            .is_authorized()
            .await
            .map_err(|e| SakaiError::Telegram(format!("authorization check failed: {}", e)))?;

        if !authorized {
            Self::sign_in(&client, config).await?;
            client
                .session()
                .save_to_file(&session_path)
                .map_err(|e| SakaiError::Telegram(format!("could not save session: {}", e)))?;
        }

        let adapter = Self {
            client,
            session_path,
            chats: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        };
        adapter.warm_chat_map().await?;
        Ok(adapter)
    }

    async fn sign_in(client: &Client, config: &TelegramConfig) -> Result<()> {
        info!(phone = %config.phone, "Signing in");
        let token = client
            .request_login_code(&config.phone)
            .await
            .map_err(|e| SakaiError::Telegram(format!("login code request failed: {}", e)))?;

        let code = prompt("Enter the login code sent by Telegram: ")?;
        match client.sign_in(&token, &code).await {
            Ok(user) => {
                info!(user = %user.full_name(), "Signed in");
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                let password = prompt("Enter your 2FA password: ")?;
                client
                    .check_password(password_token, password.trim())
                    .await
                    .map_err(|e| SakaiError::Telegram(format!("2FA check failed: {}", e)))?;
                Ok(())
            }
            Err(e) => Err(SakaiError::Telegram(format!("sign-in failed: {}", e))),
        }
    }

    /// Seed the chat map from the dialog list so configured targets (the
    /// categorization group) are addressable before their first message.
    async fn warm_chat_map(&self) -> Result<()> {
        let mut dialogs = self.client.iter_dialogs();
        let mut count = 0usize;
        loop {
            match dialogs.next().await {
                Ok(Some(dialog)) => {
                    let chat = dialog.chat();
                    self.chats.lock().unwrap().insert(chat.id(), chat.pack());
                    count += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Dialog iteration failed");
                    break;
                }
            }
        }
        info!(chats = count, "Chat map warmed from dialogs");
        Ok(())
    }

    fn remember_chat(&self, chat: &Chat) {
        self.chats.lock().unwrap().insert(chat.id(), chat.pack());
    }

    fn packed(&self, chat_id: i64) -> Result<PackedChat> {
        self.chats
            .lock()
            .unwrap()
            .get(&chat_id)
            .copied()
            .ok_or_else(|| SakaiError::Telegram(format!("unknown chat {}", chat_id)))
    }

    fn to_event(&self, message: &Message) -> MessageEvent {
        let is_voice = match message.media() {
            Some(Media::Document(document)) => document
                .mime_type()
                .map(|mime| mime.starts_with("audio/ogg"))
                .unwrap_or(false),
            _ => false,
        };
        MessageEvent {
            chat_id: message.chat().id(),
            message_id: message.id(),
            sender_id: message
                .sender()
                .map(|s| s.id())
                .unwrap_or_else(|| message.chat().id()),
            outgoing: message.outgoing(),
            text: message.text().to_string(),
            reply_to: message.reply_to_message_id(),
            is_voice,
        }
    }

    fn input_message(text: &str, reply_to: Option<i32>, parse_mode: Option<ParseMode>) -> InputMessage {
        let input = match parse_mode {
            Some(ParseMode::Markdown) => InputMessage::markdown(text),
            Some(ParseMode::Html) => InputMessage::html(text),
            None => InputMessage::text(text),
        };
        input.reply_to(reply_to)
    }

    async fn message_by_id(&self, chat_id: i64, message_id: i32) -> Result<Option<Message>> {
        let chat = self.packed(chat_id)?;
        let messages = self
            .client
            .get_messages_by_id(chat, &[message_id])
            .await
            .map_err(|e| SakaiError::Telegram(format!("message fetch failed: {}", e)))?;
        Ok(messages.into_iter().flatten().next())
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn map_tg_error(e: impl std::fmt::Display) -> SakaiError {
    let text = e.to_string();
    if text.contains("MESSAGE_NOT_MODIFIED") {
        SakaiError::NotModified
    } else {
        SakaiError::Telegram(text)
    }
}

/// 64-bit client-generated id required by the forward request. Nanosecond
/// clock entropy is unique enough for one process.
fn next_random_id() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    (nanos ^ (std::process::id() as u64) << 32) as i64
}

#[async_trait]
impl TelegramApi for MtProtoClient {
    async fn next_event(&self) -> Result<Option<MessageEvent>> {
        loop {
            match self.client.next_update().await {
                Ok(Update::NewMessage(message)) => {
                    self.remember_chat(&message.chat());
                    self.connected.store(true, Ordering::SeqCst);
                    return Ok(Some(self.to_event(&message)));
                }
                Ok(_) => continue,
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(SakaiError::Telegram(format!("update stream error: {}", e)));
                }
            }
        }
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
        parse_mode: Option<ParseMode>,
    ) -> Result<SentMessage> {
        let chat = self.packed(chat_id)?;
        let message = self
            .client
            .send_message(chat, Self::input_message(text, reply_to, parse_mode))
            .await
            .map_err(map_tg_error)?;
        Ok(SentMessage {
            chat_id,
            id: message.id(),
        })
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<()> {
        let chat = self.packed(chat_id)?;
        self.client
            .edit_message(chat, message_id, Self::input_message(text, None, parse_mode))
            .await
            .map_err(map_tg_error)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        let chat = self.packed(chat_id)?;
        self.client
            .delete_messages(chat, &[message_id])
            .await
            .map(|_| ())
            .map_err(map_tg_error)
    }

    async fn send_file(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
        reply_to: Option<i32>,
        kind: FileKind,
    ) -> Result<SentMessage> {
        let chat = self.packed(chat_id)?;
        let uploaded = self
            .client
            .upload_file(path)
            .await
            .map_err(|e| SakaiError::Telegram(format!("upload failed: {}", e)))?;

        let input = InputMessage::text(caption.unwrap_or_default()).reply_to(reply_to);
        let input = match kind {
            FileKind::Photo => input.photo(uploaded),
            FileKind::VoiceNote => input.document(uploaded),
        };
        let message = self
            .client
            .send_message(chat, input)
            .await
            .map_err(map_tg_error)?;
        Ok(SentMessage {
            chat_id,
            id: message.id(),
        })
    }

    async fn forward_message(
        &self,
        from_chat: i64,
        message_id: i32,
        to_chat: i64,
        top_msg_id: Option<i32>,
    ) -> Result<()> {
        let source = self.packed(from_chat)?;
        let dest = self.packed(to_chat)?;

        // The high-level helper cannot address forum topics, so this goes
        // through the raw request.
        let request = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: false,
            drop_media_captions: false,
            noforwards: false,
            from_peer: source.to_input_peer(),
            id: vec![message_id],
            random_id: vec![next_random_id()],
            to_peer: dest.to_input_peer(),
            top_msg_id,
            schedule_date: None,
            send_as: None,
            quick_reply_shortcut: None,
        };
        self.client
            .invoke(&request)
            .await
            .map(|_| ())
            .map_err(map_tg_error)
    }

    async fn get_message(&self, chat_id: i64, message_id: i32) -> Result<Option<MessageEvent>> {
        Ok(self
            .message_by_id(chat_id, message_id)
            .await?
            .map(|m| self.to_event(&m)))
    }

    async fn get_history(&self, chat_id: i64, limit: usize) -> Result<Vec<HistoryMessage>> {
        let chat = self.packed(chat_id)?;
        let mut iter = self.client.iter_messages(chat).limit(limit);
        let mut history = Vec::new();
        loop {
            match iter.next().await {
                Ok(Some(message)) => {
                    history.push(HistoryMessage {
                        sender_id: message
                            .sender()
                            .map(|s| s.id())
                            .unwrap_or_else(|| message.chat().id()),
                        outgoing: message.outgoing(),
                        text: message.text().to_string(),
                        timestamp: message.date(),
                    });
                }
                Ok(None) => break,
                Err(e) => return Err(SakaiError::Telegram(format!("history fetch failed: {}", e))),
            }
        }
        debug!(chat_id, fetched = history.len(), "History fetched");
        Ok(history)
    }

    async fn download_voice(&self, chat_id: i64, message_id: i32, dest: &Path) -> Result<()> {
        let message = self
            .message_by_id(chat_id, message_id)
            .await?
            .ok_or_else(|| SakaiError::Telegram("voice message not found".into()))?;
        message
            .download_media(dest)
            .await
            .map_err(|e| SakaiError::Telegram(format!("media download failed: {}", e)))?;
        Ok(())
    }

    async fn display_name(&self, peer_id: i64) -> Result<String> {
        let packed = self.packed(peer_id)?;
        let chat = self
            .client
            .unpack_chat(packed)
            .await
            .map_err(|e| SakaiError::Telegram(format!("entity lookup failed: {}", e)))?;
        Ok(chat.name().to_string())
    }

    async fn me(&self) -> Result<UserInfo> {
        let me = self
            .client
            .get_me()
            .await
            .map_err(|e| {
                self.connected.store(false, Ordering::SeqCst);
                SakaiError::Telegram(format!("get_me failed: {}", e))
            })?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(UserInfo {
            id: me.id(),
            first_name: me.full_name(),
            username: me.username().map(String::from),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<()> {
        // grammers reconnects transport-level on its own; a successful
        // request is what proves the connection is back.
        match self.client.get_me().await {
            Ok(_) => {
                self.connected.store(true, Ordering::SeqCst);
                let _ = self.client.session().save_to_file(&self.session_path);
                Ok(())
            }
            Err(e) => Err(SakaiError::Telegram(format!("reconnect failed: {}", e))),
        }
    }
}
