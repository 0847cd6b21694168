//! In-memory [`TelegramApi`] double for the test suite.
//!
//! Scriptable on the input side (queued events, canned histories, injected
//! failures) and inspectable on the output side (recorded sends, edits,
//! deletes, uploads, forwards). Lives in the library so integration tests
//! can drive the full dispatcher against it.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, SakaiError};

use super::api::{
    FileKind, HistoryMessage, MessageEvent, ParseMode, SentMessage, TelegramApi, UserInfo,
};

/// One recorded `send_message` call.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub chat_id: i64,
    pub id: i32,
    pub text: String,
    pub reply_to: Option<i32>,
    pub parse_mode: Option<ParseMode>,
}

/// One recorded `edit_message` call.
#[derive(Debug, Clone)]
pub struct EditRecord {
    pub chat_id: i64,
    pub message_id: i32,
    pub text: String,
}

/// One recorded `send_file` call.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub chat_id: i64,
    pub path: PathBuf,
    pub caption: Option<String>,
    pub reply_to: Option<i32>,
    pub kind: FileKind,
}

/// One recorded `forward_message` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRecord {
    pub from_chat: i64,
    pub message_id: i32,
    pub to_chat: i64,
    pub top_msg_id: Option<i32>,
}

#[derive(Default)]
struct FakeState {
    sent: Vec<SentRecord>,
    edits: Vec<EditRecord>,
    deleted: Vec<(i64, i32)>,
    files: Vec<FileRecord>,
    forwards: Vec<ForwardRecord>,
    messages: HashMap<(i64, i32), MessageEvent>,
    history: HashMap<i64, Vec<HistoryMessage>>,
    history_fetches: u32,
    display_names: HashMap<i64, String>,
    voice_bytes: Vec<u8>,
    next_msg_id: i32,
    connected: bool,
    me_failures_left: u32,
    fail_sends: bool,
    edits_report_not_modified: bool,
    forward_error: Option<String>,
}

pub struct FakeTelegram {
    events: Mutex<VecDeque<MessageEvent>>,
    state: Mutex<FakeState>,
    me: UserInfo,
}

impl FakeTelegram {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            state: Mutex::new(FakeState {
                next_msg_id: 1000,
                connected: true,
                voice_bytes: b"OggS-fake-voice".to_vec(),
                ..Default::default()
            }),
            me: UserInfo {
                id: 1,
                first_name: "Owner".into(),
                username: Some("owner".into()),
            },
        }
    }

    // --- scripting ---

    pub fn push_event(&self, event: MessageEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    /// Register a message so `get_message` can resolve it as a reply target.
    pub fn put_message(&self, event: MessageEvent) {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert((event.chat_id, event.message_id), event);
    }

    pub fn set_history(&self, chat_id: i64, messages: Vec<HistoryMessage>) {
        self.state.lock().unwrap().history.insert(chat_id, messages);
    }

    pub fn set_display_name(&self, peer_id: i64, name: &str) {
        self.state
            .lock()
            .unwrap()
            .display_names
            .insert(peer_id, name.to_string());
    }

    pub fn clear_display_names(&self) {
        self.state.lock().unwrap().display_names.clear();
    }

    /// Make the next `n` `me()` probes fail.
    pub fn fail_me_probes(&self, n: u32) {
        self.state.lock().unwrap().me_failures_left = n;
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Make every edit respond with the "content not modified" error.
    pub fn edits_report_not_modified(&self, yes: bool) {
        self.state.lock().unwrap().edits_report_not_modified = yes;
    }

    pub fn fail_forwards(&self, message: &str) {
        self.state.lock().unwrap().forward_error = Some(message.to_string());
    }

    // --- inspection ---

    pub fn sent(&self) -> Vec<SentRecord> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn edits(&self) -> Vec<EditRecord> {
        self.state.lock().unwrap().edits.clone()
    }

    pub fn deleted(&self) -> Vec<(i64, i32)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.state.lock().unwrap().files.clone()
    }

    pub fn forwards(&self) -> Vec<ForwardRecord> {
        self.state.lock().unwrap().forwards.clone()
    }

    pub fn history_fetches(&self) -> u32 {
        self.state.lock().unwrap().history_fetches
    }

    /// Final text of a message after all edits, or its original send text.
    pub fn final_text(&self, chat_id: i64, message_id: i32) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .edits
            .iter()
            .rev()
            .find(|e| e.chat_id == chat_id && e.message_id == message_id)
            .map(|e| e.text.clone())
            .or_else(|| {
                state
                    .sent
                    .iter()
                    .find(|s| s.chat_id == chat_id && s.id == message_id)
                    .map(|s| s.text.clone())
            })
    }
}

impl Default for FakeTelegram {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelegramApi for FakeTelegram {
    async fn next_event(&self) -> Result<Option<MessageEvent>> {
        Ok(self.events.lock().unwrap().pop_front())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
        parse_mode: Option<ParseMode>,
    ) -> Result<SentMessage> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(SakaiError::Telegram("send failed (scripted)".into()));
        }
        state.next_msg_id += 1;
        let id = state.next_msg_id;
        state.sent.push(SentRecord {
            chat_id,
            id,
            text: text.to_string(),
            reply_to,
            parse_mode,
        });
        Ok(SentMessage { chat_id, id })
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        _parse_mode: Option<ParseMode>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.edits_report_not_modified {
            return Err(SakaiError::NotModified);
        }
        state.edits.push(EditRecord {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.state.lock().unwrap().deleted.push((chat_id, message_id));
        Ok(())
    }

    async fn send_file(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
        reply_to: Option<i32>,
        kind: FileKind,
    ) -> Result<SentMessage> {
        let mut state = self.state.lock().unwrap();
        state.next_msg_id += 1;
        let id = state.next_msg_id;
        state.files.push(FileRecord {
            chat_id,
            path: path.to_path_buf(),
            caption: caption.map(String::from),
            reply_to,
            kind,
        });
        Ok(SentMessage { chat_id, id })
    }

    async fn forward_message(
        &self,
        from_chat: i64,
        message_id: i32,
        to_chat: i64,
        top_msg_id: Option<i32>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.forward_error.clone() {
            return Err(SakaiError::Telegram(message));
        }
        state.forwards.push(ForwardRecord {
            from_chat,
            message_id,
            to_chat,
            top_msg_id,
        });
        Ok(())
    }

    async fn get_message(&self, chat_id: i64, message_id: i32) -> Result<Option<MessageEvent>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .get(&(chat_id, message_id))
            .cloned())
    }

    async fn get_history(&self, chat_id: i64, limit: usize) -> Result<Vec<HistoryMessage>> {
        let mut state = self.state.lock().unwrap();
        state.history_fetches += 1;
        Ok(state
            .history
            .get(&chat_id)
            .map(|msgs| msgs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn download_voice(&self, _chat_id: i64, _message_id: i32, dest: &Path) -> Result<()> {
        let bytes = self.state.lock().unwrap().voice_bytes.clone();
        std::fs::write(dest, bytes)?;
        Ok(())
    }

    async fn display_name(&self, peer_id: i64) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .display_names
            .get(&peer_id)
            .cloned()
            .ok_or_else(|| SakaiError::Telegram(format!("no entity for peer {}", peer_id)))
    }

    async fn me(&self) -> Result<UserInfo> {
        let mut state = self.state.lock().unwrap();
        if state.me_failures_left > 0 {
            state.me_failures_left -= 1;
            return Err(SakaiError::Telegram("probe failed (scripted)".into()));
        }
        if !state.connected {
            return Err(SakaiError::Telegram("not connected".into()));
        }
        Ok(self.me.clone())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn reconnect(&self) -> Result<()> {
        self.state.lock().unwrap().connected = true;
        Ok(())
    }
}
