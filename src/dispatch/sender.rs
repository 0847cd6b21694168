//! Reliable message delivery: retries, edit-in-place, pagination.
//!
//! Every outgoing text passes through the RTL fix so Persian responses
//! render stably. Long responses split at the best available boundary and
//! the first chunk lands on the command's "thinking" message; follow-up
//! chunks are separate messages with a small delay against flood limits.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, SakaiError};
use crate::telegram::{ParseMode, SentMessage, TelegramApi};
use crate::utils::rtl::ensure_rtl_safe;
use crate::utils::split::{split_message, MAX_MESSAGE_LENGTH};
use crate::utils::paginate;

/// Characters held back for markdown rendering overhead.
const MARKDOWN_OVERHEAD: usize = 200;
/// Characters held back for the ` (i/n)` pagination suffix.
const PAGINATION_OVERHEAD: usize = 20;
/// Pause between consecutive chunks of one response.
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(300);
/// Send retries for transient Telegram failures.
const SEND_RETRIES: u32 = 3;
const SEND_RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct MessageSender {
    api: Arc<dyn TelegramApi>,
}

impl MessageSender {
    pub fn new(api: Arc<dyn TelegramApi>) -> Self {
        Self { api }
    }

    /// Send with RTL fixing and bounded retries.
    pub async fn send_safe(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
        parse_mode: Option<ParseMode>,
    ) -> Result<SentMessage> {
        let text = ensure_rtl_safe(text);
        let mut last_err = None;
        for attempt in 0..SEND_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(SEND_RETRY_DELAY * attempt).await;
            }
            match self
                .api
                .send_message(chat_id, &text, reply_to, parse_mode)
                .await
            {
                Ok(sent) => return Ok(sent),
                Err(e) => {
                    debug!(attempt, error = %e, "Send failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| SakaiError::Telegram("send failed".into())))
    }

    /// Edit in place. `Ok(false)` means the content was already identical —
    /// that outcome is silently accepted everywhere.
    pub async fn edit_safe(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<bool> {
        let text = ensure_rtl_safe(text);
        match self
            .api
            .edit_message(chat_id, message_id, &text, parse_mode)
            .await
        {
            Ok(()) => Ok(true),
            Err(SakaiError::NotModified) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Deliver a possibly long response.
    ///
    /// The first chunk edits `edit_target` when given (falling back to a
    /// fresh send if the edit fails); only the first chunk carries the
    /// `reply_to`. Returns the handles of all delivered messages.
    pub async fn send_long(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
        parse_mode: Option<ParseMode>,
        edit_target: Option<SentMessage>,
    ) -> Result<Vec<SentMessage>> {
        let reserve = match parse_mode {
            Some(ParseMode::Markdown) => MARKDOWN_OVERHEAD,
            _ => 0,
        };
        let chunks = paginate(split_message(
            text,
            MAX_MESSAGE_LENGTH,
            reserve + PAGINATION_OVERHEAD,
        ));
        let total = chunks.len();
        let mut delivered = Vec::with_capacity(total);

        for (i, chunk) in chunks.into_iter().enumerate() {
            if i == 0 {
                if let Some(target) = edit_target {
                    match self
                        .edit_safe(target.chat_id, target.id, &chunk, parse_mode)
                        .await
                    {
                        Ok(_) => {
                            delivered.push(target);
                        }
                        Err(e) => {
                            warn!(error = %e, "Edit failed; sending first chunk fresh");
                            delivered
                                .push(self.send_safe(chat_id, &chunk, reply_to, parse_mode).await?);
                        }
                    }
                } else {
                    delivered.push(self.send_safe(chat_id, &chunk, reply_to, parse_mode).await?);
                }
            } else {
                delivered.push(self.send_safe(chat_id, &chunk, None, parse_mode).await?);
            }

            if i + 1 < total {
                tokio::time::sleep(INTER_CHUNK_DELAY).await;
            }
        }

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::testing::FakeTelegram;

    fn sender(api: &Arc<FakeTelegram>) -> MessageSender {
        let api: Arc<dyn TelegramApi> = Arc::clone(api) as Arc<dyn TelegramApi>;
        MessageSender::new(api)
    }

    #[tokio::test]
    async fn test_short_response_edits_in_place() {
        let api = Arc::new(FakeTelegram::new());
        let s = sender(&api);
        let thinking = api.send_message(1, "thinking...", Some(10), None).await.unwrap();

        let delivered = s
            .send_long(1, "hello", Some(10), None, Some(thinking))
            .await
            .unwrap();

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0], thinking);
        assert_eq!(api.final_text(1, thinking.id).unwrap(), "hello");
        // No extra messages beyond the thinking one.
        assert_eq!(api.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_long_response_splits_with_pagination() {
        let api = Arc::new(FakeTelegram::new());
        let s = sender(&api);
        let thinking = api.send_message(1, "thinking...", Some(10), None).await.unwrap();

        let text = "sentence one. ".repeat(700); // ~9800 chars
        let delivered = s
            .send_long(1, &text, Some(10), None, Some(thinking))
            .await
            .unwrap();

        assert!(delivered.len() > 1);
        // First chunk edited onto the thinking message with pagination.
        let first = api.final_text(1, thinking.id).unwrap();
        assert!(first.contains("(1/"));
        // Follow-up chunks are fresh messages without a reply_to.
        let follow_ups: Vec<_> = api.sent().into_iter().skip(1).collect();
        assert_eq!(follow_ups.len(), delivered.len() - 1);
        assert!(follow_ups.iter().all(|m| m.reply_to.is_none()));
        // Every chunk respects the cap.
        for m in &follow_ups {
            assert!(m.text.chars().count() <= MAX_MESSAGE_LENGTH);
        }
    }

    #[tokio::test]
    async fn test_not_modified_is_swallowed() {
        let api = Arc::new(FakeTelegram::new());
        api.edits_report_not_modified(true);
        let s = sender(&api);
        let thinking = api.send_message(1, "same", None, None).await.unwrap();

        let delivered = s
            .send_long(1, "same", None, None, Some(thinking))
            .await
            .unwrap();
        // The edit was a no-op but delivery still succeeded in place.
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0], thinking);
    }

    #[tokio::test]
    async fn test_send_without_edit_target_replies() {
        let api = Arc::new(FakeTelegram::new());
        let s = sender(&api);
        let delivered = s.send_long(5, "direct", Some(42), None, None).await.unwrap();
        assert_eq!(delivered.len(), 1);
        let sent = api.sent();
        assert_eq!(sent[0].reply_to, Some(42));
        assert_eq!(sent[0].text, "direct");
    }

    #[tokio::test]
    async fn test_rtl_fix_applied_on_send() {
        let api = Arc::new(FakeTelegram::new());
        let s = sender(&api);
        s.send_safe(1, "این یک test است", None, None).await.unwrap();
        let sent = api.sent();
        assert!(sent[0].text.contains('\u{200E}'));
    }
}
