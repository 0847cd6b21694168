//! Categorization: forward a replied message into the configured
//! group/topic.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::Result;
use crate::settings::Settings;
use crate::telegram::{MessageEvent, TelegramApi};

/// What happened to a categorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorizeOutcome {
    /// The message was forwarded; Telegram shows the forward, no reply.
    Forwarded,
    /// The command name is not in the map; stay silent.
    NotMapped,
    /// No target group or empty map is configured; stay silent.
    NotConfigured,
}

/// Forward `replied` according to the command map. The caller answers
/// errors; mapped-but-failed forwards propagate as `Err`.
pub async fn forward_for_categorization(
    api: &Arc<dyn TelegramApi>,
    settings: &Settings,
    command_name: &str,
    replied: &MessageEvent,
) -> Result<CategorizeOutcome> {
    let Some(group) = &settings.target_group else {
        debug!("Categorization target group not set");
        return Ok(CategorizeOutcome::NotConfigured);
    };
    if settings.command_map.is_empty() {
        debug!("Command map is empty");
        return Ok(CategorizeOutcome::NotConfigured);
    }

    let Some(topic_id) = settings.command_map.topic_for(command_name) else {
        debug!(command = command_name, "Command not mapped");
        return Ok(CategorizeOutcome::NotMapped);
    };

    // Topics only exist in forum groups; the main chat takes plain forwards.
    let top_msg_id = if group.is_forum {
        topic_id.map(|id| id as i32)
    } else {
        None
    };

    info!(
        command = command_name,
        group = group.id,
        topic = ?top_msg_id,
        source_chat = replied.chat_id,
        message = replied.message_id,
        "Forwarding message for categorization"
    );

    match api
        .forward_message(replied.chat_id, replied.message_id, group.id, top_msg_id)
        .await
    {
        Ok(()) => Ok(CategorizeOutcome::Forwarded),
        Err(e) => {
            error!(error = %e, "Categorization forward failed");
            Err(e)
        }
    }
}
