//! Authorization gate: decides which inbound events may invoke commands.
//!
//! Three paths lead to the dispatcher. The owner's own outgoing commands,
//! commands from explicitly authorized peers, and the confirm flow: the
//! owner replies the confirmation keyword to a command someone quoted in
//! chat, promoting that command to owner authority. Everything else is
//! dropped silently — replying to unauthorized senders would only invite
//! probing.

use std::collections::BTreeSet;

use crate::telegram::MessageEvent;

/// The literal the owner replies with to promote a quoted command.
pub const CONFIRMATION_KEYWORD: &str = "confirm";

/// Outcome of classifying one inbound event. Every event lands in exactly
/// one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Outgoing message on this account, text starts with `/`
    OwnerDirect,
    /// Incoming command from an authorized peer
    AuthorizedDirect,
    /// Outgoing confirmation reply; the replied-to message carries the
    /// command and inherits owner authority
    ConfirmFlow,
    /// Anything else; never answered
    Ignore,
}

/// Classify an event. Pure: no I/O happens here — the router resolves the
/// replied message before calling when the text matches the keyword.
pub fn classify(
    event: &MessageEvent,
    replied: Option<&MessageEvent>,
    authorized_peers: &BTreeSet<i64>,
) -> Classification {
    if event.outgoing {
        if is_confirmation(&event.text) {
            if event.reply_to.is_some()
                && replied.map(|r| r.text.starts_with('/')).unwrap_or(false)
            {
                return Classification::ConfirmFlow;
            }
            return Classification::Ignore;
        }
        if event.text.starts_with('/') {
            return Classification::OwnerDirect;
        }
        return Classification::Ignore;
    }

    if event.text.starts_with('/') && authorized_peers.contains(&event.sender_id) {
        return Classification::AuthorizedDirect;
    }

    Classification::Ignore
}

/// Whether a text is the confirmation keyword after trim and lowercase.
pub fn is_confirmation(text: &str) -> bool {
    text.trim().to_lowercase() == CONFIRMATION_KEYWORD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(outgoing: bool, sender_id: i64, text: &str, reply_to: Option<i32>) -> MessageEvent {
        MessageEvent {
            chat_id: 100,
            message_id: 1,
            sender_id,
            outgoing,
            text: text.to_string(),
            reply_to,
            is_voice: false,
        }
    }

    fn peers(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_owner_direct() {
        let e = event(true, 1, "/prompt=hi", None);
        assert_eq!(classify(&e, None, &peers(&[])), Classification::OwnerDirect);
    }

    #[test]
    fn test_owner_plain_text_ignored() {
        let e = event(true, 1, "just chatting", None);
        assert_eq!(classify(&e, None, &peers(&[])), Classification::Ignore);
    }

    #[test]
    fn test_authorized_direct() {
        let e = event(false, 55, "/prompt=hi", None);
        assert_eq!(
            classify(&e, None, &peers(&[55])),
            Classification::AuthorizedDirect
        );
    }

    #[test]
    fn test_unauthorized_incoming_ignored() {
        let e = event(false, 56, "/prompt=hi", None);
        assert_eq!(classify(&e, None, &peers(&[55])), Classification::Ignore);
    }

    #[test]
    fn test_incoming_confirm_keyword_ignored() {
        // Only the owner can promote a command.
        let replied = event(false, 56, "/prompt=hi", None);
        let e = event(false, 55, "confirm", Some(9));
        assert_eq!(
            classify(&e, Some(&replied), &peers(&[55])),
            Classification::Ignore
        );
    }

    #[test]
    fn test_confirm_flow() {
        let replied = event(false, 56, "/prompt=hi", None);
        let e = event(true, 1, "confirm", Some(9));
        assert_eq!(
            classify(&e, Some(&replied), &peers(&[])),
            Classification::ConfirmFlow
        );
    }

    #[test]
    fn test_confirm_trim_and_case_insensitive() {
        let replied = event(false, 56, "/prompt=hi", None);
        for text in ["  CONFIRM  ", "Confirm", "confirm\n"] {
            let e = event(true, 1, text, Some(9));
            assert_eq!(
                classify(&e, Some(&replied), &peers(&[])),
                Classification::ConfirmFlow,
                "text {:?}",
                text
            );
        }
    }

    #[test]
    fn test_confirm_without_reply_ignored() {
        let e = event(true, 1, "confirm", None);
        assert_eq!(classify(&e, None, &peers(&[])), Classification::Ignore);
    }

    #[test]
    fn test_confirm_replying_to_non_command_ignored() {
        let replied = event(false, 56, "hello there", None);
        let e = event(true, 1, "confirm", Some(9));
        assert_eq!(
            classify(&e, Some(&replied), &peers(&[])),
            Classification::Ignore
        );
    }

    #[test]
    fn test_classification_total() {
        // Every combination of flags lands in exactly one variant; spot
        // check the corners that could plausibly double-match.
        let replied = event(false, 56, "/cmd", None);
        let confirm_like_command = event(true, 1, "/confirm", Some(9));
        // Starts with '/' AND would lowercase to something containing the
        // keyword — must be OwnerDirect, not ConfirmFlow.
        assert_eq!(
            classify(&confirm_like_command, Some(&replied), &peers(&[])),
            Classification::OwnerDirect
        );
    }
}
