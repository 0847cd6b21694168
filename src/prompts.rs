//! Centralized prompts for every backend task.
//!
//! All AI-facing phrasing lives here so handlers never embed prompt text.
//! Analysis answers in Persian, matching the owner's chats.

/// System prompt for `/prompt`.
pub const GENERAL_ASSISTANT: &str = "You are a helpful, concise assistant replying inside a \
Telegram chat. Answer directly without preamble. Match the language of the question: answer \
Persian questions in Persian and English questions in English.";

/// System prompt for `/translate`.
pub const TRANSLATOR: &str = "You are a precise translator. Return only the translation, \
followed on the next line by a phonetic transcription in Latin script when the target language \
does not use the Latin alphabet. No explanations.";

/// System prompt for voice-message summarization.
pub const VOICE_SUMMARIZER: &str = "You summarize transcribed voice messages. Answer in \
Persian, in at most three sentences, keeping names and times. Do not add commentary.";

/// System prompt for image prompt enhancement.
pub const IMAGE_ENHANCER: &str = "You improve image generation prompts. Rewrite the user's \
prompt into one vivid English sentence with concrete visual details (subject, style, lighting, \
composition). Return only the rewritten prompt.";

/// Analysis modes accepted by `/analyze`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    General,
    Fun,
    Romance,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::General => "general",
            AnalysisMode::Fun => "fun",
            AnalysisMode::Romance => "romance",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "general" => Some(AnalysisMode::General),
            "fun" => Some(AnalysisMode::Fun),
            "romance" => Some(AnalysisMode::Romance),
            _ => None,
        }
    }

    /// System prompt for this analysis flavor.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            AnalysisMode::General => {
                "You analyze Telegram chat transcripts for the owner of the account. \
                 Summarize the main topics, the tone, and anything that needs a reply. \
                 Answer in Persian with short bullet points."
            }
            AnalysisMode::Fun => {
                "You analyze Telegram chat transcripts with a playful eye. Point out the \
                 funniest exchanges, running jokes, and who carries the humor. Answer in \
                 Persian, lighthearted but kind."
            }
            AnalysisMode::Romance => {
                "You analyze Telegram chat transcripts for relationship signals: warmth, \
                 attentiveness, imbalance, unresolved tension. Stay factual and grounded in \
                 quotes from the transcript. Answer in Persian."
            }
        }
    }
}

/// User prompt for `/translate`.
pub fn translation_request(target_lang: &str, source_lang: Option<&str>, text: &str) -> String {
    match source_lang {
        Some(source) => format!(
            "Translate the following text from {} to {}:\n\n{}",
            source, target_lang, text
        ),
        None => format!("Translate the following text to {}:\n\n{}", target_lang, text),
    }
}

/// User prompt for `/analyze`.
pub fn analysis_request(mode: AnalysisMode, message_count: usize, transcript: &str) -> String {
    format!(
        "Here are the last {} messages of this chat, oldest first. Mode: {}.\n\n{}",
        message_count,
        mode.as_str(),
        transcript
    )
}

/// User prompt for `/tellme`.
pub fn tellme_request(message_count: usize, question: &str, transcript: &str) -> String {
    format!(
        "Based on the last {} messages of this chat (oldest first), answer this question:\n\
         {}\n\nTranscript:\n{}",
        message_count, question, transcript
    )
}

/// User prompt for voice-message summarization.
pub fn voice_summary_request(transcript: &str) -> String {
    format!("Transcribed voice message:\n\n{}", transcript)
}

/// User prompt for image prompt enhancement.
pub fn image_enhancement_request(prompt: &str) -> String {
    format!("Prompt to improve: {}", prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(AnalysisMode::parse("fun"), Some(AnalysisMode::Fun));
        assert_eq!(AnalysisMode::parse(" ROMANCE "), Some(AnalysisMode::Romance));
        assert_eq!(AnalysisMode::parse("general"), Some(AnalysisMode::General));
        assert_eq!(AnalysisMode::parse("sad"), None);
    }

    #[test]
    fn test_mode_prompts_distinct() {
        assert_ne!(
            AnalysisMode::General.system_prompt(),
            AnalysisMode::Fun.system_prompt()
        );
        assert_ne!(
            AnalysisMode::Fun.system_prompt(),
            AnalysisMode::Romance.system_prompt()
        );
    }

    #[test]
    fn test_translation_request_with_source() {
        let p = translation_request("fa", Some("en"), "hello");
        assert!(p.contains("from en to fa"));
        assert!(p.ends_with("hello"));
    }

    #[test]
    fn test_translation_request_without_source() {
        let p = translation_request("de", None, "hi");
        assert!(p.contains("to de"));
        assert!(!p.contains("from"));
    }

    #[test]
    fn test_tellme_request_embeds_question_and_transcript() {
        let p = tellme_request(50, "who was angry?", "[transcript]");
        assert!(p.contains("last 50 messages"));
        assert!(p.contains("who was angry?"));
        assert!(p.contains("[transcript]"));
    }
}
