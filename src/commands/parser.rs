//! Pure parser from message text to a tagged [`Command`].
//!
//! Sanitization runs before validation; validation failures surface as
//! [`SakaiError::Validation`] carrying a short usage hint. Dispatch is an
//! exhaustive match over the resulting enum — no string prefixes survive
//! past this point.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SakaiError};
use crate::prompts::AnalysisMode;
use crate::providers::{validate_adjustment, ImageModel, SpeechParams};
use crate::utils::text::{
    contains_injection, is_valid_language_code, looks_harmful, parse_count, sanitize_input,
    strip_formatting, MAX_IMAGE_PROMPT_LENGTH, MAX_PROMPT_LENGTH, MAX_TELLME_LENGTH,
    MAX_TRANSLATE_LENGTH,
};

/// A fully validated command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Prompt {
        text: String,
    },
    Translate {
        target_lang: String,
        source_lang: Option<String>,
        /// `None` means "take the text from the replied message".
        text: Option<String>,
    },
    Analyze {
        mode: AnalysisMode,
        count: u32,
    },
    TellMe {
        count: u32,
        question: String,
    },
    Tts {
        params: SpeechParams,
        /// `None` means "take the text from the replied message".
        text: Option<String>,
    },
    Stt,
    Image {
        model: ImageModel,
        prompt: String,
    },
    AuthList,
    AuthAdd {
        peer_id: i64,
    },
    AuthRemove {
        peer_id: i64,
    },
    Status,
    Help,
    /// A bare `/name` with no arguments; resolved against the command map.
    Categorize {
        name: String,
    },
}

/// Tunable caps consumed during validation.
#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    pub analyze_max: u32,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self { analyze_max: 5000 }
    }
}

static TTS_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(voice|rate|volume)=(\S+)\s*").unwrap());

static BARE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").unwrap());

fn usage(message: &str) -> SakaiError {
    SakaiError::Validation(message.to_string())
}

/// Parse one command message. The leading slash is required.
pub fn parse(raw: &str, limits: &ParserLimits) -> Result<Command> {
    if contains_injection(raw) {
        return Err(usage(
            "Input contains characters or patterns that are not allowed.",
        ));
    }
    let text = sanitize_input(raw);
    if !text.starts_with('/') {
        return Err(usage("commands start with /"));
    }

    let lowered = text.to_lowercase();

    if let Some(rest) = strip_prefix_ci(&text, &lowered, "/prompt=") {
        let prompt = rest.trim();
        if prompt.is_empty() {
            return Err(usage("Usage: /prompt=<your question or instruction>"));
        }
        if prompt.chars().count() > MAX_PROMPT_LENGTH {
            return Err(usage("Prompt is too long."));
        }
        return Ok(Command::Prompt {
            text: prompt.to_string(),
        });
    }

    if let Some(rest) = strip_prefix_ci(&text, &lowered, "/translate=") {
        return parse_translate(rest);
    }

    if let Some(rest) = strip_prefix_ci(&text, &lowered, "/analyze=") {
        return parse_analyze(rest, limits);
    }
    if let Some(rest) = strip_prefix_ci(&text, &lowered, "/analyze ") {
        return parse_analyze(rest, limits);
    }

    if let Some(rest) = strip_prefix_ci(&text, &lowered, "/tellme=") {
        return parse_tellme(rest, limits);
    }

    if lowered == "/tts" {
        return Ok(Command::Tts {
            params: SpeechParams::default(),
            text: None,
        });
    }
    if let Some(rest) = strip_prefix_ci(&text, &lowered, "/tts ") {
        return parse_tts(rest);
    }

    if lowered == "/stt" {
        return Ok(Command::Stt);
    }

    if let Some(rest) = strip_prefix_ci(&text, &lowered, "/image=") {
        return parse_image(rest);
    }

    if lowered == "/status" {
        return Ok(Command::Status);
    }
    if lowered == "/help" {
        return Ok(Command::Help);
    }
    if lowered == "/auth" || lowered.starts_with("/auth ") {
        return parse_auth(lowered.trim_start_matches("/auth").trim());
    }

    // Anything that is a single bare name may be a categorization command;
    // the dispatcher checks it against the configured map.
    let name = lowered.trim_start_matches('/').trim();
    if BARE_NAME_RE.is_match(name) {
        return Ok(Command::Categorize {
            name: name.to_string(),
        });
    }

    Err(usage("Unknown command. Send /help for the command list."))
}

fn strip_prefix_ci<'a>(text: &'a str, lowered: &str, prefix: &str) -> Option<&'a str> {
    lowered.starts_with(prefix).then(|| &text[prefix.len()..])
}

fn parse_translate(rest: &str) -> Result<Command> {
    const USAGE: &str =
        "Usage: /translate=<lang>[,source_lang]=<text> or reply with /translate=<lang>";

    let (lang_spec, text) = match rest.split_once('=') {
        Some((langs, text)) => (langs, Some(text.trim())),
        None => (rest, None),
    };

    let (target, source) = match lang_spec.split_once(',') {
        Some((t, s)) => (t.trim(), Some(s.trim())),
        None => (lang_spec.trim(), None),
    };

    if !is_valid_language_code(target) {
        return Err(usage(USAGE));
    }
    if let Some(source) = source {
        if !is_valid_language_code(source) {
            return Err(usage(USAGE));
        }
    }

    let text = match text {
        Some(t) if !t.is_empty() => {
            if t.chars().count() > MAX_TRANSLATE_LENGTH {
                return Err(usage("Text to translate is too long."));
            }
            Some(t.to_string())
        }
        _ => None,
    };

    Ok(Command::Translate {
        target_lang: target.to_lowercase(),
        source_lang: source.map(|s| s.to_lowercase()),
        text,
    })
}

fn parse_analyze(rest: &str, limits: &ParserLimits) -> Result<Command> {
    let usage_msg = format!(
        "Usage: /analyze=<1-{}> or /analyze=<mode>=<N> (mode: fun, romance, general)",
        limits.analyze_max
    );

    let (mode, count_str) = match rest.split_once('=') {
        Some((mode_str, count)) => {
            let mode = AnalysisMode::parse(mode_str).ok_or_else(|| {
                usage("Unknown analysis mode. Valid modes: general, fun, romance")
            })?;
            (mode, count)
        }
        None => (AnalysisMode::General, rest),
    };

    let count = parse_count(count_str, 1, limits.analyze_max)
        .ok_or_else(|| SakaiError::Validation(usage_msg))?;

    Ok(Command::Analyze { mode, count })
}

fn parse_tellme(rest: &str, limits: &ParserLimits) -> Result<Command> {
    const USAGE: &str = "Usage: /tellme=<number_of_messages>=<your_question>";

    let (count_str, question) = rest.split_once('=').ok_or_else(|| usage(USAGE))?;
    let count = parse_count(count_str, 1, limits.analyze_max).ok_or_else(|| usage(USAGE))?;

    let question = question.trim();
    if question.is_empty() {
        return Err(usage(USAGE));
    }
    if question.chars().count() > MAX_TELLME_LENGTH {
        return Err(usage("Question is too long."));
    }

    Ok(Command::TellMe {
        count,
        question: question.to_string(),
    })
}

fn parse_tts(rest: &str) -> Result<Command> {
    let mut params = SpeechParams::default();
    let mut remaining = rest.trim_start();

    while let Some(caps) = TTS_PARAM_RE.captures(remaining) {
        let value = caps[2].to_string();
        match &caps[1] {
            "voice" => params.voice = Some(value),
            "rate" => {
                params.rate = Some(validate_adjustment(&value).ok_or_else(|| {
                    usage("rate must look like +10% or -25% within [-50%, +100%]")
                })?)
            }
            "volume" => {
                params.volume = Some(validate_adjustment(&value).ok_or_else(|| {
                    usage("volume must look like +10% or -25% within [-50%, +100%]")
                })?)
            }
            _ => unreachable!(),
        }
        remaining = &remaining[caps[0].len()..];
    }

    let text = remaining.trim();
    Ok(Command::Tts {
        params,
        text: (!text.is_empty()).then(|| text.to_string()),
    })
}

fn parse_image(rest: &str) -> Result<Command> {
    const USAGE: &str = "Usage: /image=flux/<prompt> or /image=sdxl/<prompt>";

    let (model_str, prompt) = rest.split_once('/').ok_or_else(|| usage(USAGE))?;
    let model = ImageModel::parse(model_str)
        .ok_or_else(|| usage("Unknown image model. Supported: flux, sdxl"))?;

    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(usage(USAGE));
    }
    if prompt.chars().count() > MAX_IMAGE_PROMPT_LENGTH {
        return Err(usage("Image prompt is too long."));
    }
    if looks_harmful(prompt) {
        // Heuristic only: log and let the worker's moderation decide.
        tracing::warn!("Image prompt matched the harmful-content heuristic");
    }

    Ok(Command::Image {
        model,
        prompt: prompt.to_string(),
    })
}

fn parse_auth(rest: &str) -> Result<Command> {
    const USAGE: &str = "Usage: /auth list | /auth add <peer_id> | /auth remove <peer_id>";

    let mut parts = rest.split_whitespace();
    match parts.next() {
        Some("list") | None => Ok(Command::AuthList),
        Some("add") => {
            let id = parts
                .next()
                .and_then(|v| v.parse::<i64>().ok())
                .ok_or_else(|| usage(USAGE))?;
            Ok(Command::AuthAdd { peer_id: id })
        }
        Some("remove") => {
            let id = parts
                .next()
                .and_then(|v| v.parse::<i64>().ok())
                .ok_or_else(|| usage(USAGE))?;
            Ok(Command::AuthRemove { peer_id: id })
        }
        Some(_) => Err(usage(USAGE)),
    }
}

static TRANSCRIBED_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Transcribed(?: Text)?:\s*\n(.*?)(?:\n\s*\n|\z)").unwrap());

/// Extract the text a reply-form command should operate on.
///
/// When the replied message is a transcription result, only the transcript
/// segment is taken; otherwise the text is used with formatting stripped.
pub fn reply_source_text(replied_text: &str) -> String {
    let cleaned = strip_formatting(replied_text);
    if let Some(caps) = TRANSCRIBED_SEGMENT_RE.captures(&cleaned) {
        return caps[1].trim().to_string();
    }
    cleaned
}
