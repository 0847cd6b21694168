//! Input sanitization and validation helpers.
//!
//! Sanitization runs before any validation: control characters are stripped
//! and common injection patterns removed, then length caps and per-command
//! rules apply.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Maximum characters accepted for a `/prompt` body.
pub const MAX_PROMPT_LENGTH: usize = 10_000;
/// Maximum characters accepted for any raw command line.
pub const MAX_COMMAND_LENGTH: usize = 5_000;
/// Maximum characters accepted for text to translate.
pub const MAX_TRANSLATE_LENGTH: usize = 5_000;
/// Maximum characters accepted for a `/tellme` question.
pub const MAX_TELLME_LENGTH: usize = 2_000;
/// Maximum characters accepted for an image prompt.
pub const MAX_IMAGE_PROMPT_LENGTH: usize = 1_000;

static CONTROL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x1F\u{7F}-\u{9F}]").unwrap());

static DANGEROUS_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<script[^>]*>",
        r"(?i)javascript:",
        r"(?i)\bon\w+\s*=",
        r"\$\(",
        r"`[^`]*`",
        r"\$\{[^}]*\}",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static HARMFUL_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(kill|murder|violence|hate|attack)\b").unwrap());

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap());

/// Language codes accepted by `/translate` (ISO 639-1 subset).
pub static VALID_LANGUAGE_CODES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "fa", "en", "es", "fr", "de", "it", "pt", "ru", "ja", "ko", "zh", "ar", "hi", "tr", "pl",
        "nl", "sv", "da", "fi", "no", "cs", "hu", "ro", "bg", "hr", "sk", "sl", "et", "lv", "lt",
        "el", "he", "th", "vi", "id", "ms", "tl", "uk", "be", "mk", "sr", "sq", "is", "ga", "mt",
        "cy",
    ]
    .into_iter()
    .collect()
});

/// Strip control characters and injection patterns, enforce the command cap.
pub fn sanitize_input(text: &str) -> String {
    let mut out = CONTROL_RE.replace_all(text, "").into_owned();
    for re in DANGEROUS_RES.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    if out.chars().count() > MAX_COMMAND_LENGTH {
        out = out.chars().take(MAX_COMMAND_LENGTH).collect();
    }
    out.trim().to_string()
}

/// Returns `true` if the raw text contains a known injection pattern.
pub fn contains_injection(text: &str) -> bool {
    DANGEROUS_RES.iter().any(|re| re.is_match(text))
}

/// Validate an ISO 639-1 language code (lowercased before lookup).
pub fn is_valid_language_code(code: &str) -> bool {
    VALID_LANGUAGE_CODES.contains(code.trim().to_lowercase().as_str())
}

/// Parse and range-check a numeric argument.
pub fn parse_count(value: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = value.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Harmful-content heuristic for image prompts: logged upstream, never
/// enforced — moderation belongs to the worker.
pub fn looks_harmful(prompt: &str) -> bool {
    HARMFUL_IMAGE_RE.is_match(prompt)
}

/// Strip HTML tags and markdown emphasis from replied text so it can feed a
/// backend prompt.
pub fn strip_formatting(text: &str) -> String {
    let out = HTML_TAG_RE.replace_all(text, "");
    out.replace("**", "")
        .replace("__", "")
        .trim()
        .to_string()
}

/// Convert an arbitrary string into a filesystem-safe cache key.
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.chars().take(255).collect()
    }
}

/// Format a duration in seconds as `37s`, `4m 12s`, or `2h 5m`.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_input("hel\x00lo\x1fworld"), "helloworld");
    }

    #[test]
    fn test_sanitize_strips_whitespace_control_chars_too() {
        // Tab, LF, and CR sit inside the control range and go with it.
        assert_eq!(sanitize_input("line\tone\nline\rtwo"), "lineonelinetwo");
    }

    #[test]
    fn test_sanitize_removes_script_tags() {
        let out = sanitize_input("hello <script>alert(1)</script> world");
        assert!(!out.contains("<script"));
    }

    #[test]
    fn test_sanitize_removes_shell_substitution() {
        let out = sanitize_input("run $(rm -rf /) now");
        assert!(!out.contains("$("));
        let out = sanitize_input("run ${HOME} now");
        assert!(!out.contains("${"));
    }

    #[test]
    fn test_sanitize_removes_backticks() {
        let out = sanitize_input("execute `whoami` please");
        assert!(!out.contains('`'));
        assert!(!out.contains("whoami"));
    }

    #[test]
    fn test_contains_injection() {
        assert!(contains_injection("<script>x</script>"));
        assert!(contains_injection("javascript:void(0)"));
        assert!(contains_injection("onclick=alert(1)"));
        assert!(!contains_injection("a perfectly normal sentence"));
    }

    #[test]
    fn test_sanitize_enforces_length_cap() {
        let long = "a".repeat(MAX_COMMAND_LENGTH + 100);
        assert_eq!(sanitize_input(&long).chars().count(), MAX_COMMAND_LENGTH);
    }

    #[test]
    fn test_language_codes() {
        assert!(is_valid_language_code("fa"));
        assert!(is_valid_language_code("EN"));
        assert!(is_valid_language_code(" de "));
        assert!(!is_valid_language_code("xx"));
        assert!(!is_valid_language_code(""));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("100", 1, 5000), Some(100));
        assert_eq!(parse_count(" 1 ", 1, 5000), Some(1));
        assert_eq!(parse_count("0", 1, 5000), None);
        assert_eq!(parse_count("5001", 1, 5000), None);
        assert_eq!(parse_count("abc", 1, 5000), None);
    }

    #[test]
    fn test_looks_harmful() {
        assert!(looks_harmful("kill the lights"));
        assert!(!looks_harmful("a serene mountain lake"));
    }

    #[test]
    fn test_strip_formatting() {
        assert_eq!(strip_formatting("<b>bold</b> plain"), "bold plain");
        assert_eq!(strip_formatting("**strong** text"), "strong text");
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("group: a/b"), "group_ a_b");
        assert_eq!(safe_filename("..."), "unnamed");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(37), "37s");
        assert_eq!(format_duration(252), "4m 12s");
        assert_eq!(format_duration(7500), "2h 5m");
    }
}
