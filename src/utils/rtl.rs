//! BiDi display stabilization for Persian/Arabic text.
//!
//! Telegram ignores HTML `dir` attributes, so mixed RTL/LTR text is kept
//! stable by inserting Unicode U+200E LEFT-TO-RIGHT MARK after LTR runs
//! (URLs, English words, emails, inline code) inside RTL text. Numbers are
//! left untouched: marking them produces visible artifacts in pagination
//! and section numbers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Unicode LEFT-TO-RIGHT MARK.
pub const LRM: char = '\u{200E}';

static PERSIAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{0600}-\u{06FF}]").unwrap());

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)https?://[^\s<>"{}|\\^`\[\]]+"#).unwrap());

// Emails, English words of 2+ chars, inline code. Single letters are skipped
// to avoid scattering marks through abbreviations.
static LTR_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b|\b[A-Za-z][A-Za-z0-9._-]+\b|`[^`]+`",
    )
    .unwrap()
});

// Pagination markers like (2/3) must survive the fix verbatim.
static PAGINATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\d+/\d+\)").unwrap());

static LRM_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\u{200E}{2,}").unwrap());

/// Returns `true` if the text contains Persian/Arabic script (U+0600–U+06FF).
pub fn has_rtl_text(text: &str) -> bool {
    PERSIAN_RE.is_match(text)
}

/// Insert LRM after LTR runs within RTL text.
///
/// No-op for text without Persian script. Applying the fix repeatedly does
/// not accumulate marks: runs of LRM collapse to a single mark, so re-edited
/// messages stay stable.
pub fn ensure_rtl_safe(text: &str) -> String {
    if text.is_empty() || !has_rtl_text(text) {
        return text.to_string();
    }

    // Park pagination markers and whole URLs behind placeholders delimited
    // by zero-width spaces. The leading underscores keep the word-boundary
    // pattern from matching inside a placeholder.
    let mut pagination: Vec<String> = Vec::new();
    let mut out = PAGINATION_RE
        .replace_all(text, |caps: &regex::Captures| {
            let placeholder = format!("\u{200B}__PGNTN_{}__\u{200B}", pagination.len());
            pagination.push(caps[0].to_string());
            placeholder
        })
        .into_owned();

    // URLs are marked as one run; word-level insertion must not land inside.
    let mut urls: Vec<String> = Vec::new();
    out = URL_RE
        .replace_all(&out, |caps: &regex::Captures| {
            let placeholder = format!("\u{200B}__URL_{}__\u{200B}", urls.len());
            urls.push(caps[0].trim_end_matches(LRM).to_string());
            placeholder
        })
        .into_owned();

    out = LTR_SEGMENT_RE
        .replace_all(&out, |caps: &regex::Captures| format!("{}{}", &caps[0], LRM))
        .into_owned();

    out = LRM_RUN_RE.replace_all(&out, LRM.to_string()).into_owned();

    // A mark directly before punctuation breaks username-style "name:" lines.
    let lrm = LRM.to_string();
    out = out.replace(&format!("{}:", lrm), ":");
    out = out.replace(&format!("{})", lrm), ")");
    out = out.replace(&format!("{}(", lrm), "(");
    out = out.replace(&format!("{} (", lrm), " (");

    for (i, url) in urls.iter().enumerate() {
        out = out.replace(
            &format!("\u{200B}__URL_{}__\u{200B}", i),
            &format!("{}{}", url, LRM),
        );
    }
    out = LRM_RUN_RE.replace_all(&out, LRM.to_string()).into_owned();

    for (i, original) in pagination.iter().enumerate() {
        out = out.replace(&format!("\u{200B}__PGNTN_{}__\u{200B}", i), original);
    }

    out
}

/// Remove every LRM from the text.
pub fn strip_rtl_markers(text: &str) -> String {
    text.replace(LRM, "")
}

/// Count LRM occurrences.
pub fn count_rtl_markers(text: &str) -> usize {
    text.chars().filter(|&c| c == LRM).count()
}
