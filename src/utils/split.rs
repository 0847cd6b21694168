//! Long-message splitting for the Telegram 4096-character cap.
//!
//! Split preference: paragraph boundary, then sentence boundary (Latin and
//! Persian terminators), then word boundary, then a hard character cut. A
//! higher-level boundary is only taken when it keeps the chunk above half of
//! the target size, so chunks stay balanced.

/// Telegram message length cap.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Sentence terminators considered split points (char + separator).
const SENTENCE_ENDERS: [&str; 8] = [". ", "! ", "? ", "\u{061F} ", ".\n", "!\n", "?\n", "\u{061F}\n"];

/// Byte offset of the `n`-th character boundary (clamped to the end).
fn char_boundary_at(s: &str, n_chars: usize) -> usize {
    s.char_indices()
        .nth(n_chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Split `text` into chunks of at most `max_length - reserve` characters.
///
/// Chunks are trimmed at the edges; the concatenation of all chunks equals
/// the input modulo boundary whitespace.
pub fn split_message(text: &str, max_length: usize, reserve: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }

    let actual_max = if max_length > reserve {
        max_length - reserve
    } else {
        max_length
    };

    if text.chars().count() <= actual_max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text.trim().to_string();

    while rest.chars().count() > actual_max {
        let limit = char_boundary_at(&rest, actual_max);
        let half = char_boundary_at(&rest, actual_max / 2);

        // Paragraph boundary, with a short lookahead so a break just past
        // the cap still counts as "this text has paragraphs".
        let lookahead = char_boundary_at(&rest, actual_max + 100);
        if rest[..lookahead].contains("\n\n") {
            if let Some(pos) = rest[..limit].rfind("\n\n") {
                if pos > half {
                    chunks.push(rest[..pos].trim().to_string());
                    rest = rest[pos + 2..].trim_start().to_string();
                    continue;
                }
            }
        }

        // Sentence boundary: cut right after the terminator character.
        let mut best_cut: Option<usize> = None;
        for ender in SENTENCE_ENDERS {
            if let Some(pos) = rest[..limit].rfind(ender) {
                let cut = pos + ender.chars().next().unwrap().len_utf8();
                if cut > half && best_cut.map_or(true, |b| cut > b) {
                    best_cut = Some(cut);
                }
            }
        }
        if let Some(cut) = best_cut {
            chunks.push(rest[..cut].trim().to_string());
            rest = rest[cut..].trim_start().to_string();
            continue;
        }

        // Word boundary.
        if let Some(pos) = rest[..limit].rfind(' ') {
            if pos > half {
                chunks.push(rest[..pos].trim().to_string());
                rest = rest[pos + 1..].trim_start().to_string();
                continue;
            }
        }

        // Hard cut: prefer any whitespace in the final 100-character window.
        let window_start = char_boundary_at(&rest, actual_max.saturating_sub(100));
        let split_pos = rest[window_start..limit]
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| window_start + i + c.len_utf8())
            .unwrap_or(limit);

        chunks.push(rest[..split_pos].trim().to_string());
        rest = rest[split_pos..].trim_start().to_string();
    }

    if !rest.is_empty() {
        chunks.push(rest);
    }

    if chunks.is_empty() {
        vec![text.to_string()]
    } else {
        chunks
    }
}

/// Append ` (i/n)` pagination suffixes when there is more than one chunk.
pub fn paginate(chunks: Vec<String>) -> Vec<String> {
    let total = chunks.len();
    if total <= 1 {
        return chunks;
    }
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| format!("{} ({}/{})", chunk, i + 1, total))
        .collect()
}
