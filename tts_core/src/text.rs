//! Text preparation before fingerprinting and synthesis.

/// Marker appended to text cut at the length limit.
pub const TRUNCATION_MARKER: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedText {
    pub text: String,
    pub truncated: bool,
}

/// Strip control characters, collapse whitespace runs to one space and trim.
pub fn normalize_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut last_was_whitespace = false;
    for ch in text.chars() {
        if ch.is_whitespace() || ch.is_control() {
            if !last_was_whitespace {
                result.push(' ');
                last_was_whitespace = true;
            }
        } else {
            result.push(ch);
            last_was_whitespace = false;
        }
    }
    result.trim().to_string()
}

/// Cut `text` to `max_chars` characters, marking the cut.
pub fn truncate_text(text: String, max_chars: usize) -> PreparedText {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let mut cut = text[..idx].trim_end().to_string();
            cut.push_str(TRUNCATION_MARKER);
            PreparedText {
                text: cut,
                truncated: true,
            }
        }
        None => PreparedText {
            text,
            truncated: false,
        },
    }
}

/// Normalize then truncate.
pub fn prepare_text(raw: &str, max_chars: usize) -> PreparedText {
    truncate_text(normalize_text(raw), max_chars)
}
