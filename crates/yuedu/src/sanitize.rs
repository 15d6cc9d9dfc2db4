//! Helpers for sanitizing data before it enters logs, span attributes or
//! persisted error columns.
//!
//! Submitted text can be long and personal; spans carry a short preview and
//! a hash for correlation instead of the full input.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Characters kept in list previews.
pub const PREVIEW_CHARS: usize = 100;

/// Characters kept of an error message before it is persisted.
pub const ERROR_MESSAGE_CHARS: usize = 200;

/// Returns the first `max` characters of `text`, with `...` appended when
/// anything was cut. Counts characters, never splits a code point.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Truncates an error message to [`ERROR_MESSAGE_CHARS`] characters.
pub fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(ERROR_MESSAGE_CHARS) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

/// Returns a short deterministic hash of the text for correlation without
/// exposing it.
pub fn hash_text(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
