//! Text helpers

/// Truncate `value` to at most `max_chars` characters.
///
/// Counts Unicode scalar values rather than bytes, so multi-byte text is never
/// split in the middle of a character.
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &value[..byte_idx],
        None => value,
    }
}
