//! Shared utility functions used across multiple modules.

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Timestamp for a local edit: wall-clock now, but never at or before `previous`.
///
/// Remote devices only accept strictly newer timestamps, so an edit must move
/// the timestamp forward even when the clock has not.
pub fn next_edit_timestamp(previous: i64) -> i64 {
    unix_millis_now().max(previous.saturating_add(1))
}
