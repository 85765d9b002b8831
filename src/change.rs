//! IP change detection.

/// Whether `current` differs from the last observed IP.
///
/// Surrounding whitespace is ignored on both sides: echo services and some
/// provider APIs return values with a trailing newline.
pub fn has_changed(last: Option<&str>, current: &str) -> bool {
    match last {
        Some(last) => last.trim() != current.trim(),
        None => true,
    }
}
