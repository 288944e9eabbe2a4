//! Filename and path sanitization.
//!
//! These are the only traversal defense: every key that reaches the filesystem
//! or a bucket is built from their output. Neither function fails; an empty
//! string means "nothing usable" and callers must treat it as invalid.

use formbox_core::StorageArea;

const RESERVED: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*', '\0'];
const MAX_FILENAME_CHARS: usize = 255;

/// Reduce an untrusted filename to a safe single path component.
///
/// Directory components are dropped, reserved characters and NUL bytes are
/// removed, and `..` runs are collapsed. May return an empty string; callers
/// pick a fallback name.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let mut cleaned: String = base
        .chars()
        .filter(|c| !RESERVED.contains(c) && !c.is_control())
        .collect();

    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }

    let cleaned = cleaned.trim();
    if cleaned.chars().all(|c| c == '.') {
        return String::new();
    }

    cleaned.chars().take(MAX_FILENAME_CHARS).collect()
}

/// Validate a backend-relative path supplied by a caller.
///
/// Returns the normalized path, or an empty string when the path contains NUL
/// bytes, is absolute, contains a `..` segment, uses backslashes, or is not a
/// file under `images/` or `files/`.
pub fn sanitize_path(path: &str) -> String {
    if path.is_empty() || path.contains('\0') || path.contains('\\') || path.contains(':') {
        return String::new();
    }
    if path.starts_with('/') {
        return String::new();
    }

    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.iter().any(|s| *s == ".." || s.contains("..")) {
        return String::new();
    }
    if segments.len() < 2 {
        return String::new();
    }
    if !StorageArea::ALL
        .iter()
        .any(|area| area.as_str() == segments[0])
    {
        return String::new();
    }

    segments.join("/")
}
