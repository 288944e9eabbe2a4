//! Shared key generation for storage backends.
//!
//! Key format: `{area}/{YYYY}/{MM}/{name}`. Both backends use these helpers so
//! that cleanup and migration see one layout.

use crate::traits::{StorageError, StorageResult};
use chrono::{DateTime, Datelike, Utc};
use formbox_core::StorageArea;

/// Name of the marker file written at the local root after a complete migration.
pub const MIGRATION_MARKER: &str = ".migration_complete";

const FALLBACK_FILENAME: &str = "file";
const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 10;

const FILE_ID_BYTES: usize = 16;

/// Random 16-byte identifier, hex encoded (32 chars).
pub fn generate_file_id() -> String {
    hex::encode(rand::random::<[u8; FILE_ID_BYTES]>())
}

/// Build the dated key for a stored name.
pub fn dated_key(area: StorageArea, name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{:04}/{:02}/{}",
        area.as_str(),
        now.year(),
        now.month(),
        name
    )
}

/// Normalize a declared content type to `type/subtype` in lowercase.
///
/// An empty value falls back to a guess from the filename; anything that is not
/// `type/subtype` is rejected as an invalid file type.
pub fn normalize_content_type(content_type: &str, filename: &str) -> StorageResult<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    if essence.is_empty() {
        return Ok(mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string());
    }

    let valid = match essence.split_once('/') {
        Some((kind, sub)) => {
            !kind.is_empty()
                && !sub.is_empty()
                && !sub.contains('/')
                && essence
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "/.+-_".contains(c))
        }
        None => false,
    };

    if !valid {
        return Err(StorageError::InvalidFileType(content_type.to_string()));
    }
    Ok(essence)
}

/// Area an upload is routed to by its (normalized) content type.
pub fn area_for_content_type(content_type: &str) -> StorageArea {
    if content_type.starts_with("image/") {
        StorageArea::Images
    } else {
        StorageArea::Files
    }
}

/// Sanitized filename, or a fallback when nothing usable remains.
pub fn display_filename(filename: &str) -> String {
    let name = crate::sanitize::sanitize_filename(filename);
    if name.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        name
    }
}

/// Extension for a stored name: the filename's own when it looks sane, else one
/// derived from the content type.
pub fn extension_for(filename: &str, content_type: &str) -> String {
    let from_name = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        });

    if let Some(ext) = from_name {
        return ext;
    }

    mime_guess::get_mime_extensions_str(content_type)
        .and_then(|exts| exts.first())
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Content type for a stored key, guessed from its extension.
pub fn content_type_for_key(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// The file ID embedded in a stored name.
///
/// Routed uploads are named `{id}.{ext}` and attachments `{id}_{name}`; the
/// ID is the leading token before the first `.` or `_`.
pub fn id_from_name(name: &str) -> &str {
    name.split(['.', '_']).next().unwrap_or("")
}

/// Whether a caller-supplied ID can name a stored file.
///
/// Only full 32-hex IDs are looked up; anything shorter could match several
/// files.
pub fn is_valid_file_id(id: &str) -> bool {
    id.len() == FILE_ID_BYTES * 2 && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Reject keys that could escape the backend root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.contains("..")
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
    {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}
