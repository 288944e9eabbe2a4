use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked upload as stored in the `file_records` table.
///
/// The storage subsystem only reads and deletes these rows; upload handlers own creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    /// Backend-relative path, e.g. `images/2025/12/<id>.png`. Empty for legacy rows.
    pub path: String,
    /// Deprecated direct URL kept for rows created before paths were stored.
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Age of the record relative to `now`; records dated in the future have zero age.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}

/// Value returned by a successful upload; callers persist a [`FileRecord`] from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub id: String,
    pub path: String,
    /// Immediately usable URL (presigned for object storage, direct for local)
    pub url: String,
    /// Sanitized original filename
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
}

impl UploadResult {
    pub fn into_record(self, owner_id: impl Into<String>) -> FileRecord {
        FileRecord {
            id: self.id,
            owner_id: owner_id.into(),
            filename: self.filename,
            mime_type: self.mime_type,
            size: i64::try_from(self.size).unwrap_or(i64::MAX),
            path: self.path,
            url: String::new(),
            created_at: Utc::now(),
        }
    }
}
