//! Storage abstraction trait
//!
//! This module defines the Storage trait that both backends implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use formbox_core::{ErrorMetadata, LogLevel, UploadResult};
use futures::{Stream, TryStreamExt};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid file type: {0}")]
    InvalidFileType(String),

    #[error("File too large: exceeds {limit} bytes")]
    FileTooLarge { limit: u64 },

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl ErrorMetadata for StorageError {
    fn http_status_code(&self) -> u16 {
        match self {
            StorageError::InvalidFileType(_) | StorageError::InvalidKey(_) => 400,
            StorageError::FileTooLarge { .. } => 413,
            StorageError::NotFound(_) => 404,
            _ => 500,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            StorageError::InvalidFileType(_) => "INVALID_FILE_TYPE",
            StorageError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            StorageError::UploadFailed(_) => "UPLOAD_FAILED",
            StorageError::NotFound(_) => "FILE_NOT_FOUND",
            StorageError::InvalidKey(_) => "INVALID_PATH",
            _ => "STORAGE_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::UploadFailed(_)
                | StorageError::DownloadFailed(_)
                | StorageError::DeleteFailed(_)
                | StorageError::BackendError(_)
                | StorageError::IoError(_)
        )
    }

    fn client_message(&self) -> String {
        match self {
            StorageError::InvalidFileType(_) => "File type is not allowed".to_string(),
            StorageError::FileTooLarge { limit } => {
                format!("File exceeds the maximum size of {} bytes", limit)
            }
            StorageError::NotFound(_) => "File not found".to_string(),
            StorageError::InvalidKey(_) => "Invalid file path".to_string(),
            _ => "Failed to access storage".to_string(),
        }
    }

    fn log_level(&self) -> LogLevel {
        match self.http_status_code() {
            400..=499 => LogLevel::Debug,
            _ => LogLevel::Error,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Byte stream returned when reading a stored file
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Reader supplied to upload operations
pub type UploadReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// An opened stored file.
///
/// The underlying file handle or HTTP body is released when the value (or its
/// stream) is dropped, on every exit path.
pub struct FileContent {
    pub stream: ByteStream,
    pub content_type: String,
    pub size: u64,
}

impl FileContent {
    /// Drain the stream into memory.
    pub async fn into_bytes(self) -> StorageResult<Vec<u8>> {
        let capacity = usize::try_from(self.size).unwrap_or(0);
        self.stream
            .try_fold(Vec::with_capacity(capacity), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }
}

impl std::fmt::Debug for FileContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileContent")
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Storage abstraction trait
///
/// Both backends (local filesystem, S3-compatible object store) implement this
/// trait; the active one is picked once at startup by [`crate::create_storage`].
///
/// Path arguments are backend-relative (`images/2025/12/<id>.png`). The
/// user-facing path operations run them through [`crate::sanitize_path`]; the
/// `*_raw` key helpers only reject traversal and are meant for migration.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store an upload, routing it by content type: `image/*` goes to `images/`,
    /// everything else to `files/`.
    ///
    /// At most `declared_size + 1` bytes are read from `reader`; a stream longer
    /// than `declared_size` fails with [`StorageError::FileTooLarge`] and leaves
    /// nothing behind.
    async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        declared_size: u64,
        reader: UploadReader,
    ) -> StorageResult<UploadResult>;

    /// Same contract as [`Storage::upload`], but always stores under `files/` and
    /// keeps the sanitized original filename behind the file ID.
    async fn upload_to_files(
        &self,
        filename: &str,
        content_type: &str,
        declared_size: u64,
        reader: UploadReader,
    ) -> StorageResult<UploadResult>;

    /// Resolve a URL from a bare file ID by scanning both areas.
    ///
    /// Slow path kept for records that predate stored paths.
    async fn get_url(&self, file_id: &str) -> StorageResult<String>;

    /// Resolve a URL from a stored relative path.
    async fn get_url_by_path(&self, path: &str) -> StorageResult<String>;

    /// Open a stored file for streaming.
    async fn get_file_by_path(&self, path: &str) -> StorageResult<FileContent>;

    /// Delete a file located by bare ID (same lookup as [`Storage::get_url`]).
    async fn delete(&self, file_id: &str) -> StorageResult<()>;

    /// Delete a file by stored relative path.
    async fn delete_by_path(&self, path: &str) -> StorageResult<()>;

    /// Check whether a key exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Write bytes to an exact key, replacing any existing object
    async fn put_raw(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Read a whole object by exact key
    async fn read_raw(&self, key: &str) -> StorageResult<Bytes>;

    /// Remove an object by exact key; missing keys are not an error
    async fn delete_raw(&self, key: &str) -> StorageResult<()>;

    /// List every stored key, relative to the backend root
    async fn list_paths(&self) -> StorageResult<Vec<String>>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
