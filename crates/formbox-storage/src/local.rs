use crate::keys;
use crate::sanitize::sanitize_path;
use crate::traits::{FileContent, Storage, StorageError, StorageResult, UploadReader};
use crate::{StorageArea, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use formbox_core::UploadResult;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use walkdir::WalkDir;

/// Local filesystem storage implementation
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/data/uploads")
    /// * `base_url` - Public URL prefix files are served under (e.g., "/uploads")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        for area in StorageArea::ALL {
            let dir = base_path.join(area.as_str());
            fs::create_dir_all(&dir).await.map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(LocalStorage {
            base_path,
            base_url,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Rejects traversal sequences, and for keys that already exist also checks
    /// that the resolved path stays inside the base directory (symlinks).
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        keys::validate_key(storage_key)?;

        let path = self.base_path.join(storage_key);

        if let Ok(canonical) = path.canonicalize() {
            let base_canonical = self.base_path.canonicalize().map_err(|e| {
                StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
            })?;
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    /// Resolve a caller-supplied relative path through the sanitizer.
    fn checked_path(&self, path: &str) -> StorageResult<(String, PathBuf)> {
        let key = sanitize_path(path);
        if key.is_empty() {
            return Err(StorageError::InvalidKey(format!("Invalid file path: {}", path)));
        }
        let full = self.key_to_path(&key)?;
        Ok((key, full))
    }

    /// Generate public URL for file
    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn is_file(path: &Path) -> bool {
        fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Best-effort removal of a partially written file.
    async fn remove_partial(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to remove partial upload"
                );
            }
        }
    }

    /// Stream `reader` into `path`, enforcing `declared_size`.
    async fn write_limited(
        &self,
        path: &Path,
        reader: UploadReader,
        declared_size: u64,
    ) -> StorageResult<u64> {
        self.ensure_parent_dir(path).await?;

        let mut file = fs::File::create(path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        let mut limited = reader.take(declared_size.saturating_add(1));
        let written = match tokio::io::copy(&mut limited, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                Self::remove_partial(path).await;
                return Err(StorageError::UploadFailed(format!(
                    "Failed to write stream to file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        if written > declared_size {
            drop(file);
            Self::remove_partial(path).await;
            return Err(StorageError::FileTooLarge {
                limit: declared_size,
            });
        }

        if let Err(e) = file.sync_all().await {
            drop(file);
            Self::remove_partial(path).await;
            return Err(StorageError::UploadFailed(format!(
                "Failed to sync file {}: {}",
                path.display(),
                e
            )));
        }

        Ok(written)
    }

    async fn store(
        &self,
        key: String,
        id: String,
        filename: String,
        content_type: String,
        declared_size: u64,
        reader: UploadReader,
    ) -> StorageResult<UploadResult> {
        let path = self.key_to_path(&key)?;
        let start = std::time::Instant::now();

        let size = self.write_limited(&path, reader, declared_size).await?;
        let url = self.generate_url(&key);

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(UploadResult {
            id,
            path: key,
            url,
            filename,
            size,
            mime_type: content_type,
        })
    }

    /// Entries of a directory; unreadable directories yield nothing.
    async fn read_dir_entries(dir: &Path) -> Vec<(String, PathBuf)> {
        let mut entries = Vec::new();
        let mut reader = match fs::read_dir(dir).await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::debug!(error = %e, dir = %dir.display(), "Skipping unreadable directory");
                return entries;
            }
        };
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    if let Some(name) = entry.file_name().to_str() {
                        entries.push((name.to_string(), entry.path()));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, dir = %dir.display(), "Directory listing error");
                    break;
                }
            }
        }
        entries
    }

    /// Locate a file by bare ID across `{area}/{YYYY}/{MM}/`.
    ///
    /// Cost grows with the number of stored files.
    async fn find_by_id(&self, file_id: &str) -> Option<String> {
        if !keys::is_valid_file_id(file_id) {
            return None;
        }

        for area in StorageArea::ALL {
            for (year, year_path) in Self::read_dir_entries(&self.base_path.join(area.as_str())).await
            {
                for (month, month_path) in Self::read_dir_entries(&year_path).await {
                    for (name, file_path) in Self::read_dir_entries(&month_path).await {
                        if keys::id_from_name(&name) == file_id && Self::is_file(&file_path).await
                        {
                            return Some(format!("{}/{}/{}/{}", area, year, month, name));
                        }
                    }
                }
            }
        }

        None
    }

    async fn remove_key(&self, key: &str, path: &Path) -> StorageResult<()> {
        let start = std::time::Instant::now();

        fs::remove_file(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                ))
            }
        })?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    /// Remove empty directories below the area roots, deepest first.
    ///
    /// Failures (typically "directory not empty") are ignored.
    pub async fn prune_empty_dirs(&self) {
        let base = self.base_path.clone();
        let dirs = tokio::task::spawn_blocking(move || {
            WalkDir::new(&base)
                .min_depth(2)
                .contents_first(true)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_dir())
                .map(|entry| entry.into_path())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        for dir in dirs {
            if fs::remove_dir(&dir).await.is_ok() {
                tracing::debug!(dir = %dir.display(), "Removed empty directory");
            }
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        declared_size: u64,
        reader: UploadReader,
    ) -> StorageResult<UploadResult> {
        let display_name = keys::display_filename(filename);
        let content_type = keys::normalize_content_type(content_type, &display_name)?;
        let area = keys::area_for_content_type(&content_type);

        let id = keys::generate_file_id();
        let stored_name = format!("{}.{}", id, keys::extension_for(&display_name, &content_type));
        let key = keys::dated_key(area, &stored_name, Utc::now());

        self.store(key, id, display_name, content_type, declared_size, reader)
            .await
    }

    async fn upload_to_files(
        &self,
        filename: &str,
        content_type: &str,
        declared_size: u64,
        reader: UploadReader,
    ) -> StorageResult<UploadResult> {
        let display_name = keys::display_filename(filename);
        let content_type = keys::normalize_content_type(content_type, &display_name)?;

        let id = keys::generate_file_id();
        let stored_name = format!("{}_{}", id, display_name);
        let key = keys::dated_key(StorageArea::Files, &stored_name, Utc::now());

        self.store(key, id, display_name, content_type, declared_size, reader)
            .await
    }

    async fn get_url(&self, file_id: &str) -> StorageResult<String> {
        let key = self
            .find_by_id(file_id)
            .await
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?;
        Ok(self.generate_url(&key))
    }

    async fn get_url_by_path(&self, path: &str) -> StorageResult<String> {
        let (key, full) = self.checked_path(path)?;
        if !Self::is_file(&full).await {
            return Err(StorageError::NotFound(key));
        }
        Ok(self.generate_url(&key))
    }

    async fn get_file_by_path(&self, path: &str) -> StorageResult<FileContent> {
        let (key, full) = self.checked_path(path)?;

        let file = fs::File::open(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.clone())
            } else {
                StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    full.display(),
                    e
                ))
            }
        })?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(key));
        }

        let path_display = full.display().to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |result| {
            result.map_err(|e| {
                tracing::error!(path = %path_display, error = %e, "Local storage stream read error");
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(FileContent {
            stream: Box::pin(stream),
            content_type: keys::content_type_for_key(&key),
            size: meta.len(),
        })
    }

    async fn delete(&self, file_id: &str) -> StorageResult<()> {
        let key = self
            .find_by_id(file_id)
            .await
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?;
        let path = self.key_to_path(&key)?;
        self.remove_key(&key, &path).await
    }

    async fn delete_by_path(&self, path: &str) -> StorageResult<()> {
        let (key, full) = self.checked_path(path)?;
        self.remove_key(&key, &full).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(Self::is_file(&path).await)
    }

    async fn put_raw(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        self.ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        let written = async {
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            Self::remove_partial(&path).await;
            return Err(StorageError::UploadFailed(format!(
                "Failed to write file {}: {}",
                path.display(),
                e
            )));
        }

        tracing::debug!(key = %key, size_bytes = data.len(), "Local storage put_raw successful");
        Ok(())
    }

    async fn read_raw(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(key)?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::DownloadFailed(format!(
                    "Failed to read file {}: {}",
                    path.display(),
                    e
                ))
            }
        })?;
        Ok(Bytes::from(data))
    }

    async fn delete_raw(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        match self.remove_key(key, &path).await {
            Err(StorageError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn list_paths(&self) -> StorageResult<Vec<String>> {
        let base = self.base_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            for entry in WalkDir::new(&base).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) if e.depth() == 0 => {
                        return Err(StorageError::BackendError(format!(
                            "Failed to walk storage directory {}: {}",
                            base.display(),
                            e
                        )));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unreadable entry during walk");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::BackendError(format!("Directory walk task failed: {}", e)))?
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
