use chrono::Utc;
use formbox_core::{Config, MigrationResult, StorageBackend};
use formbox_storage::keys::{content_type_for_key, MIGRATION_MARKER};
use formbox_storage::{LocalStorage, S3Storage, Storage, StorageError, StorageResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;

/// Copies every stored file from one backend to the other.
///
/// Each direction is idempotent: files already present at the destination are
/// skipped. A successful local -> remote run leaves a `.migration_complete`
/// marker at the local root and later runs return immediately.
#[derive(Clone)]
pub struct MigrationService {
    local: Arc<LocalStorage>,
    remote: Arc<dyn Storage>,
    delete_after_migrate: bool,
}

impl MigrationService {
    pub fn new(
        local: Arc<LocalStorage>,
        remote: Arc<dyn Storage>,
        delete_after_migrate: bool,
    ) -> Self {
        Self {
            local,
            remote,
            delete_after_migrate,
        }
    }

    /// Build both backends from configuration (the remote one is always S3).
    pub async fn from_config(config: &Config) -> StorageResult<Self> {
        let local =
            LocalStorage::new(&config.local.base_path, config.local.base_url.clone()).await?;
        let remote = S3Storage::new(&config.s3).await?;
        Ok(Self::new(
            Arc::new(local),
            Arc::new(remote),
            config.migration.delete_after_migrate,
        ))
    }

    fn marker_path(&self) -> PathBuf {
        self.local.base_path().join(MIGRATION_MARKER)
    }

    pub async fn is_migration_complete(&self) -> bool {
        fs::try_exists(self.marker_path()).await.unwrap_or(false)
    }

    /// Remove the completion marker so the next startup migrates again.
    ///
    /// Returns whether a marker was present.
    pub async fn clear_marker(&self) -> StorageResult<bool> {
        match fs::remove_file(self.marker_path()).await {
            Ok(()) => {
                tracing::info!("Migration completion marker removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    /// Whether startup should move local files to the object store.
    pub fn startup_migration_enabled(config: &Config) -> bool {
        if !config.migration.migrate_on_start {
            return false;
        }
        if config.effective_backend() != StorageBackend::S3 {
            tracing::debug!("Startup migration skipped: object storage backend not active");
            return false;
        }
        true
    }

    /// Build both backends and migrate, but only when startup migration applies.
    ///
    /// No backend is constructed otherwise, so local-only deployments never need
    /// S3 settings.
    pub async fn migrate_on_startup(config: &Config) -> StorageResult<Option<MigrationResult>> {
        if !Self::startup_migration_enabled(config) {
            return Ok(None);
        }
        let service = Self::from_config(config).await?;
        service.migrate_local_to_remote().await.map(Some)
    }

    /// Migrate local files at startup when enabled and the object store is active.
    pub async fn run_on_startup(&self, config: &Config) -> StorageResult<Option<MigrationResult>> {
        if !Self::startup_migration_enabled(config) {
            return Ok(None);
        }
        self.migrate_local_to_remote().await.map(Some)
    }

    #[tracing::instrument(skip(self), fields(migration.direction = "local_to_remote"))]
    pub async fn migrate_local_to_remote(&self) -> StorageResult<MigrationResult> {
        let start = Instant::now();
        let mut result = MigrationResult::default();

        if self.is_migration_complete().await {
            tracing::info!("Migration marker present, skipping local to remote migration");
            result.already_complete = true;
            return Ok(result);
        }

        let keys = self.local.list_paths().await?;

        for key in keys.into_iter().filter(|key| key != MIGRATION_MARKER) {
            result.scanned += 1;

            match self.remote.exists(&key).await {
                Ok(true) => {
                    result.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    result.record_error(format!("Failed to check remote object {}: {}", key, e));
                    continue;
                }
            }

            let size = match copy(&*self.local, &*self.remote, &key).await {
                Ok(size) => size,
                Err(message) => {
                    result.record_error(message);
                    continue;
                }
            };
            result.migrated += 1;
            result.bytes_migrated += size;

            if self.delete_after_migrate {
                match self.remote.exists(&key).await {
                    Ok(true) => {
                        if let Err(e) = self.local.delete_raw(&key).await {
                            result.record_error(format!(
                                "Failed to delete local copy of {}: {}",
                                key, e
                            ));
                        }
                    }
                    Ok(false) => result.record_error(format!(
                        "Uploaded object {} not found on verification, local copy kept",
                        key
                    )),
                    Err(e) => result.record_error(format!(
                        "Failed to verify uploaded object {}: {}",
                        key, e
                    )),
                }
            }
        }

        if result.failed == 0 {
            self.write_marker().await?;
        } else {
            tracing::warn!(
                failed = result.failed,
                "Migration finished with failures, completion marker not written"
            );
        }

        if self.delete_after_migrate {
            self.local.prune_empty_dirs().await;
        }

        result.duration = start.elapsed();
        log_summary("local_to_remote", &result);
        Ok(result)
    }

    #[tracing::instrument(skip(self), fields(migration.direction = "remote_to_local"))]
    pub async fn migrate_remote_to_local(&self) -> StorageResult<MigrationResult> {
        let start = Instant::now();
        let mut result = MigrationResult::default();

        let keys = self.remote.list_paths().await?;

        for key in keys {
            result.scanned += 1;

            match self.local.exists(&key).await {
                Ok(true) => {
                    result.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    result.record_error(format!("Failed to check local file {}: {}", key, e));
                    continue;
                }
            }

            let size = match copy(&*self.remote, &*self.local, &key).await {
                Ok(size) => size,
                Err(message) => {
                    result.record_error(message);
                    continue;
                }
            };
            result.migrated += 1;
            result.bytes_migrated += size;

            if self.delete_after_migrate {
                if let Err(e) = self.remote.delete_raw(&key).await {
                    result.record_error(format!("Failed to delete remote copy of {}: {}", key, e));
                }
            }
        }

        result.duration = start.elapsed();
        log_summary("remote_to_local", &result);
        Ok(result)
    }

    async fn write_marker(&self) -> StorageResult<()> {
        let contents = format!("Migration completed at {}\n", Utc::now().to_rfc3339());
        fs::write(self.marker_path(), contents).await?;
        tracing::info!(marker = %self.marker_path().display(), "Migration completion marker written");
        Ok(())
    }
}

/// Copy one key between backends, returning the number of bytes transferred.
async fn copy(from: &dyn Storage, to: &dyn Storage, key: &str) -> Result<u64, String> {
    let data = from
        .read_raw(key)
        .await
        .map_err(|e| format!("Failed to read {}: {}", key, e))?;
    let size = data.len() as u64;

    to.put_raw(key, data, &content_type_for_key(key))
        .await
        .map_err(|e| format!("Failed to write {}: {}", key, e))?;

    tracing::debug!(key = %key, size_bytes = size, "Migrated file");
    Ok(size)
}

fn log_summary(direction: &str, result: &MigrationResult) {
    tracing::info!(
        direction,
        scanned = result.scanned,
        migrated = result.migrated,
        skipped = result.skipped,
        failed = result.failed,
        bytes_migrated = result.bytes_migrated,
        duration_ms = result.duration.as_secs_f64() * 1000.0,
        "Storage migration completed"
    );
}
