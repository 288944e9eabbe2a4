use chrono::{DateTime, Utc};
use formbox_core::{AppError, CleanupConfig, CleanupResult, FileRecord};
use formbox_db::FileRegistry;
use formbox_storage::{Storage, StorageError};
use std::sync::Arc;
use std::time::Instant;

/// Removes stored files no form or submission refers to anymore.
#[derive(Clone)]
pub struct CleanupService {
    registry: Arc<dyn FileRegistry>,
    storage: Arc<dyn Storage>,
    config: CleanupConfig,
}

enum Outcome {
    Kept,
    Deleted,
}

impl CleanupService {
    pub fn new(
        registry: Arc<dyn FileRegistry>,
        storage: Arc<dyn Storage>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            registry,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Run one sweep over every file record.
    ///
    /// Per-file failures are collected in the result; only a failure to load the
    /// record list is returned as an error.
    pub async fn run_cleanup(&self) -> Result<CleanupResult, AppError> {
        self.run_cleanup_at(Utc::now()).await
    }

    #[tracing::instrument(skip(self), fields(cleanup.dry_run = self.config.dry_run))]
    pub async fn run_cleanup_at(&self, now: DateTime<Utc>) -> Result<CleanupResult, AppError> {
        let start = Instant::now();
        let mut result = CleanupResult {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        let records = self.registry.list_all().await?;

        for record in records {
            result.scanned += 1;

            if record.age(now) < self.config.min_age {
                result.skipped += 1;
                continue;
            }

            match self.process(&record).await {
                Ok(Outcome::Kept) => result.skipped += 1,
                Ok(Outcome::Deleted) => {
                    result.deleted += 1;
                    result.bytes_freed += u64::try_from(record.size).unwrap_or(0);
                }
                Err(message) => {
                    tracing::warn!(file_id = %record.id, error = %message, "Cleanup failed for file");
                    result.record_error(message);
                }
            }
        }

        result.duration = start.elapsed();

        if result.has_activity() {
            tracing::info!(
                scanned = result.scanned,
                deleted = result.deleted,
                skipped = result.skipped,
                failed = result.failed,
                bytes_freed = result.bytes_freed,
                dry_run = result.dry_run,
                duration_ms = result.duration.as_secs_f64() * 1000.0,
                "Orphan cleanup completed"
            );
        } else {
            tracing::debug!(scanned = result.scanned, "Orphan cleanup found nothing to do");
        }

        Ok(result)
    }

    async fn process(&self, record: &FileRecord) -> Result<Outcome, String> {
        if self.is_referenced(record).await? {
            return Ok(Outcome::Kept);
        }

        if self.config.dry_run {
            tracing::info!(
                file_id = %record.id,
                path = %record.path,
                size_bytes = record.size,
                "Dry run: would delete orphaned file"
            );
            return Ok(Outcome::Deleted);
        }

        let deleted = if record.path.is_empty() {
            self.storage.delete(&record.id).await
        } else {
            self.storage.delete_by_path(&record.path).await
        };

        match deleted {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                tracing::debug!(file_id = %record.id, "Orphaned file already gone from storage");
            }
            Err(e) => {
                return Err(format!("Failed to delete file {} from storage: {}", record.id, e));
            }
        }

        self.registry
            .delete(&record.id)
            .await
            .map_err(|e| format!("Failed to delete file record {}: {}", record.id, e))?;

        tracing::info!(
            file_id = %record.id,
            path = %record.path,
            size_bytes = record.size,
            "Deleted orphaned file"
        );

        Ok(Outcome::Deleted)
    }

    /// Whether the record's ID or legacy URL still appears in any form or submission.
    async fn is_referenced(&self, record: &FileRecord) -> Result<bool, String> {
        let needles = std::iter::once(record.id.as_str())
            .chain((!record.url.is_empty()).then_some(record.url.as_str()));

        for needle in needles {
            let referenced = self.registry.is_referenced(needle).await.map_err(|e| {
                format!("Failed to check references for file {}: {}", record.id, e)
            })?;
            if referenced {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
