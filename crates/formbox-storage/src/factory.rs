#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{Storage, StorageBackend, StorageResult};
#[cfg(not(all(feature = "storage-local", feature = "storage-s3")))]
use crate::StorageError;
use formbox_core::Config;
#[cfg(feature = "storage-local")]
use formbox_core::LocalStorageConfig;
#[cfg(feature = "storage-s3")]
use formbox_core::S3StorageConfig;
use std::sync::Arc;

/// Create the storage backend selected by configuration
///
/// An explicit `STORAGE_BACKEND` wins; otherwise S3 is used when its settings
/// are complete and the local filesystem in every other case.
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    let backend = config.effective_backend();
    tracing::info!(backend = %backend, "Initializing storage backend");

    match backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => create_s3_storage(&config.s3).await,

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => create_local_storage(&config.local).await,

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}

#[cfg(feature = "storage-local")]
pub async fn create_local_storage(config: &LocalStorageConfig) -> StorageResult<Arc<dyn Storage>> {
    let storage = LocalStorage::new(&config.base_path, config.base_url.clone()).await?;
    Ok(Arc::new(storage))
}

#[cfg(feature = "storage-s3")]
pub async fn create_s3_storage(config: &S3StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    let storage = S3Storage::new(config).await?;
    Ok(Arc::new(storage))
}
