use crate::keys;
use crate::sanitize::sanitize_path;
use crate::traits::{FileContent, Storage, StorageError, StorageResult, UploadReader};
use crate::{StorageArea, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use formbox_core::{S3StorageConfig, UploadResult};
use futures::{StreamExt, TryStreamExt};
use http::Method;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, Attributes, ObjectMeta, ObjectStore, ObjectStoreExt, PutOptions, PutPayload,
    Result as ObjectResult,
};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    /// Present for real S3 clients; URLs are presigned when set
    signer: Option<Arc<dyn Signer>>,
    bucket: String,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
    prefix: String,
    presign_expiry: Duration,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("prefix", &self.prefix)
            .field("presigned", &self.signer.is_some())
            .finish()
    }
}

impl S3Storage {
    /// Create a new S3Storage instance from configuration
    ///
    /// Bucket, region and credentials are required. `endpoint` selects an
    /// S3-compatible provider (e.g., "http://localhost:9000" for MinIO,
    /// "https://nyc3.digitaloceanspaces.com" for DigitalOcean Spaces), addressed
    /// path-style.
    pub async fn new(config: &S3StorageConfig) -> StorageResult<Self> {
        let required = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .ok_or_else(|| StorageError::ConfigError(format!("{} not configured", name)))
        };

        let bucket = required(&config.bucket, "S3_BUCKET")?;
        let region = required(&config.region, "S3_REGION")?;
        let access_key_id = required(&config.access_key_id, "S3_ACCESS_KEY_ID")?;
        let secret_access_key = required(&config.secret_access_key, "S3_SECRET_ACCESS_KEY")?;

        let mut builder = AmazonS3Builder::from_env()
            .with_region(region.clone())
            .with_bucket_name(bucket.clone())
            .with_access_key_id(access_key_id)
            .with_secret_access_key(secret_access_key);

        let endpoint_url = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_virtual_hosted_style_request(false)
                .with_allow_http(allow_http);
        }

        let s3 = Arc::new(
            builder
                .build()
                .map_err(|e| StorageError::ConfigError(e.to_string()))?,
        );

        let presign_expiry = if config.presign_expiry.is_zero() {
            DEFAULT_PRESIGN_EXPIRY
        } else {
            config.presign_expiry
        };

        tracing::info!(
            bucket = %bucket,
            region = %region,
            endpoint = ?endpoint_url,
            "S3 storage initialized"
        );

        Ok(S3Storage {
            store: s3.clone(),
            signer: Some(s3),
            bucket,
            region,
            endpoint_url,
            prefix: normalize_prefix(config.prefix.as_deref()),
            presign_expiry,
        })
    }

    /// Wrap an arbitrary object store (no presigning, direct URLs).
    ///
    /// Used for S3-compatible stores that cannot sign requests and for tests
    /// over `object_store::memory::InMemory`. URLs are built path-style against
    /// `endpoint_url`.
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        endpoint_url: impl Into<String>,
        prefix: Option<&str>,
    ) -> Self {
        S3Storage {
            store,
            signer: None,
            bucket: bucket.into(),
            region: String::new(),
            endpoint_url: Some(endpoint_url.into()),
            prefix: normalize_prefix(prefix),
            presign_expiry: DEFAULT_PRESIGN_EXPIRY,
        }
    }

    /// Object location for a backend-relative key
    fn object_path(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }

    /// Backend-relative key for an object location
    ///
    /// `Path` keeps its segments percent-encoded; keys are decoded so they map
    /// back to the same location through `object_path`.
    fn relative_key(&self, location: &Path) -> Option<String> {
        let full = location
            .parts()
            .map(|part| {
                percent_decode_str(part.as_ref())
                    .decode_utf8()
                    .ok()
                    .map(|segment| segment.into_owned())
            })
            .collect::<Option<Vec<_>>>()?
            .join("/");
        if self.prefix.is_empty() {
            return Some(full);
        }
        full.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(String::from)
    }

    /// Generate public URL for S3 object
    ///
    /// For AWS S3, uses the standard format: https://{bucket}.s3.{region}.amazonaws.com/{key}
    /// For S3-compatible providers, uses path-style {endpoint}/{bucket}/{key}
    fn direct_url(&self, location: &Path) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            let base_url = endpoint.trim_end_matches('/');
            format!("{}/{}/{}", base_url, self.bucket, location)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, location
            )
        }
    }

    /// Presigned GET URL when a signer is available, direct URL otherwise
    async fn url_for(&self, key: &str) -> StorageResult<String> {
        let location = self.object_path(key);
        match self.signer {
            Some(ref signer) => {
                let url_result: ObjectResult<_> = signer
                    .signed_url(Method::GET, &location, self.presign_expiry)
                    .await;
                Ok(url_result
                    .map_err(|e| StorageError::BackendError(e.to_string()))?
                    .to_string())
            }
            None => Ok(self.direct_url(&location)),
        }
    }

    fn checked_key(path: &str) -> StorageResult<String> {
        let key = sanitize_path(path);
        if key.is_empty() {
            return Err(StorageError::InvalidKey(format!("Invalid file path: {}", path)));
        }
        Ok(key)
    }

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let location = self.object_path(key);
        match self.store.head(&location).await {
            Ok(meta) => Ok(Some(meta)),
            Err(ObjectStoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn put_bytes(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let size = data.len() as u64;
        let location = self.object_path(key);
        let start = std::time::Instant::now();

        let mut attributes = Attributes::new();
        if !content_type.is_empty() {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        let result: ObjectResult<_> = self
            .store
            .put_opts(&location, PutPayload::from(data), opts)
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(())
    }

    async fn store_upload(
        &self,
        key: String,
        id: String,
        filename: String,
        content_type: String,
        declared_size: u64,
        reader: UploadReader,
    ) -> StorageResult<UploadResult> {
        // Buffered: the object is only written once the size check passed.
        let mut buffer = Vec::new();
        reader
            .take(declared_size.saturating_add(1))
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("Failed to read from stream: {}", e)))?;

        if buffer.len() as u64 > declared_size {
            return Err(StorageError::FileTooLarge {
                limit: declared_size,
            });
        }

        let size = buffer.len() as u64;
        self.put_bytes(&key, Bytes::from(buffer), &content_type)
            .await?;
        let url = self.url_for(&key).await?;

        Ok(UploadResult {
            id,
            path: key,
            url,
            filename,
            size,
            mime_type: content_type,
        })
    }

    /// List every object below the given relative prefix.
    ///
    /// Item-level listing errors are logged and skipped.
    async fn list_area(&self, area: StorageArea) -> Vec<ObjectMeta> {
        let prefix = self.object_path(area.as_str());
        let mut stream = self.store.list(Some(&prefix));
        let mut objects = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(meta) => objects.push(meta),
                Err(e) => {
                    tracing::warn!(error = %e, prefix = %prefix, "Skipping S3 listing error");
                }
            }
        }
        objects
    }

    /// Locate an object by bare ID under both areas.
    async fn find_by_id(&self, file_id: &str) -> Option<String> {
        if !keys::is_valid_file_id(file_id) {
            return None;
        }

        for area in StorageArea::ALL {
            for meta in self.list_area(area).await {
                let Some(key) = self.relative_key(&meta.location) else {
                    continue;
                };
                let name = key.rsplit('/').next().unwrap_or_default();
                if keys::id_from_name(name) == file_id {
                    return Some(key);
                }
            }
        }

        None
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let location = self.object_path(key);

        let result: ObjectResult<_> = self.store.delete(&location).await;

        result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                StorageError::DeleteFailed(other.to_string())
            }
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .unwrap_or_default()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl Storage for S3Storage {
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

        self.store_upload(key, id, display_name, content_type, declared_size, reader)
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

        self.store_upload(key, id, display_name, content_type, declared_size, reader)
            .await
    }

    async fn get_url(&self, file_id: &str) -> StorageResult<String> {
        let key = self
            .find_by_id(file_id)
            .await
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?;
        self.url_for(&key).await
    }

    async fn get_url_by_path(&self, path: &str) -> StorageResult<String> {
        let key = Self::checked_key(path)?;
        if self.head(&key).await?.is_none() {
            return Err(StorageError::NotFound(key));
        }
        self.url_for(&key).await
    }

    async fn get_file_by_path(&self, path: &str) -> StorageResult<FileContent> {
        let key = Self::checked_key(path)?;
        let location = self.object_path(&key);

        let result: ObjectResult<_> = self.store.get(&location).await;
        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.clone()),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %self.bucket,
                    key = %key,
                    "S3 download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(|value| value.to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| keys::content_type_for_key(&key));
        let size = result.meta.size;

        let stream = result.into_stream().map_err(|e| {
            tracing::error!(error = %e, "S3 stream read error");
            StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
        });

        Ok(FileContent {
            stream: Box::pin(stream),
            content_type,
            size,
        })
    }

    async fn delete(&self, file_id: &str) -> StorageResult<()> {
        let key = self
            .find_by_id(file_id)
            .await
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?;
        self.remove(&key).await
    }

    async fn delete_by_path(&self, path: &str) -> StorageResult<()> {
        let key = Self::checked_key(path)?;
        // S3 deletes are idempotent; check first so a missing object reports NotFound
        if self.head(&key).await?.is_none() {
            return Err(StorageError::NotFound(key));
        }
        self.remove(&key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        keys::validate_key(key)?;
        Ok(self.head(key).await?.is_some())
    }

    async fn put_raw(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        keys::validate_key(key)?;
        self.put_bytes(key, data, content_type).await
    }

    async fn read_raw(&self, key: &str) -> StorageResult<Bytes> {
        keys::validate_key(key)?;
        let location = self.object_path(key);

        let result: ObjectResult<_> = self.store.get(&location).await;
        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::DownloadFailed(other.to_string()),
        })?;

        result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))
    }

    async fn delete_raw(&self, key: &str) -> StorageResult<()> {
        keys::validate_key(key)?;
        match self.remove(key).await {
            Err(StorageError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn list_paths(&self) -> StorageResult<Vec<String>> {
        let prefix = (!self.prefix.is_empty()).then(|| Path::from(self.prefix.as_str()));
        let objects: Vec<ObjectMeta> = self
            .store
            .list(prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| StorageError::BackendError(format!("Failed to list objects: {}", e)))?;

        let mut keys: Vec<String> = objects
            .iter()
            .filter_map(|meta| self.relative_key(&meta.location))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn reader(data: &[u8]) -> UploadReader {
        Box::pin(std::io::Cursor::new(data.to_vec()))
    }

    fn storage(prefix: Option<&str>) -> S3Storage {
        S3Storage::with_store(
            Arc::new(InMemory::new()),
            "forms",
            "http://localhost:9000/",
            prefix,
        )
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/tenant//uploads/")), "tenant/uploads");
    }

    #[test]
    fn test_direct_url_formats() {
        let s3 = storage(Some("app"));
        let location = s3.object_path("images/2025/01/a.png");
        assert_eq!(
            s3.direct_url(&location),
            "http://localhost:9000/forms/app/images/2025/01/a.png"
        );

        let aws = S3Storage {
            endpoint_url: None,
            region: "eu-west-1".to_string(),
            ..storage(None)
        };
        assert_eq!(
            aws.direct_url(&Path::from("files/x.txt")),
            "https://forms.s3.eu-west-1.amazonaws.com/files/x.txt"
        );
    }

    #[tokio::test]
    async fn test_upload_and_lookup() {
        let s3 = storage(Some("app"));

        let result = s3
            .upload("photo.png", "image/png", 4, reader(b"\x89PNG"))
            .await
            .unwrap();
        assert!(result.path.starts_with("images/"));
        assert!(result.url.ends_with(&format!("/forms/app/{}", result.path)));

        assert_eq!(s3.get_url(&result.id).await.unwrap(), result.url);
        assert_eq!(s3.get_url_by_path(&result.path).await.unwrap(), result.url);

        let content = s3.get_file_by_path(&result.path).await.unwrap();
        assert_eq!(content.content_type, "image/png");
        assert_eq!(content.size, 4);
        assert_eq!(content.into_bytes().await.unwrap(), b"\x89PNG");

        assert_eq!(s3.list_paths().await.unwrap(), vec![result.path.clone()]);
    }

    #[tokio::test]
    async fn test_upload_too_large_writes_nothing() {
        let s3 = storage(None);
        let result = s3
            .upload("a.txt", "text/plain", 2, reader(b"too long"))
            .await;
        assert!(matches!(result, Err(StorageError::FileTooLarge { limit: 2 })));
        assert!(s3.list_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_id_and_path() {
        let s3 = storage(None);

        let first = s3
            .upload_to_files("notes.txt", "text/plain", 3, reader(b"abc"))
            .await
            .unwrap();
        let second = s3
            .upload("doc.pdf", "application/pdf", 3, reader(b"pdf"))
            .await
            .unwrap();

        s3.delete(&first.id).await.unwrap();
        assert!(matches!(
            s3.get_url(&first.id).await,
            Err(StorageError::NotFound(_))
        ));

        s3.delete_by_path(&second.path).await.unwrap();
        assert!(matches!(
            s3.delete_by_path(&second.path).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(s3.list_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_paths_rejected() {
        let s3 = storage(None);
        assert!(matches!(
            s3.get_file_by_path("../secrets").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            s3.get_url_by_path("other/2025/01/x").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            s3.put_raw("../x", Bytes::new(), "").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_raw_helpers_respect_prefix() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let s3 = S3Storage::with_store(store.clone(), "forms", "http://localhost:9000", Some("app"));

        s3.put_raw("files/2024/05/a.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();

        assert!(store
            .head(&Path::from("app/files/2024/05/a.txt"))
            .await
            .is_ok());
        assert!(s3.exists("files/2024/05/a.txt").await.unwrap());
        assert_eq!(
            s3.read_raw("files/2024/05/a.txt").await.unwrap(),
            Bytes::from_static(b"hello")
        );

        s3.delete_raw("files/2024/05/a.txt").await.unwrap();
        s3.delete_raw("files/2024/05/a.txt").await.unwrap();
        assert!(!s3.exists("files/2024/05/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_reserved_characters_in_names() {
        let s3 = storage(Some("app"));

        let result = s3
            .upload_to_files("a#b%c.txt", "text/plain", 3, reader(b"abc"))
            .await
            .unwrap();
        assert!(result.path.ends_with(&format!("{}_a#b%c.txt", result.id)));

        assert_eq!(s3.list_paths().await.unwrap(), vec![result.path.clone()]);
        assert_eq!(s3.get_url(&result.id).await.unwrap(), result.url);
        assert_eq!(s3.get_url_by_path(&result.path).await.unwrap(), result.url);
        assert!(!result.url.contains("%2523"));
        assert_eq!(
            s3.read_raw(&result.path).await.unwrap(),
            Bytes::from_static(b"abc")
        );

        s3.delete(&result.id).await.unwrap();
        assert!(s3.list_paths().await.unwrap().is_empty());
        assert!(matches!(
            s3.get_url_by_path(&result.path).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wrapped_store_urls_use_endpoint() {
        let s3 = S3Storage::with_store(
            Arc::new(InMemory::new()),
            "forms",
            "https://objects.example.com",
            None,
        );
        let result = s3
            .upload("a.png", "image/png", 1, reader(b"x"))
            .await
            .unwrap();
        assert_eq!(
            result.url,
            format!("https://objects.example.com/forms/{}", result.path)
        );
    }
}
