//! Configuration module
//!
//! Storage, migration and cleanup settings for the file subsystem. Values come
//! from the process environment (and a `.env` file when present).

use std::env;
use std::time::Duration;

use crate::storage_types::StorageBackend;

const LOCAL_STORAGE_PATH: &str = "./uploads";
const LOCAL_STORAGE_BASE_URL: &str = "/uploads";
const S3_PRESIGN_EXPIRY_SECS: u64 = 3600;
const CLEANUP_INTERVAL_HOURS: u64 = 24;
const CLEANUP_MIN_AGE_DAYS: u64 = 7;

/// Local filesystem backend settings
#[derive(Clone, Debug)]
pub struct LocalStorageConfig {
    /// Root directory holding `images/` and `files/`
    pub base_path: String,
    /// Public URL prefix files are served under (e.g. "/uploads")
    pub base_url: String,
}

/// S3-compatible backend settings
#[derive(Clone, Debug, Default)]
pub struct S3StorageConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, R2, Spaces, ...)
    pub endpoint: Option<String>,
    /// Key prefix namespacing every object
    pub prefix: Option<String>,
    pub presign_expiry: Duration,
}

impl S3StorageConfig {
    /// True when bucket, region and both credentials are present.
    pub fn is_complete(&self) -> bool {
        [
            &self.bucket,
            &self.region,
            &self.access_key_id,
            &self.secret_access_key,
        ]
        .iter()
        .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

#[derive(Clone, Debug)]
pub struct MigrationConfig {
    /// Run local -> S3 migration at startup when the S3 backend is active
    pub migrate_on_start: bool,
    /// Remove the source copy once a file has been transferred
    pub delete_after_migrate: bool,
}

#[derive(Clone, Debug)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Records younger than this are never considered orphaned
    pub min_age: Duration,
    pub dry_run: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(CLEANUP_INTERVAL_HOURS * 3600),
            min_age: Duration::from_secs(CLEANUP_MIN_AGE_DAYS * 24 * 3600),
            dry_run: false,
        }
    }
}

/// Application configuration for the file subsystem.
#[derive(Clone, Debug)]
pub struct Config {
    /// Explicit backend selection; `None` means auto-detect
    pub storage_backend: Option<StorageBackend>,
    pub local: LocalStorageConfig,
    pub s3: S3StorageConfig,
    pub migration: MigrationConfig,
    pub cleanup: CleanupConfig,
    pub share_token_secret: Option<String>,
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());
        let flag = |key: &str, default: bool| {
            var(key)
                .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(default)
        };
        let number = |key: &str, default: u64| -> Result<u64, anyhow::Error> {
            match var(key) {
                Some(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} must be a valid number", key)),
                None => Ok(default),
            }
        };

        let storage_backend = var("STORAGE_BACKEND")
            .map(|s| s.parse::<StorageBackend>())
            .transpose()?;

        let config = Config {
            storage_backend,
            local: LocalStorageConfig {
                base_path: var("LOCAL_STORAGE_PATH")
                    .unwrap_or_else(|| LOCAL_STORAGE_PATH.to_string()),
                base_url: var("LOCAL_STORAGE_BASE_URL")
                    .unwrap_or_else(|| LOCAL_STORAGE_BASE_URL.to_string()),
            },
            s3: S3StorageConfig {
                bucket: var("S3_BUCKET"),
                region: var("S3_REGION").or_else(|| var("AWS_REGION")),
                access_key_id: var("S3_ACCESS_KEY_ID").or_else(|| var("AWS_ACCESS_KEY_ID")),
                secret_access_key: var("S3_SECRET_ACCESS_KEY")
                    .or_else(|| var("AWS_SECRET_ACCESS_KEY")),
                endpoint: var("S3_ENDPOINT"),
                prefix: var("S3_PREFIX"),
                presign_expiry: Duration::from_secs(number(
                    "S3_PRESIGN_EXPIRY_SECS",
                    S3_PRESIGN_EXPIRY_SECS,
                )?),
            },
            migration: MigrationConfig {
                migrate_on_start: flag("STORAGE_MIGRATE_ON_START", false),
                delete_after_migrate: flag("STORAGE_DELETE_AFTER_MIGRATE", false),
            },
            cleanup: CleanupConfig {
                enabled: flag("CLEANUP_ENABLED", false),
                interval: Duration::from_secs(
                    number("CLEANUP_INTERVAL_HOURS", CLEANUP_INTERVAL_HOURS)? * 3600,
                ),
                min_age: Duration::from_secs(
                    number("CLEANUP_MIN_AGE_DAYS", CLEANUP_MIN_AGE_DAYS)? * 24 * 3600,
                ),
                dry_run: flag("CLEANUP_DRY_RUN", false),
            },
            share_token_secret: var("SHARE_TOKEN_SECRET"),
            database_url: var("DATABASE_URL"),
        };

        config.validate()?;
        Ok(config)
    }

    /// The backend in effect: the explicit choice, or S3 when its credentials are complete.
    pub fn effective_backend(&self) -> StorageBackend {
        match self.storage_backend {
            Some(backend) => backend,
            None if self.s3.is_complete() => StorageBackend::S3,
            None => StorageBackend::Local,
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.effective_backend() == StorageBackend::S3 {
            if self.s3.bucket.is_none() {
                return Err(anyhow::anyhow!(
                    "S3_BUCKET must be set when using S3 storage backend"
                ));
            }
            if self.s3.region.is_none() {
                return Err(anyhow::anyhow!(
                    "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                ));
            }
            if self.s3.access_key_id.is_none() || self.s3.secret_access_key.is_none() {
                return Err(anyhow::anyhow!(
                    "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set when using S3 storage backend"
                ));
            }
        }

        if self.cleanup.interval.is_zero() {
            return Err(anyhow::anyhow!("CLEANUP_INTERVAL_HOURS must be greater than 0"));
        }

        if let Some(ref secret) = self.share_token_secret {
            if secret.len() < 32 {
                return Err(anyhow::anyhow!(
                    "SHARE_TOKEN_SECRET must be at least 32 characters long"
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_local_backend() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.effective_backend(), StorageBackend::Local);
        assert_eq!(config.local.base_path, "./uploads");
        assert_eq!(config.s3.presign_expiry, Duration::from_secs(3600));
        assert!(!config.cleanup.enabled);
        assert_eq!(config.cleanup.min_age, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn auto_detects_s3_from_complete_credentials() {
        let config = config_from(&[
            ("S3_BUCKET", "uploads"),
            ("S3_REGION", "eu-west-1"),
            ("S3_ACCESS_KEY_ID", "key"),
            ("S3_SECRET_ACCESS_KEY", "secret"),
        ])
        .unwrap();
        assert_eq!(config.storage_backend, None);
        assert_eq!(config.effective_backend(), StorageBackend::S3);
    }

    #[test]
    fn partial_credentials_stay_local() {
        let config = config_from(&[("S3_BUCKET", "uploads"), ("S3_REGION", "eu-west-1")]).unwrap();
        assert_eq!(config.effective_backend(), StorageBackend::Local);
    }

    #[test]
    fn explicit_s3_requires_credentials() {
        let err = config_from(&[("STORAGE_BACKEND", "s3"), ("S3_BUCKET", "uploads")]).unwrap_err();
        assert!(err.to_string().contains("S3_REGION"));
    }

    #[test]
    fn rejects_invalid_numbers_and_zero_interval() {
        assert!(config_from(&[("CLEANUP_MIN_AGE_DAYS", "seven")]).is_err());
        assert!(config_from(&[("CLEANUP_INTERVAL_HOURS", "0")]).is_err());
    }

    #[test]
    fn parses_cleanup_flags() {
        let config = config_from(&[
            ("CLEANUP_ENABLED", "true"),
            ("CLEANUP_DRY_RUN", "1"),
            ("CLEANUP_INTERVAL_HOURS", "6"),
            ("CLEANUP_MIN_AGE_DAYS", "2"),
        ])
        .unwrap();
        assert!(config.cleanup.enabled);
        assert!(config.cleanup.dry_run);
        assert_eq!(config.cleanup.interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.cleanup.min_age, Duration::from_secs(2 * 24 * 3600));
    }

    #[test]
    fn rejects_short_share_secret() {
        assert!(config_from(&[("SHARE_TOKEN_SECRET", "short")]).is_err());
    }
}
