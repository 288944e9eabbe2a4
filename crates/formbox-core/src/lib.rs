//! Formbox Core Library
//!
//! This crate provides the domain models, error types and configuration shared by
//! the storage, registry and service crates of the formbox file subsystem.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{CleanupConfig, Config, LocalStorageConfig, MigrationConfig, S3StorageConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{CleanupResult, FileRecord, MigrationResult, UploadResult};
pub use storage_types::{StorageArea, StorageBackend};
