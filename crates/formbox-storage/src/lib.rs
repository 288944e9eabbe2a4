//! Formbox Storage Library
//!
//! Storage abstraction for uploaded form images and attachments, with a local
//! filesystem and an S3-compatible implementation, plus the share-token signer
//! used to gate time-limited access to stored files.
//!
//! # Storage key format
//!
//! Every file lives under one of two areas, sharded by upload year and month:
//!
//! - `images/{YYYY}/{MM}/{id}.{ext}` for content-type routed image uploads
//! - `files/{YYYY}/{MM}/{id}.{ext}` for other routed uploads
//! - `files/{YYYY}/{MM}/{prefix}_{original name}` for submission attachments
//!
//! Keys are relative to the backend root (local directory or bucket prefix).
//! Untrusted names and paths go through the `sanitize` module before any key is built.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod sanitize;
pub mod share_token;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-local")]
pub use factory::create_local_storage;
#[cfg(feature = "storage-s3")]
pub use factory::create_s3_storage;
pub use factory::create_storage;
pub use formbox_core::{StorageArea, StorageBackend};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use sanitize::{sanitize_filename, sanitize_path};
pub use share_token::{ShareTokenSigner, TokenError};
pub use traits::{ByteStream, FileContent, Storage, StorageError, StorageResult, UploadReader};
