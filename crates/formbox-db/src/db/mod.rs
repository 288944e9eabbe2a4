//! Registry repositories
//!
//! `FileRegistry` is the seam the cleanup service talks to. `PgFileRegistry`
//! backs it with Postgres; `MemoryFileRegistry` keeps everything in process.

use async_trait::async_trait;
use formbox_core::{AppError, FileRecord};

pub mod file_registry;
pub mod memory;

pub use file_registry::PgFileRegistry;
pub use memory::MemoryFileRegistry;

/// Registry of uploaded files and the documents that may reference them.
#[async_trait]
pub trait FileRegistry: Send + Sync {
    /// Every tracked file record, oldest first.
    async fn list_all(&self) -> Result<Vec<FileRecord>, AppError>;

    /// Remove a file record. Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool, AppError>;

    /// Whether `needle` occurs in any form's settings or fields, or in any
    /// submission's data. Empty needles never match.
    async fn is_referenced(&self, needle: &str) -> Result<bool, AppError>;
}

/// Escape `LIKE` wildcards so `needle` is matched literally, then wrap it in `%`.
pub(crate) fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
