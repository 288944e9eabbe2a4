pub mod file;
pub mod results;

pub use file::{FileRecord, UploadResult};
pub use results::{CleanupResult, MigrationResult};
