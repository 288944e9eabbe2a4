//! Formbox Services Layer
//!
//! Background jobs of the file subsystem: the orphan cleanup sweep with its
//! scheduler, and the local <-> object-store migration engine. Both receive
//! their storage backend and registry explicitly; nothing here reads globals.

#[cfg(feature = "cleanup")]
pub mod cleanup;
#[cfg(feature = "migration")]
pub mod migration;

#[cfg(feature = "cleanup")]
pub use cleanup::{CleanupScheduler, CleanupService, SchedulerState};
pub use formbox_db::{FileRegistry, MemoryFileRegistry, PgFileRegistry};
pub use formbox_storage::{
    create_storage, LocalStorage, S3Storage, Storage, StorageBackend, StorageError, StorageResult,
};
#[cfg(feature = "migration")]
pub use migration::MigrationService;
