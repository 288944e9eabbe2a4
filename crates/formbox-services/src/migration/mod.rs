//! Bulk copy between the local filesystem backend and an object store.

mod service;

pub use service::MigrationService;
