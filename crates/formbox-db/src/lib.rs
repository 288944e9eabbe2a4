//! Formbox DB Library
//!
//! Access to the file registry: the `file_records` table plus the form and
//! submission documents consulted to decide whether a file is still referenced.

pub mod db;

pub use db::{FileRegistry, MemoryFileRegistry, PgFileRegistry};
