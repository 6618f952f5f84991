//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM. Supports both SQLite and PostgreSQL
//! backends.

pub mod context;
pub mod document;
pub mod models;
pub mod pool;
pub mod util;

pub use context::DbContext;
pub use document::{ApplyOutcome, DocumentRepository, Resolution};
pub use pool::{DbError, DbPool};
