//! Database context for managing the connection pool and repository access.
//!
//! Create one context per command, then use it to reach the repositories.
//!
//! # Example
//! ```ignore
//! let ctx = DbContext::from_url(&settings.database_url())?;
//! let claimed = ctx.documents().claim_for_extraction(now, stale, None).await?;
//! ```

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::document::DocumentRepository;
use super::pool::{DbError, DbPool, SqlitePool};
use crate::with_conn_split;

#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context for a SQLite database file.
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: DbPool::Sqlite(SqlitePool::from_path(db_path)),
        }
    }

    /// Create a context from a database URL (SQLite path/URL or PostgreSQL URL).
    pub fn from_url(database_url: &str) -> Result<Self, DbError> {
        Ok(Self {
            pool: DbPool::from_url(database_url)?,
        })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn documents(&self) -> DocumentRepository {
        DocumentRepository::new(self.pool.clone())
    }

    /// Create the pipeline tables if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        with_conn_split!(self.pool,
            sqlite: conn => {
                conn.batch_execute(SQLITE_SCHEMA).await
            },
            postgres: conn => {
                conn.batch_execute(POSTGRES_SCHEMA).await
            }
        )
    }
}

const SQLITE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_num TEXT NOT NULL UNIQUE,
        source_url TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'new',
        page_count INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status, updated_at);

    CREATE TABLE IF NOT EXISTS pages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id INTEGER NOT NULL REFERENCES documents(id),
        page_number INTEGER NOT NULL,
        text TEXT NOT NULL,
        word_count INTEGER NOT NULL,
        UNIQUE(document_id, page_number)
    );

    CREATE TABLE IF NOT EXISTS queues (
        name TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS queue_messages (
        id TEXT PRIMARY KEY,
        queue_name TEXT NOT NULL REFERENCES queues(name),
        body TEXT NOT NULL,
        visible_at TEXT NOT NULL,
        receive_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_queue_messages_visible ON queue_messages(queue_name, visible_at);
"#;

#[cfg(feature = "postgres")]
const POSTGRES_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id BIGSERIAL PRIMARY KEY,
        external_num TEXT NOT NULL UNIQUE,
        source_url TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'new',
        page_count INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status, updated_at);

    CREATE TABLE IF NOT EXISTS pages (
        id BIGSERIAL PRIMARY KEY,
        document_id BIGINT NOT NULL REFERENCES documents(id),
        page_number INTEGER NOT NULL,
        text TEXT NOT NULL,
        word_count INTEGER NOT NULL,
        UNIQUE(document_id, page_number)
    );

    CREATE TABLE IF NOT EXISTS queues (
        name TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS queue_messages (
        id TEXT PRIMARY KEY,
        queue_name TEXT NOT NULL REFERENCES queues(name),
        body TEXT NOT NULL,
        visible_at TEXT NOT NULL,
        receive_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_queue_messages_visible ON queue_messages(queue_name, visible_at);
"#;
