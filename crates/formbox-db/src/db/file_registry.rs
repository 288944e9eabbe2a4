//! Postgres file registry: reads and deletes `file_records`, reference checks
//! over `forms` and `submissions`.

use async_trait::async_trait;
use formbox_core::{AppError, FileRecord};
use sqlx::{PgPool, Postgres};

use super::{like_pattern, FileRegistry};

#[derive(Clone)]
pub struct PgFileRegistry {
    pool: PgPool,
}

impl PgFileRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small pool; the registry is only used by background jobs.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl FileRegistry for PgFileRegistry {
    #[tracing::instrument(skip(self), fields(db.table = "file_records"))]
    async fn list_all(&self) -> Result<Vec<FileRecord>, AppError> {
        let records = sqlx::query_as::<Postgres, FileRecord>(
            r#"
            SELECT id, owner_id, filename, mime_type, size,
                   COALESCE(path, '') AS path,
                   COALESCE(url, '') AS url,
                   created_at
            FROM file_records
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(count = records.len(), "Loaded file records");
        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "file_records", db.record_id = %id))]
    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM file_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn is_referenced(&self, needle: &str) -> Result<bool, AppError> {
        if needle.is_empty() {
            return Ok(false);
        }

        let referenced: bool = sqlx::query_scalar::<Postgres, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM forms
                WHERE settings::text LIKE $1 ESCAPE '\'
                   OR fields::text LIKE $1 ESCAPE '\'
            ) OR EXISTS (
                SELECT 1 FROM submissions
                WHERE data::text LIKE $1 ESCAPE '\'
            )
            "#,
        )
        .bind(like_pattern(needle))
        .fetch_one(&self.pool)
        .await?;

        Ok(referenced)
    }
}
