// Postgres EntityStore.
//
// Records are stored whole as JSONB; the single-record transactional contract
// is met with `SELECT ... FOR UPDATE` inside a transaction, so concurrent
// `update_comment` calls on the same id serialize at the row lock.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use backfeed_common::{BackfeedError, Comment, CommentId, Source, SourceId};

use crate::{CommentTxn, EntityStore, Result};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(store_err)?;
        Ok(Self::new(pool))
    }

    /// Idempotent schema migration, run once at startup.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS comments_source_idx ON comments (source_id)")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS comments_status_idx ON comments (status)")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        info!("Store migration complete");
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn get_source(&self, id: &SourceId) -> Result<Option<Source>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT data FROM sources WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(|(data,)| serde_json::from_value(data).map_err(store_err))
            .transpose()
    }

    async fn put_source(&self, source: &Source) -> Result<()> {
        let data = serde_json::to_value(source).map_err(store_err)?;
        sqlx::query(
            r#"
            INSERT INTO sources (id, data) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(source.id.as_str())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT data FROM sources ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|(data,)| serde_json::from_value(data).map_err(store_err))
            .collect()
    }

    async fn get_comment(&self, id: &CommentId) -> Result<Option<Comment>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT data FROM comments WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(|(data,)| serde_json::from_value(data).map_err(store_err))
            .transpose()
    }

    async fn create_comment_if_absent(&self, comment: &Comment) -> Result<bool> {
        let data = serde_json::to_value(comment).map_err(store_err)?;
        let result = sqlx::query(
            r#"
            INSERT INTO comments (id, source_id, status, data, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(comment.id.as_str())
        .bind(comment.source.as_str())
        .bind(comment.status.to_string())
        .bind(data)
        .bind(comment.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_comment(&self, id: &CommentId, txn: CommentTxn) -> Result<Option<Comment>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT data FROM comments WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let current: Option<Comment> = row
            .map(|(data,)| serde_json::from_value(data).map_err(store_err))
            .transpose()?;

        // A closure error aborts: the transaction is dropped uncommitted.
        match txn(current.clone())? {
            Some(updated) => {
                let data = serde_json::to_value(&updated).map_err(store_err)?;
                sqlx::query(
                    r#"
                    INSERT INTO comments (id, source_id, status, data, created_at)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data
                    "#,
                )
                .bind(updated.id.as_str())
                .bind(updated.source.as_str())
                .bind(updated.status.to_string())
                .bind(data)
                .bind(updated.created_at)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
                tx.commit().await.map_err(store_err)?;
                Ok(Some(updated))
            }
            None => {
                tx.commit().await.map_err(store_err)?;
                Ok(current)
            }
        }
    }
}

fn store_err(e: impl std::fmt::Display) -> BackfeedError {
    BackfeedError::Store(e.to_string())
}
