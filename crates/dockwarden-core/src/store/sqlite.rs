//! SQLite-backed implementation of [`super::Store`].

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::CoreError;

use super::{RawRecord, Store};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed bucketed store.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Wrap an existing pool (e.g. an in-memory pool set up by a test).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories if needed, connects with sensible pool defaults,
    /// and runs migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::fatal(format!("failed to create directory {parent:?}: {e}"))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::fatal(format!("failed to connect to sqlite at {path:?}: {e}")))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::fatal(format!("failed to run migrations: {e}")))?;

        Ok(Self { pool })
    }

    /// Create an in-memory store, migrated and ready to use. Handy for tests.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CoreError::fatal(format!("failed to open in-memory sqlite: {e}")))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::fatal(format!("failed to run migrations: {e}")))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqlitePersistence {
    async fn put_raw(&self, bucket: &str, key: &str, value: Vec<u8>) -> crate::error::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO buckets (bucket, key, value, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(bucket, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_raw(&self, bucket: &str, key: &str) -> crate::error::Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM buckets WHERE bucket = ? AND key = ?")
                .bind(bucket)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn delete(&self, bucket: &str, key: &str) -> crate::error::Result<()> {
        sqlx::query("DELETE FROM buckets WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_raw(&self, bucket: &str) -> crate::error::Result<Vec<RawRecord>> {
        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT key, value FROM buckets WHERE bucket = ? ORDER BY key ASC")
                .bind(bucket)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(key, value)| RawRecord { key, value })
            .collect())
    }

    async fn append_raw(&self, bucket: &str, value: Vec<u8>) -> crate::error::Result<String> {
        let key = uuid::Uuid::new_v4().to_string();
        self.put_raw(bucket, &key, value).await?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{buckets, StoreExt};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let widget = Widget {
            name: "gizmo".into(),
            count: 3,
        };
        store.put(buckets::SETTINGS, "gizmo", &widget).await.unwrap();

        let fetched: Option<Widget> = store.get(buckets::SETTINGS, "gizmo").await.unwrap();
        assert_eq!(fetched, Some(widget));
    }

    #[tokio::test]
    async fn put_is_upsert() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        store
            .put(buckets::QUEUE, "web", &Widget { name: "a".into(), count: 1 })
            .await
            .unwrap();
        store
            .put(buckets::QUEUE, "web", &Widget { name: "b".into(), count: 2 })
            .await
            .unwrap();

        let all: Vec<(String, Widget)> = store.list(buckets::QUEUE).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1.name, "b");
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        store
            .put(buckets::QUEUE, "web", &Widget { name: "a".into(), count: 1 })
            .await
            .unwrap();
        store.delete(buckets::QUEUE, "web").await.unwrap();

        let fetched: Option<Widget> = store.get(buckets::QUEUE, "web").await.unwrap();
        assert_eq!(fetched, None);
    }

    #[tokio::test]
    async fn buckets_are_isolated() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        store
            .put(buckets::QUEUE, "k", &Widget { name: "queue".into(), count: 1 })
            .await
            .unwrap();
        store
            .put(buckets::HISTORY, "k", &Widget { name: "history".into(), count: 2 })
            .await
            .unwrap();

        let from_queue: Option<Widget> = store.get(buckets::QUEUE, "k").await.unwrap();
        let from_history: Option<Widget> = store.get(buckets::HISTORY, "k").await.unwrap();
        assert_eq!(from_queue.unwrap().name, "queue");
        assert_eq!(from_history.unwrap().name, "history");
    }
}
