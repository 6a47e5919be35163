//! Document store
//!
//! A logical document store over SQLite: one table keyed by
//! `(collection, id)` with a JSON body. Collection names are resolved per
//! league by the caller; the store itself is league-agnostic.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use courtside_types::{CourtsideError, Result};

/// SQLite-backed document store.
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .map_err(|e| CourtsideError::Database(format!("Failed to connect to database: {}", e)))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps the database
    /// alive and shared.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CourtsideError::Database(format!("Failed to open in-memory db: {}", e)))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        Self::connect(&url).await
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CourtsideError::Database(format!("Failed to create documents table: {}", e)))?;
        Ok(())
    }

    /// Upsert a raw JSON document.
    pub async fn put(&self, collection: &str, id: &str, body: &Value) -> Result<()> {
        let encoded = serde_json::to_string(body)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (collection, id)
            DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(encoded)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| CourtsideError::Database(format!("Failed to upsert document: {}", e)))?;
        Ok(())
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CourtsideError::Database(format!("Failed to fetch document: {}", e)))?;
        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CourtsideError::Database(format!("Failed to delete document: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    /// All documents in a collection, in insertion-id order.
    pub async fn list(&self, collection: &str) -> Result<Vec<Value>> {
        let rows = sqlx::query("SELECT body FROM documents WHERE collection = ?1 ORDER BY id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CourtsideError::Database(format!("Failed to list documents: {}", e)))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.get("body");
            out.push(serde_json::from_str(&body)?);
        }
        Ok(out)
    }

    pub async fn count(&self, collection: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM documents WHERE collection = ?1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CourtsideError::Database(format!("Failed to count documents: {}", e)))?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Typed upsert.
    pub async fn put_doc<T: Serialize>(&self, collection: &str, id: &str, doc: &T) -> Result<()> {
        self.put(collection, id, &serde_json::to_value(doc)?).await
    }

    /// Typed fetch.
    pub async fn get_doc<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        match self.get(collection, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Typed scan. Documents that fail to decode are skipped with a
    /// warning rather than failing the whole scan.
    pub async fn list_docs<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let values = self.list(collection).await?;
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_value(value) {
                Ok(doc) => out.push(doc),
                Err(e) => tracing::warn!(collection, error = %e, "skipping undecodable document"),
            }
        }
        Ok(out)
    }

    /// Merge a JSON object patch into an existing document (creating it if
    /// absent). Only top-level fields are replaced.
    pub async fn merge(&self, collection: &str, id: &str, patch: &Value) -> Result<()> {
        let mut doc = self
            .get(collection, id)
            .await?
            .unwrap_or_else(|| Value::Object(Default::default()));
        if let (Some(target), Some(fields)) = (doc.as_object_mut(), patch.as_object()) {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }
        self.put(collection, id, &doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = DocumentStore::in_memory().await.unwrap();
        store
            .put("games", "g1", &json!({"game_id": "g1", "home": "BOS"}))
            .await
            .unwrap();
        let doc = store.get("games", "g1").await.unwrap().unwrap();
        assert_eq!(doc["home"], "BOS");
        assert!(store.get("games", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_body() {
        let store = DocumentStore::in_memory().await.unwrap();
        store.put("c", "id", &json!({"v": 1})).await.unwrap();
        store.put("c", "id", &json!({"v": 2})).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 1);
        assert_eq!(store.get("c", "id").await.unwrap().unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn merge_patches_top_level_fields() {
        let store = DocumentStore::in_memory().await.unwrap();
        store.put("c", "id", &json!({"a": 1, "b": 1})).await.unwrap();
        store.merge("c", "id", &json!({"b": 2, "c": 3})).await.unwrap();
        let doc = store.get("c", "id").await.unwrap().unwrap();
        assert_eq!(doc["a"], 1);
        assert_eq!(doc["b"], 2);
        assert_eq!(doc["c"], 3);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = DocumentStore::in_memory().await.unwrap();
        store.put("a", "id", &json!({"v": 1})).await.unwrap();
        store.put("b", "id", &json!({"v": 2})).await.unwrap();
        assert_eq!(store.list("a").await.unwrap().len(), 1);
        assert!(store.delete("a", "id").await.unwrap());
        assert_eq!(store.list("a").await.unwrap().len(), 0);
        assert_eq!(store.list("b").await.unwrap().len(), 1);
    }
}
