//! SurrealDB-backed report store
//!
//! One table per [`ReportKind`], one record per key. Documents are stored as
//! serialized JSON text in a `payload` field so that float and null values
//! come back exactly as they were written.

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::*;

const NAMESPACE: &str = "qers";
const DATABASE: &str = "reports";

#[derive(Debug, Deserialize)]
struct PayloadRow {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct KeyRow {
    key: String,
}

/// SurrealDB-backed implementation of [`ReportStore`].
pub struct SurrealReportStore {
    db: Surreal<Any>,
}

impl SurrealReportStore {
    /// Connect to an in-memory database (`mem://`).
    pub async fn in_memory() -> StorageResult<Self> {
        let store = Self::connect("mem://").await?;
        info!("SurrealReportStore connected (in-memory)");
        Ok(store)
    }

    /// Open (or create) an on-disk SurrealKV database at `path`.
    pub async fn open_local(path: impl AsRef<std::path::Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| {
            StorageError::Connection(format!(
                "failed to create database directory {}: {}",
                path.display(),
                e
            ))
        })?;
        let url = format!("surrealkv://{}", path.display());
        let store = Self::connect(&url).await?;
        info!("SurrealReportStore connected ({})", url);
        Ok(store)
    }

    /// Connect to any endpoint understood by `surrealdb::engine::any`.
    pub async fn connect(endpoint: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| StorageError::Connection(format!("failed to connect to {endpoint}: {e}")))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(Self { db })
    }
}

#[async_trait]
impl ReportStore for SurrealReportStore {
    async fn put(
        &self,
        kind: ReportKind,
        key: &str,
        value: serde_json::Value,
    ) -> StorageResult<()> {
        validate_key(key)?;
        let payload = serde_json::to_string(&value)?;

        self.db
            .query("UPSERT type::thing($tb, $key) CONTENT { key: $key, payload: $payload }")
            .bind(("tb", kind.as_str()))
            .bind(("key", key.to_string()))
            .bind(("payload", payload))
            .await?
            .check()?;

        debug!(kind = %kind, key = %key, "report upserted");
        Ok(())
    }

    async fn get(&self, kind: ReportKind, key: &str) -> StorageResult<serde_json::Value> {
        validate_key(key)?;

        let mut res = self
            .db
            .query("SELECT payload FROM type::thing($tb, $key)")
            .bind(("tb", kind.as_str()))
            .bind(("key", key.to_string()))
            .await?;
        let rows: Vec<PayloadRow> = res.take(0)?;

        let row = rows.into_iter().next().ok_or_else(|| StorageError::NotFound {
            kind,
            key: key.to_string(),
        })?;
        Ok(serde_json::from_str(&row.payload)?)
    }

    async fn contains(&self, kind: ReportKind, key: &str) -> StorageResult<bool> {
        validate_key(key)?;

        let mut res = self
            .db
            .query("SELECT key FROM type::thing($tb, $key)")
            .bind(("tb", kind.as_str()))
            .bind(("key", key.to_string()))
            .await?;
        let rows: Vec<KeyRow> = res.take(0)?;
        Ok(!rows.is_empty())
    }

    async fn list_keys(&self, kind: ReportKind) -> StorageResult<Vec<String>> {
        let mut res = self
            .db
            .query("SELECT key FROM type::table($tb) ORDER BY key ASC")
            .bind(("tb", kind.as_str()))
            .await?;
        let rows: Vec<KeyRow> = res.take(0)?;
        Ok(rows.into_iter().map(|r| r.key).collect())
    }
}
