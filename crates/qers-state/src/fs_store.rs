//! Filesystem-backed report store.
//!
//! Layout: `<root>/<kind>/<key>.json`. Every write goes to a temp file in the
//! target directory and is renamed into place, so readers only ever see a
//! complete document.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Filesystem-backed [`ReportStore`].
#[derive(Debug, Clone)]
pub struct FsReportStore {
    root: PathBuf,
}

impl FsReportStore {
    /// Create a store rooted at `root`. Creates one directory per kind.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in ReportKind::ALL {
            std::fs::create_dir_all(root.join(kind.as_str()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, kind: ReportKind, key: &str) -> PathBuf {
        self.root.join(kind.as_str()).join(format!("{key}.json"))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::Backend(format!("no parent directory for {:?}", path)))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl ReportStore for FsReportStore {
    async fn put(
        &self,
        kind: ReportKind,
        key: &str,
        value: serde_json::Value,
    ) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.document_path(kind, key);
        let bytes = serde_json::to_vec_pretty(&value)?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StorageError::Backend(format!("write task failed: {e}")))??;

        debug!(kind = %kind, key = %key, "report persisted");
        Ok(())
    }

    async fn get(&self, kind: ReportKind, key: &str) -> StorageResult<serde_json::Value> {
        validate_key(key)?;
        let path = self.document_path(kind, key);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    kind,
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn contains(&self, kind: ReportKind, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(tokio::fs::try_exists(self.document_path(kind, key)).await?)
    }

    async fn list_keys(&self, kind: ReportKind) -> StorageResult<Vec<String>> {
        let dir = self.root.join(kind.as_str());
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                if validate_key(key).is_ok() {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_store() -> (tempfile::TempDir, FsReportStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReportStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn layout_is_kind_then_key() {
        let (dir, store) = make_store();
        store
            .put(ReportKind::BatchEval, "batch_7", json!({"ok": true}))
            .await
            .unwrap();

        let path = dir.path().join("batch_eval").join("batch_7.json");
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let (dir, store) = make_store();
        for i in 0..5 {
            store
                .put(ReportKind::BatchReport, "batch_x", json!({ "rev": i }))
                .await
                .unwrap();
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("batch_report"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn list_ignores_foreign_files() {
        let (dir, store) = make_store();
        store
            .put(ReportKind::JobStatus, "batch_b", json!({}))
            .await
            .unwrap();
        store
            .put(ReportKind::JobStatus, "batch_a", json!({}))
            .await
            .unwrap();
        std::fs::write(dir.path().join("job_status").join("notes.txt"), b"x").unwrap();

        let keys = store.list_keys(ReportKind::JobStatus).await.unwrap();
        assert_eq!(keys, vec!["batch_a".to_string(), "batch_b".to_string()]);
    }

    #[tokio::test]
    async fn reopening_sees_previous_documents() {
        let (dir, store) = make_store();
        store
            .put(ReportKind::BatchReport, "batch_p", json!({"n": 3}))
            .await
            .unwrap();
        drop(store);

        let reopened = FsReportStore::new(dir.path()).unwrap();
        let value = reopened
            .get(ReportKind::BatchReport, "batch_p")
            .await
            .unwrap();
        assert_eq!(value, json!({"n": 3}));
    }
}
