//! In-memory report store
//!
//! Process-wide state for the daemon and the substitute store for tests.
//! Values are kept behind `Arc` so a reader clones a fully-built document
//! published by a single map insert.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

type Shelves = HashMap<ReportKind, BTreeMap<String, Arc<serde_json::Value>>>;

/// In-memory store backed by a `HashMap<kind, BTreeMap<key, value>>`.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    shelves: RwLock<Shelves>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values across every kind.
    pub fn len(&self) -> usize {
        self.read()
            .map(|s| s.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Shelves>> {
        self.shelves
            .read()
            .map_err(|_| StorageError::Backend("report store lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Shelves>> {
        self.shelves
            .write()
            .map_err(|_| StorageError::Backend("report store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn put(
        &self,
        kind: ReportKind,
        key: &str,
        value: serde_json::Value,
    ) -> StorageResult<()> {
        validate_key(key)?;
        let value = Arc::new(value);
        let mut shelves = self.write()?;
        shelves
            .entry(kind)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, kind: ReportKind, key: &str) -> StorageResult<serde_json::Value> {
        validate_key(key)?;
        let shelves = self.read()?;
        shelves
            .get(&kind)
            .and_then(|shelf| shelf.get(key))
            .map(|v| v.as_ref().clone())
            .ok_or_else(|| StorageError::NotFound {
                kind,
                key: key.to_string(),
            })
    }

    async fn contains(&self, kind: ReportKind, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let shelves = self.read()?;
        Ok(shelves
            .get(&kind)
            .map(|shelf| shelf.contains_key(key))
            .unwrap_or(false))
    }

    async fn list_keys(&self, kind: ReportKind) -> StorageResult<Vec<String>> {
        let shelves = self.read()?;
        Ok(shelves
            .get(&kind)
            .map(|shelf| shelf.keys().cloned().collect())
            .unwrap_or_default())
    }
}
