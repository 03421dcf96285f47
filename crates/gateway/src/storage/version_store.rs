// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Version Repository (C2): per-(device, version) install history.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::RwLock;

use crate::domain::VersionRecord;
use crate::storage::error::StoreError;

const VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("versions");

fn key(device_uuid: &str, version: &str) -> String {
    format!("{device_uuid}\u{0}{version}")
}

#[async_trait]
pub trait VersionStore: Send + Sync + 'static {
    /// Insert a `(device_uuid, version)` record. No-op if the pair already exists.
    async fn insert_if_absent(
        &self,
        device_uuid: &str,
        version: &str,
        installed_at: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn list_by_device(&self, device_uuid: &str) -> Result<Vec<VersionRecord>, StoreError>;
}

#[derive(Clone)]
pub struct RedbVersionStore {
    db: Arc<Database>,
}

impl RedbVersionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        let db = Database::create(path).map_err(|e| StoreError::Internal(e.to_string()))?;
        {
            let wtxn = db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
            wtxn.open_table(VERSIONS).map_err(|e| StoreError::Internal(e.to_string()))?;
            wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl VersionStore for RedbVersionStore {
    async fn insert_if_absent(
        &self,
        device_uuid: &str,
        version: &str,
        installed_at: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let k = key(device_uuid, version);
        let wtxn = self.db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
        {
            let mut table =
                wtxn.open_table(VERSIONS).map_err(|e| StoreError::Internal(e.to_string()))?;
            if table.get(k.as_str()).map_err(|e| StoreError::Internal(e.to_string()))?.is_some() {
                return Ok(());
            }
            let record = VersionRecord {
                device_uuid: device_uuid.to_owned(),
                version: version.to_owned(),
                installed_at,
            };
            let bytes = serde_json::to_vec(&record)?;
            table
                .insert(k.as_str(), bytes.as_slice())
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn list_by_device(&self, device_uuid: &str) -> Result<Vec<VersionRecord>, StoreError> {
        let rtxn = self.db.begin_read().map_err(|e| StoreError::Internal(e.to_string()))?;
        let table = rtxn.open_table(VERSIONS).map_err(|e| StoreError::Internal(e.to_string()))?;
        let prefix = format!("{device_uuid}\u{0}");
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| StoreError::Internal(e.to_string()))? {
            let (k, v) = entry.map_err(|e| StoreError::Internal(e.to_string()))?;
            if k.value().starts_with(&prefix) {
                out.push(serde_json::from_slice(v.value())?);
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryVersionStore {
    records: RwLock<HashMap<String, VersionRecord>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn insert_if_absent(
        &self,
        device_uuid: &str,
        version: &str,
        installed_at: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.entry(key(device_uuid, version)).or_insert_with(|| VersionRecord {
            device_uuid: device_uuid.to_owned(),
            version: version.to_owned(),
            installed_at,
        });
        Ok(())
    }

    async fn list_by_device(&self, device_uuid: &str) -> Result<Vec<VersionRecord>, StoreError> {
        let prefix = format!("{device_uuid}\u{0}");
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }
}
