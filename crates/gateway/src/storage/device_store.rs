// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device Repository (C1): a durable keyed mapping `uuid -> Device`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::RwLock;

use crate::domain::Device;
use crate::storage::error::StoreError;

const DEVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");

/// Durable keyed store of device records.
///
/// `upsert` is a whole-row replace, atomic with respect to concurrent `get`.
#[async_trait]
pub trait DeviceStore: Send + Sync + 'static {
    async fn get(&self, uuid: &str) -> Result<Option<Device>, StoreError>;
    async fn upsert(&self, device: &Device) -> Result<(), StoreError>;
    async fn list_all(&self) -> Result<Vec<Device>, StoreError>;
}

/// Persistent device store backed by a redb database file.
#[derive(Clone)]
pub struct RedbDeviceStore {
    db: Arc<Database>,
}

impl RedbDeviceStore {
    /// Open (or create) a redb database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        let db = Database::create(path).map_err(|e| StoreError::Internal(e.to_string()))?;
        {
            let wtxn = db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
            wtxn.open_table(DEVICES).map_err(|e| StoreError::Internal(e.to_string()))?;
            wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl DeviceStore for RedbDeviceStore {
    async fn get(&self, uuid: &str) -> Result<Option<Device>, StoreError> {
        let rtxn = self.db.begin_read().map_err(|e| StoreError::Internal(e.to_string()))?;
        let table = rtxn.open_table(DEVICES).map_err(|e| StoreError::Internal(e.to_string()))?;
        match table.get(uuid).map_err(|e| StoreError::Internal(e.to_string()))? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, device: &Device) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(device)?;
        let wtxn = self.db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
        {
            let mut table =
                wtxn.open_table(DEVICES).map_err(|e| StoreError::Internal(e.to_string()))?;
            table
                .insert(device.uuid.as_str(), bytes.as_slice())
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Device>, StoreError> {
        let rtxn = self.db.begin_read().map_err(|e| StoreError::Internal(e.to_string()))?;
        let table = rtxn.open_table(DEVICES).map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| StoreError::Internal(e.to_string()))? {
            let (_k, v) = entry.map_err(|e| StoreError::Internal(e.to_string()))?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }
}

/// In-memory device store. Used when no `device_db_path` is configured, and
/// in tests.
#[derive(Default)]
pub struct MemoryDeviceStore {
    devices: RwLock<HashMap<String, Device>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get(&self, uuid: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.read().await.get(uuid).cloned())
    }

    async fn upsert(&self, device: &Device) -> Result<(), StoreError> {
        self.devices.write().await.insert(device.uuid.clone(), device.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.devices.read().await.values().cloned().collect())
    }
}
