use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

use crate::common::{DeviceKind, DeviceRecord, SimResult, SimulationError};
use crate::domains::DeviceStore;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    devices: Vec<DeviceRecord>,
}

/// All devices in a single JSON document.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write leaves the previous checkpoint intact.
pub struct JsonFileDeviceStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileDeviceStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_document(&self) -> SimResult<StoreDocument> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(StoreDocument::default());
        }

        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SimulationError::Persistence(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SimulationError::Persistence(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    async fn write_document(&self, document: &StoreDocument) -> SimResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SimulationError::Persistence(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let content = serde_json::to_string_pretty(document)
            .map_err(|e| SimulationError::Persistence(format!("Failed to serialize devices: {}", e)))?;

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await.map_err(|e| {
            SimulationError::Persistence(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            SimulationError::Persistence(format!("Failed to replace {}: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl DeviceStore for JsonFileDeviceStore {
    async fn load_devices(&self, kind: DeviceKind, limit: usize) -> SimResult<Vec<DeviceRecord>> {
        let mut devices: Vec<DeviceRecord> = self
            .read_document()
            .await?
            .devices
            .into_iter()
            .filter(|d| d.kind == kind)
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices.truncate(limit);
        Ok(devices)
    }

    async fn save_devices(&self, records: &[DeviceRecord]) -> SimResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut by_mac: BTreeMap<String, DeviceRecord> = self
            .read_document()
            .await?
            .devices
            .into_iter()
            .map(|d| (d.mac_address.clone(), d))
            .collect();
        for record in records {
            by_mac.insert(record.mac_address.clone(), record.clone());
        }

        let document = StoreDocument {
            devices: by_mac.into_values().collect(),
        };
        self.write_document(&document).await?;
        debug!(count = records.len(), path = %self.path.display(), "Saved devices to JSON file");
        Ok(())
    }

    async fn clear(&self) -> SimResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_document(&StoreDocument::default()).await
    }
}
