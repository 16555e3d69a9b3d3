use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::common::{DeviceKind, DeviceRecord, SimResult};
use crate::domains::DeviceStore;

/// Process-local store. Clones share the same records, which lets tests
/// simulate a restart by handing a clone to a second simulation.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeviceStore {
    records: Arc<Mutex<BTreeMap<String, DeviceRecord>>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored records, ordered by MAC address.
    pub async fn records(&self) -> Vec<DeviceRecord> {
        self.records.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn load_devices(&self, kind: DeviceKind, limit: usize) -> SimResult<Vec<DeviceRecord>> {
        let mut devices: Vec<DeviceRecord> = self
            .records
            .lock()
            .await
            .values()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices.truncate(limit);
        Ok(devices)
    }

    async fn save_devices(&self, records: &[DeviceRecord]) -> SimResult<()> {
        let mut stored = self.records.lock().await;
        for record in records {
            stored.insert(record.mac_address.clone(), record.clone());
        }
        Ok(())
    }

    async fn clear(&self) -> SimResult<()> {
        self.records.lock().await.clear();
        Ok(())
    }
}
