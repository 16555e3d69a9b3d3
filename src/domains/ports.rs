use async_trait::async_trait;

use crate::common::{DeviceKind, DeviceRecord, RegistrySnapshot, SimResult};

/// Port for durable device state (SQLite, JSON file, memory).
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Up to `limit` records of the given kind, ordered by name.
    async fn load_devices(&self, kind: DeviceKind, limit: usize) -> SimResult<Vec<DeviceRecord>>;

    /// Upsert by MAC address.
    async fn save_devices(&self, records: &[DeviceRecord]) -> SimResult<()>;

    /// Forget every stored device.
    async fn clear(&self) -> SimResult<()>;
}

/// Port for the external messaging representation of a tick.
#[async_trait]
pub trait SnapshotPublisher: Send + Sync {
    async fn publish(&self, snapshot: &RegistrySnapshot) -> SimResult<()>;

    /// Remove retained state left behind by a previous run.
    async fn clear_retained(&self, snapshot: &RegistrySnapshot) -> SimResult<()>;

    async fn shutdown(&self) -> SimResult<()>;
}
