pub mod json_file;
pub mod memory;
pub mod mqtt;
pub mod sqlite;
pub mod topics;

pub use json_file::*;
pub use memory::*;
pub use mqtt::*;
pub use sqlite::*;
pub use topics::*;

use std::sync::Arc;

use crate::common::SimResult;
use crate::config::{StorageBackend, StorageConfig};
use crate::domains::DeviceStore;

/// Builds the device store selected by `storage.backend`.
pub async fn open_store(config: &StorageConfig) -> SimResult<Arc<dyn DeviceStore>> {
    let store: Arc<dyn DeviceStore> = match config.backend {
        StorageBackend::Sqlite => Arc::new(SqliteDeviceStore::open(&config.db_path).await?),
        StorageBackend::Json => Arc::new(JsonFileDeviceStore::new(&config.json_path)),
        StorageBackend::Memory => Arc::new(MemoryDeviceStore::new()),
    };
    Ok(store)
}
