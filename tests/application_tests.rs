use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use uwb_simulator::adapters::outbound::MemoryDeviceStore;
use uwb_simulator::application::{LoopState, SimulationService};
use uwb_simulator::config::StorageBackend;
use uwb_simulator::domains::{DeviceStore, SnapshotPublisher};
use uwb_simulator::{Config, DeviceKind, DeviceRecord, RegistrySnapshot, SimResult, SimulationError};

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<RegistrySnapshot>>,
    cleared: Mutex<usize>,
    shut_down: Mutex<bool>,
}

impl RecordingPublisher {
    fn ticks(&self) -> Vec<u64> {
        self.published.lock().unwrap().iter().map(|s| s.tick).collect()
    }
}

#[async_trait]
impl SnapshotPublisher for RecordingPublisher {
    async fn publish(&self, snapshot: &RegistrySnapshot) -> SimResult<()> {
        self.published.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn clear_retained(&self, _snapshot: &RegistrySnapshot) -> SimResult<()> {
        *self.cleared.lock().unwrap() += 1;
        Ok(())
    }

    async fn shutdown(&self) -> SimResult<()> {
        *self.shut_down.lock().unwrap() = true;
        Ok(())
    }
}

struct FailingPublisher;

#[async_trait]
impl SnapshotPublisher for FailingPublisher {
    async fn publish(&self, _snapshot: &RegistrySnapshot) -> SimResult<()> {
        Err(SimulationError::Transport("broker unreachable".to_string()))
    }

    async fn clear_retained(&self, _snapshot: &RegistrySnapshot) -> SimResult<()> {
        Err(SimulationError::Transport("broker unreachable".to_string()))
    }

    async fn shutdown(&self) -> SimResult<()> {
        Ok(())
    }
}

struct HangingPublisher;

#[async_trait]
impl SnapshotPublisher for HangingPublisher {
    async fn publish(&self, _snapshot: &RegistrySnapshot) -> SimResult<()> {
        std::future::pending().await
    }

    async fn clear_retained(&self, _snapshot: &RegistrySnapshot) -> SimResult<()> {
        std::future::pending().await
    }

    async fn shutdown(&self) -> SimResult<()> {
        Ok(())
    }
}

struct BrokenStore;

#[async_trait]
impl DeviceStore for BrokenStore {
    async fn load_devices(&self, _kind: DeviceKind, _limit: usize) -> SimResult<Vec<DeviceRecord>> {
        Err(SimulationError::Persistence("database is locked".to_string()))
    }

    async fn save_devices(&self, _records: &[DeviceRecord]) -> SimResult<()> {
        Err(SimulationError::Persistence("database is locked".to_string()))
    }

    async fn clear(&self) -> SimResult<()> {
        Err(SimulationError::Persistence("database is locked".to_string()))
    }
}

fn test_config(seed: u64) -> Config {
    let mut config = Config::default();
    config.simulation.seed = Some(seed);
    config.simulation.num_anchors = 4;
    config.simulation.num_tags = 2;
    config.simulation.update_interval_secs = 0.01;
    config.storage.backend = StorageBackend::Memory;
    config
}

fn service(
    config: Config,
    store: &MemoryDeviceStore,
    publisher: Arc<dyn SnapshotPublisher>,
) -> SimulationService {
    let store: Arc<dyn DeviceStore> = Arc::new(store.clone());
    SimulationService::new(config, store, publisher).unwrap()
}

fn identities(snapshot: &[uwb_simulator::DeviceRecord]) -> Vec<(String, String)> {
    snapshot
        .iter()
        .map(|d| (d.name.clone(), d.mac_address.clone()))
        .collect()
}

#[tokio::test]
async fn test_start_publishes_and_persists_tick_zero() {
    let store = MemoryDeviceStore::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let mut sim = service(test_config(1), &store, publisher.clone());
    assert_eq!(sim.state(), LoopState::Uninitialized);

    let report = sim.start().await.unwrap();
    assert_eq!(report.created, 6);
    assert_eq!(sim.state(), LoopState::Running);
    assert_eq!(publisher.ticks(), vec![0]);
    assert_eq!(store.records().await.len(), 6);
    assert_eq!(*publisher.cleared.lock().unwrap(), 0);

    // A second start is refused.
    assert!(sim.start().await.is_err());
}

#[tokio::test]
async fn test_snapshots_are_published_in_tick_order() {
    let store = MemoryDeviceStore::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let mut sim = service(test_config(2), &store, publisher.clone());
    sim.start().await.unwrap();

    for expected in 1..=5 {
        let report = sim.step().await.unwrap();
        assert_eq!(report.tick, expected);
        assert!(report.published);
        assert_eq!(report.persisted, Some(true));
    }
    assert_eq!(publisher.ticks(), vec![0, 1, 2, 3, 4, 5]);

    sim.stop().await.unwrap();
    assert_eq!(sim.state(), LoopState::Stopped);
    assert!(*publisher.shut_down.lock().unwrap());
    assert!(sim.step().await.is_err());
}

#[tokio::test]
async fn test_checkpoints_follow_configured_cadence() {
    let mut config = test_config(3);
    config.storage.checkpoint_every = 3;
    let store = MemoryDeviceStore::new();
    let mut sim = service(config, &store, Arc::new(RecordingPublisher::default()));
    sim.start().await.unwrap();

    let persisted: Vec<_> = {
        let mut out = Vec::new();
        for _ in 0..6 {
            out.push(sim.step().await.unwrap().persisted);
        }
        out
    };
    assert_eq!(
        persisted,
        vec![None, None, Some(true), None, None, Some(true)]
    );
}

#[tokio::test]
async fn test_failing_publisher_does_not_stop_ticks() {
    let mut config = test_config(4);
    config.mqtt.clear_retained_on_start = true;
    let store = MemoryDeviceStore::new();
    let mut sim = service(config, &store, Arc::new(FailingPublisher));
    sim.start().await.unwrap();

    for expected in 1..=3 {
        let report = sim.step().await.unwrap();
        assert_eq!(report.tick, expected);
        assert!(!report.published);
        assert_eq!(report.persisted, Some(true));
    }
    assert_eq!(sim.registry().tick(), 3);
}

#[tokio::test]
async fn test_clear_retained_on_start() {
    let mut config = test_config(5);
    config.mqtt.clear_retained_on_start = true;
    let publisher = Arc::new(RecordingPublisher::default());
    let mut sim = service(config, &MemoryDeviceStore::new(), publisher.clone());
    sim.start().await.unwrap();
    assert_eq!(*publisher.cleared.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_restart_restores_devices_from_store() {
    let store = MemoryDeviceStore::new();
    let mut first = service(test_config(6), &store, Arc::new(RecordingPublisher::default()));
    first.start().await.unwrap();
    for _ in 0..4 {
        first.step().await.unwrap();
    }
    first.stop().await.unwrap();
    let before = first.registry().records();

    let mut second = service(test_config(7), &store, Arc::new(RecordingPublisher::default()));
    let report = second.start().await.unwrap();
    assert_eq!(report.loaded, 6);
    assert_eq!(report.created, 0);

    let after = second.registry().records();
    assert_eq!(identities(&before), identities(&after));
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.position, new.position);
        assert_eq!(old.created_at, new.created_at);
    }
}

#[tokio::test]
async fn test_regenerate_positions_keeps_identities() {
    let store = MemoryDeviceStore::new();
    let mut first = service(test_config(8), &store, Arc::new(RecordingPublisher::default()));
    first.start().await.unwrap();
    first.stop().await.unwrap();
    let before = first.registry().records();

    let mut config = test_config(9);
    config.simulation.regenerate_positions = true;
    let mut second = service(config, &store, Arc::new(RecordingPublisher::default()));
    second.start().await.unwrap();
    let after = second.registry().records();

    assert_eq!(identities(&before), identities(&after));
    assert!(before.iter().zip(&after).all(|(old, new)| old.position != new.position));
}

#[tokio::test]
async fn test_regenerate_identities_replaces_macs() {
    let store = MemoryDeviceStore::new();
    let mut first = service(test_config(10), &store, Arc::new(RecordingPublisher::default()));
    first.start().await.unwrap();
    first.stop().await.unwrap();
    let old_macs: Vec<String> = first
        .registry()
        .records()
        .into_iter()
        .map(|d| d.mac_address)
        .collect();

    let mut config = test_config(11);
    config.simulation.regenerate_identities = true;
    let mut second = service(config, &store, Arc::new(RecordingPublisher::default()));
    let report = second.start().await.unwrap();
    assert_eq!(report.loaded, 0);
    assert_eq!(report.created, 6);

    for device in second.registry().records() {
        assert!(!old_macs.contains(&device.mac_address));
    }
    // Old devices are gone from the store; only the new population remains.
    assert_eq!(store.records().await.len(), 6);
}

#[tokio::test]
async fn test_run_exits_when_shutdown_is_raised() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut sim = service(test_config(12), &MemoryDeviceStore::new(), publisher.clone());
    sim.start().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        // Keep the sender alive until the loop has seen the flag.
        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    sim.run(shutdown_rx).await.unwrap();
    stopper.await.unwrap();
    sim.stop().await.unwrap();

    let ticks = publisher.ticks();
    assert!(ticks.len() > 1);
    assert!(ticks.windows(2).all(|w| w[1] == w[0] + 1));
}

#[test]
fn test_invalid_config_is_rejected_before_start() {
    let mut config = test_config(13);
    config.simulation.num_tags = 0;
    let store: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
    let err = SimulationService::new(config, store, Arc::new(FailingPublisher))
        .err()
        .unwrap();
    assert!(matches!(err, SimulationError::Configuration(_)));
}

#[tokio::test]
async fn test_unreadable_store_falls_back_to_fresh_devices() {
    let config = test_config(14);
    let expected = config.simulation.num_anchors + config.simulation.num_tags;
    let publisher = Arc::new(RecordingPublisher::default());
    let mut sim = SimulationService::new(config, Arc::new(BrokenStore), publisher.clone()).unwrap();

    let report = sim.start().await.unwrap();
    assert_eq!(report.loaded, 0);
    assert_eq!(report.created, expected);
    assert_eq!(sim.state(), LoopState::Running);

    let tick = sim.step().await.unwrap();
    assert!(tick.published);
    assert_eq!(tick.persisted, Some(false));
    assert_eq!(publisher.ticks(), vec![0, 1]);
    sim.stop().await.unwrap();
}

#[tokio::test]
async fn test_hung_publisher_is_bounded_by_io_timeout() {
    let mut config = test_config(15);
    config.simulation.io_timeout_ms = 50;
    let store = MemoryDeviceStore::new();
    let mut sim = service(config, &store, Arc::new(HangingPublisher));
    sim.start().await.unwrap();

    let started = Instant::now();
    let report = sim.step().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.tick, 1);
    assert!(!report.published);
    assert_eq!(report.persisted, Some(true));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(1), "step took {:?}", elapsed);
}

#[tokio::test]
async fn test_hung_publisher_and_broken_store_still_tick() {
    let mut config = test_config(16);
    config.simulation.io_timeout_ms = 50;
    let mut sim =
        SimulationService::new(config, Arc::new(BrokenStore), Arc::new(HangingPublisher)).unwrap();
    sim.start().await.unwrap();

    for expected in 1..=2 {
        let report = sim.step().await.unwrap();
        assert_eq!(report.tick, expected);
        assert!(!report.published);
        assert_eq!(report.persisted, Some(false));
    }
}
