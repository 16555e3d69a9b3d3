use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::common::{RegistrySnapshot, SimResult, SimulationError};
use crate::config::Config;
use crate::domains::{
    DeviceRegistry, DeviceStore, InitReport, Regeneration, RegistrySettings, SnapshotPublisher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Running,
    Stopped,
}

/// Outcome of one tick. `persisted` is `None` when the tick was not a
/// checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub published: bool,
    pub persisted: Option<bool>,
}

/// Owns the registry and the RNG, and drives the tick loop against a store
/// and a publisher.
pub struct SimulationService {
    config: Config,
    store: Arc<dyn DeviceStore>,
    publisher: Arc<dyn SnapshotPublisher>,
    registry: DeviceRegistry,
    rng: ChaCha8Rng,
    state: LoopState,
}

impl SimulationService {
    pub fn new(
        config: Config,
        store: Arc<dyn DeviceStore>,
        publisher: Arc<dyn SnapshotPublisher>,
    ) -> SimResult<Self> {
        config.validate()?;
        let registry = DeviceRegistry::new(RegistrySettings::from_config(&config)?)?;
        let rng = match config.simulation.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Ok(Self {
            config,
            store,
            publisher,
            registry,
            rng,
            state: LoopState::Uninitialized,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the device population, checkpoint it and publish tick 0.
    pub async fn start(&mut self) -> SimResult<InitReport> {
        if self.state != LoopState::Uninitialized {
            return Err(SimulationError::Model(format!(
                "Simulation cannot start from state {:?}",
                self.state
            )));
        }

        let sim = &self.config.simulation;
        let regeneration = Regeneration {
            positions: sim.regenerate_positions,
            identities: sim.regenerate_identities,
        };
        let report = self
            .registry
            .initialize(
                sim.num_anchors,
                sim.num_tags,
                regeneration,
                self.store.as_ref(),
                &mut self.rng,
            )
            .await?;

        let snapshot = self.registry.snapshot();
        let limit = self.config.io_timeout();

        if let Err(e) = bounded(
            limit,
            SimulationError::Persistence,
            self.store.save_devices(&snapshot.devices),
        )
        .await
        {
            warn!(error = %e, "Failed to persist initial device state");
        }

        if self.config.mqtt.clear_retained_on_start {
            if let Err(e) = bounded(
                limit,
                SimulationError::Transport,
                self.publisher.clear_retained(&snapshot),
            )
            .await
            {
                warn!(error = %e, "Failed to clear retained messages");
            }
        }

        if let Err(e) = bounded(limit, SimulationError::Transport, self.publisher.publish(&snapshot)).await {
            warn!(error = %e, "Failed to publish initial snapshot");
        }

        self.state = LoopState::Running;
        info!(
            anchors = sim.num_anchors,
            tags = sim.num_tags,
            loaded = report.loaded,
            created = report.created,
            "Simulation started"
        );
        Ok(report)
    }

    /// Advance one tick, then publish and (on checkpoint ticks) persist the
    /// resulting snapshot concurrently.
    pub async fn step(&mut self) -> SimResult<TickReport> {
        if self.state != LoopState::Running {
            return Err(SimulationError::Model(format!(
                "Cannot step a simulation in state {:?}",
                self.state
            )));
        }

        let dt = self.config.simulation.update_interval_secs;
        self.registry.advance(dt, &mut self.rng)?;

        let snapshot = Arc::new(self.registry.snapshot());
        let tick = snapshot.tick;
        let checkpoint = tick % self.config.storage.checkpoint_every == 0;
        let limit = self.config.io_timeout();

        let publish = bounded(limit, SimulationError::Transport, self.publisher.publish(&snapshot));
        let persist = checkpoint_if(checkpoint, limit, self.store.as_ref(), &snapshot);
        let (published, persisted) = tokio::join!(publish, persist);

        if let Err(e) = &published {
            warn!(tick, error = %e, "Publishing snapshot failed");
        }
        if let Some(Err(e)) = &persisted {
            warn!(tick, error = %e, "Persisting snapshot failed");
        }

        let report = TickReport {
            tick,
            published: published.is_ok(),
            persisted: persisted.map(|r| r.is_ok()),
        };
        debug!(tick, published = report.published, persisted = ?report.persisted, "Tick complete");
        Ok(report)
    }

    /// Tick at `update_interval_secs` until the shutdown flag is raised.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> SimResult<()> {
        let mut interval = tokio::time::interval(self.config.update_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;

        while self.state == LoopState::Running {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown channel closed, stopping simulation loop");
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.step().await {
                error!(error = %e, "Simulation step failed");
                return Err(e);
            }
        }

        info!(tick = self.registry.tick(), "Simulation loop exited");
        Ok(())
    }

    /// Final checkpoint and publisher shutdown.
    pub async fn stop(&mut self) -> SimResult<()> {
        if self.state == LoopState::Stopped {
            return Ok(());
        }

        let limit = self.config.io_timeout();
        if self.state == LoopState::Running {
            let records = self.registry.records();
            match bounded(limit, SimulationError::Persistence, self.store.save_devices(&records)).await {
                Ok(()) => info!(devices = records.len(), "Final state checkpointed"),
                Err(e) => warn!(error = %e, "Final checkpoint failed"),
            }
        }

        if let Err(e) = bounded(limit, SimulationError::Transport, self.publisher.shutdown()).await {
            warn!(error = %e, "Publisher shutdown failed");
        }

        self.state = LoopState::Stopped;
        info!("Simulation stopped");
        Ok(())
    }
}

async fn checkpoint_if(
    checkpoint: bool,
    limit: Duration,
    store: &dyn DeviceStore,
    snapshot: &RegistrySnapshot,
) -> Option<SimResult<()>> {
    if !checkpoint {
        return None;
    }
    Some(bounded(limit, SimulationError::Persistence, store.save_devices(&snapshot.devices)).await)
}

async fn bounded<F>(limit: Duration, on_timeout: fn(String) -> SimulationError, fut: F) -> SimResult<()>
where
    F: Future<Output = SimResult<()>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!("timed out after {} ms", limit.as_millis()))),
    }
}
