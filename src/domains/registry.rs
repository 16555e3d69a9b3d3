use std::collections::BTreeMap;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use super::device::{Device, DeviceRole, MacAddress};
use super::movement::{MovementMode, MovementModel};
use super::ports::DeviceStore;
use super::ranging::{NoiseModel, NoiseParameters, RangingModel};
use super::targeting::TargetSelector;
use crate::common::{
    Bounds, DeviceKind, DeviceRecord, Point2D, RangingSample, RegistrySnapshot, SimResult,
    SimulationError,
};
use crate::config::Config;

/// Everything the registry needs to move tags and range them.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub bounds: Bounds,
    pub speed: f64,
    pub movement: MovementModel,
    pub targeting: TargetSelector,
    pub ranging: RangingModel,
    pub default_cluster: Option<String>,
}

impl RegistrySettings {
    pub fn from_config(config: &Config) -> SimResult<Self> {
        let bounds = config.bounds();
        let mode = if config.movement.realistic {
            MovementMode::Realistic
        } else {
            MovementMode::Teleport
        };
        let r = &config.ranging;
        let noise = NoiseModel::new(NoiseParameters {
            jitter_sigma: r.jitter_sigma,
            outlier_probability: r.outlier_probability,
            outlier_bias: r.outlier_bias,
            outlier_sigma: r.outlier_sigma,
            burst_ticks: r.burst_ticks,
        })?;

        Ok(Self {
            bounds,
            speed: config.movement.speed,
            movement: MovementModel::new(mode, config.movement.stochastic_pauses),
            targeting: TargetSelector::new(
                bounds,
                config.movement.target_offset_radius,
                config.movement.target_proximity,
            )?,
            ranging: RangingModel::new(r.scaling_factor, noise)?,
            default_cluster: config.simulation.default_cluster.clone(),
        })
    }
}

/// Which parts of stored devices are thrown away on startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Regeneration {
    pub positions: bool,
    pub identities: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitReport {
    pub loaded: usize,
    pub created: usize,
}

/// Authoritative state of every anchor and tag, keyed (and iterated) by name.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    bounds: Bounds,
    speed: f64,
    movement: MovementModel,
    targeting: TargetSelector,
    ranging_model: RangingModel,
    default_cluster: Option<String>,
    devices: BTreeMap<String, Device>,
    latest_ranging: BTreeMap<String, Vec<RangingSample>>,
    tick: u64,
}

impl DeviceRegistry {
    pub fn new(settings: RegistrySettings) -> SimResult<Self> {
        if !(settings.speed.is_finite() && settings.speed >= 0.0) {
            return Err(SimulationError::Model(format!(
                "Tag speed must not be negative, got {}",
                settings.speed
            )));
        }

        Ok(Self {
            bounds: settings.bounds,
            speed: settings.speed,
            movement: settings.movement,
            targeting: settings.targeting,
            ranging_model: settings.ranging,
            default_cluster: settings.default_cluster,
            devices: BTreeMap::new(),
            latest_ranging: BTreeMap::new(),
            tick: 0,
        })
    }

    /// Populate the registry from the store, topping up with freshly
    /// generated devices until the requested counts are met.
    pub async fn initialize<R: Rng + Send>(
        &mut self,
        num_anchors: usize,
        num_tags: usize,
        regeneration: Regeneration,
        store: &dyn DeviceStore,
        rng: &mut R,
    ) -> SimResult<InitReport> {
        if num_anchors == 0 || num_tags == 0 {
            return Err(SimulationError::Configuration(format!(
                "Device counts must be positive (anchors: {}, tags: {})",
                num_anchors, num_tags
            )));
        }

        self.devices.clear();
        self.latest_ranging.clear();
        self.tick = 0;

        let mut stored = Vec::new();
        if regeneration.identities {
            info!("Regenerating device identities, discarding stored devices");
            if let Err(e) = store.clear().await {
                warn!(error = %e, "Failed to clear stored devices");
            }
        } else {
            for (kind, count) in [(DeviceKind::Anchor, num_anchors), (DeviceKind::Tag, num_tags)] {
                match store.load_devices(kind, count).await {
                    Ok(mut records) => {
                        records.truncate(count);
                        stored.extend(records);
                    }
                    Err(e) => {
                        warn!(error = %e, %kind, "Failed to load stored devices, generating fresh ones");
                    }
                }
            }
        }

        let mut report = InitReport::default();
        for record in &stored {
            match self.restore(record, regeneration.positions, rng) {
                Ok(()) => report.loaded += 1,
                Err(e) => warn!(error = %e, name = %record.name, "Skipping stored device"),
            }
        }

        let anchors_needed = num_anchors.saturating_sub(self.count(DeviceKind::Anchor));
        let tags_needed = num_tags.saturating_sub(self.count(DeviceKind::Tag));
        for _ in 0..anchors_needed {
            self.spawn(DeviceKind::Anchor, rng);
        }
        for _ in 0..tags_needed {
            self.spawn(DeviceKind::Tag, rng);
        }
        report.created = anchors_needed + tags_needed;

        self.retarget_arrived(rng)?;
        self.refresh_ranging(rng);

        info!(
            loaded = report.loaded,
            created = report.created,
            regenerate_positions = regeneration.positions,
            "Device registry initialized"
        );
        Ok(report)
    }

    fn restore<R: Rng + ?Sized>(
        &mut self,
        record: &DeviceRecord,
        regenerate_position: bool,
        rng: &mut R,
    ) -> SimResult<()> {
        let mut device = Device::from_record(record, self.speed, &self.bounds)?;
        if regenerate_position {
            let position = self.bounds.random_point(rng);
            device.set_position(position);
            device.set_target_point(position);
        }
        self.insert(device)
    }

    /// Add a device, rejecting duplicate names or MAC addresses.
    pub fn insert(&mut self, device: Device) -> SimResult<()> {
        if self.devices.contains_key(device.name()) {
            return Err(SimulationError::Model(format!(
                "Duplicate device name: {}",
                device.name()
            )));
        }
        if self.mac_in_use(device.mac_address()) {
            return Err(SimulationError::Model(format!(
                "Duplicate MAC address: {}",
                device.mac_address()
            )));
        }
        self.devices.insert(device.name().to_string(), device);
        Ok(())
    }

    /// Generate a device with a MAC (and therefore name) not yet in use.
    pub fn spawn<R: Rng + ?Sized>(&mut self, kind: DeviceKind, rng: &mut R) -> &Device {
        let mac = loop {
            let candidate = MacAddress::random(rng);
            if !self.mac_in_use(candidate) && !self.devices.contains_key(&candidate.station_name()) {
                break candidate;
            }
        };
        let device = Device::generate(
            kind,
            mac,
            &self.bounds,
            self.speed,
            self.default_cluster.clone(),
            rng,
        );
        debug!(name = %device.name(), %kind, "Created device");
        let name = device.name().to_string();
        self.devices.entry(name).or_insert(device)
    }

    fn mac_in_use(&self, mac: MacAddress) -> bool {
        self.devices.values().any(|d| d.mac_address() == mac)
    }

    /// Advance every tag by `dt` seconds, then re-range all anchor-tag pairs.
    pub fn advance<R: Rng + ?Sized>(&mut self, dt: f64, rng: &mut R) -> SimResult<()> {
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(SimulationError::Model(format!("Invalid time step: {}", dt)));
        }

        for device in self.devices.values_mut() {
            let (position, mut target, speed) = match device.role() {
                DeviceRole::Anchor => continue,
                DeviceRole::Tag(tag) => (device.position(), tag.target_point, tag.speed),
            };

            if self.targeting.has_arrived(position, target) {
                target = self.targeting.select(position, rng)?;
                device.set_target_point(target);
            }

            if self.movement.stochastic_pauses() && rng.gen::<f64>() > device.randomizer() {
                continue;
            }

            let next = self.movement.advance(position, target, speed, dt)?;
            device.set_position(next);

            if self.targeting.has_arrived(next, target) {
                let fresh = self.targeting.select(next, rng)?;
                device.set_target_point(fresh);
                debug!(name = %device.name(), x = fresh.x, y = fresh.y, "Tag reached target, new target drawn");
            }
        }

        self.tick += 1;
        self.refresh_ranging(rng);
        Ok(())
    }

    fn retarget_arrived<R: Rng + ?Sized>(&mut self, rng: &mut R) -> SimResult<()> {
        for device in self.devices.values_mut() {
            let Some(target) = device.target_point() else {
                continue;
            };
            if self.targeting.has_arrived(device.position(), target) {
                let fresh = self.targeting.select(device.position(), rng)?;
                device.set_target_point(fresh);
            }
        }
        Ok(())
    }

    /// Recompute the ranging samples of every tag against every anchor.
    pub fn refresh_ranging<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let anchors: Vec<(MacAddress, Point2D)> = self
            .devices
            .values()
            .filter(|d| !d.is_tag())
            .map(|d| (d.mac_address(), d.position()))
            .collect();

        self.latest_ranging.clear();
        for tag in self.devices.values().filter(|d| d.is_tag()) {
            let samples = anchors
                .iter()
                .map(|&(mac, position)| RangingSample {
                    mac_address: mac.to_string(),
                    distance: self.ranging_model.measure(
                        (mac, position),
                        (tag.mac_address(), tag.position()),
                        rng,
                    ),
                })
                .collect();
            self.latest_ranging.insert(tag.name().to_string(), samples);
        }
    }

    /// Owned copy of the current tick; nothing in it aliases registry state.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            tick: self.tick,
            taken_at: Utc::now(),
            devices: self.records(),
            ranging: self.latest_ranging.clone(),
        }
    }

    pub fn records(&self) -> Vec<DeviceRecord> {
        self.devices.values().map(Device::to_record).collect()
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn anchors(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| !d.is_tag())
    }

    pub fn tags(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| d.is_tag())
    }

    pub fn count(&self, kind: DeviceKind) -> usize {
        self.devices.values().filter(|d| d.kind() == kind).count()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }
}
