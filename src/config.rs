use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::common::{Bounds, SimResult, SimulationError};

/// Environment variables override file values, e.g. `UWBSIM_MQTT__BROKER`.
pub const ENV_PREFIX: &str = "UWBSIM";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub simulation: SimulationConfig,
    pub movement: MovementConfig,
    pub ranging: RangingConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub base_topic: String,
    pub client_id: String,
    pub retain: bool,
    pub clear_retained_on_start: bool,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub update_interval_secs: f64,
    pub num_anchors: usize,
    pub num_tags: usize,
    pub size_x: f64,
    pub size_y: f64,
    pub seed: Option<u64>,
    pub regenerate_positions: bool,
    pub regenerate_identities: bool,
    pub default_cluster: Option<String>,
    pub io_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub realistic: bool,
    pub speed: f64,
    pub target_offset_radius: f64,
    pub target_proximity: f64,
    pub stochastic_pauses: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    pub scaling_factor: f64,
    pub jitter_sigma: f64,
    pub outlier_probability: f64,
    pub outlier_bias: f64,
    pub outlier_sigma: f64,
    pub burst_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Json,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub db_path: String,
    pub json_path: String,
    pub checkpoint_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Layered load: defaults, then the TOML file (if present), then
    /// `UWBSIM_*` environment variables.
    pub fn load(path: Option<&Path>) -> SimResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> SimResult<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| SimulationError::Configuration(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        let sim = &self.simulation;
        let invalid = |reason: &str| Err(SimulationError::Configuration(reason.to_string()));

        if !(sim.update_interval_secs.is_finite() && sim.update_interval_secs > 0.0) {
            return invalid("simulation.update_interval_secs must be positive");
        }
        if sim.num_anchors == 0 {
            return invalid("simulation.num_anchors must be positive");
        }
        if sim.num_tags == 0 {
            return invalid("simulation.num_tags must be positive");
        }
        if !(sim.size_x > 0.0 && sim.size_y > 0.0) {
            return invalid("simulation.size_x and simulation.size_y must be positive");
        }
        if sim.io_timeout_ms == 0 {
            return invalid("simulation.io_timeout_ms must be positive");
        }
        if self.storage.checkpoint_every == 0 {
            return invalid("storage.checkpoint_every must be positive");
        }
        if self.mqtt.broker.trim().is_empty() {
            return invalid("mqtt.broker must not be empty");
        }
        if self.mqtt.base_topic.trim().is_empty() {
            return invalid("mqtt.base_topic must not be empty");
        }
        Ok(())
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.simulation.size_x, self.simulation.size_y)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs_f64(self.simulation.update_interval_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.simulation.io_timeout_ms)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            base_topic: "gpsno/simulation".to_string(),
            client_id: format!(
                "gps-no-simulation_{:02x}{:02x}{:02x}",
                rng.gen::<u8>(),
                rng.gen::<u8>(),
                rng.gen::<u8>()
            ),
            retain: true,
            clear_retained_on_start: false,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 1.0,
            num_anchors: 4,
            num_tags: 1,
            size_x: 1000.0,
            size_y: 1000.0,
            seed: None,
            regenerate_positions: false,
            regenerate_identities: false,
            default_cluster: None,
            io_timeout_ms: 2000,
        }
    }
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            realistic: true,
            speed: 10.0,
            target_offset_radius: 200.0,
            target_proximity: 25.0,
            stochastic_pauses: false,
        }
    }
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            scaling_factor: 1.0,
            jitter_sigma: 0.1,
            outlier_probability: 0.02,
            outlier_bias: 1.5,
            outlier_sigma: 1.0,
            burst_ticks: 3,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            db_path: "simulation.db".to_string(),
            json_path: "simulation.json".to_string(),
            checkpoint_every: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
