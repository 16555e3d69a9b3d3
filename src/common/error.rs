use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Model error: {0}")]
    Model(String),
}

impl SimulationError {
    /// Configuration and model errors abort the run; transport and
    /// persistence errors only cost the current tick its delivery.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Model(_))
    }
}

impl From<config::ConfigError> for SimulationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<sqlx::Error> for SimulationError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type SimResult<T> = Result<T, SimulationError>;
