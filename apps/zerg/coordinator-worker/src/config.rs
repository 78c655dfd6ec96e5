use core_config::{env_parse_or, ConfigError, FromEnv};
use domain_coordination::CoordinatorConfig;

const DEFAULT_HEALTH_PORT: u16 = 8083;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub coordinator: CoordinatorConfig,
    /// Port of the health and metrics server
    pub health_port: u16,
}

impl FromEnv for WorkerConfig {
    /// Reads COORDINATOR_HEALTH_PORT, then HEALTH_PORT, defaulting to 8083
    fn from_env() -> Result<Self, ConfigError> {
        let fallback = env_parse_or("HEALTH_PORT", DEFAULT_HEALTH_PORT)?;
        Ok(Self {
            coordinator: CoordinatorConfig::from_env()?,
            health_port: env_parse_or("COORDINATOR_HEALTH_PORT", fallback)?,
        })
    }
}
