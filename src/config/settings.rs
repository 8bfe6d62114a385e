use super::BrokerConfig;
use crate::Result;
use config::{Config, Environment};

impl BrokerConfig {
    /// Build configuration from `MYMQ_*` environment variables layered over
    /// the defaults, e.g. `MYMQ_MYMQ__QUEUE_SIZE=512` or
    /// `MYMQ_CLUSTER__QUORUM=2`.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::try_from(&BrokerConfig::default())
            .map_err(|e| crate::MymqError::Config(e.to_string()))?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(Environment::with_prefix("MYMQ").separator("__"))
            .build()
            .map_err(|e| crate::MymqError::Config(e.to_string()))?;

        let config = settings
            .try_deserialize::<BrokerConfig>()
            .map_err(|e| crate::MymqError::Config(e.to_string()))?;

        Ok(config)
    }
}
