use serde::{Deserialize, Serialize};

pub const DEFAULT_REPLICA_SCALE: usize = 100;
pub const DEFAULT_LOCK_EXPIRE_SECONDS: u64 = 10;

/// Tunables of the router itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterOptions {
    /// Virtual nodes per unit of clamped weight.
    pub replica_scale: usize,
    /// TTL of the distributed ring lock. Operations longer than this lose
    /// mutual exclusion; size it to the largest expected replica batch.
    pub lock_expire_seconds: u64,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            replica_scale: DEFAULT_REPLICA_SCALE,
            lock_expire_seconds: DEFAULT_LOCK_EXPIRE_SECONDS,
        }
    }
}

impl RouterOptions {
    /// Replaces zero-valued fields with the defaults.
    pub fn repair(&mut self) {
        if self.replica_scale == 0 {
            self.replica_scale = DEFAULT_REPLICA_SCALE;
        }
        if self.lock_expire_seconds == 0 {
            self.lock_expire_seconds = DEFAULT_LOCK_EXPIRE_SECONDS;
        }
    }
}

/// Deployment configuration: which store backend serves which ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub ring: String,
    pub backend: String,
    pub redis_url: Option<String>,
    #[serde(default)]
    pub options: RouterOptions,
}

impl RouterConfig {
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("RINGSHIFT"))
            .build()
            .map_err(|error| crate::error::RingError::Config(error.to_string()))?;

        let mut config: RouterConfig = settings
            .try_deserialize()
            .map_err(|error| crate::error::RingError::Config(error.to_string()))?;

        config.options.repair();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_replaces_zero_values() {
        let mut options = RouterOptions {
            replica_scale: 0,
            lock_expire_seconds: 0,
        };
        options.repair();
        assert_eq!(options.replica_scale, DEFAULT_REPLICA_SCALE);
        assert_eq!(options.lock_expire_seconds, DEFAULT_LOCK_EXPIRE_SECONDS);
    }

    #[test]
    fn repair_keeps_configured_values() {
        let mut options = RouterOptions {
            replica_scale: 3,
            lock_expire_seconds: 45,
        };
        options.repair();
        assert_eq!(options.replica_scale, 3);
        assert_eq!(options.lock_expire_seconds, 45);
    }
}
