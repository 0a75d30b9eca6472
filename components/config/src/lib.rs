use std::{fs::File, path::Path, time::Duration};

use error::ConfigurationError;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod settings;

pub use settings::ParallelReplicasSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coordinator {
    /// A replica holding in-flight segments and silent for longer than this is considered lost.
    /// Replicas also bound every request they send to the coordinator by it.
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,

    #[serde(rename = "liveness-check-interval-ms")]
    pub liveness_check_interval_ms: u64,

    /// Number of times a lost replica may rejoin the same query.
    #[serde(rename = "max-replica-retries")]
    pub max_replica_retries: u32,

    #[serde(rename = "initial-tasks-per-replica")]
    pub initial_tasks_per_replica: usize,

    #[serde(rename = "tasks-per-request")]
    pub tasks_per_request: usize,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            liveness_check_interval_ms: 100,
            max_replica_retries: 3,
            initial_tasks_per_replica: 2,
            tasks_per_request: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reader {
    #[serde(rename = "min-rows-for-concurrent-read")]
    pub min_rows_for_concurrent_read: u64,

    #[serde(rename = "min-bytes-for-concurrent-read")]
    pub min_bytes_for_concurrent_read: u64,
}

impl Default for Reader {
    fn default() -> Self {
        Self {
            min_rows_for_concurrent_read: 20 * 8192,
            min_bytes_for_concurrent_read: 24 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub coordinator: Coordinator,

    #[serde(default)]
    pub reader: Reader,
}

impl Configuration {
    /// Load configuration from a YAML file. A missing file yields the defaults.
    pub fn load<P>(path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let mut configuration = if path.exists() && path.is_file() {
            serde_yaml::from_reader(File::open(path)?)?
        } else {
            Configuration::default()
        };
        configuration.check_and_apply()?;
        Ok(configuration)
    }

    /// Check the configuration.
    ///
    /// Timeouts, intervals and task counts must be positive, otherwise liveness detection or task
    /// distribution could never make progress.
    pub fn check_and_apply(&mut self) -> Result<(), ConfigurationError> {
        if self.coordinator.request_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid(
                "request-timeout-ms must be positive".to_owned(),
            ));
        }

        if self.coordinator.liveness_check_interval_ms == 0 {
            return Err(ConfigurationError::Invalid(
                "liveness-check-interval-ms must be positive".to_owned(),
            ));
        }

        if self.coordinator.initial_tasks_per_replica == 0 || self.coordinator.tasks_per_request == 0
        {
            return Err(ConfigurationError::Invalid(
                "replicas must be granted at least one task per request".to_owned(),
            ));
        }

        // Checking liveness less often than the timeout would let stranded segments wait twice as long.
        if self.coordinator.liveness_check_interval_ms > self.coordinator.request_timeout_ms {
            self.coordinator.liveness_check_interval_ms = self.coordinator.request_timeout_ms;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator.request_timeout_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.coordinator.liveness_check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::Configuration;
    use std::{error::Error, fs::File, io::Read, path::Path, time::Duration};

    #[test]
    fn test_yaml() -> Result<(), Box<dyn Error>> {
        let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")?;
        let path = Path::new(&manifest_dir);
        let path = path
            .parent()
            .unwrap()
            .parent()
            .unwrap()
            .join("etc/coordinator.yaml");
        let mut file = File::open(path.as_path())?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let config: Configuration = serde_yaml::from_str(&content)?;
        assert_eq!(5000, config.coordinator.request_timeout_ms);
        assert_eq!(3, config.coordinator.max_replica_retries);
        assert_eq!(2, config.coordinator.initial_tasks_per_replica);
        assert_eq!(163840, config.reader.min_rows_for_concurrent_read);
        assert_eq!(Duration::from_millis(100), config.liveness_check_interval());
        Ok(())
    }

    #[test]
    fn test_partial_yaml_uses_defaults() -> Result<(), Box<dyn Error>> {
        let config: Configuration = serde_yaml::from_str(
            r#"
reader:
  min-rows-for-concurrent-read: 8192
  min-bytes-for-concurrent-read: 1048576
"#,
        )?;
        assert_eq!(8192, config.reader.min_rows_for_concurrent_read);
        assert_eq!(Duration::from_secs(5), config.request_timeout());
        Ok(())
    }

    #[test]
    fn test_check_and_apply() {
        let mut config = Configuration::default();
        assert!(config.check_and_apply().is_ok());

        config.coordinator.liveness_check_interval_ms = 60_000;
        assert!(config.check_and_apply().is_ok());
        assert_eq!(config.request_timeout(), config.liveness_check_interval());

        config.coordinator.tasks_per_request = 0;
        assert!(config.check_and_apply().is_err());

        let mut config = Configuration::default();
        config.coordinator.request_timeout_ms = 0;
        assert!(config.check_and_apply().is_err());
    }

    #[test]
    fn test_load_missing_file() -> Result<(), Box<dyn Error>> {
        let config = Configuration::load("/definitely/not/here/coordinator.yaml")?;
        assert_eq!(100, config.coordinator.liveness_check_interval_ms);
        Ok(())
    }
}
