use std::str::FromStr;

use strum_macros::{Display, EnumIter, EnumString};

use crate::error::ConfigurationError;

/// Query-level settings recognized by parallel reading. The set is closed: any other key is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum SettingKey {
    #[strum(serialize = "parallel_replicas_mark_segment_size")]
    MarkSegmentSize,

    #[strum(serialize = "max_parallel_replicas")]
    MaxParallelReplicas,

    #[strum(serialize = "parallel_replicas_local_plan")]
    LocalPlan,

    #[strum(serialize = "parallel_replicas_index_analysis_only_on_coordinator")]
    IndexAnalysisOnlyOnCoordinator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelReplicasSettings {
    /// Marks per segment. `0` lets the coordinator choose.
    pub mark_segment_size: u64,

    /// Upper bound of replicas taking part in one query.
    pub max_parallel_replicas: u64,

    /// Each replica builds its own plan instead of receiving the initiator's.
    pub local_plan: bool,

    /// Index analysis runs once on the coordinator rather than on every replica.
    pub index_analysis_only_on_coordinator: bool,
}

impl Default for ParallelReplicasSettings {
    fn default() -> Self {
        Self {
            mark_segment_size: 0,
            max_parallel_replicas: 1000,
            local_plan: true,
            index_analysis_only_on_coordinator: true,
        }
    }
}

impl ParallelReplicasSettings {
    /// Build settings from `key = value` pairs on top of the defaults.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Self::default();
        for (key, value) in pairs {
            settings.set(key, value)?;
        }
        Ok(settings)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigurationError> {
        let setting = SettingKey::from_str(key.trim())
            .map_err(|_| ConfigurationError::UnknownSetting(key.to_owned()))?;
        let value = value.trim();
        match setting {
            SettingKey::MarkSegmentSize => {
                self.mark_segment_size = parse_uint(key, value)?;
            }
            SettingKey::MaxParallelReplicas => {
                self.max_parallel_replicas = parse_uint(key, value)?;
            }
            SettingKey::LocalPlan => {
                self.local_plan = parse_bool(key, value)?;
            }
            SettingKey::IndexAnalysisOnlyOnCoordinator => {
                self.index_analysis_only_on_coordinator = parse_bool(key, value)?;
            }
        }
        Ok(())
    }

    /// Parse a `key=value` assignment, as given on the command line.
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<(), ConfigurationError> {
        match assignment.split_once('=') {
            Some((key, value)) => self.set(key, value),
            None => Err(ConfigurationError::InvalidValue {
                key: assignment.to_owned(),
                value: String::new(),
            }),
        }
    }

    /// Whether replicas analyse the index themselves, in addition to the coordinator.
    pub fn replica_side_analysis(&self) -> bool {
        self.local_plan || !self.index_analysis_only_on_coordinator
    }
}

fn invalid(key: &str, value: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}

fn parse_uint(key: &str, value: &str) -> Result<u64, ConfigurationError> {
    value.parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigurationError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
