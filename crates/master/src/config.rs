//! Configuration for the coordinator and its workers.
//!
//! Intervals are in virtual-clock ticks unless the field says otherwise.

use std::path::Path;
use std::time::Duration;

use resmgr_core::{Error, Result, ResultExt, TICKS_PER_SEC};
use serde::{Deserialize, Serialize};

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Number of worker slots in the process table.
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,

    /// Number of resource kinds.
    #[serde(default = "default_resource_count")]
    pub resource_count: usize,

    /// Smallest per-resource limit.
    #[serde(default = "default_limit_min")]
    pub limit_min: u32,

    /// Largest per-resource limit.
    #[serde(default = "default_limit_max")]
    pub limit_max: u32,

    /// Chance, in percent, that a resource kind is shareable.
    #[serde(default = "default_shareable_percent")]
    pub shareable_percent: u32,

    /// Lower bound of the gap between two spawn instants.
    #[serde(default = "default_spawn_interval_min")]
    pub spawn_interval_min: u64,

    /// Upper bound of the gap between two spawn instants.
    #[serde(default = "default_spawn_interval_max")]
    pub spawn_interval_max: u64,

    /// Virtual instant of the first deadlock detection run.
    #[serde(default = "default_detection_interval")]
    pub first_detection: u64,

    /// Gap between two deadlock detection runs.
    #[serde(default = "default_detection_interval")]
    pub detection_interval: u64,

    /// Wall-clock bound on the whole run.
    #[serde(with = "duration_secs", default = "default_max_run_time")]
    pub max_run_time: Duration,

    /// Cap on live workers.
    #[serde(default = "default_slot_count")]
    pub max_workers: usize,

    /// Seed for every random decision. Random when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Decision policy of the spawned workers.
    #[serde(default)]
    pub worker: WorkerPolicy,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            resource_count: default_resource_count(),
            limit_min: default_limit_min(),
            limit_max: default_limit_max(),
            shareable_percent: default_shareable_percent(),
            spawn_interval_min: default_spawn_interval_min(),
            spawn_interval_max: default_spawn_interval_max(),
            first_detection: default_detection_interval(),
            detection_interval: default_detection_interval(),
            max_run_time: default_max_run_time(),
            max_workers: default_slot_count(),
            seed: None,
            worker: WorkerPolicy::default(),
        }
    }
}

impl MasterConfig {
    /// Set the RNG seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the wall-clock run bound.
    #[must_use]
    pub const fn max_run_time(mut self, max_run_time: Duration) -> Self {
        self.max_run_time = max_run_time;
        self
    }

    /// Set the slot count. The worker cap follows it.
    #[must_use]
    pub const fn slots(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self.max_workers = slot_count;
        self
    }

    /// Set the number of resource kinds.
    #[must_use]
    pub const fn resources(mut self, resource_count: usize) -> Self {
        self.resource_count = resource_count;
        self
    }

    /// Set the live-worker cap.
    #[must_use]
    pub const fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Apply `RESMGR_*` environment overrides on top of this config.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var("RESMGR_SEED") {
            if let Some(seed) = raw.parse::<u64>().into_option_logged("ignoring RESMGR_SEED") {
                self.seed = Some(seed);
            }
        }

        if let Ok(raw) = std::env::var("RESMGR_MAX_RUN_TIME") {
            if let Some(secs) = raw
                .parse::<u64>()
                .into_option_logged("ignoring RESMGR_MAX_RUN_TIME")
            {
                self.max_run_time = Duration::from_secs(secs);
            }
        }

        if let Ok(raw) = std::env::var("RESMGR_SLOT_COUNT") {
            self.slot_count = raw
                .parse()
                .or_default_logged("ignoring RESMGR_SLOT_COUNT", self.slot_count);
        }

        if let Ok(raw) = std::env::var("RESMGR_MAX_WORKERS") {
            self.max_workers = raw
                .parse()
                .or_default_logged("ignoring RESMGR_MAX_WORKERS", self.max_workers);
        }

        self
    }

    /// Load configuration from environment variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a TOML or JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| Error::json_parse_failed(e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| Error::toml_parse_failed(e.to_string()))
        }
    }

    /// Check the ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(Error::invalid_config("slot_count must be positive"));
        }
        if self.resource_count == 0 {
            return Err(Error::invalid_config("resource_count must be positive"));
        }
        if self.limit_min == 0 || self.limit_min > self.limit_max {
            return Err(Error::invalid_config(format!(
                "limit range {}..={} must be non-empty and start at 1 or more",
                self.limit_min, self.limit_max
            )));
        }
        if self.shareable_percent > 100 {
            return Err(Error::invalid_config("shareable_percent must be at most 100"));
        }
        if self.spawn_interval_min > self.spawn_interval_max {
            return Err(Error::invalid_config(format!(
                "spawn interval range {}..={} is empty",
                self.spawn_interval_min, self.spawn_interval_max
            )));
        }
        if self.detection_interval == 0 {
            return Err(Error::invalid_config("detection_interval must be positive"));
        }
        if self.max_workers == 0 {
            return Err(Error::invalid_config("max_workers must be positive"));
        }
        self.worker.validate()
    }
}

/// How a spawned worker decides what to do on its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPolicy {
    /// Delay after spawn before the worker first considers terminating.
    #[serde(default = "default_terminate_after")]
    pub terminate_after: u64,

    /// Chance, in percent, of terminating once the terminate instant is reached.
    #[serde(default = "default_terminate_percent")]
    pub terminate_percent: u32,

    /// Upper bound (exclusive) of the push applied to the terminate instant.
    #[serde(default = "default_terminate_jitter")]
    pub terminate_jitter: u64,

    /// Upper bound (exclusive) of the gap between two request/release actions.
    #[serde(default = "default_action_interval")]
    pub action_interval: u64,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            terminate_after: default_terminate_after(),
            terminate_percent: default_terminate_percent(),
            terminate_jitter: default_terminate_jitter(),
            action_interval: default_action_interval(),
        }
    }
}

impl WorkerPolicy {
    fn validate(&self) -> Result<()> {
        if self.terminate_percent > 100 {
            return Err(Error::invalid_config("worker.terminate_percent must be at most 100"));
        }
        if self.terminate_jitter == 0 || self.action_interval == 0 {
            return Err(Error::invalid_config(
                "worker.terminate_jitter and worker.action_interval must be positive",
            ));
        }
        Ok(())
    }
}

const fn default_slot_count() -> usize {
    18
}

const fn default_resource_count() -> usize {
    20
}

const fn default_limit_min() -> u32 {
    1
}

const fn default_limit_max() -> u32 {
    10
}

const fn default_shareable_percent() -> u32 {
    20
}

const fn default_spawn_interval_min() -> u64 {
    1
}

const fn default_spawn_interval_max() -> u64 {
    500
}

const fn default_detection_interval() -> u64 {
    TICKS_PER_SEC
}

const fn default_max_run_time() -> Duration {
    Duration::from_secs(3)
}

const fn default_terminate_after() -> u64 {
    TICKS_PER_SEC
}

const fn default_terminate_percent() -> u32 {
    20
}

const fn default_terminate_jitter() -> u64 {
    250
}

const fn default_action_interval() -> u64 {
    10_000
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = MasterConfig::default();
        assert_eq!(config.slot_count, 18);
        assert_eq!(config.resource_count, 20);
        assert_eq!(config.max_workers, 18);
        assert_eq!(config.max_run_time, Duration::from_secs(3));
        assert_eq!(config.detection_interval, TICKS_PER_SEC);
        assert!(config.seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = MasterConfig::default()
            .seed(7)
            .slots(4)
            .resources(2)
            .max_run_time(Duration::from_secs(1));

        assert_eq!(config.seed, Some(7));
        assert_eq!(config.slot_count, 4);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.resource_count, 2);
        assert_eq!(config.max_run_time, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_empty_limit_range() {
        let config = MasterConfig {
            limit_min: 5,
            limit_max: 2,
            ..MasterConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("limit range"));
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let config = MasterConfig {
            limit_min: 0,
            ..MasterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_worker_policy() {
        let mut config = MasterConfig::default();
        config.worker.terminate_percent = 150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "slot_count = 4\nseed = 99\nmax_run_time = 1\n\n[worker]\nterminate_percent = 50"
        )
        .unwrap();

        let config = MasterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.slot_count, 4);
        assert_eq!(config.seed, Some(99));
        assert_eq!(config.max_run_time, Duration::from_secs(1));
        assert_eq!(config.worker.terminate_percent, 50);
        assert_eq!(config.worker.action_interval, 10_000);
        assert_eq!(config.resource_count, 20);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"resource_count": 3, "shareable_percent": 0}}"#).unwrap();

        let config = MasterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.resource_count, 3);
        assert_eq!(config.shareable_percent, 0);
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "slot_count = \"many\"").unwrap();

        let err = MasterConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::TomlParseFailed { .. }));
    }

    #[test]
    fn test_from_missing_file() {
        let err = MasterConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, Error::FileReadFailed { .. }));
    }
}
