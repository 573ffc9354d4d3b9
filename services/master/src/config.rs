//! Configuration for the master allocator.

use std::time::Duration;

/// Allocator configuration.
///
/// All knobs have working defaults; `from_env` overrides them from
/// `FLOTILLA_*` environment variables, ignoring unparseable values.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Seconds between periodic batch allocation passes.
    pub batch_seconds: f64,

    /// Minimum cpus an agent must have free to be offered at all.
    pub min_cpus: f64,

    /// Minimum memory (MiB) an agent must have free to be offered at all.
    pub min_mem_mib: f64,

    /// Refusal filter duration applied when a framework declines resources
    /// without naming one.
    pub default_refuse_seconds: f64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            batch_seconds: 1.0,
            min_cpus: 0.01,
            min_mem_mib: 32.0,
            default_refuse_seconds: 5.0,
            log_level: "info".to_string(),
        }
    }
}

impl MasterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let batch_seconds = std::env::var("FLOTILLA_BATCH_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.batch_seconds);

        let min_cpus = std::env::var("FLOTILLA_MIN_CPUS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.min_cpus);

        let min_mem_mib = std::env::var("FLOTILLA_MIN_MEM_MIB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.min_mem_mib);

        let default_refuse_seconds = std::env::var("FLOTILLA_DEFAULT_REFUSE_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.default_refuse_seconds);

        let log_level =
            std::env::var("FLOTILLA_LOG_LEVEL").unwrap_or_else(|_| defaults.log_level.clone());

        Self {
            batch_seconds,
            min_cpus,
            min_mem_mib,
            default_refuse_seconds,
            log_level,
        }
    }

    /// The periodic pass period as a `Duration`.
    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs_f64(self.batch_seconds.max(0.001))
    }
}
