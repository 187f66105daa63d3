//! Configuration layer: recognized options (§6), loaded from defaults, an
//! optional TOML file, and environment variable overrides — or assembled
//! programmatically with [`SchedulerConfigBuilder`].

use std::env;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A job to `schedule()` once at process start. Duplicates (by `id`) are
/// ignored rather than treated as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapJob {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub job_type: String,
    pub schedule: Option<String>,
    pub priority: Option<i64>,
    pub concurrency: Option<i64>,
    #[serde(default)]
    pub data: Value,
}

/// Recognized configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker sessions run concurrently per process.
    pub concurrency: usize,
    /// Default per-type lock duration, milliseconds.
    pub lock_duration_ms: i64,
    /// Default job priority (lower = higher priority).
    pub default_priority: i64,
    /// Default per-job permit count (`-1` = unlimited).
    pub default_concurrency: i64,
    /// Milliseconds between idle-rescan events.
    pub idle_time_ms: i64,
    /// Jobs to schedule once at startup.
    pub jobs: Vec<BootstrapJob>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            lock_duration_ms: 600_000,
            default_priority: 0,
            default_concurrency: 1,
            idle_time_ms: 30_000,
            jobs: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Parse a TOML document into a config, falling back to defaults for
    /// any field it omits.
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Overlay `TIMELOOM_*` environment variables onto `self`.
    ///
    /// Recognized: `TIMELOOM_CONCURRENCY`, `TIMELOOM_LOCK_DURATION_MS`,
    /// `TIMELOOM_DEFAULT_PRIORITY`, `TIMELOOM_DEFAULT_CONCURRENCY`,
    /// `TIMELOOM_IDLE_TIME_MS`.
    pub fn overlay_env(mut self) -> Self {
        if let Some(v) = env_parsed("TIMELOOM_CONCURRENCY") {
            self.concurrency = v;
        }
        if let Some(v) = env_parsed("TIMELOOM_LOCK_DURATION_MS") {
            self.lock_duration_ms = v;
        }
        if let Some(v) = env_parsed("TIMELOOM_DEFAULT_PRIORITY") {
            self.default_priority = v;
        }
        if let Some(v) = env_parsed("TIMELOOM_DEFAULT_CONCURRENCY") {
            self.default_concurrency = v;
        }
        if let Some(v) = env_parsed("TIMELOOM_IDLE_TIME_MS") {
            self.idle_time_ms = v;
        }
        self
    }

    /// Defaults overlaid with environment variables, matching how a node
    /// process is typically bootstrapped.
    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Builder mirroring the teacher's `RuntimeBuilder`/`EngineBuilder` pattern,
/// for programmatic construction without a TOML file.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn lock_duration_ms(mut self, ms: i64) -> Self {
        self.config.lock_duration_ms = ms;
        self
    }

    pub fn default_priority(mut self, priority: i64) -> Self {
        self.config.default_priority = priority;
        self
    }

    pub fn default_concurrency(mut self, concurrency: i64) -> Self {
        self.config.default_concurrency = concurrency;
        self
    }

    pub fn idle_time_ms(mut self, ms: i64) -> Self {
        self.config.idle_time_ms = ms;
        self
    }

    pub fn bootstrap_job(mut self, job: BootstrapJob) -> Self {
        self.config.jobs.push(job);
        self
    }

    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SchedulerConfig::default();
        assert_eq!(config.concurrency, 5);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = SchedulerConfig::builder()
            .concurrency(10)
            .idle_time_ms(5_000)
            .build();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.idle_time_ms, 5_000);
    }

    #[test]
    fn toml_parses_partial_overrides() {
        let config = SchedulerConfig::from_toml_str("concurrency = 3\n").unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.idle_time_ms, SchedulerConfig::default().idle_time_ms);
    }

    #[test]
    fn toml_parses_bootstrap_jobs() {
        let toml = r#"
            [[jobs]]
            type = "email:digest"
            schedule = "R/P1D"
        "#;
        let config = SchedulerConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].job_type, "email:digest");
    }
}
