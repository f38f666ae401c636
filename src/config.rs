//! Configuration surface for the acquisition engine.
//!
//! Loaded from a YAML file (path given explicitly or via `APPHARVEST_CONFIG`)
//! with serde defaults matching the shipped profile, so a missing file or a
//! partial file still yields a runnable configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;

/// Deployment environment stamped into identity passports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    #[default]
    Dev,
    Test,
    Prod,
}

impl Env {
    pub fn label(&self) -> &'static str {
        match self {
            Env::Dev => "dev",
            Env::Test => "test",
            Env::Prod => "prod",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Env::Prod,
            "test" => Env::Test,
            _ => Env::Dev,
        }
    }
}

/// Bounds and seed for one controlled value (rate or concurrency).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ValueBand {
    pub base: f64,
    pub min: f64,
    pub max: f64,
}

/// Per-stage controller configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub rate: ValueBand,
    pub concurrency: ValueBand,
    /// Standard deviation of the Gaussian perturbation.
    pub temperature: f64,
    /// Stage duration in seconds.
    pub response_time: f64,
    /// Stabilization window after each step, in seconds.
    pub step_response_time: f64,
    pub step_increase: f64,
    pub step_decrease: f64,
    /// Stability threshold multiplier against the baseline snapshot.
    pub threshold: f64,
    /// Sliding statistics window in seconds.
    pub window_size: f64,
    /// Exploit latency sensitivity.
    pub k: f64,
    /// Exploit coefficient-of-variation sensitivity.
    pub m: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            rate: ValueBand {
                base: 50.0,
                min: 1.0,
                max: 500.0,
            },
            concurrency: ValueBand {
                base: 5.0,
                min: 1.0,
                max: 50.0,
            },
            temperature: 0.5,
            response_time: 300.0,
            step_response_time: 30.0,
            step_increase: 5.0,
            step_decrease: 0.8,
            threshold: 1.2,
            window_size: 60.0,
            k: 0.2,
            m: 0.1,
        }
    }
}

impl StageConfig {
    pub fn response_time_duration(&self) -> Duration {
        Duration::from_secs_f64(self.response_time.max(0.0))
    }

    pub fn step_response_time_duration(&self) -> Duration {
        Duration::from_secs_f64(self.step_response_time.max(0.0))
    }

    pub fn window(&self) -> Option<Duration> {
        if self.window_size > 0.0 {
            Some(Duration::from_secs_f64(self.window_size))
        } else {
            None
        }
    }
}

/// Controller configuration: one block per stage of the cycle.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub baseline: StageConfig,
    pub rate_explore: StageConfig,
    pub concurrency_explore: StageConfig,
    pub exploit: StageConfig,
    pub history_size: usize,
}

/// Dispatcher configuration (`asession` block).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Total per-call timeout in seconds.
    pub timeout: f64,
    /// Requests served before the underlying HTTP session is rebuilt.
    pub session_request_limit: usize,
    /// Maximum attempts per request and per session creation.
    pub retries: usize,
    /// Initial semaphore width.
    pub concurrency: usize,
    pub trust_env: bool,
    pub raise_for_status: bool,
    /// Idle connections kept per host; the pool carries over session rebuilds.
    pub pool_max_idle_per_host: usize,
    /// Seconds an idle connection stays pooled.
    pub pool_idle_timeout: f64,
    /// TCP keepalive in seconds; zero disables it.
    pub tcp_keepalive: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: 30.0,
            session_request_limit: 1000,
            retries: 3,
            concurrency: 5,
            trust_env: false,
            raise_for_status: true,
            pool_max_idle_per_host: 32,
            pool_idle_timeout: 90.0,
            tcp_keepalive: 60.0,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.pool_idle_timeout.max(0.0))
    }

    pub fn keepalive(&self) -> Option<Duration> {
        if self.tcp_keepalive > 0.0 {
            Some(Duration::from_secs_f64(self.tcp_keepalive))
        } else {
            None
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub env: Env,
    pub asession: SessionConfig,
    pub adapter: AdapterConfig,
    /// Optional outbound proxy URL.
    pub proxy: Option<String>,
    /// Directory for operational state (daily index counter).
    pub ops_dir: Option<String>,
}

impl AppConfig {
    /// Loads the YAML file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(ConfigError::Parse)
    }

    /// Loads from `APPHARVEST_CONFIG` if set, falling back to defaults.
    /// `APPHARVEST_ENV` and `APPHARVEST_OPS_DIR` override either way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("APPHARVEST_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        if let Ok(env) = std::env::var("APPHARVEST_ENV") {
            config.env = Env::from_str_loose(&env);
        }
        if let Ok(dir) = std::env::var("APPHARVEST_OPS_DIR") {
            if !dir.is_empty() {
                config.ops_dir = Some(dir);
            }
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.asession.timeout.max(0.0))
    }

    pub fn history_size(&self) -> usize {
        if self.adapter.history_size > 0 {
            self.adapter.history_size
        } else {
            crate::profile::DEFAULT_HISTORY_SIZE
        }
    }
}
