use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("EXECUTION_CORE_SIZE must be at least 1")]
    ZeroCoreSize,

    #[error("DEFAULT_TIMEOUT_MS ({default_ms}) exceeds MAX_TIMEOUT_MS ({max_ms})")]
    TimeoutAboveCeiling { default_ms: u64, max_ms: u64 },

    #[error("invalid LISTEN_ADDR {0:?}")]
    ListenAddr(String),
}

/// Which execution engine the worker drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Docker,
    Dummy,
}

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub core_size: usize,
    pub max_size: usize,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub keep_alive_ms: u64,
    pub redis_url: Option<String>,
    pub result_ttl_secs: u64,
    pub assessments_path: PathBuf,
    pub listen_addr: String,
    pub engine: EngineKind,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let core_size = number("EXECUTION_CORE_SIZE", 1) as usize;
        let max_size = (number("EXECUTION_MAX_SIZE", 1) as usize).max(core_size);

        let engine = match lookup("MARKER_ENGINE").as_deref().map(str::trim) {
            Some("dummy") => EngineKind::Dummy,
            _ => EngineKind::Docker,
        };

        Self {
            core_size,
            max_size,
            default_timeout_ms: number("DEFAULT_TIMEOUT_MS", 30_000),
            max_timeout_ms: number("MAX_TIMEOUT_MS", 120_000),
            keep_alive_ms: number("WORKER_KEEP_ALIVE_MS", 60_000),
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            result_ttl_secs: number("RESULT_TTL_SECS", 86_400),
            assessments_path: lookup("ASSESSMENTS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/assessments.json")),
            listen_addr: lookup("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            engine,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_size == 0 {
            return Err(ConfigError::ZeroCoreSize);
        }
        if self.default_timeout_ms > self.max_timeout_ms {
            return Err(ConfigError::TimeoutAboveCeiling {
                default_ms: self.default_timeout_ms,
                max_ms: self.max_timeout_ms,
            });
        }
        self.socket_addr().map(|_| ())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|_| ConfigError::ListenAddr(self.listen_addr.clone()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
