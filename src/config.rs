//! Configuration management for Turnstile.
//!
//! Settings come from an optional file, then environment variables such as
//! `STORE_BACKEND` and `REDIS_CONNECTION_STRING`. Later sources win.

use std::net::SocketAddr;
use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{WindowConfig, DEFAULT_LIMIT, DEFAULT_WINDOW_SECONDS};

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process table
    #[default]
    Memory,
    /// Shared Redis server
    #[serde(alias = "networked")]
    Redis,
}

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Counter store selection
    #[serde(default)]
    pub store_backend: StoreBackend,

    /// `host:port` or `redis://` URL of the Redis server
    #[serde(default)]
    pub redis_connection_string: Option<String>,

    /// Per-call Redis timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub redis_timeout_ms: u64,

    /// Permits per window
    #[serde(default = "default_permits")]
    pub permits: u64,

    /// Window length in seconds
    #[serde(default = "default_period_seconds")]
    pub period_seconds: u64,

    /// HTTP server address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::default(),
            redis_connection_string: None,
            redis_timeout_ms: default_redis_timeout_ms(),
            permits: default_permits(),
            period_seconds: default_period_seconds(),
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_redis_timeout_ms() -> u64 {
    250
}

fn default_permits() -> u64 {
    DEFAULT_LIMIT
}

fn default_period_seconds() -> u64 {
    DEFAULT_WINDOW_SECONDS
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

impl TurnstileConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_sources(path, None)
    }

    /// Load configuration from an optional file and the given variables
    /// instead of the process environment.
    pub fn from_sources(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::default().try_parsing(true).source(env));

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// The limit/window pair described by this configuration.
    pub fn window(&self) -> Result<WindowConfig> {
        WindowConfig::new(self.permits, self.period_seconds)
    }

    fn validate(&self) -> Result<()> {
        self.window()?;
        if self.store_backend == StoreBackend::Redis {
            if self.redis_connection_string.is_none() {
                return Err(TurnstileError::Config(
                    "REDIS_CONNECTION_STRING must be set when STORE_BACKEND is redis".to_string(),
                ));
            }
            if self.redis_timeout_ms == 0 {
                return Err(TurnstileError::Config(
                    "REDIS_TIMEOUT_MS must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}
