use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::http::protocol::{DEFAULT_MAX_BUFFER_SIZE, DEFAULT_SOFTWARE};

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV: &str = "WICKET_CONFIG";

/// Environment variable overriding `server.listen_addr`.
pub const LISTEN_ENV: &str = "LISTEN";

/// Server configuration.
///
/// Every field has a default, so an empty document is a valid config.
///
/// ```yaml
/// server:
///   listen_addr: "0.0.0.0:8080"
///   name: example.com
/// http:
///   pipeline: true
///   pedantic: false
///   max_buffer_size: 1048576
/// pool:
///   enabled: true
///   minimum: 2
///   maximum: 16
/// log_level: debug
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub http: HttpConfig,
    pub pool: PoolConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Reported as `SERVER_NAME`.
    pub name: String,
    /// Sent in the `Server` header.
    pub software: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub pipeline: bool,
    pub pedantic: bool,
    pub max_buffer_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Run application calls on worker threads.
    pub enabled: bool,
    pub minimum: usize,
    pub maximum: usize,
    pub divisor: usize,
    pub idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            http: HttpConfig::default(),
            pool: PoolConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            name: "localhost".to_string(),
            software: DEFAULT_SOFTWARE.to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pipeline: true,
            pedantic: true,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            minimum: 5,
            maximum: 100,
            divisor: 10,
            idle_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Loads the file named by `WICKET_CONFIG` if set, otherwise the
    /// defaults, then applies the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            cfg.server.listen_addr = listen;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        // An empty document deserializes to unit, not a mapping.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.pool.minimum > self.pool.maximum {
            anyhow::bail!(
                "pool.minimum ({}) exceeds pool.maximum ({})",
                self.pool.minimum,
                self.pool.maximum
            );
        }
        if self.pool.divisor == 0 {
            anyhow::bail!("pool.divisor must be positive");
        }
        if self.http.max_buffer_size == 0 {
            anyhow::bail!("http.max_buffer_size must be positive");
        }
        Ok(())
    }

    /// Maximum log level; unknown names fall back to `info`.
    pub fn level(&self) -> tracing::Level {
        self.log_level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}
