//! Static service configuration.
//!
//! Loaded once at startup from a camelCase JSON file (`opensight.json`, or
//! the path in `OPENSIGHT_CONFIG`) and passed by handle to every component
//! that needs it. A missing file is not an error: the service runs on
//! defaults for local/dev use. A file that exists but does not parse is
//! fatal, since silently ignoring a broken config would mask misconfigured
//! security settings.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_FILE: &str = "opensight.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Seconds between refresh cycles.
    pub refresh_interval_seconds: u64,
    /// Absolute time-to-live of a snapshot, in minutes.
    pub cache_expiration_minutes: u64,
    pub http_port: u16,
    /// Display name used when building UNC paths; defaults to the host name.
    pub server_name: Option<String>,
    pub share_mappings: Vec<ShareMappingConfig>,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareMappingConfig {
    pub share_name: String,
    pub local_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Shared secret expected in the X-API-Key header; unset disables the check.
    pub api_key: Option<String>,
    /// CIDR-style ranges ("10.33.0.0/16"); empty disables the allow-list.
    pub allowed_networks: Vec<String>,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Maximum requests per window; 0 disables rate limiting.
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 10,
            cache_expiration_minutes: 5,
            http_port: 5000,
            server_name: None,
            share_mappings: Vec::new(),
            security: SecurityConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 0, window_seconds: 60 }
    }
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(target: "opensight::config", "config file '{}' not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(target: "opensight::config", "loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Load from `OPENSIGHT_CONFIG` (or the default file name), then apply
    /// environment overrides.
    pub fn load_from_env() -> Result<Self> {
        let path = std::env::var("OPENSIGHT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut cfg = Self::load(&path)?;
        if let Some(port) = std::env::var("OPENSIGHT_HTTP_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            cfg.http_port = port;
        }
        Ok(cfg)
    }

    /// Resolved server display name: configured value or the host name.
    pub fn server_name(&self) -> String {
        self.server_name
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string()))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds.max(1))
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache_expiration_minutes.max(1) as i64)
    }
}
