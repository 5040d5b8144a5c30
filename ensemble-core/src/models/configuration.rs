//! Configuration data structures

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Networks the engine knows how to look up from the environment
pub const KNOWN_NETWORKS: &[&str] = &["fuse", "sepolia", "base_sepolia", "op_sepolia"];

/// Logging level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

/// Retry settings for transient RPC failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            backoff_multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Logging verbosity level
    pub log_level: LogLevel,
    /// JSON store holding workflows and instances
    pub store_path: Option<PathBuf>,
    /// Directory of `<identifier>.json` ABI documents
    pub abi_dir: Option<PathBuf>,
    /// Per-request timeout for RPC calls
    pub rpc_timeout_seconds: u64,
    /// Offset of the reference timezone used for periodic triggers
    pub timezone_offset_minutes: i32,
    /// How often the poller sweeps running instances
    pub poll_interval_seconds: u64,
    /// Retry policy for transient RPC failures
    pub retry: RetrySettings,
    /// Network name to JSON-RPC endpoint
    pub networks: BTreeMap<String, String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            store_path: None,
            abi_dir: None,
            rpc_timeout_seconds: 10,
            timezone_offset_minutes: 0,
            poll_interval_seconds: 60,
            retry: RetrySettings::default(),
            networks: BTreeMap::new(),
        }
    }
}

impl Configuration {
    /// Load configuration from file
    pub fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Configuration = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Return default configuration if file doesn't exist
            Ok(Configuration::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_dir = dirs::config_dir().ok_or("Could not determine config directory")?;
        Ok(config_dir.join("ensemble").join("config.toml"))
    }

    /// Store path, defaulting to `~/.ensemble/store.json`
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(".ensemble").join("store.json")
        })
    }

    /// ABI directory, defaulting to `~/.ensemble/abis`
    pub fn resolved_abi_dir(&self) -> PathBuf {
        self.abi_dir.clone().unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(".ensemble").join("abis")
        })
    }

    /// Overlay `PROVIDER_URL_<NETWORK>` variables onto the network table
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut names: Vec<String> = KNOWN_NETWORKS.iter().map(|n| n.to_string()).collect();
        for name in self.networks.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        for name in names {
            let key = format!("PROVIDER_URL_{}", name.to_uppercase());
            if let Some(url) = lookup(&key).filter(|u| !u.is_empty()) {
                self.networks.insert(name, url);
            }
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Reference timezone for calendar-field comparisons
    pub fn reference_timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.rpc_timeout_seconds == 0 || self.rpc_timeout_seconds > 300 {
            errors.push("rpc_timeout_seconds must be between 1 and 300".to_string());
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            errors.push("retry.max_attempts must be between 1 and 10".to_string());
        }

        if self.retry.backoff_multiplier < 1.0 || self.retry.backoff_multiplier > 10.0 {
            errors.push("retry.backoff_multiplier must be between 1.0 and 10.0".to_string());
        }

        // Offsets beyond +/-24h are not representable by FixedOffset
        if self.timezone_offset_minutes.abs() >= 24 * 60 {
            errors.push("timezone_offset_minutes must be within one day".to_string());
        }

        if self.poll_interval_seconds == 0 {
            errors.push("poll_interval_seconds must be at least 1".to_string());
        }

        for (network, endpoint) in &self.networks {
            match url::Url::parse(endpoint) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => errors.push(format!(
                    "network '{}' uses unsupported scheme '{}'",
                    network,
                    parsed.scheme()
                )),
                Err(e) => errors.push(format!("network '{}' has invalid URL: {}", network, e)),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
