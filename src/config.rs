//! Configuration loading and persistence.
//!
//! Reads and writes `config.json` in the config directory. Every field can
//! be overridden from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants::{DEFAULT_MAX_KEYWORDS, HTTP_REQUEST_TIMEOUT};

const CONFIG_FILE: &str = "config.json";

/// Configuration for the push identity client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the notification API.
    pub server_url: String,
    /// Server's VAPID public key (URL-safe base64).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vapid_public_key: Option<String>,
    /// Base URL under which native subscription endpoints are minted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_endpoint: Option<String>,
    /// Maximum number of keywords per device.
    pub max_keywords: usize,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000/api".to_string(),
            vapid_public_key: None,
            push_endpoint: None,
            max_keywords: DEFAULT_MAX_KEYWORDS,
            request_timeout_secs: HTTP_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

fn positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    value
        .trim()
        .parse::<T>()
        .ok()
        .filter(|n| *n > T::default())
        .with_context(|| format!("{key} must be a positive number, got '{value}'"))
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `<tmp>/push-identity-test`
    /// 2. `PUSHID_CONFIG_DIR` env var: explicit override
    /// 3. `PUSHID_ENV=test`: `<tmp>/push-identity-test`
    /// 4. Default: platform config dir (Linux: ~/.config/push-identity)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                std::env::temp_dir().join("push-identity-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("PUSHID_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else if crate::env::is_test_mode() {
                    std::env::temp_dir().join("push-identity-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("push-identity")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_saved().unwrap_or_else(|e| {
            log::warn!("Using default config: {e:#}");
            Self::default()
        });
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads the saved configuration without environment overrides.
    ///
    /// Defaults when no file exists yet; a corrupt file is an error so that
    /// `config set` never overwrites it silently.
    pub fn load_saved() -> Result<Self> {
        Self::load_from(&Self::config_dir()?)
    }

    fn load_from(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&config_path).context("Failed to read config")?;
        serde_json::from_str(&content).context("Failed to parse config")
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = var("PUSHID_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(key) = var("PUSHID_VAPID_PUBLIC_KEY") {
            self.vapid_public_key = Some(key);
        }

        if let Some(endpoint) = var("PUSHID_PUSH_ENDPOINT") {
            self.push_endpoint = Some(endpoint);
        }

        if let Some(max_keywords) = var("PUSHID_MAX_KEYWORDS") {
            match max_keywords.parse::<usize>() {
                Ok(max) if max > 0 => self.max_keywords = max,
                _ => log::warn!("Ignoring invalid PUSHID_MAX_KEYWORDS={max_keywords}"),
            }
        }

        if let Some(timeout) = var("PUSHID_REQUEST_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
                _ => log::warn!("Ignoring invalid PUSHID_REQUEST_TIMEOUT={timeout}"),
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    fn save_to(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join(CONFIG_FILE);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .context("Failed to write config")?;

        // Owner read/write only
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Value of a config key, as shown by `config <key>`.
    pub fn get(&self, key: &str) -> Result<String> {
        Ok(match key {
            "server_url" => self.server_url.clone(),
            "vapid_public_key" => self.vapid_public_key.clone().unwrap_or_default(),
            "push_endpoint" => self.push_endpoint.clone().unwrap_or_default(),
            "max_keywords" => self.max_keywords.to_string(),
            "request_timeout_secs" => self.request_timeout_secs.to_string(),
            other => anyhow::bail!("Unknown config key '{other}'"),
        })
    }

    /// Set a config key from its string form. An empty value clears
    /// optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| Some(v.trim().to_string()).filter(|v| !v.is_empty());
        match key {
            "server_url" => self.server_url = value.trim().to_string(),
            "vapid_public_key" => self.vapid_public_key = optional(value),
            "push_endpoint" => self.push_endpoint = optional(value),
            "max_keywords" => {
                self.max_keywords = positive(key, value)?;
            }
            "request_timeout_secs" => {
                self.request_timeout_secs = positive(key, value)?;
            }
            other => anyhow::bail!("Unknown config key '{other}'"),
        }
        Ok(())
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The server key subscriptions are bound to.
    pub fn application_server_key(&self) -> Result<&str> {
        self.vapid_public_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .context("No VAPID public key configured (set PUSHID_VAPID_PUBLIC_KEY)")
    }
}
