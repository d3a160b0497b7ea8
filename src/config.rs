//! Attribution client configuration
//!
//! Defaults, optionally overlaid by a TOML file, then by environment
//! variables:
//!
//! | Variable                 | Field             |
//! |--------------------------|-------------------|
//! | `DEFERLINK_CONFIG_PATH`  | file to load      |
//! | `DEFERLINK_BASE_URL`     | `base_url`        |
//! | `DEFERLINK_TIMEOUT_MS`   | `request_timeout` |
//! | `DEFERLINK_USER_AGENT`   | `user_agent`      |
//! | `DEFERLINK_SAVE_ON_MATCH`| `save_on_match`   |

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_CONFIG_PATH: &str = "deferlink.toml";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Configuration for [`crate::context::AttributionContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// Tracking API base, including the `/api` prefix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bound for the single attribution request (connect + response)
    #[serde(
        default = "default_request_timeout",
        rename = "request_timeout_ms",
        with = "duration_ms"
    )]
    pub request_timeout: Duration,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Send a tracking record back to the backend after a deferred match
    #[serde(default)]
    pub save_on_match: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}

fn default_user_agent() -> String {
    format!("deferlink/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            save_on_match: false,
        }
    }
}

impl AttributionConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// File from `DEFERLINK_CONFIG_PATH` (or `deferlink.toml`), falling back
    /// to defaults, then environment overrides.
    pub fn from_env() -> Self {
        let path = std::env::var("DEFERLINK_CONFIG_PATH")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let config = Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default attribution config ({}): {:#}", path, e);
            Self::default()
        });
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `DEFERLINK_*` overrides from `lookup`. Unparseable values are
    /// ignored with a warning.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("DEFERLINK_BASE_URL").filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        if let Some(raw) = lookup("DEFERLINK_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => self.request_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %raw, "Ignoring invalid DEFERLINK_TIMEOUT_MS"),
            }
        }
        if let Some(agent) = lookup("DEFERLINK_USER_AGENT").filter(|v| !v.is_empty()) {
            self.user_agent = agent;
        }
        if let Some(raw) = lookup("DEFERLINK_SAVE_ON_MATCH") {
            self.save_on_match = matches!(raw.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base_url '{}'", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("base_url must be http(s), got '{}'", url.scheme());
        }
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than zero");
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
