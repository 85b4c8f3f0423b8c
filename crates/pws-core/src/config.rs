use anyhow::{Context, Result};
use pws_station::{CachePolicy, ClientOptions, QueryOptions, StationIdentity, VerifyBy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

pub const STATION_ID_ENV: &str = "PWS_STATION_ID";
pub const API_KEY_ENV: &str = "PWS_API_KEY";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Station to poll
    pub station: StationConfig,

    /// Freshness and throttling
    #[serde(default)]
    pub cache: CacheConfig,

    /// Polling loop settings
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station code, e.g. IGODAL20
    pub station_id: String,

    /// API key (can also be set via PWS_API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// "m" for metric, "e" for imperial, "h" for hybrid
    #[serde(default = "default_units")]
    pub units: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    pws_station::transport::PWS_API_BASE.to_string()
}

fn default_units() -> String {
    "m".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station_id: String::new(),
            api_key: None,
            base_url: default_base_url(),
            units: default_units(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// How to tell whether upstream has a newer observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    #[default]
    Epoch,
    RecordCount,
}

impl From<VerifyMode> for VerifyBy {
    fn from(mode: VerifyMode) -> Self {
        match mode {
            VerifyMode::Epoch => VerifyBy::Epoch,
            VerifyMode::RecordCount => VerifyBy::RecordCount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Age in seconds after which a cached reading may be refreshed
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,

    /// Minimum seconds between network calls once data is cached
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    #[serde(default)]
    pub verify_by: VerifyMode,
}

fn default_staleness_secs() -> u64 {
    300
}

fn default_min_interval_secs() -> u64 {
    5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
            min_interval_secs: default_min_interval_secs(),
            verify_by: VerifyMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Print a reading whenever its age crosses a multiple of this many seconds
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_refresh_secs() -> u64 {
    5
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_refresh_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            tracing::info!("Wrote default config to {}", config_path.display());
            config
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Override station id and API key from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup(STATION_ID_ENV).filter(|v| !v.is_empty()) {
            self.station.station_id = id;
        }
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.station.api_key = Some(key);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.station.station_id.trim().is_empty() {
            result.add_error("station.station_id", "Station id is required");
        }

        match &self.station.api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => result.add_error(
                "station.api_key",
                format!("API key is required (set it here or via {})", API_KEY_ENV),
            ),
        }

        self.validate_url(&self.station.base_url, "station.base_url", &mut result);

        if !matches!(self.station.units.as_str(), "m" | "e" | "h" | "s") {
            result.add_error(
                "station.units",
                format!("Unknown unit system: {}", self.station.units),
            );
        }

        if self.station.timeout_secs == 0 {
            result.add_error("station.timeout_secs", "Timeout must be greater than 0");
        }

        if self.cache.staleness_secs == 0 {
            result.add_warning(
                "cache.staleness_secs",
                "Every read past the throttle window will probe upstream",
            );
        }

        if self.cache.min_interval_secs == 0 {
            result.add_warning("cache.min_interval_secs", "Request throttling disabled");
        } else if self.cache.min_interval_secs > self.cache.staleness_secs {
            result.add_warning(
                "cache.min_interval_secs",
                "Throttle window is longer than the staleness threshold",
            );
        }

        if self.display.refresh_secs == 0 {
            result.add_error("display.refresh_secs", "Refresh interval must be greater than 0");
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                } else if url.scheme() == "http" {
                    result.add_warning(field_name, "API key will be sent unencrypted");
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    pub fn identity(&self) -> Result<StationIdentity, ConfigError> {
        let api_key = self
            .station
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingSetting("station.api_key".to_string()))?;
        Ok(StationIdentity::new(self.station.station_id.clone(), api_key))
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.station.base_url.clone(),
            timeout: Duration::from_secs(self.station.timeout_secs),
            query: QueryOptions {
                units: self.station.units.clone(),
                ..QueryOptions::default()
            },
            policy: CachePolicy {
                staleness: Duration::from_secs(self.cache.staleness_secs),
                min_interval: Duration::from_secs(self.cache.min_interval_secs),
                verify_by: self.cache.verify_by.into(),
            },
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("pws");

        Ok(config_dir.join("config.toml"))
    }
}
