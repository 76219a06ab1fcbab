//! Configuration module
//!
//! Credentials for one platform organization ([`PlatformConfig`]) and the
//! export tuning knobs ([`ExportSettings`]). Both can be loaded from a YAML
//! file holding several named projects; credentials can also come from the
//! environment. Everything is validated before the first request is made.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::rounding::SampleInterval;

/// Page size of raw time-series queries
pub const DEFAULT_PAGE_SIZE: usize = 6000;

/// Credentials and endpoint of one platform organization
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformConfig {
    pub access_key: String,
    pub secret_key: String,
    /// Gateway base URL (e.g., "https://apim-sg1.envisioniot.com")
    pub api_gateway: String,
    pub org_id: String,
    /// Used as the output sub-directory
    pub project_name: String,
}

impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("api_gateway", &self.api_gateway)
            .field("org_id", &self.org_id)
            .field("project_name", &self.project_name)
            .finish()
    }
}

impl PlatformConfig {
    /// Check required fields and key format
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("ACCESS_KEY", &self.access_key),
            ("SECRET_KEY", &self.secret_key),
            ("API_GATEWAY", &self.api_gateway),
            ("ORG_ID", &self.org_id),
            ("PROJECT_NAME", &self.project_name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(name));
            }
        }

        validate_key("ACCESS_KEY", &self.access_key)?;
        validate_key("SECRET_KEY", &self.secret_key)?;

        let gateway = self.gateway();
        if !(gateway.starts_with("https://") || gateway.starts_with("http://")) {
            return Err(ConfigError::InvalidGateway(self.api_gateway.clone()));
        }

        Ok(())
    }

    /// Gateway URL without a trailing slash
    pub fn gateway(&self) -> &str {
        self.api_gateway.trim().trim_end_matches('/')
    }
}

/// Platform keys are hyphen-separated groups (e.g., "xxx-yyy-zzz")
fn validate_key(field: &'static str, key: &str) -> Result<(), ConfigError> {
    if !key.contains('-') {
        return Err(ConfigError::InvalidKey {
            field,
            reason: "key should contain hyphens (e.g., 'xxx-yyy-zzz')",
        });
    }
    if key.split('-').filter(|part| !part.is_empty()).count() < 2 {
        return Err(ConfigError::InvalidKey {
            field,
            reason: "key must have at least two parts separated by hyphens",
        });
    }
    Ok(())
}

/// Export tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportSettings {
    /// IANA zone the requested local range is interpreted in
    pub timezone: String,
    /// Sampling interval; timestamps are rounded to it
    pub interval_minutes: SampleInterval,
    /// Timeout for each request
    pub request_timeout_secs: u64,
    /// Concurrent window fetches per asset
    pub max_concurrency: usize,
    /// `pageSize` of raw queries; a window returning this many records may be truncated
    pub page_size: usize,
    pub model_page_size: usize,
    pub device_page_size: usize,
    /// Base directory for exported files
    pub output_dir: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            timezone: "Asia/Singapore".to_string(),
            interval_minutes: SampleInterval::default(),
            request_timeout_secs: 60,
            max_concurrency: 8,
            page_size: DEFAULT_PAGE_SIZE,
            model_page_size: 500,
            device_page_size: 1000,
            output_dir: ".".to_string(),
        }
    }
}

impl ExportSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        let positive = [
            ("request_timeout_secs", self.request_timeout_secs as usize),
            ("max_concurrency", self.max_concurrency),
            ("page_size", self.page_size),
            ("model_page_size", self.model_page_size),
            ("device_page_size", self.device_page_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive(name));
            }
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Named credential sets
    #[serde(default)]
    pub projects: Vec<PlatformConfig>,
    #[serde(default)]
    pub export: ExportSettings,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = serde_yaml::from_str(&content)
            .context("Failed to parse config YAML")?;

        Ok(config)
    }

    /// Find a project by name
    pub fn find_project(&self, project_name: &str) -> Result<&PlatformConfig, ConfigError> {
        self.projects
            .iter()
            .find(|p| p.project_name == project_name)
            .ok_or_else(|| ConfigError::UnknownProject(project_name.to_string()))
    }
}
