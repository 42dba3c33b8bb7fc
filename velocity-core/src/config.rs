//! Configuration for the velocity service

use crate::VelocityError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Velocity Configuration

[warehouse]
# GCP project that owns the dataset (or set BIGQUERY_PROJECT_ID)
project_id = ""
# Dataset and table written by the Fivetran HubSpot connector
dataset = "hubspot"
table = "company"
# BigQuery REST endpoint
api_base = "https://bigquery.googleapis.com"
# Per-request timeout for warehouse calls
timeout = "30s"

[cache]
# Freshness window for aggregated metrics
ttl = "60s"
# Coalesce concurrent refreshes into one warehouse query
single_flight = false

[service]
bind = "127.0.0.1"
port = 3000
# "development" adds diagnostic details to error responses
environment = "production"
"#;

/// Freshness window used when `cache.ttl` is missing or unparseable.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

const DEFAULT_WAREHOUSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Velocity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Service-account or authorized-user JSON, verbatim.
    #[serde(default, skip_serializing)]
    pub service_account_key: Option<String>,
    /// Pre-issued OAuth bearer token.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl")]
    pub ttl: String,
    #[serde(default)]
    pub single_flight: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub environment: Environment,
}

/// Deployment mode. Development builds expose error diagnostics to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Self::Production),
            "development" | "dev" => Some(Self::Development),
            _ => None,
        }
    }
}

// Default value functions
fn default_dataset() -> String {
    "hubspot".to_string()
}
fn default_table() -> String {
    "company".to_string()
}
fn default_api_base() -> String {
    "https://bigquery.googleapis.com".to_string()
}
fn default_timeout() -> String {
    "30s".to_string()
}
fn default_ttl() -> String {
    "60s".to_string()
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            dataset: default_dataset(),
            table: default_table(),
            api_base: default_api_base(),
            location: None,
            timeout: default_timeout(),
            service_account_key: None,
            access_token: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            single_flight: false,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            environment: Environment::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| VelocityError::Configuration(e.to_string()))
    }

    /// Load the optional config file, then layer process environment on top.
    pub fn resolve(path: Option<&Path>) -> crate::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `BIGQUERY_*` / `VELOCITY_ENV` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("BIGQUERY_PROJECT_ID") {
            self.warehouse.project_id = v;
        }
        if let Some(v) = non_empty("BIGQUERY_DATASET") {
            self.warehouse.dataset = v;
        }
        if let Some(v) = non_empty("BIGQUERY_TABLE") {
            self.warehouse.table = v;
        }
        if let Some(v) = non_empty("BIGQUERY_API_BASE") {
            self.warehouse.api_base = v;
        }
        if let Some(v) = non_empty("BIGQUERY_SERVICE_ACCOUNT_KEY") {
            self.warehouse.service_account_key = Some(v);
        }
        if let Some(v) = non_empty("BIGQUERY_ACCESS_TOKEN") {
            self.warehouse.access_token = Some(v);
        }
        if let Some(env) = non_empty("VELOCITY_ENV").and_then(|v| Environment::parse(&v)) {
            self.service.environment = env;
        }
    }

    /// Check the warehouse coordinates before a client is built from them.
    pub fn validate(&self) -> crate::Result<()> {
        let wh = &self.warehouse;
        if wh.project_id.trim().is_empty() {
            return Err(VelocityError::Configuration(
                "warehouse.project_id is not set (BIGQUERY_PROJECT_ID)".to_string(),
            ));
        }
        for (name, value) in [
            ("project_id", &wh.project_id),
            ("dataset", &wh.dataset),
            ("table", &wh.table),
        ] {
            if !is_identifier(value) {
                return Err(VelocityError::Configuration(format!(
                    "warehouse.{} contains characters not allowed in a table path: {:?}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Get cache TTL as Duration
    pub fn ttl_duration(&self) -> Duration {
        parse_duration(&self.cache.ttl).unwrap_or(DEFAULT_CACHE_TTL)
    }

    /// Get warehouse request timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        parse_duration(&self.warehouse.timeout).unwrap_or(DEFAULT_WAREHOUSE_TIMEOUT)
    }

    pub fn is_development(&self) -> bool {
        self.service.environment == Environment::Development
    }
}

// Project ids may contain '-', datasets and tables only [A-Za-z0-9_]; accept the union.
fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse `<n>s|m|h|d` (e.g. "30s", "5m"). Unknown units and overflow yield `None`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (split, unit) = s.char_indices().last()?;
    let num: u64 = s[..split].parse().ok()?;

    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86_400,
        _ => return None,
    };
    num.checked_mul(scale).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.warehouse.dataset, "hubspot");
        assert_eq!(config.warehouse.table, "company");
        assert_eq!(config.service.port, 3000);
        assert_eq!(config.service.environment, Environment::Production);
        assert!(!config.cache.single_flight);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172800)));
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("s"), None);
    }

    #[test]
    fn test_parse_duration_rejects_without_panicking() {
        assert_eq!(parse_duration("5µ"), None);
        assert_eq!(parse_duration("µ"), None);
        assert_eq!(parse_duration("999999999999999999d"), None);
    }

    #[test]
    fn test_ttl_duration() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.ttl_duration(), DEFAULT_CACHE_TTL);

        let config = Config::from_toml("[cache]\nttl = \"soon\"\n").unwrap();
        assert_eq!(config.ttl_duration(), DEFAULT_CACHE_TTL);

        let config = Config::from_toml("[cache]\nttl = \"5µ\"\n").unwrap();
        assert_eq!(config.ttl_duration(), DEFAULT_CACHE_TTL);

        let config =
            Config::from_toml("[warehouse]\ntimeout = \"999999999999999999d\"\n").unwrap();
        assert_eq!(config.timeout_duration(), DEFAULT_WAREHOUSE_TIMEOUT);
    }

    #[test]
    fn test_env_overrides_win_over_file() {
        let mut config = Config::from_toml(
            "[warehouse]\nproject_id = \"from-file\"\ndataset = \"crm\"\n",
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("BIGQUERY_PROJECT_ID", "from-env"),
            ("BIGQUERY_SERVICE_ACCOUNT_KEY", "{\"type\":\"service_account\"}"),
            ("BIGQUERY_TABLE", "   "),
            ("VELOCITY_ENV", "development"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.warehouse.project_id, "from-env");
        assert_eq!(config.warehouse.dataset, "crm");
        // Blank values are ignored
        assert_eq!(config.warehouse.table, "company");
        assert!(config.warehouse.service_account_key.is_some());
        assert!(config.is_development());
    }

    #[test]
    fn test_validate_requires_project() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(VelocityError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_table_path_injection() {
        let mut config = Config::default();
        config.warehouse.project_id = "acme-prod".to_string();
        assert!(config.validate().is_ok());

        config.warehouse.table = "company` WHERE 1=1 --".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let mut config = Config::default();
        config.warehouse.access_token = Some("ya29.secret".to_string());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("ya29.secret"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("velocity.toml");
        std::fs::write(&path, "[service]\nport = 8088\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.service.port, 8088);
        assert_eq!(config.warehouse.api_base, "https://bigquery.googleapis.com");
    }
}
