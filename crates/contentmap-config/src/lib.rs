//! ContentMap Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.contentmap/config.toml`
//! - Local config: `.contentmap/config.toml` (in the site root)
//! - Programmatic overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → overrides.

mod error;
mod loader;
mod logging;

pub use error::{ConfigError, FileAction};
pub use loader::ConfigLoader;
pub use logging::init_logging;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Solution installed when no solutions are configured.
pub const DEFAULT_SOLUTION: &str = "PortalBase";

/// Version of the default solution.
pub const DEFAULT_SOLUTION_VERSION: &str = "9.0";

/// Root configuration for ContentMap.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ContentMapConfig {
    /// Cache configuration
    pub cache: CacheConfig,

    /// Installed solutions
    pub solutions: SolutionsConfig,

    /// Scope of the content map
    pub scope: ScopeConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Cache configuration.
///
/// # Example TOML
///
/// ```toml
/// [cache]
/// lock_timeout_secs = 60
/// parallelism = 4
/// load_on_startup = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds to wait for a read or write scope before failing
    pub lock_timeout_secs: u64,

    /// Threads used to fetch the initial map (0 = auto-detect)
    pub parallelism: usize,

    /// Build the map when the provider is created instead of on first access
    pub load_on_startup: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 60,
            parallelism: 0,
            load_on_startup: false,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_secs == 0 {
            return Err(ConfigError::ZeroLockTimeout);
        }
        Ok(())
    }
}

/// Installed solutions and their versions.
///
/// # Example TOML
///
/// ```toml
/// [solutions.installed]
/// PortalBase = "9.0.1.2"
/// PortalBlogs = "8.4"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SolutionsConfig {
    /// Solution name → version (`major.minor[.build[.revision]]`)
    pub installed: BTreeMap<String, String>,
}

impl Default for SolutionsConfig {
    fn default() -> Self {
        Self {
            installed: BTreeMap::from([(
                DEFAULT_SOLUTION.to_string(),
                DEFAULT_SOLUTION_VERSION.to_string(),
            )]),
        }
    }
}

impl SolutionsConfig {
    /// Validate that every installed version is well formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.installed.is_empty() {
            return Err(ConfigError::NoSolutions);
        }
        for (name, version) in &self.installed {
            if parse_version(version).is_none() {
                return Err(ConfigError::invalid_solution_version(name, version));
            }
        }
        Ok(())
    }
}

/// Parse a `major.minor[.build[.revision]]` version into `(major, minor)`.
///
/// Build and revision must be numbers but are otherwise ignored.
pub fn parse_version(value: &str) -> Option<(u32, u32)> {
    let parts = value
        .trim()
        .split('.')
        .map(|part| part.parse::<u32>().ok())
        .collect::<Option<Vec<u32>>>()?;
    match parts.as_slice() {
        [major, minor, ..] if parts.len() <= 4 => Some((*major, *minor)),
        _ => None,
    }
}

/// What the content map is built for.
///
/// # Example TOML
///
/// ```toml
/// [scope]
/// website_id = "7a2c0b4e-3f7e-4a55-9a43-3f0f1c2d9b11"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ScopeConfig {
    /// Restrict website-owned entities to this website
    pub website_id: Option<Uuid>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter (a level such as `info`, or directives such as `contentmap_core=debug`)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,

    /// Log file path (optional, defaults to stderr)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::UnknownLogFormat(s.to_string())),
        }
    }
}

/// Overrides for configuration values.
///
/// Applied over file-based config, e.g. from command-line arguments or the
/// host application.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override lock timeout
    pub lock_timeout_secs: Option<u64>,

    /// Override parallelism
    pub parallelism: Option<usize>,

    /// Override eager loading
    pub load_on_startup: Option<bool>,

    /// Override website scope
    pub website_id: Option<Uuid>,

    /// Override log level
    pub log_level: Option<String>,
}

impl ContentMapConfig {
    /// Apply overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(timeout) = overrides.lock_timeout_secs {
            self.cache.lock_timeout_secs = timeout;
        }

        if let Some(parallelism) = overrides.parallelism {
            self.cache.parallelism = parallelism;
        }

        if let Some(load_on_startup) = overrides.load_on_startup {
            self.cache.load_on_startup = load_on_startup;
        }

        if let Some(website_id) = overrides.website_id {
            self.scope.website_id = Some(website_id);
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.solutions.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = ContentMapConfig::default();
        assert_eq!(config.cache.lock_timeout_secs, 60);
        assert_eq!(config.cache.parallelism, 0);
        assert!(!config.cache.load_on_startup);
        assert_eq!(
            config.solutions.installed.get("PortalBase").map(String::as_str),
            Some("9.0")
        );
        assert_eq!(config.scope.website_id, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = ContentMapConfig::default();
        let website = Uuid::from_u128(42);
        let overrides = ConfigOverrides {
            lock_timeout_secs: Some(5),
            website_id: Some(website),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        config.apply_overrides(&overrides);

        assert_eq!(config.cache.lock_timeout_secs, 5);
        assert_eq!(config.cache.parallelism, 0);
        assert_eq!(config.scope.website_id, Some(website));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = ContentMapConfig::default();
        config.cache.lock_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache.lock_timeout_secs"));
    }

    #[test]
    fn test_validate_rejects_bad_version() {
        let mut config = ContentMapConfig::default();
        config
            .solutions
            .installed
            .insert("PortalBlogs".to_string(), "nine".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PortalBlogs"));

        config
            .solutions
            .installed
            .insert("PortalBlogs".to_string(), "9.0.1.2".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
            [cache]
            lock_timeout_secs = 30
            load_on_startup = true

            [solutions.installed]
            PortalBase = "8.4"
            PortalBlogs = "8.4"

            [scope]
            website_id = "00000000-0000-0000-0000-00000000002a"

            [logging]
            format = "json"
        "#;

        let config: ContentMapConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache.lock_timeout_secs, 30);
        assert_eq!(config.cache.parallelism, 0);
        assert!(config.cache.load_on_startup);
        assert_eq!(config.solutions.installed.len(), 2);
        assert_eq!(config.scope.website_id, Some(Uuid::from_u128(42)));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");

        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: ContentMapConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("9.0"), Some((9, 0)));
        assert_eq!(parse_version(" 8.2.1.45 "), Some((8, 2)));
        assert_eq!(parse_version("7"), None);
        assert_eq!(parse_version("9.x"), None);
        assert_eq!(parse_version("1.2.3.4.5"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_validate_rejects_no_solutions() {
        let mut config = ContentMapConfig::default();
        config.solutions.installed.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoSolutions)));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::Text.to_string(), "text");
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
