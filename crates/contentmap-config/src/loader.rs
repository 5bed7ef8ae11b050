//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.contentmap/config.toml`
//! 2. Local config: `.contentmap/config.toml` (in the site root)
//! 3. Overrides
//!
//! Later sources override earlier ones.

use crate::error::{ConfigError, FileAction};
use crate::{
    CacheConfig, ConfigOverrides, ContentMapConfig, LoggingConfig, ScopeConfig, SolutionsConfig,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name.
const GLOBAL_CONFIG_DIR: &str = ".contentmap";

/// Local configuration directory name.
const LOCAL_CONFIG_DIR: &str = ".contentmap";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.contentmap`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config
    global_config: Option<PartialConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.contentmap`).
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR));

        Self {
            global_config_dir,
            global_config: None,
        }
    }

    /// Create a loader with a custom global config directory.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_config: None,
        }
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path for a site.
    pub fn local_config_path(&self, site_root: &Path) -> PathBuf {
        site_root.join(LOCAL_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load configuration for a site with optional overrides.
    ///
    /// Merges config in order: global → local → overrides, and validates
    /// the result.
    pub fn load(
        &mut self,
        site_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<ContentMapConfig, ConfigError> {
        let mut config = ContentMapConfig::default();

        if let Some(global_config) = self.load_global_partial()? {
            config = global_config.apply_to(config);
        }

        if let Some(local_config) = self.load_local_partial(site_root)? {
            config = local_config.apply_to(config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load only the global configuration.
    pub fn load_global(&mut self) -> Result<Option<ContentMapConfig>, ConfigError> {
        Ok(self
            .load_global_partial()?
            .map(|partial| partial.apply_to(ContentMapConfig::default())))
    }

    /// Load only the local configuration for a site.
    pub fn load_local(&self, site_root: &Path) -> Result<Option<ContentMapConfig>, ConfigError> {
        Ok(self
            .load_local_partial(site_root)?
            .map(|partial| partial.apply_to(ContentMapConfig::default())))
    }

    fn load_global_partial(&mut self) -> Result<Option<PartialConfig>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        let config = load_config_file(&global_path)?;
        self.global_config = Some(config.clone());

        Ok(Some(config))
    }

    fn load_local_partial(&self, site_root: &Path) -> Result<Option<PartialConfig>, ConfigError> {
        let local_path = self.local_config_path(site_root);

        if !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }

    /// Save configuration to the global config file.
    pub fn save_global(&self, config: &ContentMapConfig) -> Result<(), ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        let global_path = global_dir.join(CONFIG_FILE_NAME);
        save_config_file(&global_path, config)
    }

    /// Save configuration to the local config file for a site.
    pub fn save_local(
        &self,
        site_root: &Path,
        config: &ContentMapConfig,
    ) -> Result<(), ConfigError> {
        let local_path = self.local_config_path(site_root);
        save_config_file(&local_path, config)
    }

    /// Initialize global configuration directory.
    ///
    /// Creates `~/.contentmap/config.toml` with default configuration.
    pub fn init_global(&self) -> Result<PathBuf, ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };
        init_config_file(global_dir)
    }

    /// Initialize local configuration for a site.
    ///
    /// Creates `.contentmap/config.toml` with default configuration.
    pub fn init_local(&self, site_root: &Path) -> Result<PathBuf, ConfigError> {
        init_config_file(&site_root.join(LOCAL_CONFIG_DIR))
    }

    /// Clear cached global configuration.
    ///
    /// Forces reload on next `load_global()` call.
    pub fn clear_cache(&mut self) {
        self.global_config = None;
    }
}

// ============================================================================
// Partial configuration
// ============================================================================

/// A configuration file as written, before defaults are applied.
///
/// Only the keys present in the file override the configuration below it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PartialConfig {
    cache: PartialCache,
    solutions: PartialSolutions,
    scope: ScopeConfig,
    logging: PartialLogging,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PartialCache {
    lock_timeout_secs: Option<u64>,
    parallelism: Option<usize>,
    load_on_startup: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PartialSolutions {
    installed: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PartialLogging {
    level: Option<String>,
    format: Option<crate::LogFormat>,
    file: Option<PathBuf>,
}

impl PartialConfig {
    /// Overlay this file onto `base`.
    fn apply_to(self, base: ContentMapConfig) -> ContentMapConfig {
        ContentMapConfig {
            cache: merge_cache(base.cache, self.cache),
            solutions: merge_solutions(base.solutions, self.solutions),
            scope: merge_scope(base.scope, self.scope),
            logging: merge_logging(base.logging, self.logging),
        }
    }
}

/// Merge cache config, overlay values override base.
fn merge_cache(base: CacheConfig, overlay: PartialCache) -> CacheConfig {
    CacheConfig {
        lock_timeout_secs: overlay.lock_timeout_secs.unwrap_or(base.lock_timeout_secs),
        parallelism: overlay.parallelism.unwrap_or(base.parallelism),
        load_on_startup: overlay.load_on_startup.unwrap_or(base.load_on_startup),
    }
}

/// Merge solutions; an overlay that lists solutions replaces the installed set.
fn merge_solutions(base: SolutionsConfig, overlay: PartialSolutions) -> SolutionsConfig {
    SolutionsConfig {
        installed: overlay.installed.unwrap_or(base.installed),
    }
}

fn merge_scope(base: ScopeConfig, overlay: ScopeConfig) -> ScopeConfig {
    ScopeConfig {
        website_id: overlay.website_id.or(base.website_id),
    }
}

/// Merge logging config.
fn merge_logging(base: LoggingConfig, overlay: PartialLogging) -> LoggingConfig {
    LoggingConfig {
        level: overlay.level.unwrap_or(base.level),
        format: overlay.format.unwrap_or(base.format),
        file: overlay.file.or(base.file),
    }
}

/// Load a configuration file from disk.
fn load_config_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::file(FileAction::Read, path, e))?;

    toml::from_str(&content).map_err(|e| ConfigError::parse(path, e))
}

/// Save a configuration file to disk.
fn save_config_file(path: &Path, config: &ContentMapConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::file(FileAction::CreateDir, parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::file(FileAction::Write, path, e))
}

/// Create `<dir>/config.toml` with default configuration unless it exists.
fn init_config_file(dir: &Path) -> Result<PathBuf, ConfigError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::file(FileAction::CreateDir, dir, e))?;
    }

    let config_path = dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        save_config_file(&config_path, &ContentMapConfig::default())?;
    }

    Ok(config_path)
}
