//! Configuration error types.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// File operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Read,
    Write,
    CreateDir,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileAction::Read => f.write_str("read"),
            FileAction::Write => f.write_str("write"),
            FileAction::CreateDir => f.write_str("create directory"),
        }
    }
}

/// Errors raised while loading, validating or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot {action} '{path}': {source}")]
    File {
        action: FileAction,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{path}' is not a valid config file: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    /// The global config directory lives under the home directory.
    #[error("no home directory for the global config")]
    NoHomeDir,

    #[error("cache.lock_timeout_secs must be greater than 0")]
    ZeroLockTimeout,

    #[error("no solutions installed; PortalBase is required")]
    NoSolutions,

    #[error("solutions.installed.{solution}: '{version}' is not a version (expected major.minor[.build[.revision]])")]
    InvalidSolutionVersion { solution: String, version: String },

    #[error("invalid logging.level filter '{filter}': {message}")]
    InvalidLogFilter { filter: String, message: String },

    #[error("unknown log format '{0}' (expected text or json)")]
    UnknownLogFormat(String),
}

impl ConfigError {
    pub fn file(action: FileAction, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_solution_version(solution: impl Into<String>, version: impl Into<String>) -> Self {
        Self::InvalidSolutionVersion {
            solution: solution.into(),
            version: version.into(),
        }
    }

    /// Whether the file exists but could not be used as configuration
    pub fn is_invalid_file(&self) -> bool {
        matches!(self, ConfigError::Parse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solution_version_message() {
        let err = ConfigError::invalid_solution_version("PortalBlogs", "nine");
        assert_eq!(
            err.to_string(),
            "solutions.installed.PortalBlogs: 'nine' is not a version (expected major.minor[.build[.revision]])"
        );
    }

    #[test]
    fn test_file_error_keeps_source() {
        let source = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err = ConfigError::file(FileAction::Read, "/tmp/config.toml", source);
        assert!(err.to_string().starts_with("cannot read '/tmp/config.toml'"));
        assert!(std::error::Error::source(&err).is_some());

        let source = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = ConfigError::file(FileAction::CreateDir, "/etc/contentmap", source);
        assert!(err.to_string().starts_with("cannot create directory"));
    }
}
