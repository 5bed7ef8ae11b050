//! Tracing subscriber setup.

use std::fs::File;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::{ConfigError, FileAction, LogFormat, LoggingConfig};

/// Install a global tracing subscriber for `config`.
///
/// Returns `false` when a global subscriber is already installed; the
/// existing one is kept.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = parse_filter(&config.level)?;
    let builder = FmtSubscriber::builder().with_env_filter(filter);

    let installed = match (&config.file, config.format) {
        (Some(path), format) => {
            let file = File::create(path).map_err(|e| ConfigError::file(FileAction::Write, path, e))?;
            let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
            match format {
                LogFormat::Text => builder.try_init(),
                LogFormat::Json => builder.json().try_init(),
            }
        }
        (None, LogFormat::Text) => builder.with_writer(std::io::stderr).try_init(),
        (None, LogFormat::Json) => builder
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .try_init(),
    };

    if installed.is_err() {
        debug!("Using existing tracing subscriber");
    }
    Ok(installed.is_ok())
}

fn parse_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(level).map_err(|e| ConfigError::InvalidLogFilter {
        filter: level.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("warn,contentmap_core=debug").is_ok());

        let err = parse_filter("contentmap_core=loud").unwrap_err();
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn test_init_logging_to_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = LoggingConfig {
            file: Some(temp.path().join("contentmap.log")),
            ..Default::default()
        };

        // Another test may already have installed a subscriber.
        init_logging(&config).unwrap();
        assert!(temp.path().join("contentmap.log").exists());
    }
}
