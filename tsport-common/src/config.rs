//! Configuration file resolution and loading
//!
//! Config path resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. `TSPORT_CONFIG` environment variable
//! 3. `<user config dir>/tsport/config.toml` if it exists
//! 4. None - compiled defaults are used
//!
//! A missing config file never terminates startup: a warning is logged and
//! built-in defaults apply. A file that exists but cannot be parsed is an error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TSPORT_CONFIG";

/// Logging configuration (`[logging]` table)
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolves which config file (if any) a binary should read
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    app_name: String,
}

impl ConfigResolver {
    /// Create a resolver; `app_name` names the per-user config subdirectory
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    /// Resolve the config file path using the priority order above
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = cli_arg {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        self.user_config_path().filter(|path| path.exists())
    }

    /// Per-user config file location for this platform
    pub fn user_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(&self.app_name).join("config.toml"))
    }
}

/// Load a TOML config file into `T`, falling back to `T::default()`
///
/// - `None` → defaults (no config file configured)
/// - path that does not exist → warning + defaults
/// - path that exists but does not parse → `Error::TomlParse`
pub fn load_toml<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file configured, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<T>(&content)?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Helper for validation code: build a `Config` error
pub fn invalid(message: impl Into<String>) -> Error {
    Error::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    struct Sample {
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert!(logging.file.is_none());
    }

    #[test]
    fn test_load_toml_none_uses_defaults() {
        let sample: Sample = load_toml(None).unwrap();
        assert_eq!(sample.logging, LoggingConfig::default());
    }

    #[test]
    fn test_load_toml_missing_file_uses_defaults() {
        let sample: Sample =
            load_toml(Some(Path::new("/nonexistent/tsport/config.toml"))).unwrap();
        assert_eq!(sample.logging.level, "info");
    }

    #[test]
    fn test_resolver_cli_argument_wins() {
        let resolver = ConfigResolver::new("tsport");
        let resolved = resolver.resolve(Some(Path::new("/tmp/explicit.toml")));
        assert_eq!(resolved, Some(PathBuf::from("/tmp/explicit.toml")));
    }
}
