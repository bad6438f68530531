//! Poller configuration loading.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use wijkagent_ingest_models::PollerConfig;

/// Path of a TOML configuration file.
pub const CONFIG_ENV: &str = "WIJKAGENT_CONFIG";
/// Feed endpoint.
pub const FEED_URL_ENV: &str = "WIJKAGENT_FEED_URL";
/// `DuckDB` file path.
pub const DB_PATH_ENV: &str = "WIJKAGENT_DB_PATH";
/// Seconds between poll ticks.
pub const POLL_INTERVAL_ENV: &str = "WIJKAGENT_POLL_INTERVAL_SECS";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`PollerConfig`].
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is missing or malformed.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub api_url: Option<String>,
    pub database_path: Option<PathBuf>,
    pub poll_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub service: Option<String>,
}

/// Loads configuration from the process environment and `overrides`.
///
/// # Errors
///
/// Returns [`ConfigError`] if the configuration file cannot be read or
/// parsed, or an environment variable is malformed.
pub fn load(overrides: &ConfigOverrides) -> Result<PollerConfig, ConfigError> {
    load_with_env(overrides, |key| std::env::var(key).ok())
}

/// Loads configuration, reading environment variables through `env`.
///
/// # Errors
///
/// Returns [`ConfigError`] if the configuration file cannot be read or
/// parsed, or an environment variable is malformed.
pub fn load_with_env(
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PollerConfig, ConfigError> {
    let file = overrides
        .config_path
        .clone()
        .or_else(|| env(CONFIG_ENV).map(PathBuf::from));

    let mut config = match file {
        Some(path) => {
            log::debug!("Reading configuration from {}", path.display());
            from_file(&path)?
        }
        None => PollerConfig::default(),
    };

    if let Some(url) = env(FEED_URL_ENV).filter(|v| !v.trim().is_empty()) {
        config.api_url = Some(url);
    }
    if let Some(path) = env(DB_PATH_ENV).filter(|v| !v.trim().is_empty()) {
        config.database_path = Some(PathBuf::from(path));
    }
    if let Some(secs) = env(POLL_INTERVAL_ENV) {
        config.poll_interval_secs = secs.trim().parse().map_err(|e| ConfigError::Invalid {
            message: format!("{POLL_INTERVAL_ENV}={secs:?}: {e}"),
        })?;
    }

    if let Some(url) = &overrides.api_url {
        config.api_url = Some(url.clone());
    }
    if let Some(path) = &overrides.database_path {
        config.database_path = Some(path.clone());
    }
    if let Some(secs) = overrides.poll_interval_secs {
        config.poll_interval_secs = secs;
    }
    if let Some(secs) = overrides.request_timeout_secs {
        config.request_timeout_secs = secs;
    }
    if let Some(service) = &overrides.service {
        config.service.clone_from(service);
    }

    Ok(config)
}

/// Reads a [`PollerConfig`] from a TOML file. Missing keys take their
/// defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Toml`] if it does not parse.
pub fn from_file(path: &Path) -> Result<PollerConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

/// The configured feed endpoint.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if no endpoint is configured.
pub fn require_api_url(config: &PollerConfig) -> Result<&str, ConfigError> {
    config
        .api_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!(
                "no feed URL configured; set api_url in the config file, {FEED_URL_ENV}, or --url"
            ),
        })
}

/// The configured database path, or the default data directory location.
#[must_use]
pub fn database_path(config: &PollerConfig) -> PathBuf {
    config
        .database_path
        .clone()
        .unwrap_or_else(wijkagent_database::paths::default_database_path)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("wijkagent_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_without_any_source() {
        let config = load_with_env(&ConfigOverrides::default(), env_of(&[])).unwrap();
        assert_eq!(config, PollerConfig::default());
        assert!(require_api_url(&config).is_err());
    }

    #[test]
    fn file_then_env_then_flags() {
        let path = write_config(
            "layers.toml",
            "api_url = \"https://file.test/feed\"\npoll_interval_secs = 30\nservice = \"Brandweer\"\n",
        );

        let from_file = load_with_env(
            &ConfigOverrides {
                config_path: Some(path.clone()),
                ..ConfigOverrides::default()
            },
            env_of(&[]),
        )
        .unwrap();
        assert_eq!(require_api_url(&from_file).unwrap(), "https://file.test/feed");
        assert_eq!(from_file.poll_interval_secs, 30);
        assert_eq!(from_file.service, "Brandweer");

        let env = env_of(&[
            (CONFIG_ENV, path.to_str().unwrap()),
            (FEED_URL_ENV, "https://env.test/feed"),
            (POLL_INTERVAL_ENV, "15"),
        ]);
        let with_env = load_with_env(&ConfigOverrides::default(), &env).unwrap();
        assert_eq!(with_env.api_url.as_deref(), Some("https://env.test/feed"));
        assert_eq!(with_env.poll_interval_secs, 15);
        assert_eq!(with_env.service, "Brandweer");

        let with_flags = load_with_env(
            &ConfigOverrides {
                api_url: Some("https://flag.test/feed".to_string()),
                poll_interval_secs: Some(5),
                ..ConfigOverrides::default()
            },
            &env,
        )
        .unwrap();
        assert_eq!(with_flags.api_url.as_deref(), Some("https://flag.test/feed"));
        assert_eq!(with_flags.poll_interval_secs, 5);
    }

    #[test]
    fn malformed_interval_env_is_invalid() {
        let err = load_with_env(
            &ConfigOverrides::default(),
            env_of(&[(POLL_INTERVAL_ENV, "soon")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_file_is_toml_error() {
        let path = write_config("broken.toml", "api_url = ");
        let err = from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("wijkagent_config_test_missing.toml");
        assert!(matches!(from_file(&path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn blank_url_is_not_configured() {
        let config = PollerConfig {
            api_url: Some("  ".to_string()),
            ..PollerConfig::default()
        };
        assert!(matches!(
            require_api_url(&config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn database_path_defaults_to_data_dir() {
        let config = PollerConfig::default();
        assert!(database_path(&config).ends_with("data/wijkagent.duckdb"));

        let config = PollerConfig {
            database_path: Some(PathBuf::from("/tmp/other.duckdb")),
            ..PollerConfig::default()
        };
        assert_eq!(database_path(&config), PathBuf::from("/tmp/other.duckdb"));
    }
}
