//! Shared configuration helpers for services.
//!
//! A service config starts from its `Default`, is optionally replaced by a
//! YAML file named in `<PREFIX>CONFIG`, and is finally patched from
//! `<PREFIX>*` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Implemented by every service configuration struct.
pub trait ServiceConfig: DeserializeOwned + Default {
    /// Environment variable prefix, including the trailing underscore.
    const PREFIX: &'static str;

    /// Patch fields from `<prefix><KEY>` environment variables.
    fn apply_environment_overrides(&mut self, prefix: &str);
}

/// Load a service configuration from defaults, file and environment.
pub fn load<T: ServiceConfig>() -> Result<T, ConfigError> {
    let path = env_value(T::PREFIX, "CONFIG").map(PathBuf::from);
    load_from(path.as_deref())
}

/// Load a service configuration, reading `path` when given instead of
/// consulting `<PREFIX>CONFIG`.
pub fn load_from<T: ServiceConfig>(path: Option<&Path>) -> Result<T, ConfigError> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => T::default(),
    };
    config.apply_environment_overrides(T::PREFIX);
    Ok(config)
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "loaded config file");
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read `<prefix><key>`, treating an empty value as unset.
pub fn env_value(prefix: &str, key: &str) -> Option<String> {
    env::var(format!("{prefix}{key}"))
        .ok()
        .filter(|value| !value.is_empty())
}

/// Replace `target` with the string in `<prefix><key>` when it is set.
pub fn override_string(target: &mut String, prefix: &str, key: &str) {
    if let Some(value) = env_value(prefix, key) {
        *target = value;
    }
}

/// Replace `target` with the parsed value of `<prefix><key>`.
///
/// Values that fail to parse are logged and ignored so the previous value
/// stays in effect.
pub fn override_parsed<V>(target: &mut V, prefix: &str, key: &str)
where
    V: FromStr,
    V::Err: std::fmt::Display,
{
    let var = format!("{prefix}{key}");
    let Some(value) = env_value(prefix, key) else {
        return;
    };
    match value.parse::<V>() {
        Ok(parsed) => *target = parsed,
        Err(error) => {
            tracing::warn!(%var, %value, %error, "invalid override, keeping previous value");
        }
    }
}

/// Replace `target` with the comma separated list in `<prefix><key>`.
pub fn override_list(target: &mut Vec<String>, prefix: &str, key: &str) {
    if let Some(value) = env_value(prefix, key) {
        *target = value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct SampleConfig {
        name: String,
        port: u16,
        tags: Vec<String>,
    }

    impl Default for SampleConfig {
        fn default() -> Self {
            Self {
                name: "sample".to_string(),
                port: 9000,
                tags: vec!["a".to_string()],
            }
        }
    }

    impl ServiceConfig for SampleConfig {
        const PREFIX: &'static str = "COMMON_CONFIG_SAMPLE_";

        fn apply_environment_overrides(&mut self, prefix: &str) {
            override_string(&mut self.name, prefix, "NAME");
            override_parsed(&mut self.port, prefix, "PORT");
            override_list(&mut self.tags, prefix, "TAGS");
        }
    }

    // Each test uses its own prefix so they can run in parallel.
    #[test]
    fn defaults_apply_without_file_or_env() {
        let mut config = SampleConfig::default();
        config.apply_environment_overrides("COMMON_CONFIG_UNSET_");
        assert_eq!(config, SampleConfig::default());
    }

    #[test]
    fn environment_overrides_fields() {
        env::set_var("COMMON_CONFIG_ENV_NAME", "renamed");
        env::set_var("COMMON_CONFIG_ENV_PORT", "9100");
        env::set_var("COMMON_CONFIG_ENV_TAGS", "x, y,,z");

        let mut config = SampleConfig::default();
        config.apply_environment_overrides("COMMON_CONFIG_ENV_");

        assert_eq!(config.name, "renamed");
        assert_eq!(config.port, 9100);
        assert_eq!(config.tags, vec!["x", "y", "z"]);
    }

    #[test]
    fn invalid_numeric_override_keeps_previous_value() {
        env::set_var("COMMON_CONFIG_BAD_PORT", "not-a-port");

        let mut config = SampleConfig::default();
        config.apply_environment_overrides("COMMON_CONFIG_BAD_");

        assert_eq!(config.port, 9000);
    }

    #[test]
    fn yaml_file_is_read_and_missing_fields_default() {
        let path = env::temp_dir().join(format!("common-config-{}.yaml", std::process::id()));
        fs::write(&path, "name: from-file\nport: 7000\n").unwrap();

        let config: SampleConfig = load_from(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.name, "from-file");
        assert_eq!(config.port, 7000);
        assert_eq!(config.tags, vec!["a"]);
    }

    #[test]
    fn missing_file_is_reported() {
        let path = Path::new("/nonexistent/common-config.yaml");
        let err = load_from::<SampleConfig>(Some(path)).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_file_is_reported() {
        let path = env::temp_dir().join(format!("common-config-bad-{}.yaml", std::process::id()));
        fs::write(&path, "port: [unterminated\n").unwrap();

        let err = load_from::<SampleConfig>(Some(&path)).unwrap_err();
        fs::remove_file(&path).ok();

        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
