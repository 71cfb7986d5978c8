//! Config file discovery, layered merging and environment overrides.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/skiff/config.toml` (XDG user config)
//! 2. `./skiff.toml` (project-local)
//! 3. `SKIFF_*` environment variables
//! 4. CLI arguments (handled externally)

use std::path::{Path, PathBuf};

use crate::{ConfigError, DatalogConfig, LoggingConfig, Result, ServerConfig, SkiffConfig, TopicConfig};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "skiff.toml";

/// Default config filename within XDG config directory.
const USER_CONFIG_FILE: &str = "config.toml";

const APP_NAME: &str = "skiff";

/// Environment variable to override the config directory.
pub const CONFIG_DIR_ENV: &str = "SKIFF_CONFIG_DIR";

const ENDPOINT_ENV: &str = "SKIFF_DATALOG_ENDPOINT";
const STAGING_ENV: &str = "SKIFF_STAGING";
const TOPIC_ENV: &str = "SKIFF_TOPIC";
const LOG_LEVEL_ENV: &str = "SKIFF_LOG_LEVEL";
const PORT_ENV: &str = "PORT";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: SkiffConfig,
    /// Sources that were checked, in order of precedence (lowest first).
    pub sources: Vec<ConfigSource>,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<&'static str>,
    /// Problems that did not stop loading (unreadable layers, bad env values).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration from all layers, reading the process environment.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    let config_dir = xdg_config_dir();
    load_config_with(project_dir, config_dir.as_deref(), |var| std::env::var(var).ok())
}

/// Load configuration with an explicit user config directory and
/// environment lookup.
pub fn load_config_with<F>(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
    env: F,
) -> Result<LoadedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = SkiffConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    if let Some(dir) = config_dir {
        sources.push(load_layer(&mut config, &dir.join(USER_CONFIG_FILE), &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    let env_overrides = match apply_env_overrides(&mut config, &env) {
        Ok(applied) => applied,
        Err(e) => {
            warnings.push(e.to_string());
            Vec::new()
        }
    };

    for warning in &warnings {
        tracing::warn!(%warning, "Configuration warning");
    }

    Ok(LoadedConfig {
        config,
        sources,
        env_overrides,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<SkiffConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    SkiffConfig::from_toml(&contents)
}

/// Apply `SKIFF_*` overrides, returning the variables that were applied.
///
/// Values are validated before anything is changed; an invalid value leaves
/// the config untouched.
pub fn apply_env_overrides<F>(config: &mut SkiffConfig, env: F) -> Result<Vec<&'static str>>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |var: &str| env(var).filter(|v| !v.trim().is_empty());

    let staging = match read(STAGING_ENV) {
        Some(value) => Some(parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnv {
            var: STAGING_ENV.to_string(),
            value: value.clone(),
        })?),
        None => None,
    };
    let port = match read(PORT_ENV) {
        Some(value) => Some(value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnv {
            var: PORT_ENV.to_string(),
            value: value.clone(),
        })?),
        None => None,
    };

    let mut applied = Vec::new();
    if let Some(endpoint) = read(ENDPOINT_ENV) {
        config
            .datalog
            .get_or_insert_with(DatalogConfig::default)
            .endpoint = Some(endpoint);
        applied.push(ENDPOINT_ENV);
    }
    if let Some(staging) = staging {
        config.datalog.get_or_insert_with(DatalogConfig::default).staging = staging;
        applied.push(STAGING_ENV);
    }
    if let Some(topic) = read(TOPIC_ENV) {
        config.topic.get_or_insert_with(TopicConfig::default).name = Some(topic);
        applied.push(TOPIC_ENV);
    }
    if let Some(level) = read(LOG_LEVEL_ENV) {
        config.logging.get_or_insert_with(LoggingConfig::default).level = level;
        applied.push(LOG_LEVEL_ENV);
    }
    if let Some(port) = port {
        config.server.get_or_insert_with(ServerConfig::default).port = port;
        applied.push(PORT_ENV);
    }
    Ok(applied)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Get the XDG config file path for skiff.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the XDG config directory for skiff.
///
/// Checks `SKIFF_CONFIG_DIR` first, then falls back to the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Try to load a config file and merge it into the existing config.
fn load_layer(config: &mut SkiffConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    let loaded = match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            true
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            false
        }
    };
    ConfigSource {
        path: path.to_path_buf(),
        loaded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_no_files() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let loaded = load_config_with(Some(project.path()), Some(user.path()), no_env).unwrap();
        assert_eq!(loaded.config, SkiffConfig::default());
        assert!(loaded.loaded_from().is_empty());
        assert_eq!(loaded.sources.len(), 2);
    }

    #[test]
    fn test_project_overrides_user_config() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(
            user.path().join("config.toml"),
            r#"
[datalog]
endpoint = "https://user.example.com/datalog"

[server]
port = 9000
"#,
        )
        .unwrap();
        fs::write(project.path().join("skiff.toml"), "[server]\nport = 3000\n").unwrap();

        let loaded = load_config_with(Some(project.path()), Some(user.path()), no_env).unwrap();
        assert_eq!(loaded.loaded_from().len(), 2);
        assert_eq!(loaded.config.server().port, 3000);
        assert_eq!(
            loaded.config.datalog().endpoint.as_deref(),
            Some("https://user.example.com/datalog")
        );
    }

    #[test]
    fn test_malformed_layer_warns_but_continues() {
        let project = TempDir::new().unwrap();
        fs::write(project.path().join("skiff.toml"), "not valid toml {{{{").unwrap();

        let loaded = load_config_with(Some(project.path()), None, no_env).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("Failed to load"));
        assert!(loaded.loaded_from().is_empty());
    }

    #[test]
    fn test_env_overrides_win_over_files() {
        let project = TempDir::new().unwrap();
        fs::write(
            project.path().join("skiff.toml"),
            "[datalog]\nendpoint = \"https://file.example.com\"\ntimeout_secs = 10\n",
        )
        .unwrap();

        let env = env_of(&[
            ("SKIFF_DATALOG_ENDPOINT", "https://env.example.com"),
            ("SKIFF_STAGING", "yes"),
            ("SKIFF_TOPIC", "T1-s1-response"),
            ("SKIFF_LOG_LEVEL", "skiff=debug"),
            ("PORT", "8181"),
        ]);
        let loaded = load_config_with(Some(project.path()), None, env).unwrap();
        let config = &loaded.config;

        let datalog = config.datalog();
        assert_eq!(datalog.endpoint.as_deref(), Some("https://env.example.com"));
        assert!(datalog.staging);
        assert_eq!(datalog.timeout_secs, 10);
        assert_eq!(config.topic().name.as_deref(), Some("T1-s1-response"));
        assert_eq!(config.logging().level, "skiff=debug");
        assert_eq!(config.server().port, 8181);
        assert_eq!(loaded.env_overrides.len(), 5);
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let mut config = SkiffConfig::default();
        let err = apply_env_overrides(
            &mut config,
            env_of(&[("SKIFF_STAGING", "maybe"), ("SKIFF_TOPIC", "t")]),
        )
        .unwrap_err();
        match err {
            ConfigError::InvalidEnv { var, value } => {
                assert_eq!(var, "SKIFF_STAGING");
                assert_eq!(value, "maybe");
            }
            other => panic!("Expected InvalidEnv, got: {other:?}"),
        }
        assert_eq!(config, SkiffConfig::default());
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = SkiffConfig::default();
        let applied = apply_env_overrides(&mut config, env_of(&[("SKIFF_TOPIC", "  ")])).unwrap();
        assert!(applied.is_empty());
        assert!(config.topic.is_none());
    }
}
