//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration. Every section is optional; accessors fall back to
/// section defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkiffConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datalog: Option<DatalogConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<TopicConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl SkiffConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: SkiffConfig) {
        if other.datalog.is_some() {
            self.datalog = other.datalog;
        }
        if other.retry.is_some() {
            self.retry = other.retry;
        }
        if other.topic.is_some() {
            self.topic = other.topic;
        }
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    pub fn datalog(&self) -> DatalogConfig {
        self.datalog.clone().unwrap_or_default()
    }

    pub fn retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub fn topic(&self) -> TopicConfig {
        self.topic.clone().unwrap_or_default()
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Datalog
// ─────────────────────────────────────────────────────────────────────────────

/// Query service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatalogConfig {
    /// Explicit endpoint; wins over `staging`.
    pub endpoint: Option<String>,
    /// Use the staging endpoint.
    pub staging: bool,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            staging: false,
            timeout_secs: 30,
        }
    }
}

impl DatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry
// ─────────────────────────────────────────────────────────────────────────────

/// Backoff settings for outbound calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total tries, including the first.
    pub attempts: u32,
    pub factor: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            factor: 3.0,
            min_delay_ms: 500,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Topic
// ─────────────────────────────────────────────────────────────────────────────

/// Message-bus settings for status and transaction messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Response topic; when unset, statuses go over HTTP.
    pub name: Option<String>,
    pub project_id: String,
    pub base_url: Option<String>,
    pub token: Option<String>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            name: None,
            project_id: "atomist-skill-production".to_string(),
            base_url: None,
            token: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP front end settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// `bind:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Also write JSON logs to a daily rolling file.
    pub json_file: bool,
    /// Directory for the JSON log files.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_file: false,
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SkiffConfig::from_toml("").unwrap();
        assert_eq!(config, SkiffConfig::default());
        assert_eq!(config.retry().attempts, 5);
        assert_eq!(config.retry().min_delay(), Duration::from_millis(500));
        assert_eq!(config.datalog().timeout(), Duration::from_secs(30));
        assert_eq!(config.server().address(), "0.0.0.0:8080");
        assert_eq!(config.topic().project_id, "atomist-skill-production");
    }

    #[test]
    fn test_partial_sections() {
        let config = SkiffConfig::from_toml(
            r#"
[datalog]
staging = true

[retry]
attempts = 2
jitter = false
"#,
        )
        .unwrap();
        let datalog = config.datalog();
        assert!(datalog.staging);
        assert_eq!(datalog.timeout_secs, 30);
        let retry = config.retry();
        assert_eq!(retry.attempts, 2);
        assert!(!retry.jitter);
        assert_eq!(retry.factor, 3.0);
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = SkiffConfig::from_toml("[server]\nport = 9000\n[logging]\nlevel = \"debug\"").unwrap();
        base.merge(SkiffConfig::from_toml("[server]\nbind = \"127.0.0.1\"").unwrap());
        assert_eq!(base.server().address(), "127.0.0.1:8080");
        assert_eq!(base.logging().level, "debug");
    }

    #[test]
    fn test_toml_roundtrip_keeps_set_sections() {
        let config = SkiffConfig {
            topic: Some(TopicConfig {
                name: Some("T1-s1-response".to_string()),
                ..TopicConfig::default()
            }),
            ..SkiffConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert!(text.contains("[topic]"));
        assert!(!text.contains("[server]"));
        assert_eq!(SkiffConfig::from_toml(&text).unwrap(), config);
    }
}
