//! Application Configuration
//!
//! Describes the hosted extensions and the connections between them, as
//! loaded from an `app.toml` file:
//!
//! ```toml
//! [app]
//! start_timeout_ms = 5000
//!
//! [[extensions]]
//! name = "ext_a"
//! addon = "relay"
//! property = { factor = 3 }
//!
//! [[connections]]
//! from = "ext_a"
//! kind = "cmd"
//! name = "hello_*"
//! to = ["ext_b"]
//! ```

use std::collections::HashSet;
use std::path::Path;

use aptima_bridge::MsgKind;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Duplicate extension name: {0}")]
    DuplicateExtension(String),

    #[error("Connection references unknown extension: {0}")]
    UnknownExtension(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application manifest (app.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub extensions: Vec<ExtensionConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// How long `App::start` waits for every extension to reach started
    #[serde(default = "default_start_timeout")]
    pub start_timeout_ms: u64,
    /// How long an extension may take to signal stop done
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_deinit_timeout")]
    pub deinit_timeout_ms: u64,
    /// Capacity of each extension's event queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_start_timeout() -> u64 {
    5000
}

fn default_stop_timeout() -> u64 {
    3000
}

fn default_deinit_timeout() -> u64 {
    3000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_log_filter() -> String {
    "aptima_runtime=info,aptima_bridge=info".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            start_timeout_ms: default_start_timeout(),
            stop_timeout_ms: default_stop_timeout(),
            deinit_timeout_ms: default_deinit_timeout(),
            queue_capacity: default_queue_capacity(),
            log_filter: default_log_filter(),
        }
    }
}

/// One hosted extension instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionConfig {
    pub name: String,
    pub addon: String,
    /// Initial properties, handed to the extension as a JSON object
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub property: serde_json::Value,
}

/// Kind of message a connection carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Cmd,
    Data,
    VideoFrame,
    AudioFrame,
}

impl ConnectionKind {
    pub fn matches(&self, kind: MsgKind) -> bool {
        matches!(
            (self, kind),
            (ConnectionKind::Cmd, MsgKind::Cmd)
                | (ConnectionKind::Data, MsgKind::Data)
                | (ConnectionKind::VideoFrame, MsgKind::VideoFrame)
                | (ConnectionKind::AudioFrame, MsgKind::AudioFrame)
        )
    }
}

/// Route from one extension to others for messages whose name matches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub from: String,
    pub kind: ConnectionKind,
    /// Glob pattern over message names
    #[serde(default = "default_name_pattern")]
    pub name: String,
    pub to: Vec<String>,
}

fn default_name_pattern() -> String {
    "*".to_string()
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate an application manifest
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content)?;
        info!(
            "Loaded app config from {}: {} extensions, {} connections",
            path.display(),
            config.extensions.len(),
            config.connections.len()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_settings(mut self, settings: AppSettings) -> Self {
        self.app = settings;
        self
    }

    pub fn with_extension(mut self, name: &str, addon: &str) -> Self {
        self.extensions.push(ExtensionConfig {
            name: name.to_string(),
            addon: addon.to_string(),
            property: serde_json::Value::Null,
        });
        self
    }

    /// Add an extension with initial properties
    pub fn with_extension_property(
        mut self,
        name: &str,
        addon: &str,
        property: serde_json::Value,
    ) -> Self {
        self.extensions.push(ExtensionConfig {
            name: name.to_string(),
            addon: addon.to_string(),
            property,
        });
        self
    }

    pub fn connect(mut self, from: &str, kind: ConnectionKind, name: &str, to: &[&str]) -> Self {
        self.connections.push(ConnectionConfig {
            from: from.to_string(),
            kind,
            name: name.to_string(),
            to: to.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn extension(&self, name: &str) -> Option<&ExtensionConfig> {
        self.extensions.iter().find(|e| e.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for ext in &self.extensions {
            if ext.name.is_empty() || ext.addon.is_empty() {
                return Err(ConfigError::Invalid(
                    "extension name and addon must not be empty".into(),
                ));
            }
            if !names.insert(ext.name.as_str()) {
                return Err(ConfigError::DuplicateExtension(ext.name.clone()));
            }
            if !(ext.property.is_null() || ext.property.is_object()) {
                return Err(ConfigError::Invalid(format!(
                    "property of {} must be a table",
                    ext.name
                )));
            }
        }

        for conn in &self.connections {
            for endpoint in std::iter::once(&conn.from).chain(conn.to.iter()) {
                if !names.contains(endpoint.as_str()) {
                    return Err(ConfigError::UnknownExtension(endpoint.clone()));
                }
            }
            if conn.to.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "connection from {} has no destination",
                    conn.from
                )));
            }
        }

        if self.app.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFEST: &str = r#"
[app]
start_timeout_ms = 1000

[[extensions]]
name = "ext_a"
addon = "relay"
property = { factor = 3, label = "a" }

[[extensions]]
name = "ext_b"
addon = "relay"

[[connections]]
from = "ext_a"
kind = "cmd"
name = "hello_*"
to = ["ext_b"]

[[connections]]
from = "ext_b"
kind = "data"
to = ["ext_a"]
"#;

    #[test]
    fn test_parse_manifest() {
        let config = AppConfig::from_toml_str(MANIFEST).unwrap();
        assert_eq!(config.app.start_timeout_ms, 1000);
        assert_eq!(config.app.stop_timeout_ms, 3000);
        assert_eq!(config.extensions.len(), 2);
        assert_eq!(config.extensions[0].property["factor"], 3);
        assert!(config.extensions[1].property.is_null());
        assert_eq!(config.connections[0].kind, ConnectionKind::Cmd);
        assert_eq!(config.connections[1].name, "*");
    }

    #[test]
    fn test_duplicate_extension() {
        let config = AppConfig::new()
            .with_extension("a", "x")
            .with_extension("a", "y");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateExtension(name)) if name == "a"
        ));
    }

    #[test]
    fn test_unknown_endpoint() {
        let config = AppConfig::new()
            .with_extension("a", "x")
            .connect("a", ConnectionKind::Cmd, "*", &["ghost"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownExtension(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_scalar_property_rejected() {
        let config = AppConfig::new().with_extension_property("a", "x", serde_json::json!(5));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_kind_matches() {
        assert!(ConnectionKind::VideoFrame.matches(MsgKind::VideoFrame));
        assert!(!ConnectionKind::Data.matches(MsgKind::Cmd));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).await.unwrap();
        assert!(config.extension("ext_b").is_some());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(dir.path().join("app.toml")).await;
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
