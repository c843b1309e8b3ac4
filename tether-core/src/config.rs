//! # Service Configuration
//!
//! Static, process-lifetime description of the services a client talks to. It is usually
//! read from a JSON document:
//!
//! ```json
//! {
//!   "protosDir": "./descriptors",
//!   "baseUrl": "https://echo.example.com",
//!   "package": { "name": "my-app", "version": "1.2.0" },
//!   "protoServices": {
//!     "EchoService": { "path": "echo.bin", "service": "echo", "apiVersion": "v1" },
//!     "Legacy": "legacy.bin"
//!   }
//! }
//! ```
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("Invalid service config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Root directory holding the interface descriptions.
    pub protos_dir: PathBuf,
    /// Logical service name to the description it is loaded from.
    pub proto_services: BTreeMap<String, DescriptorRef>,
    /// Default endpoint for every service without its own `baseUrl`.
    pub base_url: String,
    pub package: PackageInfo,
    /// Static channel option overrides.
    #[serde(default)]
    pub grpc_options: ChannelOptions,
    /// Talk to a custom (plaintext) endpoint instead of resolving credentials.
    #[serde(default)]
    pub custom_endpoint: bool,
}

impl ServiceConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_json(&json)
    }

    /// The endpoint a service should be reached at.
    pub fn base_url_for(&self, service: &str) -> &str {
        match self.proto_services.get(service) {
            Some(DescriptorRef::Config(ProtoServiceConfig {
                base_url: Some(url),
                ..
            })) => url,
            _ => &self.base_url,
        }
    }
}

/// Where a service's interface description lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DescriptorRef {
    /// A bare description path; the whole description is the namespace.
    Path(PathBuf),
    Config(ProtoServiceConfig),
}

impl DescriptorRef {
    pub fn path(&self) -> &Path {
        match self {
            DescriptorRef::Path(path) => path,
            DescriptorRef::Config(config) => &config.path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtoServiceConfig {
    /// Description path, relative to [`ServiceConfig::protos_dir`].
    pub path: PathBuf,
    /// Package the service lives in (e.g. `google.datastore`).
    pub service: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Versioned sub-package (e.g. `v1`, `v2beta1`).
    #[serde(default)]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

impl PackageInfo {
    /// The user agent advertised on every channel.
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// Options applied to every channel a stub is built on.
///
/// A negative message length means "unlimited".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    pub max_send_message_length: i64,
    pub max_receive_message_length: i64,
    pub initial_reconnect_backoff_ms: u64,
    /// Set from the client's user agent when a stub is built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_user_agent: Option<String>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            max_send_message_length: -1,
            max_receive_message_length: -1,
            initial_reconnect_backoff_ms: 5000,
            primary_user_agent: None,
        }
    }
}

impl ChannelOptions {
    /// Merges a user agent under the primary-agent key with these overrides.
    pub fn with_user_agent(&self, user_agent: impl Into<String>) -> Self {
        Self {
            primary_user_agent: Some(user_agent.into()),
            ..self.clone()
        }
    }

    pub fn max_send_size(&self) -> usize {
        message_limit(self.max_send_message_length)
    }

    pub fn max_receive_size(&self) -> usize {
        message_limit(self.max_receive_message_length)
    }
}

fn message_limit(length: i64) -> usize {
    usize::try_from(length).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "protosDir": "/protos",
        "baseUrl": "https://default.example.com",
        "package": { "name": "my-app", "version": "1.2.0" },
        "grpcOptions": { "initial_reconnect_backoff_ms": 1000 },
        "protoServices": {
            "EchoService": {
                "path": "echo.bin",
                "service": "echo",
                "apiVersion": "v1",
                "baseUrl": "https://echo.example.com"
            },
            "Legacy": "legacy.bin"
        }
    }"#;

    #[test]
    fn parses_both_descriptor_forms() {
        let config = ServiceConfig::from_json(CONFIG).unwrap();

        assert_eq!(
            config.proto_services["Legacy"],
            DescriptorRef::Path("legacy.bin".into())
        );
        assert_eq!(
            config.proto_services["EchoService"],
            DescriptorRef::Config(ProtoServiceConfig {
                path: "echo.bin".into(),
                service: "echo".into(),
                base_url: Some("https://echo.example.com".into()),
                api_version: Some("v1".into()),
            })
        );
        assert!(!config.custom_endpoint);
    }

    #[test]
    fn channel_options_fall_back_to_defaults() {
        let config = ServiceConfig::from_json(CONFIG).unwrap();

        assert_eq!(config.grpc_options.initial_reconnect_backoff_ms, 1000);
        assert_eq!(config.grpc_options.max_send_message_length, -1);
        assert_eq!(config.grpc_options.max_receive_size(), usize::MAX);
    }

    #[test]
    fn base_url_override_is_per_service() {
        let config = ServiceConfig::from_json(CONFIG).unwrap();

        assert_eq!(config.base_url_for("EchoService"), "https://echo.example.com");
        assert_eq!(config.base_url_for("Legacy"), "https://default.example.com");
    }

    #[test]
    fn user_agent_is_merged_with_overrides() {
        let options = ChannelOptions {
            max_receive_message_length: 1024,
            ..Default::default()
        };

        let package = PackageInfo {
            name: "my-app".into(),
            version: "1.2.0".into(),
        };
        let merged = options.with_user_agent(package.user_agent());

        assert_eq!(merged.primary_user_agent.as_deref(), Some("my-app/1.2.0"));
        assert_eq!(merged.max_receive_size(), 1024);
        assert_eq!(merged.initial_reconnect_backoff_ms, 5000);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = ServiceConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read(..)));
    }
}
