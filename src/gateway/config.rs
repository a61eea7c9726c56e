use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filestore::{DEFAULT_EXPIRATION_HOURS, FileStoreConfig, MAX_EXPIRATION_HOURS};
use crate::rewrite::DEFAULT_MAX_INLINE_BYTES;

pub const DEFAULT_UPSTREAM_PROVIDER: &str = "gemini";
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_API_VERSION: &str = "v1beta";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid toml config: {0}")]
    Toml(#[from] toml::de::Error),
    #[cfg(feature = "gateway-config-yaml")]
    #[error("invalid yaml config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesMode {
    #[default]
    Local,
    Upstream,
}

impl FilesMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Upstream => "upstream",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub mode: FilesMode,
    /// Empty resolves to `<cwd>/gemini-files`.
    #[serde(default)]
    pub storage_path: String,
    /// Non-positive values fall back to 48.
    #[serde(default = "default_expiration_hours")]
    pub expiration_hours: i64,
    /// Zero means unlimited.
    #[serde(default)]
    pub max_total_size_mb: u64,
    #[serde(default = "default_max_inline_bytes")]
    pub max_inline_bytes: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            enable: false,
            mode: FilesMode::Local,
            storage_path: String::new(),
            expiration_hours: default_expiration_hours(),
            max_total_size_mb: 0,
            max_inline_bytes: default_max_inline_bytes(),
        }
    }
}

impl FilesConfig {
    pub fn store_config(&self) -> FileStoreConfig {
        let expiration_hours = u32::try_from(self.expiration_hours)
            .ok()
            .filter(|hours| *hours > 0)
            .unwrap_or(DEFAULT_EXPIRATION_HOURS);
        FileStoreConfig::new(self.storage_path.trim())
            .with_expiration_hours(expiration_hours)
            .with_max_total_size_mb(self.max_total_size_mb)
    }
}

fn default_expiration_hours() -> i64 {
    i64::from(DEFAULT_EXPIRATION_HOURS)
}

fn default_max_inline_bytes() -> u64 {
    DEFAULT_MAX_INLINE_BYTES
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    /// Overrides [`UpstreamConfig::base_url`] for this credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("id", &self.id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "<redacted>"),
            )
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_version: default_api_version(),
            request_timeout_seconds: None,
            credentials: Vec::new(),
        }
    }
}

fn default_provider() -> String {
    DEFAULT_UPSTREAM_PROVIDER.to_string()
}

fn default_base_url() -> String {
    DEFAULT_UPSTREAM_BASE_URL.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            files: FilesConfig::default(),
            upstream: None,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl ServerConfig {
    /// Parses by file extension: `.json`, `.toml`, and `.yaml`/`.yml` with
    /// `gateway-config-yaml`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("json")
            .to_ascii_lowercase();
        let config = Self::parse(&raw, &extension)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str, format: &str) -> Result<Self, ConfigError> {
        match format {
            "json" => Ok(serde_json::from_str(raw)?),
            "toml" => Ok(toml::from_str(raw)?),
            #[cfg(feature = "gateway-config-yaml")]
            "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
            #[cfg(not(feature = "gateway-config-yaml"))]
            "yaml" | "yml" => Err(ConfigError::UnsupportedFormat(
                "yaml config requires `--features gateway-config-yaml`".to_string(),
            )),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.files.expiration_hours > i64::from(MAX_EXPIRATION_HOURS) {
            return Err(ConfigError::Invalid(format!(
                "files.expiration_hours must not exceed {MAX_EXPIRATION_HOURS}"
            )));
        }
        if let Some(upstream) = self.upstream.as_ref() {
            let mut seen = std::collections::BTreeSet::new();
            for credential in &upstream.credentials {
                let id = credential.id.trim();
                if id.is_empty() {
                    return Err(ConfigError::Invalid("credential id must not be empty".to_string()));
                }
                if !seen.insert(id) {
                    return Err(ConfigError::Invalid(format!("duplicate credential id: {id}")));
                }
                let has_secret = credential
                    .api_key
                    .as_deref()
                    .or(credential.bearer_token.as_deref())
                    .is_some_and(|secret| !secret.trim().is_empty());
                if !has_secret {
                    return Err(ConfigError::Invalid(format!(
                        "credential {id} needs api_key or bearer_token"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid listen address: {}", self.listen)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_config_fills_defaults() {
        let raw = r#"
listen = "0.0.0.0:9090"

[files]
enable = true
mode = "upstream"

[upstream]
credentials = [{ id = "c1", api_key = "AIza-test" }]
"#;
        let config = ServerConfig::parse(raw, "toml").expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.files.mode, FilesMode::Upstream);
        assert_eq!(config.files.expiration_hours, 48);
        assert_eq!(config.files.max_inline_bytes, DEFAULT_MAX_INLINE_BYTES);
        let upstream = config.upstream.expect("upstream");
        assert_eq!(upstream.provider, "gemini");
        assert_eq!(upstream.api_version, "v1beta");
        assert_eq!(upstream.credentials[0].id, "c1");
    }

    #[test]
    fn non_positive_retention_falls_back_to_default() {
        let files = FilesConfig {
            expiration_hours: -3,
            ..FilesConfig::default()
        };
        assert_eq!(files.store_config().expiration_hours, DEFAULT_EXPIRATION_HOURS);

        let files = FilesConfig {
            expiration_hours: 6,
            ..FilesConfig::default()
        };
        assert_eq!(files.store_config().expiration_hours, 6);
    }

    #[test]
    fn credential_debug_redacts_secrets() {
        let credential = CredentialConfig {
            id: "c1".to_string(),
            api_key: Some("AIza-secret".to_string()),
            bearer_token: None,
            base_url: None,
        };
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("AIza-secret"));
    }

    #[test]
    fn rejects_retention_beyond_the_supported_range() {
        let raw = r#"{"files":{"enable":true,"expiration_hours":100000000}}"#;
        let config = ServerConfig::parse(raw, "json").expect("parse");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_credentials_without_secret() {
        let raw = r#"{"upstream":{"credentials":[{"id":"c1"}]}}"#;
        let config = ServerConfig::parse(raw, "json").expect("parse");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
