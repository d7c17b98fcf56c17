use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::Deserialize;

use crate::backend::Dialect;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Version string announced in the server greeting
    #[serde(default = "default_server_version")]
    pub server_version: String,
    /// TLS is offered to clients only when this is set
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    3306
}

fn default_server_version() -> String {
    "8.0.31".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            server_version: default_server_version(),
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Address string (addr:port) to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}

/// PEM certificate chain and private key
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default = "default_instance")]
    pub instance: String,
    /// host:port of a non-default endpoint, such as an emulator
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Database used when the client does not name one
    #[serde(default)]
    pub default_database: Option<String>,
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// Extra connection properties, appended as `;key=value`
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Test-only channel provider override
    #[serde(default)]
    pub channel_provider: Option<String>,
    /// Full connection URL; replaces project/instance/database when set
    #[serde(default)]
    pub default_connection_url: Option<String>,
    #[serde(default)]
    pub memory: MemoryBackendConfig,
}

/// Shape of the in-memory backend used for local runs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryBackendConfig {
    /// Databases that exist; empty accepts any name
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub dialect: Dialect,
}

fn default_project() -> String {
    "local-project".to_string()
}

fn default_instance() -> String {
    "local-instance".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            instance: default_instance(),
            endpoint: None,
            default_database: None,
            credentials_file: None,
            properties: BTreeMap::new(),
            channel_provider: None,
            default_connection_url: None,
            memory: MemoryBackendConfig::default(),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Accepted client accounts. With no users configured every client is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub name: String,
    #[serde(default)]
    pub password: String,
}

impl AuthConfig {
    pub fn is_enabled(&self) -> bool {
        !self.users.is_empty()
    }

    pub fn find_user(&self, name: &str) -> Option<&UserConfig> {
        self.users.iter().find(|user| user.name == name)
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Replaces the built-in system variable definitions
    #[serde(default)]
    pub system_variables_file: Option<PathBuf>,
    /// Extra query translations, JSON
    #[serde(default)]
    pub translation_file: Option<PathBuf>,
    /// Global values applied to the variable template at startup
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_addr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:3306");
        assert_eq!(config.backend.project, "local-project");
        assert!(config.backend.memory.databases.is_empty());
        assert_eq!(config.backend.memory.dialect, Dialect::GoogleStandardSql);
        assert!(!config.auth.is_enabled());
        assert!(!config.metrics.enabled);
        assert!(config.server.tls.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
listen_addr = "0.0.0.0"
listen_port = 3307
server_version = "8.0.36"

[server.tls]
cert_path = "certs/server.pem"
key_path = "certs/server.key"

[backend]
project = "acme"
instance = "prod"
endpoint = "localhost:9010"
default_database = "orders"

[backend.properties]
autoConfigEmulator = "true"

[backend.memory]
databases = ["orders", "audit"]
dialect = "POSTGRESQL"

[[auth.users]]
name = "app"
password = "secret"

[session]
translation_file = "translations.json"

[session.overrides]
version_comment = "edge"

[metrics]
enabled = true
listen_addr = "0.0.0.0:9100"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:3307");
        assert_eq!(config.server.server_version, "8.0.36");
        assert_eq!(
            config.server.tls.unwrap().key_path,
            PathBuf::from("certs/server.key")
        );
        assert_eq!(config.backend.instance, "prod");
        assert_eq!(config.backend.default_database.as_deref(), Some("orders"));
        assert_eq!(config.backend.properties["autoConfigEmulator"], "true");
        assert_eq!(config.backend.memory.databases, vec!["orders", "audit"]);
        assert_eq!(config.backend.memory.dialect, Dialect::PostgreSql);
        assert_eq!(config.auth.find_user("app").unwrap().password, "secret");
        assert!(config.auth.find_user("other").is_none());
        assert_eq!(config.session.overrides["version_comment"], "edge");
        assert!(config.metrics.enabled);
    }
}
