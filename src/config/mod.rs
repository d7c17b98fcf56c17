mod schema;

pub use schema::*;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "SPANWIRE_CONFIG";

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/spanwire.toml", "spanwire.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Config file to load: `$SPANWIRE_CONFIG`, else the first default path that exists
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

impl Config {
    /// Checks serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for user in &self.auth.users {
            if user.name.is_empty() {
                return Err(ConfigError::Invalid("auth.users entry with empty name".into()));
            }
            if !seen.insert(user.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "auth user '{}' is configured twice",
                    user.name
                )));
            }
        }
        if self.backend.default_connection_url.is_none()
            && (self.backend.project.is_empty() || self.backend.instance.is_empty())
        {
            return Err(ConfigError::Invalid(
                "backend.project and backend.instance must be set without backend.default_connection_url".into(),
            ));
        }
        Ok(())
    }
}
