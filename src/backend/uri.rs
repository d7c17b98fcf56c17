//! Backend connection URI construction.

use crate::config::BackendConfig;

use super::BackendError;

const URI_SCHEME: &str = "cloudspanner:";
const JDBC_PREFIX: &str = "jdbc:";

/// Build the connection URI for `database` from the configured backend options.
///
/// A configured default connection URL takes precedence over the
/// project/instance/database triple.
pub fn build_connection_uri(config: &BackendConfig, database: &str) -> Result<String, BackendError> {
    let mut uri = match config.default_connection_url.as_deref() {
        Some(url) => url.strip_prefix(JDBC_PREFIX).unwrap_or(url).to_string(),
        None => {
            if config.project.is_empty() || config.instance.is_empty() {
                return Err(BackendError::InvalidOptions(
                    "backend.project and backend.instance must be set".into(),
                ));
            }
            if database.is_empty() {
                return Err(BackendError::InvalidOptions("database name is empty".into()));
            }
            let host = match config.endpoint.as_deref() {
                Some(endpoint) => format!("//{}", endpoint),
                None => String::new(),
            };
            format!(
                "{}{}/projects/{}/instances/{}/databases/{}",
                URI_SCHEME, host, config.project, config.instance, database
            )
        }
    };

    for (key, value) in &config.properties {
        if !value.is_empty() {
            uri.push_str(&format!(";{}={}", key, value));
        }
    }

    if let Some(provider) = config.channel_provider.as_deref() {
        if provider.is_empty() {
            return Err(BackendError::InvalidOptions(
                "backend.channel_provider must not be empty".into(),
            ));
        }
        uri.push_str(&format!(";channelProvider={};usePlainText=true", provider));
    }

    Ok(uri)
}

/// Extract the database id from a connection URI
pub fn database_from_uri(uri: &str) -> Option<&str> {
    let start = uri.find("/databases/")? + "/databases/".len();
    let rest = &uri[start..];
    let end = rest.find(|c| c == ';' || c == '?').unwrap_or(rest.len());
    Some(&rest[..end]).filter(|db| !db.is_empty())
}
