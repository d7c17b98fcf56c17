use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::backend::{BackendConnection, BackendError};
use crate::protocol::{error_codes::*, ErrPacket};

use super::variables::{parse_bool, GlobalSettings, SystemVariable};

/// Pseudo-variable that fans out to the three connection charset variables
const NAMES: &str = "names";
const NAMES_TARGETS: [&str; 3] = [
    "character_set_client",
    "character_set_connection",
    "character_set_results",
];
const AUTOCOMMIT: &str = "autocommit";

/// Position of a connection in the wire protocol state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    ConnectionInitiated,
    ServerGreetingSent,
    RestartWithSsl,
    Authenticated,
    QueryWait,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableScope {
    Session,
    Global,
}

impl VariableScope {
    /// Scope for an `@@qualifier.name` prefix
    pub fn from_qualifier(qualifier: &str) -> Option<Self> {
        match qualifier.to_ascii_lowercase().as_str() {
            "global" => Some(VariableScope::Global),
            "session" | "local" => Some(VariableScope::Session),
            _ => None,
        }
    }
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableScope::Session => f.write_str("SESSION"),
            VariableScope::Global => f.write_str("GLOBAL"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VariableError {
    #[error("Unknown system variable '{0}'")]
    Unknown(String),

    #[error("Variable '{name}' can't be set to the value of '{value}'")]
    InvalidValue { name: String, value: String },

    #[error("Variable '{0}' is a read only variable")]
    ReadOnly(String),

    #[error("Access denied; variable '{0}' can't be set globally from a client session")]
    GlobalWrite(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl VariableError {
    pub fn to_err_packet(&self) -> ErrPacket {
        match self {
            VariableError::Unknown(_) => {
                ErrPacket::new(ER_UNKNOWN_SYSTEM_VARIABLE, "HY000", self.to_string())
            }
            VariableError::InvalidValue { .. } => {
                ErrPacket::new(ER_WRONG_VALUE_FOR_VAR, "42000", self.to_string())
            }
            VariableError::ReadOnly(_) => {
                ErrPacket::new(ER_INCORRECT_GLOBAL_LOCAL_VAR, "HY000", self.to_string())
            }
            VariableError::GlobalWrite(_) => {
                ErrPacket::new(ER_SPECIFIC_ACCESS_DENIED, "42000", self.to_string())
            }
            VariableError::Backend(e) => e.to_err_packet(),
        }
    }
}

/// Per-connection session state
#[derive(Debug)]
pub struct SessionState {
    /// Client username
    pub username: String,
    /// Database named in the handshake, if any
    pub database: Option<String>,
    /// Capability flags negotiated with the client
    pub capability_flags: u32,
    /// Character set from the handshake
    pub character_set: u8,
    status: ProtocolStatus,
    globals: Arc<GlobalSettings>,
    variables: HashMap<String, SystemVariable>,
    user_variables: HashMap<String, Option<String>>,
}

impl SessionState {
    pub fn new(globals: Arc<GlobalSettings>) -> Self {
        Self {
            username: String::new(),
            database: None,
            capability_flags: 0,
            character_set: 0,
            status: ProtocolStatus::ConnectionInitiated,
            variables: globals.snapshot(),
            globals,
            user_variables: HashMap::new(),
        }
    }

    /// Update state after parsing handshake response
    pub fn set_from_handshake(
        &mut self,
        username: String,
        database: Option<String>,
        capabilities: u32,
        charset: u8,
    ) {
        self.username = username;
        self.database = database;
        self.capability_flags = capabilities;
        self.character_set = charset;
    }

    pub fn protocol_status(&self) -> ProtocolStatus {
        self.status
    }

    /// Move to `status`. Once terminated, the status never changes again.
    pub fn set_protocol_status(&mut self, status: ProtocolStatus) {
        if self.status == ProtocolStatus::Terminated && status != ProtocolStatus::Terminated {
            debug!(requested = ?status, "Ignoring status change on terminated session");
            return;
        }
        self.status = status;
    }

    pub fn get(&self, name: &str, scope: VariableScope) -> Result<&SystemVariable, VariableError> {
        let found = match scope {
            VariableScope::Session => self.variables.get(&name.to_ascii_lowercase()),
            VariableScope::Global => self.globals.get(name),
        };
        found.ok_or_else(|| VariableError::Unknown(name.to_string()))
    }

    /// Session value of `autocommit`; a session without one autocommits
    pub fn autocommit(&self) -> bool {
        self.get(AUTOCOMMIT, VariableScope::Session)
            .ok()
            .and_then(|variable| variable.value.as_deref())
            .and_then(parse_bool)
            .unwrap_or(true)
    }

    /// Validate a write without performing it
    pub fn check(&self, name: &str, value: Option<&str>, scope: VariableScope) -> Result<(), VariableError> {
        let key = name.to_ascii_lowercase();
        let targets: Vec<&str> = if key == NAMES {
            NAMES_TARGETS.to_vec()
        } else {
            vec![key.as_str()]
        };

        for target in targets {
            let variable = self.get(target, VariableScope::Session)?;
            if scope == VariableScope::Global {
                return Err(VariableError::GlobalWrite(name.to_string()));
            }
            if variable.read_only {
                return Err(VariableError::ReadOnly(name.to_string()));
            }
            variable.normalize(value).map_err(|e| match e {
                VariableError::InvalidValue { value, .. } if key == NAMES => {
                    VariableError::InvalidValue {
                        name: NAMES.to_string(),
                        value,
                    }
                }
                other => other,
            })?;
        }
        Ok(())
    }

    /// Set a session variable.
    ///
    /// `autocommit` also switches the backend: enabling commits any open
    /// transaction first. The stored value only changes once the backend
    /// accepted the switch.
    pub async fn set(
        &mut self,
        name: &str,
        value: Option<&str>,
        scope: VariableScope,
        backend: &mut BackendConnection,
    ) -> Result<(), VariableError> {
        self.check(name, value, scope)?;
        let key = name.to_ascii_lowercase();

        if key == NAMES {
            for target in NAMES_TARGETS {
                self.store(target, value)?;
            }
            return Ok(());
        }

        if key == AUTOCOMMIT {
            let enable = self.get(AUTOCOMMIT, VariableScope::Session)?.normalize(value)?;
            if enable.as_deref() == Some("1") {
                backend.process_set_autocommit().await?;
            } else {
                backend.process_unset_autocommit().await?;
            }
        }

        self.store(&key, value)
    }

    fn store(&mut self, key: &str, value: Option<&str>) -> Result<(), VariableError> {
        let variable = self
            .variables
            .get_mut(key)
            .ok_or_else(|| VariableError::Unknown(key.to_string()))?;
        variable.value = variable.normalize(value)?;
        debug!(variable = %key, value = ?variable.value, "Session variable set");
        Ok(())
    }

    /// Global template value, used by `SET name = DEFAULT`
    pub fn global_default(&self, name: &str) -> Result<Option<String>, VariableError> {
        let key = name.to_ascii_lowercase();
        let source = if key == NAMES { NAMES_TARGETS[0] } else { key.as_str() };
        Ok(self.get(source, VariableScope::Global)?.value.clone())
    }

    pub fn set_user_variable(&mut self, name: &str, value: Option<String>) {
        self.user_variables.insert(name.to_ascii_lowercase(), value);
    }

    /// Value of `@name`; unset variables and NULL both read as `None`
    pub fn user_variable(&self, name: &str) -> Option<&str> {
        self.user_variables
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.as_deref())
    }
}
