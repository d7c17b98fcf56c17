//! Backend database access.
//!
//! The backend client library sits behind [`BackendConnector`] and
//! [`BackendClient`]; [`BackendConnection`] wraps one client for the lifetime
//! of a client session and layers the session-statement handling on top.

pub mod memory;
mod types;
pub mod uri;

pub use memory::MemoryConnector;
pub use types::{BackendType, Column, Dialect, ResultSet, StatementResult, Value};

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::parser::{
    Assignment, ParseError, SelectItem, SessionStatement, SetValue, VariableTarget,
};
use crate::protocol::{error_codes::*, ErrPacket};
use crate::session::{SessionState, VariableError};

/// Canonical status reported by the backend for a failed statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    PermissionDenied,
    Aborted,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Database dialect {0} is not supported; only GOOGLE_STANDARD_SQL databases can be used")]
    UnsupportedDialect(Dialect),

    #[error("{message}")]
    Statement { status: StatusCode, message: String },

    #[error("Backend connection failed: {0}")]
    Connect(String),

    #[error("Invalid backend options: {0}")]
    InvalidOptions(String),

    #[error("No backend connection is open")]
    NotConnected,
}

impl BackendError {
    pub fn statement(status: StatusCode, message: impl Into<String>) -> Self {
        BackendError::Statement {
            status,
            message: message.into(),
        }
    }

    pub fn to_err_packet(&self) -> ErrPacket {
        let message = self.to_string();
        match self {
            BackendError::DatabaseNotFound(db) => {
                ErrPacket::new(ER_BAD_DB, "42000", format!("Unknown database '{}'", db))
            }
            BackendError::UnsupportedDialect(_) | BackendError::Connect(_) => {
                ErrPacket::new(ER_UNKNOWN, "08004", message)
            }
            BackendError::Statement { status, .. } => match status {
                StatusCode::InvalidArgument => ErrPacket::new(ER_PARSE, "42000", message),
                StatusCode::NotFound => ErrPacket::new(ER_NO_SUCH_TABLE, "42S02", message),
                StatusCode::AlreadyExists => ErrPacket::new(ER_DUP_ENTRY, "23000", message),
                StatusCode::PermissionDenied => {
                    ErrPacket::new(ER_TABLEACCESS_DENIED, "42000", message)
                }
                StatusCode::FailedPrecondition
                | StatusCode::Aborted
                | StatusCode::Unavailable
                | StatusCode::Internal => ErrPacket::new(ER_UNKNOWN, "HY000", message),
            },
            BackendError::InvalidOptions(_) | BackendError::NotConnected => {
                ErrPacket::new(ER_UNKNOWN, "HY000", message)
            }
        }
    }
}

/// Errors from executing one statement through a [`BackendConnection`]
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Unknown thread id: {0}")]
    UnknownConnection(u32),
}

impl ExecuteError {
    pub fn to_err_packet(&self) -> ErrPacket {
        match self {
            ExecuteError::Parse(e) => e.to_err_packet(),
            ExecuteError::Variable(e) => e.to_err_packet(),
            ExecuteError::Backend(e) => e.to_err_packet(),
            ExecuteError::UnknownConnection(_) => {
                ErrPacket::new(ER_NO_SUCH_THREAD, "HY000", self.to_string())
            }
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ExecuteError::Parse(_) => "parse_error",
            ExecuteError::Variable(_) => "variable_error",
            ExecuteError::Backend(_) => "backend_error",
            ExecuteError::UnknownConnection(_) => "unknown_connection",
        }
    }
}

/// Opaque credentials handed to the backend client library
#[derive(Clone)]
pub struct Credentials(Arc<Vec<u8>>);

impl Credentials {
    pub fn new(secret: Vec<u8>) -> Self {
        Self(Arc::new(secret))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// One open connection of the backend client library
#[async_trait]
pub trait BackendClient: Send {
    async fn execute(&mut self, sql: &str) -> Result<StatementResult, BackendError>;

    async fn commit(&mut self) -> Result<(), BackendError>;

    async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), BackendError>;

    fn is_autocommit(&self) -> bool;

    fn is_in_transaction(&self) -> bool;

    /// Dialect of the connected database; fails with `DatabaseNotFound` for a missing database
    async fn dialect(&mut self) -> Result<Dialect, BackendError>;

    async fn close(&mut self);
}

/// Factory for backend client connections
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn open(
        &self,
        uri: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn BackendClient>, BackendError>;
}

/// Backend connection owned by one client session
pub struct BackendConnection {
    config: Arc<BackendConfig>,
    connector: Arc<dyn BackendConnector>,
    client: Option<Box<dyn BackendClient>>,
    database: Option<String>,
}

impl BackendConnection {
    pub fn new(config: Arc<BackendConfig>, connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            config,
            connector,
            client: None,
            database: None,
        }
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    #[cfg(test)]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Open the backend connection for `database` and verify its dialect.
    ///
    /// On any failure after the client was opened, the client is closed
    /// before the error is returned.
    pub async fn connect(
        &mut self,
        database: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), BackendError> {
        let uri = uri::build_connection_uri(&self.config, database)?;
        debug!(uri = %uri, "Opening backend connection");

        let mut client = self.connector.open(&uri, credentials).await?;
        match client.dialect().await {
            Ok(Dialect::GoogleStandardSql) => {}
            Ok(dialect) => {
                warn!(database = %database, dialect = %dialect, "Rejecting database with unsupported dialect");
                client.close().await;
                return Err(BackendError::UnsupportedDialect(dialect));
            }
            Err(e) => {
                match &e {
                    BackendError::DatabaseNotFound(_) => {
                        warn!(database = %database, "Backend database not found")
                    }
                    other => warn!(database = %database, error = %other, "Backend connection failed"),
                }
                client.close().await;
                return Err(e);
            }
        }

        info!(database = %database, "Backend connection established");
        self.client = Some(client);
        self.database = Some(database.to_string());
        Ok(())
    }

    fn client(&mut self) -> Result<&mut (dyn BackendClient + 'static), BackendError> {
        self.client.as_deref_mut().ok_or(BackendError::NotConnected)
    }

    /// Execute one statement, answering session-management statements locally
    pub async fn execute(
        &mut self,
        sql: &str,
        session: &mut SessionState,
    ) -> Result<StatementResult, ExecuteError> {
        if let Some(statement) = SessionStatement::parse(sql)? {
            debug!(sql = %sql, "Handling session statement locally");
            return self.execute_session_statement(statement, session).await;
        }
        Ok(self.execute_backend(sql).await?)
    }

    /// Forward a statement to the backend without session-statement handling
    pub async fn execute_backend(&mut self, sql: &str) -> Result<StatementResult, BackendError> {
        self.client()?.execute(sql).await
    }

    async fn execute_session_statement(
        &mut self,
        statement: SessionStatement,
        session: &mut SessionState,
    ) -> Result<StatementResult, ExecuteError> {
        match statement {
            SessionStatement::Set(assignments) => {
                let resolved = assignments
                    .into_iter()
                    .map(|assignment| resolve_assignment(assignment, session))
                    .collect::<Result<Vec<_>, _>>()?;
                for (target, value) in &resolved {
                    if let VariableTarget::System { name, scope } = target {
                        session.check(name, value.as_deref(), *scope)?;
                    }
                }
                for (target, value) in resolved {
                    match target {
                        VariableTarget::System { name, scope } => {
                            session.set(&name, value.as_deref(), scope, self).await?;
                        }
                        VariableTarget::User(name) => session.set_user_variable(&name, value),
                    }
                }
                Ok(StatementResult::UpdateCount(0))
            }
            SessionStatement::Select(items) => Ok(StatementResult::ResultSet(select_variables(
                &items, session,
            )?)),
        }
    }

    pub async fn commit(&mut self) -> Result<(), BackendError> {
        self.client()?.commit().await
    }

    pub async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), BackendError> {
        self.client()?.set_autocommit(autocommit).await
    }

    pub fn is_transaction_active(&self) -> bool {
        self.client
            .as_ref()
            .map(|client| client.is_in_transaction())
            .unwrap_or(false)
    }

    pub fn is_autocommit(&self) -> bool {
        self.client
            .as_ref()
            .map(|client| client.is_autocommit())
            .unwrap_or(true)
    }

    /// Commit any open transaction, then switch the backend to autocommit
    pub async fn process_set_autocommit(&mut self) -> Result<(), BackendError> {
        if self.is_transaction_active() {
            debug!("Committing open transaction before enabling autocommit");
            self.commit().await?;
        }
        self.set_autocommit(true).await
    }

    /// Switch the backend out of autocommit; the next statement starts a transaction
    pub async fn process_unset_autocommit(&mut self) -> Result<(), BackendError> {
        self.set_autocommit(false).await
    }

    /// Close the backend client. Safe to call more than once.
    pub async fn terminate(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.close().await;
            debug!(database = ?self.database, "Backend connection closed");
        }
    }
}

fn resolve_assignment(
    assignment: Assignment,
    session: &SessionState,
) -> Result<(VariableTarget, Option<String>), VariableError> {
    let value = match assignment.value {
        SetValue::Literal(value) => value,
        SetValue::Default => match &assignment.target {
            VariableTarget::System { name, .. } => session.global_default(name)?,
            VariableTarget::User(_) => None,
        },
    };
    Ok((assignment.target, value))
}

fn select_variables(items: &[SelectItem], session: &SessionState) -> Result<ResultSet, VariableError> {
    let mut columns = Vec::with_capacity(items.len());
    let mut row = Vec::with_capacity(items.len());
    for item in items {
        let (ty, value) = match &item.target {
            VariableTarget::System { name, scope } => {
                let variable = session.get(name, *scope)?;
                (variable.var_type.clone(), variable.typed_value())
            }
            VariableTarget::User(name) => (
                BackendType::String,
                session
                    .user_variable(name)
                    .map(|v| Value::String(v.to_string()))
                    .unwrap_or(Value::Null),
            ),
        };
        columns.push(Column::new(item.label.clone(), ty));
        row.push(value);
    }
    Ok(ResultSet::new(columns).with_row(row))
}
