//! In-memory backend.
//!
//! Stands in for the real backend client library in tests and local runs.
//! It evaluates literal-only `SELECT` lists and tracks autocommit and lazy
//! transactions the way the real client does. Tests can script further
//! statements with canned responses.

#[cfg(test)]
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::uri::database_from_uri;
use super::{
    BackendClient, BackendConnector, BackendError, BackendType, Column, Credentials, Dialect,
    ResultSet, StatementResult, StatusCode, Value,
};
use crate::config::MemoryBackendConfig;
use crate::parser::tokenizer::{tokenize, Token};
use crate::protocol::value::from_text;

#[derive(Debug, Default)]
struct StatsInner {
    opened: u64,
    closed: u64,
    commits: u64,
    rollbacks: u64,
    executed: Vec<String>,
}

/// Counters shared by a connector and every client it opened
#[derive(Debug, Clone, Default)]
pub struct MemoryStats(Arc<Mutex<StatsInner>>);

#[cfg(test)]
impl MemoryStats {
    pub fn opened(&self) -> u64 {
        self.0.lock().opened
    }

    pub fn closed(&self) -> u64 {
        self.0.lock().closed
    }

    pub fn commits(&self) -> u64 {
        self.0.lock().commits
    }

    pub fn rollbacks(&self) -> u64 {
        self.0.lock().rollbacks
    }

    /// Statements that reached the backend, in order
    pub fn executed(&self) -> Vec<String> {
        self.0.lock().executed.clone()
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
enum Canned {
    Result(StatementResult),
    Error(BackendError),
}

#[cfg(test)]
type CannedTable = Arc<Mutex<HashMap<String, Canned>>>;

/// Connector producing [`MemoryBackend`] clients
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    dialect: Dialect,
    databases: Option<Arc<HashSet<String>>>,
    #[cfg(test)]
    canned: CannedTable,
    stats: MemoryStats,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    /// Connector accepting any database name, reporting GoogleSQL
    pub fn new() -> Self {
        Self {
            dialect: Dialect::GoogleStandardSql,
            databases: None,
            #[cfg(test)]
            canned: Arc::new(Mutex::new(HashMap::new())),
            stats: MemoryStats::default(),
        }
    }

    /// Connector shaped by the `[backend.memory]` section
    pub fn from_config(config: &MemoryBackendConfig) -> Self {
        let connector = Self::new().with_dialect(config.dialect);
        if config.databases.is_empty() {
            connector
        } else {
            connector.with_databases(config.databases.iter().cloned())
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Restrict the databases that exist; others fail with `DatabaseNotFound`
    pub fn with_databases<I, S>(mut self, databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.databases = Some(Arc::new(databases.into_iter().map(Into::into).collect()));
        self
    }
}

/// Scripting hooks for driving sessions against a known backend
#[cfg(test)]
impl MemoryConnector {
    /// Answer `sql` with `result`
    pub fn respond(&self, sql: &str, result: StatementResult) {
        self.canned
            .lock()
            .insert(sql.trim().to_string(), Canned::Result(result));
    }

    /// Fail `sql` with `error`
    pub fn fail_on(&self, sql: &str, error: BackendError) {
        self.canned
            .lock()
            .insert(sql.trim().to_string(), Canned::Error(error));
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats.clone()
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn open(
        &self,
        uri: &str,
        _credentials: Option<&Credentials>,
    ) -> Result<Box<dyn BackendClient>, BackendError> {
        self.stats.0.lock().opened += 1;
        Ok(Box::new(MemoryBackend {
            database: database_from_uri(uri).unwrap_or_default().to_string(),
            dialect: self.dialect,
            databases: self.databases.clone(),
            #[cfg(test)]
            canned: self.canned.clone(),
            stats: self.stats.clone(),
            autocommit: true,
            in_transaction: false,
            closed: false,
        }))
    }
}

/// One in-memory backend connection
#[derive(Debug)]
pub struct MemoryBackend {
    database: String,
    dialect: Dialect,
    databases: Option<Arc<HashSet<String>>>,
    #[cfg(test)]
    canned: CannedTable,
    stats: MemoryStats,
    autocommit: bool,
    in_transaction: bool,
    closed: bool,
}

impl MemoryBackend {
    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::NotConnected);
        }
        Ok(())
    }

    fn begin_implicit(&mut self) {
        if !self.autocommit {
            self.in_transaction = true;
        }
    }

    #[cfg(test)]
    fn canned(&self, sql: &str) -> Option<Result<StatementResult, BackendError>> {
        match self.canned.lock().get(sql).cloned()? {
            Canned::Result(result) => Some(Ok(result)),
            Canned::Error(error) => Some(Err(error)),
        }
    }

    #[cfg(not(test))]
    fn canned(&self, _sql: &str) -> Option<Result<StatementResult, BackendError>> {
        None
    }
}

#[async_trait]
impl BackendClient for MemoryBackend {
    async fn execute(&mut self, sql: &str) -> Result<StatementResult, BackendError> {
        self.ensure_open()?;
        let sql = sql.trim();
        self.stats.0.lock().executed.push(sql.to_string());
        debug!(database = %self.database, sql = %sql, "Executing in memory");

        let keyword = sql.trim_end_matches(';').trim().to_ascii_uppercase();
        match keyword.as_str() {
            "BEGIN" | "START TRANSACTION" | "BEGIN TRANSACTION" => {
                self.in_transaction = true;
                return Ok(StatementResult::UpdateCount(0));
            }
            "COMMIT" => {
                self.commit().await?;
                return Ok(StatementResult::UpdateCount(0));
            }
            "ROLLBACK" => {
                if self.in_transaction {
                    self.stats.0.lock().rollbacks += 1;
                }
                self.in_transaction = false;
                return Ok(StatementResult::UpdateCount(0));
            }
            _ => {}
        }

        let result = match self.canned(sql) {
            Some(canned) => canned?,
            None => match evaluate_literal_select(sql) {
                Some(result_set) => StatementResult::ResultSet(result_set),
                None => {
                    return Err(BackendError::statement(
                        StatusCode::InvalidArgument,
                        format!("Statement is not supported by the in-memory backend: {}", sql),
                    ))
                }
            },
        };
        self.begin_implicit();
        Ok(result)
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.stats.0.lock().commits += 1;
        self.in_transaction = false;
        Ok(())
    }

    async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), BackendError> {
        self.ensure_open()?;
        if autocommit && self.in_transaction {
            return Err(BackendError::statement(
                StatusCode::FailedPrecondition,
                "Cannot enable autocommit while a transaction is active",
            ));
        }
        self.autocommit = autocommit;
        Ok(())
    }

    fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    fn is_in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn dialect(&mut self) -> Result<Dialect, BackendError> {
        self.ensure_open()?;
        match &self.databases {
            Some(known) if !known.contains(&self.database) => {
                Err(BackendError::DatabaseNotFound(self.database.clone()))
            }
            _ => Ok(self.dialect),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.in_transaction = false;
            let mut stats = self.stats.0.lock();
            stats.closed += 1;
            debug!(
                database = %self.database,
                opened = stats.opened,
                closed = stats.closed,
                commits = stats.commits,
                rollbacks = stats.rollbacks,
                executed = stats.executed.len(),
                "Closed in-memory connection"
            );
        }
    }
}

/// Evaluate `SELECT literal [[AS] alias], ...`; `None` for anything else
fn evaluate_literal_select(sql: &str) -> Option<ResultSet> {
    let tokens = tokenize(sql).ok()?;
    let mut iter = tokens.into_iter().peekable();
    if !iter.next()?.is_keyword("SELECT") {
        return None;
    }

    let mut columns = Vec::new();
    let mut row = Vec::new();
    loop {
        let (ty, value) = match iter.next()? {
            Token::Minus => match iter.next()? {
                Token::Number(number) => number_literal(&format!("-{}", number))?,
                _ => return None,
            },
            Token::Number(number) => number_literal(&number)?,
            Token::String(text) => (BackendType::String, Value::String(text)),
            Token::Word(word) if word.eq_ignore_ascii_case("TRUE") => {
                (BackendType::Bool, Value::Bool(true))
            }
            Token::Word(word) if word.eq_ignore_ascii_case("FALSE") => {
                (BackendType::Bool, Value::Bool(false))
            }
            Token::Word(word) if word.eq_ignore_ascii_case("NULL") => {
                (BackendType::Int64, Value::Null)
            }
            Token::Word(word) if word.eq_ignore_ascii_case("CAST") => {
                if iter.next()? != Token::LParen {
                    return None;
                }
                let text = match iter.next()? {
                    Token::String(text) => Some(text),
                    token if token.is_keyword("NULL") => None,
                    _ => return None,
                };
                if !iter.next()?.is_keyword("AS") {
                    return None;
                }
                let ty = match iter.next()? {
                    Token::Word(name) => name.parse::<BackendType>().ok()?,
                    _ => return None,
                };
                if iter.next()? != Token::RParen {
                    return None;
                }
                let value = match text {
                    Some(text) => from_text(&ty, text.as_bytes()).ok()?,
                    None => Value::Null,
                };
                (ty, value)
            }
            _ => return None,
        };

        if iter.peek().is_some_and(|t| t.is_keyword("AS")) {
            iter.next();
        }
        let name = match iter.peek() {
            Some(Token::Word(_)) | Some(Token::QuotedIdent(_)) => match iter.next()? {
                Token::Word(alias) | Token::QuotedIdent(alias) => alias,
                _ => return None,
            },
            _ => String::new(),
        };
        columns.push(Column::new(name, ty));
        row.push(value);

        match iter.next() {
            None => break,
            Some(Token::Comma) => continue,
            Some(_) => return None,
        }
    }
    Some(ResultSet::new(columns).with_row(row))
}

fn number_literal(text: &str) -> Option<(BackendType, Value)> {
    if let Ok(int) = text.parse::<i64>() {
        return Some((BackendType::Int64, Value::Int64(int)));
    }
    text.parse::<f64>()
        .ok()
        .map(|float| (BackendType::Float64, Value::Float64(float)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(connector: &MemoryConnector, database: &str) -> Box<dyn BackendClient> {
        connector
            .open(
                &format!("cloudspanner:/projects/p/instances/i/databases/{}", database),
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_literal_select() {
        let connector = MemoryConnector::new();
        let mut client = open(&connector, "db").await;
        let rs = client
            .execute("SELECT 1, -2.5 AS f, 'x' s, TRUE, NULL, CAST(NULL AS STRING) AS init_connect")
            .await
            .unwrap()
            .into_result_set()
            .unwrap();

        assert_eq!(
            rs.columns,
            vec![
                Column::new("", BackendType::Int64),
                Column::new("f", BackendType::Float64),
                Column::new("s", BackendType::String),
                Column::new("", BackendType::Bool),
                Column::new("", BackendType::Int64),
                Column::new("init_connect", BackendType::String),
            ]
        );
        assert_eq!(
            rs.rows,
            vec![vec![
                Value::Int64(1),
                Value::Float64(-2.5),
                Value::String("x".into()),
                Value::Bool(true),
                Value::Null,
                Value::Null,
            ]]
        );
    }

    #[tokio::test]
    async fn test_cast_of_text_literal() {
        let connector = MemoryConnector::new();
        let mut client = open(&connector, "db").await;
        let rs = client
            .execute("SELECT CAST('2024-02-29' AS DATE) AS d, CAST('1.50' AS NUMERIC)")
            .await
            .unwrap()
            .into_result_set()
            .unwrap();

        assert_eq!(
            rs.columns,
            vec![
                Column::new("d", BackendType::Date),
                Column::new("", BackendType::Numeric),
            ]
        );
        assert_eq!(
            rs.rows,
            vec![vec![
                Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
                Value::Numeric("1.50".parse().unwrap()),
            ]]
        );

        let err = client.execute("SELECT CAST('soon' AS DATE)").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Statement {
                status: StatusCode::InvalidArgument,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_statement_is_rejected() {
        let connector = MemoryConnector::new();
        let mut client = open(&connector, "db").await;
        let err = client.execute("SELECT * FROM users").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Statement {
                status: StatusCode::InvalidArgument,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_canned_responses() {
        let connector = MemoryConnector::new();
        connector.respond("UPDATE t SET a = 1", StatementResult::UpdateCount(4));
        let mut client = open(&connector, "db").await;
        assert_eq!(
            client.execute("  UPDATE t SET a = 1 ").await.unwrap(),
            StatementResult::UpdateCount(4)
        );
        assert_eq!(connector.stats().executed(), vec!["UPDATE t SET a = 1"]);
    }

    #[tokio::test]
    async fn test_lazy_transaction_and_autocommit_guard() {
        let connector = MemoryConnector::new();
        let stats = connector.stats();
        let mut client = open(&connector, "db").await;

        client.set_autocommit(false).await.unwrap();
        assert!(!client.is_in_transaction());
        client.execute("SELECT 1").await.unwrap();
        assert!(client.is_in_transaction());

        let err = client.set_autocommit(true).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Statement {
                status: StatusCode::FailedPrecondition,
                ..
            }
        ));

        client.execute("COMMIT").await.unwrap();
        assert_eq!(stats.commits(), 1);
        client.set_autocommit(true).await.unwrap();
        assert!(client.is_autocommit());
    }

    #[tokio::test]
    async fn test_explicit_transaction_rollback() {
        let connector = MemoryConnector::new();
        let stats = connector.stats();
        let mut client = open(&connector, "db").await;

        client.execute("BEGIN").await.unwrap();
        assert!(client.is_in_transaction());
        client.execute("ROLLBACK").await.unwrap();
        assert!(!client.is_in_transaction());
        assert_eq!(stats.rollbacks(), 1);
        assert_eq!(stats.commits(), 0);
    }

    #[tokio::test]
    async fn test_dialect_and_known_databases() {
        let connector = MemoryConnector::new()
            .with_dialect(Dialect::PostgreSql)
            .with_databases(["pg"]);
        let mut known = open(&connector, "pg").await;
        assert_eq!(known.dialect().await.unwrap(), Dialect::PostgreSql);

        let mut missing = open(&connector, "nope").await;
        assert_eq!(
            missing.dialect().await.unwrap_err(),
            BackendError::DatabaseNotFound("nope".into())
        );
    }

    #[tokio::test]
    async fn test_connector_from_config() {
        let config = MemoryBackendConfig {
            databases: vec!["orders".into()],
            dialect: Dialect::PostgreSql,
        };
        let connector = MemoryConnector::from_config(&config);
        let mut known = open(&connector, "orders").await;
        assert_eq!(known.dialect().await.unwrap(), Dialect::PostgreSql);
        let mut missing = open(&connector, "audit").await;
        assert!(missing.dialect().await.is_err());

        let open_any = MemoryConnector::from_config(&MemoryBackendConfig::default());
        let mut client = open(&open_any, "anything").await;
        assert_eq!(client.dialect().await.unwrap(), Dialect::GoogleStandardSql);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_work() {
        let connector = MemoryConnector::new();
        let stats = connector.stats();
        let mut client = open(&connector, "db").await;
        client.close().await;
        client.close().await;
        assert_eq!(stats.closed(), 1);
        assert_eq!(client.execute("SELECT 1").await.unwrap_err(), BackendError::NotConnected);
    }
}
