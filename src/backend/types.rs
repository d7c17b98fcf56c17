use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// SQL dialect reported by a backend database
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Dialect {
    #[default]
    #[serde(rename = "GOOGLE_STANDARD_SQL")]
    GoogleStandardSql,
    #[serde(rename = "POSTGRESQL")]
    PostgreSql,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::GoogleStandardSql => f.write_str("GOOGLE_STANDARD_SQL"),
            Dialect::PostgreSql => f.write_str("POSTGRESQL"),
        }
    }
}

/// Backend-native column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendType {
    Bool,
    Int64,
    Float64,
    String,
    Bytes,
    Date,
    Timestamp,
    Numeric,
    Json,
    Array(Box<BackendType>),
    Struct,
}

impl BackendType {
    /// Type code as written in variable definition files and type names
    pub fn code(&self) -> String {
        match self {
            BackendType::Bool => "BOOL".into(),
            BackendType::Int64 => "INT64".into(),
            BackendType::Float64 => "FLOAT64".into(),
            BackendType::String => "STRING".into(),
            BackendType::Bytes => "BYTES".into(),
            BackendType::Date => "DATE".into(),
            BackendType::Timestamp => "TIMESTAMP".into(),
            BackendType::Numeric => "NUMERIC".into(),
            BackendType::Json => "JSON".into(),
            BackendType::Array(inner) => format!("ARRAY<{}>", inner.code()),
            BackendType::Struct => "STRUCT".into(),
        }
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if let Some(inner) = upper
            .strip_prefix("ARRAY<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Ok(BackendType::Array(Box::new(inner.parse()?)));
        }
        match upper.as_str() {
            "BOOL" | "BOOLEAN" => Ok(BackendType::Bool),
            "INT64" => Ok(BackendType::Int64),
            "FLOAT64" => Ok(BackendType::Float64),
            "STRING" => Ok(BackendType::String),
            "BYTES" => Ok(BackendType::Bytes),
            "DATE" => Ok(BackendType::Date),
            "TIMESTAMP" => Ok(BackendType::Timestamp),
            "NUMERIC" => Ok(BackendType::Numeric),
            "JSON" => Ok(BackendType::Json),
            "STRUCT" => Ok(BackendType::Struct),
            _ => Err(format!("unknown backend type '{}'", s.trim())),
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// A single value read from a backend result row
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Numeric(Decimal),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: BackendType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: BackendType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Fully materialized result of a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }
}

/// Outcome of executing one statement
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    ResultSet(ResultSet),
    UpdateCount(u64),
}

#[cfg(test)]
impl StatementResult {
    pub fn into_result_set(self) -> Option<ResultSet> {
        match self {
            StatementResult::ResultSet(rs) => Some(rs),
            StatementResult::UpdateCount(_) => None,
        }
    }

    pub fn update_count(&self) -> Option<u64> {
        match self {
            StatementResult::UpdateCount(count) => Some(*count),
            StatementResult::ResultSet(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_codes() {
        assert_eq!("int64".parse::<BackendType>().unwrap(), BackendType::Int64);
        assert_eq!(" BOOL ".parse::<BackendType>().unwrap(), BackendType::Bool);
        assert_eq!(
            "ARRAY<STRING>".parse::<BackendType>().unwrap(),
            BackendType::Array(Box::new(BackendType::String))
        );
        assert!("VARCHAR".parse::<BackendType>().is_err());
    }

    #[test]
    fn test_type_code_roundtrip() {
        for ty in [
            BackendType::Bool,
            BackendType::Timestamp,
            BackendType::Array(Box::new(BackendType::Int64)),
        ] {
            assert_eq!(ty.code().parse::<BackendType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_result_kind_accessors() {
        let result = StatementResult::UpdateCount(3);
        assert_eq!(result.update_count(), Some(3));
        assert!(result.into_result_set().is_none());

        let rows = StatementResult::ResultSet(ResultSet::default());
        assert!(rows.update_count().is_none());
    }
}
