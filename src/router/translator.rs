//! Known-query translation table and bypass set.
//!
//! Drivers send fixed introspection queries right after connecting. Those are
//! answered by rewriting them into backend SQL with the result columns
//! renamed back to what the driver expects. Lookups are exact and
//! case-sensitive on the comment-stripped, trimmed statement text.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::parser::normalize;

const JDBC_SESSION_QUERY: &str = "SELECT  @@session.auto_increment_increment AS auto_increment_increment, @@character_set_client AS character_set_client, @@character_set_connection AS character_set_connection, @@character_set_results AS character_set_results, @@character_set_server AS character_set_server, @@collation_server AS collation_server, @@collation_connection AS collation_connection, @@init_connect AS init_connect, @@interactive_timeout AS interactive_timeout, @@license AS license, @@lower_case_table_names AS lower_case_table_names, @@max_allowed_packet AS max_allowed_packet, @@net_write_timeout AS net_write_timeout, @@performance_schema AS performance_schema, @@sql_mode AS sql_mode, @@system_time_zone AS system_time_zone, @@time_zone AS time_zone, @@transaction_isolation AS transaction_isolation, @@wait_timeout AS wait_timeout";

const JDBC_SESSION_ANSWER: &str = "SELECT 1 AS auto_increment_increment, \
'utf8mb4' AS character_set_client, \
'utf8mb4' AS character_set_connection, \
'utf8mb4' AS character_set_results, \
'utf8mb4' AS character_set_server, \
'utf8mb4_0900_ai_ci' AS collation_server, \
'utf8mb4_general_ci' AS collation_connection, \
CAST(NULL AS STRING) AS init_connect, \
28800 AS interactive_timeout, \
'GPL' AS license, \
2 AS lower_case_table_names, \
67108864 AS max_allowed_packet, \
60 AS net_write_timeout, \
1 AS performance_schema, \
'ONLY_FULL_GROUP_BY,STRICT_TRANS_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION' AS sql_mode, \
'UTC' AS system_time_zone, \
'SYSTEM' AS time_zone, \
'REPEATABLE-READ' AS transaction_isolation, \
28800 AS wait_timeout";

const BUILTIN_BYPASS: [&str; 3] = [
    "show databases",
    "show tables",
    "select @@version_comment limit 1",
];

/// How result column names are rewritten for a translated query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ColumnOverride {
    #[default]
    None,
    Prefix(String),
    Suffix(String),
    /// Backend column name → name reported to the client; others unchanged
    Names(HashMap<String, String>),
}

impl ColumnOverride {
    pub fn apply(&self, column: &str) -> String {
        match self {
            ColumnOverride::None => column.to_string(),
            ColumnOverride::Prefix(prefix) => format!("{}{}", prefix, column),
            ColumnOverride::Suffix(suffix) => format!("{}{}", column, suffix),
            ColumnOverride::Names(names) => names
                .get(column)
                .cloned()
                .unwrap_or_else(|| column.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedQuery {
    /// Normalized client SQL this entry answers
    pub input: String,
    /// SQL sent to the backend instead
    pub output_query: String,
    pub column_override: ColumnOverride,
}

impl TranslatedQuery {
    pub fn new(input: impl Into<String>, output_query: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output_query: output_query.into(),
            column_override: ColumnOverride::None,
        }
    }

    pub fn with_override(mut self, column_override: ColumnOverride) -> Self {
        self.column_override = column_override;
        self
    }

    fn renamed(input: &str, output_query: &str, column: &str, label: &str) -> Self {
        let names = HashMap::from([(column.to_string(), label.to_string())]);
        Self::new(input, output_query).with_override(ColumnOverride::Names(names))
    }
}

#[derive(Debug, Error)]
pub enum TranslatorError {
    #[error("Failed to read translation file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse translation file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid translation for '{input}': {message}")]
    Entry { input: String, message: String },
}

// ============================================================================
// Translation file format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TranslationFile {
    Commands { commands: Vec<FileEntry> },
    List(Vec<FileEntry>),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum FileAction {
    #[default]
    Translate,
    Bypass,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum FileOverrideType {
    #[default]
    NotApplicable,
    Prefix,
    Suffix,
    NameOverride,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileColumnOverride {
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    suffix: Option<String>,
    #[serde(default)]
    column_name_overrides: Vec<FileNameOverride>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileNameOverride {
    result_set_column_name: String,
    output_column_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    input_command: String,
    #[serde(default, alias = "outputCommand")]
    output_query: Option<String>,
    #[serde(default)]
    matcher_array: Vec<String>,
    #[serde(default)]
    action: FileAction,
    #[serde(default)]
    column_override_type: FileOverrideType,
    #[serde(default)]
    column_override: Option<FileColumnOverride>,
}

impl FileEntry {
    fn column_override(&mut self) -> Result<ColumnOverride, TranslatorError> {
        let spec = self.column_override.take().unwrap_or_default();
        let missing = |field: &str| TranslatorError::Entry {
            input: self.input_command.clone(),
            message: format!("columnOverride.{} is required", field),
        };
        Ok(match self.column_override_type {
            FileOverrideType::NotApplicable => ColumnOverride::None,
            FileOverrideType::Prefix => ColumnOverride::Prefix(spec.prefix.ok_or_else(|| missing("prefix"))?),
            FileOverrideType::Suffix => ColumnOverride::Suffix(spec.suffix.ok_or_else(|| missing("suffix"))?),
            FileOverrideType::NameOverride => ColumnOverride::Names(
                spec.column_name_overrides
                    .into_iter()
                    .map(|o| (o.result_set_column_name, o.output_column_name))
                    .collect(),
            ),
        })
    }
}

// ============================================================================
// Translator
// ============================================================================

/// Exact-match translation table plus bypass set
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    translations: HashMap<String, Arc<TranslatedQuery>>,
    bypass: HashSet<String>,
}

impl Default for QueryTranslator {
    fn default() -> Self {
        Self::builtin()
    }
}

impl QueryTranslator {
    /// Empty table, no built-ins
    pub fn empty() -> Self {
        Self {
            translations: HashMap::new(),
            bypass: HashSet::new(),
        }
    }

    /// Built-in driver query answers and bypass queries
    pub fn builtin() -> Self {
        let mut translator = Self::empty();
        translator.add(TranslatedQuery::new(JDBC_SESSION_QUERY, JDBC_SESSION_ANSWER));
        translator.add(TranslatedQuery::renamed(
            "SELECT @@session.transaction_read_only",
            "SELECT 0 AS transaction_read_only",
            "transaction_read_only",
            "@@session.transaction_read_only",
        ));
        translator.add(TranslatedQuery::renamed(
            "SELECT @@session.transaction_isolation",
            "SELECT 'REPEATABLE-READ' AS transaction_isolation",
            "transaction_isolation",
            "@@session.transaction_isolation",
        ));
        for query in BUILTIN_BYPASS {
            translator.add_bypass(query);
        }
        translator
    }

    /// Register a translation, keyed by its normalized input
    pub fn add(&mut self, mut query: TranslatedQuery) {
        query.input = normalize(&query.input);
        self.bypass.remove(&query.input);
        self.translations.insert(query.input.clone(), Arc::new(query));
    }

    pub fn add_bypass(&mut self, sql: &str) {
        let key = normalize(sql);
        self.translations.remove(&key);
        self.bypass.insert(key);
    }

    /// Merge the entries of a translation file; file entries win over built-ins
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, TranslatorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TranslatorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let count = self.load_json(&text).map_err(|e| match e {
            TranslatorError::Json { source, .. } => TranslatorError::Json {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(path = %path.display(), entries = count, "Loaded query translations");
        Ok(count)
    }

    /// Merge entries from JSON text; returns the number of entries applied
    pub fn load_json(&mut self, text: &str) -> Result<usize, TranslatorError> {
        let file: TranslationFile =
            serde_json::from_str(text).map_err(|source| TranslatorError::Json {
                path: PathBuf::new(),
                source,
            })?;
        let entries = match file {
            TranslationFile::Commands { commands } => commands,
            TranslationFile::List(entries) => entries,
        };

        let mut applied = 0;
        for mut entry in entries {
            if !entry.matcher_array.iter().any(|m| m == "COMPLETE") {
                warn!(
                    input = %entry.input_command,
                    matchers = ?entry.matcher_array,
                    "Skipping translation without COMPLETE matcher"
                );
                continue;
            }
            match entry.action {
                FileAction::Bypass => self.add_bypass(&entry.input_command),
                FileAction::Translate => {
                    let column_override = entry.column_override()?;
                    let output = entry
                        .output_query
                        .take()
                        .unwrap_or_else(|| entry.input_command.clone());
                    self.add(
                        TranslatedQuery::new(entry.input_command, output)
                            .with_override(column_override),
                    );
                }
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Translation for `sql`, matched on its normalized text
    pub fn translate(&self, sql: &str) -> Option<Arc<TranslatedQuery>> {
        self.translations.get(&normalize(sql)).cloned()
    }

    pub fn is_bypass(&self, sql: &str) -> bool {
        self.bypass.contains(&normalize(sql))
    }

    pub fn len(&self) -> usize {
        self.translations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_driver_queries() {
        let translator = QueryTranslator::builtin();
        let read_only = translator
            .translate("SELECT @@session.transaction_read_only")
            .unwrap();
        assert_eq!(read_only.output_query, "SELECT 0 AS transaction_read_only");
        assert_eq!(
            read_only.column_override.apply("transaction_read_only"),
            "@@session.transaction_read_only"
        );
        assert!(translator.translate(JDBC_SESSION_QUERY).is_some());
    }

    #[test]
    fn test_match_is_exact_after_comment_stripping() {
        let translator = QueryTranslator::builtin();
        assert!(translator
            .translate("/* mysql-connector-j */ SELECT @@session.transaction_isolation  ")
            .is_some());
        assert!(translator
            .translate("select @@session.transaction_isolation")
            .is_none());
        assert!(translator
            .translate("SELECT  @@session.transaction_isolation")
            .is_none());
    }

    #[test]
    fn test_bypass_set() {
        let translator = QueryTranslator::builtin();
        assert!(translator.is_bypass("show databases"));
        assert!(translator.is_bypass("select @@version_comment limit 1 -- mysql cli"));
        assert!(!translator.is_bypass("SHOW DATABASES"));
    }

    #[test]
    fn test_column_override_rules() {
        assert_eq!(ColumnOverride::None.apply("a"), "a");
        assert_eq!(ColumnOverride::Prefix("p_".into()).apply("a"), "p_a");
        assert_eq!(ColumnOverride::Suffix("_s".into()).apply("a"), "a_s");
        let names = ColumnOverride::Names(HashMap::from([("a".to_string(), "b".to_string())]));
        assert_eq!(names.apply("a"), "b");
        assert_eq!(names.apply("c"), "c");
    }

    #[test]
    fn test_load_json_entries() {
        let json = r#"{
          "commands": [
            {
              "inputCommand": "SELECT version()",
              "outputCommand": "SELECT '8.0.31' AS v",
              "matcherArray": ["COMPLETE"],
              "columnOverrideType": "NAME_OVERRIDE",
              "columnOverride": {
                "columnNameOverrides": [
                  {"resultSetColumnName": "v", "outputColumnName": "version()"}
                ]
              }
            },
            {
              "inputCommand": "SELECT 2",
              "outputQuery": "SELECT 3 AS n",
              "matcherArray": ["COMPLETE"],
              "columnOverrideType": "PREFIX",
              "columnOverride": {"prefix": "x_"}
            },
            {"inputCommand": "SHOW ENGINES", "matcherArray": ["COMPLETE"], "action": "BYPASS"},
            {"inputCommand": "SELECT 9", "matcherArray": ["PARTIAL"]}
          ]
        }"#;
        let mut translator = QueryTranslator::empty();
        assert_eq!(translator.load_json(json).unwrap(), 3);

        let version = translator.translate("SELECT version()").unwrap();
        assert_eq!(version.output_query, "SELECT '8.0.31' AS v");
        assert_eq!(version.column_override.apply("v"), "version()");
        assert_eq!(
            translator.translate("SELECT 2").unwrap().column_override.apply("n"),
            "x_n"
        );
        assert!(translator.is_bypass("SHOW ENGINES"));
        assert!(translator.translate("SELECT 9").is_none());
    }

    #[test]
    fn test_load_json_array_and_errors() {
        let mut translator = QueryTranslator::empty();
        let json = r#"[{"inputCommand": "SELECT 1", "matcherArray": ["COMPLETE"]}]"#;
        assert_eq!(translator.load_json(json).unwrap(), 1);
        assert_eq!(translator.translate("SELECT 1").unwrap().output_query, "SELECT 1");

        let missing_prefix = r#"[{"inputCommand": "SELECT 1", "matcherArray": ["COMPLETE"], "columnOverrideType": "PREFIX"}]"#;
        assert!(matches!(
            translator.load_json(missing_prefix),
            Err(TranslatorError::Entry { .. })
        ));
        assert!(matches!(
            translator.load_json("{not json"),
            Err(TranslatorError::Json { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let mut translator = QueryTranslator::empty();
        assert!(matches!(
            translator.load_file("/nonexistent/translations.json"),
            Err(TranslatorError::Io { .. })
        ));
    }

    #[test]
    fn test_load_example_file() {
        let mut translator = QueryTranslator::empty();
        assert_eq!(translator.load_file("config/translations.example.json").unwrap(), 3);
        assert!(translator.is_bypass("SHOW WARNINGS"));

        let renamed = translator.translate("SELECT @@session.tx_read_only").unwrap();
        assert_eq!(renamed.column_override.apply("tx_read_only"), "@@session.tx_read_only");
        let prefixed = translator.translate("SELECT DATABASE()").unwrap();
        assert_eq!(prefixed.column_override.apply("db"), "current_db");
    }
}
