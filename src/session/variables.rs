//! System variable definitions and the process-wide global template.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::backend::{BackendType, Value};

use super::state::VariableError;

const BUILTIN_DEFINITIONS: &str = include_str!("system_variables.tsv");
const NULL_TOKEN: &str = "\\N";
const READ_ONLY_TOKEN: &str = "ro";

/// One system variable with its declared type and current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemVariable {
    pub name: String,
    pub var_type: BackendType,
    /// `None` is SQL NULL
    pub value: Option<String>,
    pub read_only: bool,
}

/// Parse a MySQL boolean token
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Some(true),
        "0" | "off" | "false" => Some(false),
        _ => None,
    }
}

impl SystemVariable {
    pub fn new(
        name: impl Into<String>,
        var_type: BackendType,
        value: Option<String>,
        read_only: bool,
    ) -> Self {
        Self {
            name: name.into(),
            var_type,
            value,
            read_only,
        }
    }

    /// Validate `value` against the declared type and return its stored form
    pub fn normalize(&self, value: Option<&str>) -> Result<Option<String>, VariableError> {
        let invalid = || VariableError::InvalidValue {
            name: self.name.clone(),
            value: value.unwrap_or("NULL").to_string(),
        };
        let Some(raw) = value else {
            return match self.var_type {
                BackendType::String => Ok(None),
                _ => Err(invalid()),
            };
        };

        let normalized = match self.var_type {
            BackendType::Bool => {
                let flag = parse_bool(raw).ok_or_else(invalid)?;
                (if flag { "1" } else { "0" }).to_string()
            }
            BackendType::Int64 => raw.trim().parse::<i64>().map_err(|_| invalid())?.to_string(),
            BackendType::Float64 => {
                raw.trim().parse::<f64>().map_err(|_| invalid())?;
                raw.trim().to_string()
            }
            _ => raw.to_string(),
        };
        Ok(Some(normalized))
    }

    /// Current value as a typed backend value
    pub fn typed_value(&self) -> Value {
        let Some(raw) = self.value.as_deref() else {
            return Value::Null;
        };
        match self.var_type {
            BackendType::Bool => Value::Bool(raw == "1"),
            BackendType::Int64 => raw.parse().map(Value::Int64).unwrap_or(Value::Null),
            BackendType::Float64 => raw.parse().map(Value::Float64).unwrap_or(Value::Null),
            _ => Value::String(raw.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Failed to read variable definitions from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid variable definition on line {line}: {message}")]
    Line { line: usize, message: String },
}

/// Immutable template every session copies its variables from
#[derive(Debug, Clone)]
pub struct GlobalSettings {
    variables: HashMap<String, SystemVariable>,
}

impl GlobalSettings {
    /// Definitions compiled into the binary
    pub fn builtin() -> Result<Self, DefinitionError> {
        Self::from_definitions(BUILTIN_DEFINITIONS)
    }

    /// Load a definitions file that replaces the built-in table
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_definitions(&text)?;
        info!(path = %path.display(), variables = settings.len(), "Loaded system variable definitions");
        Ok(settings)
    }

    /// Parse `name<TAB>type<TAB>default[<TAB>ro]` lines
    pub fn from_definitions(text: &str) -> Result<Self, DefinitionError> {
        let mut variables = HashMap::new();
        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let bad = |message: String| DefinitionError::Line {
                line: line_no,
                message,
            };

            let fields: Vec<&str> = line.split('\t').collect();
            if !(3..=4).contains(&fields.len()) {
                return Err(bad(format!("expected 3 or 4 tab-separated fields, got {}", fields.len())));
            }
            let name = fields[0].trim().to_ascii_lowercase();
            if name.is_empty() {
                return Err(bad("empty variable name".into()));
            }
            let var_type: BackendType = fields[1].parse().map_err(bad)?;
            let read_only = match fields.get(3).map(|f| f.trim()) {
                None | Some("") => false,
                Some(READ_ONLY_TOKEN) => true,
                Some(other) => return Err(bad(format!("unknown flag '{}'", other))),
            };
            let default = match fields[2] {
                NULL_TOKEN => None,
                value => Some(value),
            };

            let mut variable = SystemVariable::new(name.clone(), var_type, None, read_only);
            variable.value = variable
                .normalize(default)
                .map_err(|e| bad(e.to_string()))?;
            if variables.insert(name.clone(), variable).is_some() {
                return Err(bad(format!("duplicate variable '{}'", name)));
            }
        }
        Ok(Self { variables })
    }

    /// Apply server-supplied overrides to the template.
    ///
    /// This is the only path that changes global values; it runs once at
    /// startup, before any session copies the template.
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Result<Self, VariableError> {
        for (name, value) in overrides {
            let key = name.to_ascii_lowercase();
            let variable = self
                .variables
                .get_mut(&key)
                .ok_or_else(|| VariableError::Unknown(name.clone()))?;
            let value = match value.as_str() {
                NULL_TOKEN => None,
                other => Some(other),
            };
            variable.value = variable.normalize(value)?;
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&SystemVariable> {
        self.variables.get(&name.to_ascii_lowercase())
    }

    /// Deep copy for a new session
    pub fn snapshot(&self) -> HashMap<String, SystemVariable> {
        self.variables.clone()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
