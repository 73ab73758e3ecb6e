#![forbid(unsafe_code)]

//! Per-table load configuration: the natural key that identifies a logical
//! row and the fields whose values must never be overwritten. Loaded once at
//! startup into a validated structure, never re-interpreted per call.

use serde::Deserialize;

const MAX_NAME_LEN: usize = 64;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TableConfig {
    pub table: String,
    pub natural_key: Vec<String>,
    #[serde(default)]
    pub immutable_fields: Vec<String>,
    /// When set, the batch pipeline writes the resolved GSID into this field
    /// before the record reaches the upsert engine.
    #[serde(default)]
    pub gsid_field: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TablesConfig {
    pub tables: Vec<TableConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    DuplicateTable(String),
    Invalid { table: String, message: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "config parse error: {message}"),
            Self::DuplicateTable(table) => write!(f, "table {table:?} is configured twice"),
            Self::Invalid { table, message } => write!(f, "table {table:?}: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl TablesConfig {
    pub fn empty() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: TablesConfig =
            serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn get(&self, table: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|config| config.table == table)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for table in &self.tables {
            table.validate()?;
            if !seen.insert(table.table.as_str()) {
                return Err(ConfigError::DuplicateTable(table.table.clone()));
            }
        }
        Ok(())
    }
}

impl TableConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message| ConfigError::Invalid {
            table: self.table.clone(),
            message,
        };

        if !is_valid_name(&self.table) {
            return Err(invalid("table name must be a short [A-Za-z0-9_] identifier"));
        }
        if self.natural_key.is_empty() {
            return Err(invalid("natural_key must list at least one field"));
        }

        let mut key_fields = std::collections::BTreeSet::new();
        for field in &self.natural_key {
            if !is_valid_name(field) {
                return Err(invalid("natural_key contains an invalid field name"));
            }
            if !key_fields.insert(field.as_str()) {
                return Err(invalid("natural_key lists a field twice"));
            }
        }

        let mut immutable = std::collections::BTreeSet::new();
        for field in &self.immutable_fields {
            if !is_valid_name(field) {
                return Err(invalid("immutable_fields contains an invalid field name"));
            }
            if !immutable.insert(field.as_str()) {
                return Err(invalid("immutable_fields lists a field twice"));
            }
            // Key fields are immutable by construction; listing one again is
            // a config mistake, not a second protection.
            if key_fields.contains(field.as_str()) {
                return Err(invalid("immutable_fields must not repeat natural_key fields"));
            }
        }

        if let Some(field) = &self.gsid_field {
            if !is_valid_name(field) {
                return Err(invalid("gsid_field is not a valid field name"));
            }
        }

        Ok(())
    }
}

fn is_valid_name(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_NAME_LEN {
        return false;
    }
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
