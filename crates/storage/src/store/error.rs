#![forbid(unsafe_code)]

use rusqlite::ErrorCode;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Config(sr_core::config::ConfigError),
    InvalidInput(&'static str),
    /// Transient write contention that outlived the store's internal retry.
    Contention(&'static str),
    UnknownTable(String),
    SchemaVersionMismatch { expected: String, found: String },
    GsidSource(String),
}

impl StoreError {
    /// Transient storage conditions the caller may retry with backoff. The
    /// retry loop itself belongs to the caller, not the store.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Contention(_) => true,
            Self::Sql(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Config(err) => write!(f, "config: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::Contention(message) => write!(f, "contention: {message}"),
            Self::UnknownTable(table) => write!(f, "unknown table: {table}"),
            Self::SchemaVersionMismatch { expected, found } => {
                write!(f, "schema version mismatch (expected={expected}, found={found})")
            }
            Self::GsidSource(message) => write!(f, "gsid source: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<sr_core::config::ConfigError> for StoreError {
    fn from(value: sr_core::config::ConfigError) -> Self {
        Self::Config(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_and_io_are_retryable() {
        assert!(StoreError::Contention("race recovery failed").is_retryable());
        assert!(StoreError::Io(std::io::Error::other("disk")).is_retryable());
    }

    #[test]
    fn caller_errors_are_not_retryable() {
        assert!(!StoreError::InvalidInput("bad key").is_retryable());
        assert!(!StoreError::UnknownTable("sample".to_string()).is_retryable());
        assert!(
            !StoreError::SchemaVersionMismatch {
                expected: "v1".to_string(),
                found: "v2".to_string(),
            }
            .is_retryable()
        );
    }
}
