use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Database and pool failures surfaced by this crate.
///
/// Classification into [`ErrorKind`] is best-effort: structured variants map
/// directly, while free-form messages go through keyword matching and fall
/// back to [`ErrorKind::Other`].
#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    #[error("transaction timeout after {timeout_ms}ms")]
    TransactionTimeout { timeout_ms: u64 },

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("connection pool is not initialized")]
    PoolUnavailable,

    #[error("{0}")]
    Other(String),
}

impl DbError {
    /// The kind used for error accounting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Connection(_) => ErrorKind::Connection,
            DbError::QueryTimeout { .. } => ErrorKind::QueryTimeout,
            DbError::TransactionTimeout { .. } => ErrorKind::TransactionTimeout,
            DbError::Transaction(_) => ErrorKind::Transaction,
            DbError::Query(_) => ErrorKind::Query,
            DbError::PoolUnavailable => ErrorKind::PoolUnavailable,
            DbError::Other(msg) => ErrorKind::from_signature(None, msg),
        }
    }
}

/// Error categories tracked by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    QueryTimeout,
    TransactionTimeout,
    Transaction,
    Query,
    PoolUnavailable,
    Other,
}

impl ErrorKind {
    /// Stable name used in logs and counter maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::QueryTimeout => "query_timeout",
            ErrorKind::TransactionTimeout => "transaction_timeout",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Query => "query",
            ErrorKind::PoolUnavailable => "pool_unavailable",
            ErrorKind::Other => "other",
        }
    }

    /// Best-effort keyword classification of a free-form error.
    ///
    /// Keywords are checked in priority order: timeout, connection,
    /// transaction, query. A timeout that also mentions a transaction is a
    /// transaction timeout; otherwise it counts as a query timeout.
    pub fn from_signature(code: Option<&str>, message: &str) -> Self {
        let mut haystack = message.to_ascii_lowercase();
        if let Some(code) = code {
            haystack.push(' ');
            haystack.push_str(&code.to_ascii_lowercase());
        }

        if haystack.contains("timeout") || haystack.contains("timed out") {
            if haystack.contains("transaction") {
                ErrorKind::TransactionTimeout
            } else {
                ErrorKind::QueryTimeout
            }
        } else if haystack.contains("connection") || haystack.contains("econnrefused") {
            ErrorKind::Connection
        } else if haystack.contains("transaction") {
            ErrorKind::Transaction
        } else if haystack.contains("query") {
            ErrorKind::Query
        } else {
            ErrorKind::Other
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level crate error.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Result alias for database-facing operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_variants_map_directly() {
        assert_eq!(
            DbError::Connection("refused".into()).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            DbError::QueryTimeout { timeout_ms: 5 }.kind(),
            ErrorKind::QueryTimeout
        );
        assert_eq!(DbError::PoolUnavailable.kind(), ErrorKind::PoolUnavailable);
    }

    #[test]
    fn keyword_priority_timeout_over_connection() {
        // Both keywords present: timeout wins.
        let kind = ErrorKind::from_signature(None, "connection timeout while acquiring");
        assert_eq!(kind, ErrorKind::QueryTimeout);
    }

    #[test]
    fn keyword_transaction_timeout() {
        let kind = ErrorKind::from_signature(None, "transaction timed out after 60s");
        assert_eq!(kind, ErrorKind::TransactionTimeout);
    }

    #[test]
    fn keyword_connection_from_code() {
        let kind = ErrorKind::from_signature(Some("ECONNREFUSED"), "socket closed");
        assert_eq!(kind, ErrorKind::Connection);
    }

    #[test]
    fn unknown_falls_back_to_other() {
        let kind = ErrorKind::from_signature(None, "disk full");
        assert_eq!(kind, ErrorKind::Other);
    }
}
