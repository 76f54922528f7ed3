//! Error types for chmodel operations.

use std::fmt;

/// The primary error type for all chmodel operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, close, lost connection)
    Connection(ConnectionError),
    /// Statement execution errors reported by the server
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Invalid configuration, detected before any I/O
    Config(ConfigError),
    /// Ephemeral table DDL errors
    Schema(SchemaError),
    /// A query placeholder could not be resolved to a literal
    Parameter(ParameterError),
    /// A bulk insert batch failed
    Batch(BatchError),
    /// An operation was attempted on a disposed ephemeral table handle
    Disposed(DisposedError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation timed out
    Timeout,
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// Connection is not open
    NotOpen,
    /// Connection refused
    Refused,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    /// ClickHouse server exception code, when the driver reports one
    pub code: Option<i32>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// A literal could not be parsed into the column type
    BadLiteral,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Server-side timeout
    Timeout,
    /// Too many parts / too many simultaneous inserts (retry may succeed)
    Overloaded,
    /// Cancelled
    Cancelled,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub table: String,
    pub message: String,
    pub source: Option<Box<Error>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// The entity maps no columns
    NoColumns,
    /// CREATE TABLE failed
    Create,
    /// Populating a freshly created table failed
    Populate,
    /// DROP TABLE failed
    Drop,
}

/// A `{name:Type}` placeholder with no resolvable value.
#[derive(Debug, Clone)]
pub struct ParameterError {
    /// Placeholder name as written in the SQL text
    pub placeholder: String,
    /// Declared ClickHouse type of the placeholder
    pub declared_type: String,
    /// Every candidate name that was available, sorted
    pub available: Vec<String>,
}

/// Failure of one batch within a bulk insert.
///
/// Batches before `batch_index` that completed are already committed;
/// the target database offers no cross-batch atomicity.
#[derive(Debug)]
pub struct BatchError {
    /// Zero-based index of the failing batch in input order
    pub batch_index: usize,
    /// Number of rows in the failing batch
    pub batch_rows: usize,
    /// Rows committed by batches that completed before the failure was observed
    pub rows_committed: u64,
    pub source: Box<Error>,
}

#[derive(Debug, Clone)]
pub struct DisposedError {
    pub table: String,
}

impl Error {
    /// Is this a retryable error (overload, timeouts)?
    ///
    /// Nothing in chmodel retries; callers layering a retry policy use this.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Overloaded | QueryErrorKind::Timeout),
            Error::Batch(b) => b.source.is_retryable(),
            Error::Timeout => true,
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => !matches!(c.kind, ConnectionErrorKind::NotOpen),
            Error::Io(_) => true,
            Error::Batch(b) => b.source.is_connection_error(),
            _ => false,
        }
    }

    /// Is this a configuration error raised before any I/O?
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Is this a disposed-handle error?
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed(_))
    }

    /// Index of the failing batch, for bulk insert failures.
    pub fn batch_index(&self) -> Option<usize> {
        match self {
            Error::Batch(b) => Some(b.batch_index),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Batch(b) => b.source.sql(),
            _ => None,
        }
    }

    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Build a disposed-handle error for `table`.
    pub fn disposed(table: impl Into<String>) -> Self {
        Error::Disposed(DisposedError {
            table: table.into(),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(code) = e.code {
                    write!(f, "Query error (code {}): {}", code, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error on {}: {}", e.table, e.message),
            Error::Parameter(e) => write!(f, "Parameter error: {}", e),
            Error::Batch(e) => write!(f, "{}", e),
            Error::Disposed(e) => write!(f, "{}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Schema(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Batch(e) => Some(&*e.source as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no value for placeholder {{{}:{}}}; available parameters: [{}]",
            self.placeholder,
            self.declared_type,
            self.available.join(", ")
        )
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} ({} rows) failed after {} rows were committed: {}",
            self.batch_index, self.batch_rows, self.rows_committed, self.source
        )
    }
}

impl fmt::Display for DisposedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temporary table {} has already been disposed", self.table)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ParameterError> for Error {
    fn from(err: ParameterError) -> Self {
        Error::Parameter(err)
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        Error::Batch(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for chmodel operations.
pub type Result<T> = std::result::Result<T, Error>;
