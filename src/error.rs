//! Error types for relay-postgres.

use thiserror::Error;

/// Result type for relay-postgres operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Parsed fields of an ErrorResponse or NoticeResponse message.
///
/// `severity`, `code` and `message` are always sent by the server; the rest
/// are optional.
#[derive(Debug, Clone, Default)]
pub struct ServerError {
    /// Severity (localized): ERROR, FATAL, PANIC, WARNING, NOTICE, ...
    pub severity: Option<String>,
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in the query string (1-based)
    pub position: Option<u32>,
    /// Position in an internally generated query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context / stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ServerError {
    /// SQLSTATE code, or `""` if the server did not send one.
    pub fn sqlstate(&self) -> &str {
        self.code.as_deref().unwrap_or_default()
    }

    /// Non-localized severity when available, localized otherwise.
    pub fn severity(&self) -> &str {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity(),
            self.message.as_deref().unwrap_or_default(),
            self.sqlstate(),
        )?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for relay-postgres.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(Box<ServerError>),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server requested an authentication method this driver does not speak
    #[error("Unsupported authentication method: {0}")]
    UnsupportedAuth(String),

    /// Authentication failed with SQLSTATE 28P01
    #[error("invalid password")]
    InvalidPassword,

    /// Authentication failed with SQLSTATE 28000
    #[error("invalid authorization specification")]
    InvalidAuthorization,

    /// TLS error
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// SSL was required but the server declined the SSLRequest
    #[error("SSL required but not available on this server")]
    SslNotAvailable,

    /// An earlier extended-query error must be cleared with `sync`
    #[error("sync required after extended-query error")]
    SyncRequired,

    /// The connection was closed locally
    #[error("connection closed")]
    Closed,

    /// The connection was lost mid-session
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// Connect deadline expired
    #[error("connect timed out")]
    Timeout,

    /// Parameter encode error
    #[error("Encode error: {0}")]
    Encode(String),

    /// Value decode error
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid usage (e.g. cancel without a peer address)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// A `with_transaction` body failed and the transaction was rolled back
    #[error("transaction rolled back: {0}")]
    RolledBack(Box<Error>),
}

impl Error {
    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(err) => Some(err.sqlstate()),
            _ => None,
        }
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(Box::new(err))
    }
}
