use thiserror::Error;

/// Errors produced by the facade and by the drivers behind it.
///
/// The enum is `Clone` so deferred and sticky errors can be surfaced on
/// every subsequent operation without consuming them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// The driver has signaled that the connection is unreusable. The
    /// acquisition paths retry on this error; the connection itself is
    /// closed and never pooled again.
    #[error("driver: bad connection")]
    BadConnection,

    /// Returned by a driver's `exec_direct` to request fallback to the
    /// prepare-then-execute path.
    #[error("driver: skip fast-path")]
    Skip,

    #[error("no rows in result set")]
    NoRows,

    #[error("transaction has already been committed or rolled back")]
    TxDone,

    #[error("unknown driver {0:?} (forgotten registration?)")]
    UnknownDriver(String),

    #[error("database is closed")]
    DbClosed,

    #[error("statement is closed")]
    StmtClosed,

    #[error("rows are closed")]
    RowsClosed,

    /// A statement prepared on one database handle was rebound onto a
    /// transaction belonging to a different handle.
    #[error("transaction and statement come from different database handles")]
    StatementMismatch,

    /// Argument arity or outbound argument conversion failure.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// A value could not be assigned to a scan destination without loss.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A conversion failure wrapped with the offending column index.
    #[error("scan error on column index {index}: {source}")]
    Scan { index: usize, source: Box<DbError> },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl DbError {
    /// Whether the bounded acquisition retry loops may retry after this
    /// error.
    #[must_use]
    pub fn is_bad_connection(&self) -> bool {
        matches!(self, DbError::BadConnection)
    }
}
