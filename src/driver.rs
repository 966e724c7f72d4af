//! The abstract shapes the facade depends on.
//!
//! A backend implements these traits and registers a [`Driver`] under a
//! name; everything else in the crate only ever talks to boxed trait
//! objects. Opening connections, parsing SQL, executing, and producing
//! native values all live behind this boundary.

use async_trait::async_trait;

use crate::error::DbError;
use crate::value::Value;

/// Backend entry point: opens connections for a data source name.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a new connection. The DSN is opaque to the facade.
    ///
    /// # Errors
    ///
    /// Returns the driver's connection error.
    async fn open(&self, dsn: &str) -> Result<Box<dyn DriverConnection>, DbError>;
}

impl std::fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Driver").finish_non_exhaustive()
    }
}

/// A single database connection, exclusively owned by its holder.
///
/// A connection that has returned [`DbError::BadConnection`] is closed
/// and discarded by the facade; it never re-enters the idle pool.
#[async_trait]
pub trait DriverConnection: Send {
    /// Prepare a statement bound to this connection.
    ///
    /// # Errors
    ///
    /// Returns the driver's prepare error.
    async fn prepare(&mut self, query: &str) -> Result<Box<dyn DriverStatement>, DbError>;

    /// Start a transaction. The isolation level is the driver's choice.
    ///
    /// # Errors
    ///
    /// Returns the driver's begin error.
    async fn begin(&mut self) -> Result<Box<dyn DriverTransaction>, DbError>;

    /// Close the connection and release its resources.
    ///
    /// # Errors
    ///
    /// Returns the driver's close error.
    async fn close(&mut self) -> Result<(), DbError>;

    /// Optional one-shot execution fast path.
    ///
    /// Drivers that can execute without preparing override this; the
    /// default returns [`DbError::Skip`], which tells the facade to fall
    /// back to prepare-then-execute on the same connection.
    ///
    /// # Errors
    ///
    /// `DbError::Skip` to request fallback; anything else is fatal for
    /// the call.
    async fn exec_direct(
        &mut self,
        query: &str,
        args: &[Value],
    ) -> Result<Box<dyn DriverResult>, DbError> {
        let _ = (query, args);
        Err(DbError::Skip)
    }
}

/// A prepared statement on a specific connection.
#[async_trait]
pub trait DriverStatement: Send {
    /// Number of placeholder parameters, or `None` if the driver does
    /// not know; unknown arity delegates validation to the driver.
    fn num_input(&self) -> Option<usize>;

    /// Execute without returning rows.
    ///
    /// # Errors
    ///
    /// Returns the driver's execution error.
    async fn exec(&mut self, args: &[Value]) -> Result<Box<dyn DriverResult>, DbError>;

    /// Execute and return a row iterator.
    ///
    /// # Errors
    ///
    /// Returns the driver's execution error.
    async fn query(&mut self, args: &[Value]) -> Result<Box<dyn DriverRows>, DbError>;

    /// Close the statement.
    ///
    /// # Errors
    ///
    /// Returns the driver's close error.
    async fn close(&mut self) -> Result<(), DbError>;
}

/// A driver-side row iterator.
#[async_trait]
pub trait DriverRows: Send {
    /// Column names, in result order.
    fn columns(&self) -> Vec<String>;

    /// Fill `dest` with the next row. `Ok(false)` signals exhaustion.
    ///
    /// Drivers may hand out buffers they reuse; the facade copies before
    /// values escape a row, except into explicit borrow-view
    /// destinations.
    ///
    /// # Errors
    ///
    /// Returns the driver's iteration error.
    async fn next(&mut self, dest: &mut [Value]) -> Result<bool, DbError>;

    /// Close the iterator.
    ///
    /// # Errors
    ///
    /// Returns the driver's close error.
    async fn close(&mut self) -> Result<(), DbError>;
}

/// Immutable summary of an executed statement.
pub trait DriverResult: Send {
    /// The identifier generated by the last insert.
    ///
    /// # Errors
    ///
    /// `DbError::Unsupported` if the backend has no such notion.
    fn last_insert_id(&self) -> Result<i64, DbError>;

    /// Rows affected by the statement.
    ///
    /// # Errors
    ///
    /// `DbError::Unsupported` if the backend cannot count them.
    fn rows_affected(&self) -> Result<i64, DbError>;
}

/// A driver-side transaction on one connection.
#[async_trait]
pub trait DriverTransaction: Send {
    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns the driver's commit error.
    async fn commit(&mut self) -> Result<(), DbError>;

    /// Roll the transaction back.
    ///
    /// # Errors
    ///
    /// Returns the driver's rollback error.
    async fn rollback(&mut self) -> Result<(), DbError>;
}
