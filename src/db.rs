//! The database handle.

use std::sync::{Arc, Mutex};

use crate::convert::driver_args;
use crate::driver::Driver;
use crate::error::DbError;
use crate::pool::{MAX_BAD_CONN_RETRIES, PoolConn, PoolState};
use crate::registry;
use crate::rows::{ExecResult, Row, Rows};
use crate::statement::{Statement, exec_statement};
use crate::transaction::Transaction;
use crate::value::Value;

/// A database handle, safe for concurrent use.
///
/// Connections are opened lazily and recycled through a per-handle idle
/// pool. Cloning is cheap and every clone refers to the same pool.
///
/// ```rust,no_run
/// use sql_conduit::{Db, ScanDest, Value};
///
/// async fn demo() -> Result<(), sql_conduit::DbError> {
///     let db = Db::open("stub", "dsn")?;
///     db.exec("INSERT INTO users VALUES (?, ?)", &[Value::Int(1), Value::from("alice")])
///         .await?;
///
///     let mut rows = db.query("SELECT id, name FROM users", &[]).await?;
///     while rows.next().await {
///         let mut id = 0i64;
///         let mut name = String::new();
///         rows.scan(&mut [ScanDest::Int(&mut id), ScanDest::Text(&mut name)])?;
///     }
///     rows.err()?;
///     db.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Db {
    pub(crate) inner: Arc<DbInner>,
}

pub(crate) struct DbInner {
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) dsn: String,
    pub(crate) state: Mutex<PoolState>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").field("dsn", &self.inner.dsn).finish()
    }
}

impl Db {
    /// Open a database by registered driver name and a driver-specific
    /// data source name. No connection is opened until first use.
    ///
    /// # Errors
    ///
    /// Returns `DbError::UnknownDriver` if `driver_name` was never
    /// registered.
    pub fn open(driver_name: &str, dsn: &str) -> Result<Db, DbError> {
        let driver = registry::lookup(driver_name)?;
        Ok(Db {
            inner: Arc::new(DbInner {
                driver,
                dsn: dsn.to_string(),
                state: Mutex::new(PoolState::default()),
            }),
        })
    }

    /// Close the handle: every idle connection is closed and further
    /// acquisition fails with `DbError::DbClosed`.
    ///
    /// # Errors
    ///
    /// Individual close errors are coalesced; the last one observed is
    /// returned.
    pub async fn close(&self) -> Result<(), DbError> {
        let drained: Vec<PoolConn> = {
            let mut state = self.lock_state();
            state.closed = true;
            std::mem::take(&mut state.free)
        };
        let mut last_err = None;
        for conn in drained {
            if let Err(err) = conn.close().await {
                last_err = Some(err);
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The driver this handle was opened with.
    #[must_use]
    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.inner.driver)
    }

    /// Create a prepared statement for later execution.
    ///
    /// # Errors
    ///
    /// Returns the driver's prepare error; bad connections are retried
    /// on fresh connections up to the retry budget.
    pub async fn prepare(&self, query: &str) -> Result<Statement, DbError> {
        let mut result = self.prepare_conn(query).await;
        for _ in 1..MAX_BAD_CONN_RETRIES {
            if !matches!(result, Err(DbError::BadConnection)) {
                break;
            }
            result = self.prepare_conn(query).await;
        }
        result
    }

    async fn prepare_conn(&self, query: &str) -> Result<Statement, DbError> {
        let mut conn = self.conn().await?;
        match conn.conn.prepare(query).await {
            Ok(si) => {
                let stmt = Statement::for_db(self.clone(), query, conn.id(), si);
                self.put_conn(conn, None).await;
                Ok(stmt)
            }
            Err(err) => {
                self.put_conn(conn, Some(&err)).await;
                Err(err)
            }
        }
    }

    /// Execute a statement without returning rows.
    ///
    /// # Errors
    ///
    /// Returns argument conversion errors and the driver's execution
    /// error; bad connections are retried on fresh connections up to
    /// the retry budget.
    pub async fn exec(&self, query: &str, args: &[Value]) -> Result<ExecResult, DbError> {
        let mut result = self.exec_conn(query, args).await;
        for _ in 1..MAX_BAD_CONN_RETRIES {
            if !matches!(result, Err(DbError::BadConnection)) {
                break;
            }
            result = self.exec_conn(query, args).await;
        }
        result
    }

    async fn exec_conn(&self, query: &str, args: &[Value]) -> Result<ExecResult, DbError> {
        let mut conn = self.conn().await?;
        let result = exec_on_conn(&mut *conn.conn, query, args).await;
        self.put_conn(conn, result.as_ref().err()).await;
        result
    }

    /// Execute a query that returns rows, typically a SELECT.
    ///
    /// The one-shot statement backing the query is attached to the
    /// cursor and closed with it.
    ///
    /// # Errors
    ///
    /// Returns prepare and execution errors from the driver.
    pub async fn query(&self, query: &str, args: &[Value]) -> Result<Rows, DbError> {
        let stmt = self.prepare(query).await?;
        match stmt.query(args).await {
            Ok(mut rows) => {
                rows.attach_stmt(stmt);
                Ok(rows)
            }
            Err(err) => {
                let _ = stmt.close().await;
                Err(err)
            }
        }
    }

    /// Execute a query expected to return at most one row.
    ///
    /// Always returns a [`Row`]; errors are deferred until its `scan`.
    pub async fn query_row(&self, query: &str, args: &[Value]) -> Row {
        match self.query(query, args).await {
            Ok(rows) => Row::from_rows(rows),
            Err(err) => Row::from_err(err),
        }
    }

    /// Start a transaction. The isolation level is up to the driver.
    ///
    /// # Errors
    ///
    /// Returns the driver's begin error; bad connections are retried on
    /// fresh connections up to the retry budget.
    pub async fn begin(&self) -> Result<Transaction, DbError> {
        let mut result = self.begin_conn().await;
        for _ in 1..MAX_BAD_CONN_RETRIES {
            if !matches!(result, Err(DbError::BadConnection)) {
                break;
            }
            result = self.begin_conn().await;
        }
        result
    }

    async fn begin_conn(&self) -> Result<Transaction, DbError> {
        let mut conn = self.conn().await?;
        match conn.conn.begin().await {
            Ok(txi) => Ok(Transaction::new(self.clone(), conn, txi)),
            Err(err) => {
                self.put_conn(conn, Some(&err)).await;
                Err(err)
            }
        }
    }
}

/// One-shot execution on an already-acquired connection: the `exec_direct`
/// fast path when the driver supports it, else prepare, execute, and
/// close the transient statement.
pub(crate) async fn exec_on_conn(
    conn: &mut dyn crate::driver::DriverConnection,
    query: &str,
    args: &[Value],
) -> Result<ExecResult, DbError> {
    let dargs = driver_args(None, args)?;
    match conn.exec_direct(query, &dargs).await {
        Ok(resi) => return Ok(ExecResult::new(resi)),
        Err(DbError::Skip) => {}
        Err(err) => return Err(err),
    }

    let mut si = conn.prepare(query).await?;
    let result = exec_statement(&mut *si, args).await;
    let _ = si.close().await;
    result
}
