//! Row cursors and execution summaries.

use crate::convert::{ScanDest, convert_assign};
use crate::driver::{DriverResult, DriverRows};
use crate::error::DbError;
use crate::pool::ConnGuard;
use crate::statement::Statement;
use crate::value::Value;

/// Summary of an executed statement.
pub struct ExecResult {
    inner: Box<dyn DriverResult>,
}

impl std::fmt::Debug for ExecResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecResult").finish_non_exhaustive()
    }
}

impl ExecResult {
    pub(crate) fn new(inner: Box<dyn DriverResult>) -> Self {
        Self { inner }
    }

    /// The identifier generated by the last insert.
    ///
    /// # Errors
    ///
    /// `DbError::Unsupported` if the driver has no such notion.
    pub fn last_insert_id(&self) -> Result<i64, DbError> {
        self.inner.last_insert_id()
    }

    /// Rows affected by the statement.
    ///
    /// # Errors
    ///
    /// `DbError::Unsupported` if the driver cannot count them.
    pub fn rows_affected(&self) -> Result<i64, DbError> {
        self.inner.rows_affected()
    }
}

/// The result of a query. The cursor starts before the first row:
///
/// ```rust,no_run
/// # async fn demo(db: &sql_conduit::Db) -> Result<(), sql_conduit::DbError> {
/// use sql_conduit::ScanDest;
///
/// let mut rows = db.query("SELECT id, name FROM users", &[]).await?;
/// while rows.next().await {
///     let mut id = 0i64;
///     let mut name = String::new();
///     rows.scan(&mut [ScanDest::Int(&mut id), ScanDest::Text(&mut name)])?;
/// }
/// rows.err()?;
/// # Ok(()) }
/// ```
///
/// The cursor owns one connection, which goes back to the pool only when
/// the cursor is closed or exhausted.
pub struct Rows {
    guard: Option<ConnGuard>,
    rowsi: Option<Box<dyn DriverRows>>,
    closed: bool,
    last_cols: Option<Vec<Value>>,
    last_err: Option<DbError>,
    /// One-shot statement backing a handle-level query; closed with the
    /// cursor.
    close_stmt: Option<Statement>,
}

impl Rows {
    pub(crate) fn new(guard: ConnGuard, rowsi: Box<dyn DriverRows>) -> Self {
        Self {
            guard: Some(guard),
            rowsi: Some(rowsi),
            closed: false,
            last_cols: None,
            last_err: None,
            close_stmt: None,
        }
    }

    pub(crate) fn attach_stmt(&mut self, stmt: Statement) {
        self.close_stmt = Some(stmt);
    }

    /// Advance to the next row, making it available to [`Rows::scan`].
    ///
    /// Returns `false` once the result set is exhausted (the cursor is
    /// then closed automatically) or after an iteration error, which
    /// [`Rows::err`] surfaces. Every `scan`, including the first, must be
    /// preceded by a successful `next`.
    pub async fn next(&mut self) -> bool {
        if self.closed || self.last_err.is_some() {
            return false;
        }
        let Some(rowsi) = self.rowsi.as_mut() else {
            return false;
        };
        if self.last_cols.is_none() {
            let width = rowsi.columns().len();
            self.last_cols = Some(vec![Value::Null; width]);
        }
        let Some(buf) = self.last_cols.as_mut() else {
            return false;
        };
        match rowsi.next(buf).await {
            Ok(true) => true,
            Ok(false) => {
                let _ = self.close().await;
                false
            }
            Err(err) => {
                self.last_err = Some(err);
                false
            }
        }
    }

    /// The error, if any, encountered during iteration. Normal
    /// exhaustion is not an error.
    ///
    /// # Errors
    ///
    /// The stored iteration error.
    pub fn err(&self) -> Result<(), DbError> {
        match &self.last_err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// The column names of the result set.
    ///
    /// # Errors
    ///
    /// `DbError::RowsClosed` once the cursor has been closed.
    pub fn columns(&self) -> Result<Vec<String>, DbError> {
        if self.closed {
            return Err(DbError::RowsClosed);
        }
        match &self.rowsi {
            Some(rowsi) => Ok(rowsi.columns()),
            None => Err(DbError::RowsClosed),
        }
    }

    /// Copy the current row's columns into `dest`.
    ///
    /// Byte destinations other than [`crate::RawBytes`] receive memory
    /// owned by the caller, stable across subsequent `next` and `close`
    /// calls.
    ///
    /// # Errors
    ///
    /// State errors, a destination count mismatch, or a conversion
    /// failure wrapped with the offending column index.
    pub fn scan(&mut self, dest: &mut [ScanDest<'_>]) -> Result<(), DbError> {
        if self.closed {
            return Err(DbError::RowsClosed);
        }
        if let Some(err) = &self.last_err {
            return Err(err.clone());
        }
        let Some(cols) = self.last_cols.as_mut() else {
            return Err(DbError::Execution(
                "scan called without calling next".to_string(),
            ));
        };
        if dest.len() != cols.len() {
            return Err(DbError::Parameter(format!(
                "expected {} destination arguments in scan, got {}",
                cols.len(),
                dest.len()
            )));
        }
        for (i, (d, sv)) in dest.iter_mut().zip(cols.iter_mut()).enumerate() {
            convert_assign(d, sv).map_err(|err| DbError::Scan {
                index: i,
                source: Box::new(err),
            })?;
        }
        Ok(())
    }

    /// Close the cursor, releasing its connection. Idempotent; called
    /// automatically when the result set is exhausted.
    ///
    /// # Errors
    ///
    /// The driver's close error. The connection release and statement
    /// close run regardless.
    pub async fn close(&mut self) -> Result<(), DbError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let err = match self.rowsi.take() {
            Some(mut rowsi) => rowsi.close().await.err(),
            None => None,
        };
        if let Some(guard) = self.guard.take() {
            guard.release(err.as_ref()).await;
        }
        if let Some(stmt) = self.close_stmt.take() {
            let _ = stmt.close().await;
        }
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The deferred result of a single-row query.
///
/// Returned by the `query_row` methods, which never fail directly;
/// errors surface from [`Row::scan`].
pub struct Row {
    rows: Option<Rows>,
    err: Option<DbError>,
}

impl Row {
    pub(crate) fn from_rows(rows: Rows) -> Self {
        Self {
            rows: Some(rows),
            err: None,
        }
    }

    pub(crate) fn from_err(err: DbError) -> Self {
        Self {
            rows: None,
            err: Some(err),
        }
    }

    /// Copy the first matched row into `dest`, discarding the rest.
    ///
    /// Borrow-view destinations are rejected up front: the cursor is
    /// closed before this returns, so there is no driver memory left to
    /// view.
    ///
    /// # Errors
    ///
    /// The deferred query error, `DbError::NoRows` when the result set
    /// is empty, or a scan failure.
    pub async fn scan(mut self, dest: &mut [ScanDest<'_>]) -> Result<(), DbError> {
        if let Some(err) = self.err.take() {
            return Err(err);
        }
        let Some(mut rows) = self.rows.take() else {
            return Err(DbError::NoRows);
        };
        if dest.iter().any(ScanDest::is_borrow_view) {
            let _ = rows.close().await;
            return Err(DbError::Parameter(
                "raw byte destinations are not allowed on a single-row scan".to_string(),
            ));
        }
        if !rows.next().await {
            let _ = rows.close().await;
            return Err(DbError::NoRows);
        }
        let result = rows.scan(dest);
        let _ = rows.close().await;
        result
    }
}
