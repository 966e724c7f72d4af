//! Transactions.
//!
//! A transaction pins exactly one connection from `begin` until `commit`
//! or `rollback`. Every operation serializes on that connection's mutex;
//! cursors opened inside the transaction hold the lock until they close,
//! so independent work on the same transaction queues up cleanly.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::db::{Db, exec_on_conn};
use crate::driver::DriverTransaction;
use crate::error::DbError;
use crate::pool::PoolConn;
use crate::rows::{ExecResult, Row, Rows};
use crate::statement::Statement;
use crate::value::Value;

/// The pinned connection and its driver-side transaction. Taking the
/// option is the one-shot done transition: `None` means committed or
/// rolled back, and every later operation observes it without touching
/// the driver.
pub(crate) struct TxConn {
    pub(crate) conn: PoolConn,
    pub(crate) txi: Box<dyn DriverTransaction>,
}

/// An in-progress database transaction.
///
/// A transaction must end with `commit` or `rollback`; afterwards all
/// operations fail with [`DbError::TxDone`]. Dropping an unfinished
/// transaction schedules a best-effort rollback on the current runtime.
pub struct Transaction {
    db: Db,
    conn: Arc<AsyncMutex<Option<TxConn>>>,
}

impl Transaction {
    pub(crate) fn new(db: Db, conn: PoolConn, txi: Box<dyn DriverTransaction>) -> Self {
        Self {
            db,
            conn: Arc::new(AsyncMutex::new(Some(TxConn { conn, txi }))),
        }
    }

    /// Commit the transaction and return its connection to the pool.
    ///
    /// # Errors
    ///
    /// `DbError::TxDone` if already finished, else the driver's commit
    /// error. The connection goes back to the pool either way.
    pub async fn commit(&self) -> Result<(), DbError> {
        self.finish(true).await
    }

    /// Roll the transaction back and return its connection to the pool.
    ///
    /// # Errors
    ///
    /// `DbError::TxDone` if already finished, else the driver's rollback
    /// error. The connection goes back to the pool either way.
    pub async fn rollback(&self) -> Result<(), DbError> {
        self.finish(false).await
    }

    async fn finish(&self, commit: bool) -> Result<(), DbError> {
        let taken = {
            let mut guard = self.conn.lock().await;
            guard.take()
        };
        let Some(mut tc) = taken else {
            return Err(DbError::TxDone);
        };
        let result = if commit {
            tc.txi.commit().await
        } else {
            tc.txi.rollback().await
        };
        self.db.put_conn(tc.conn, None).await;
        result
    }

    /// Prepare a statement for use within this transaction.
    ///
    /// The statement executes on the transaction's pinned connection and
    /// stops working once the transaction finishes.
    ///
    /// # Errors
    ///
    /// `DbError::TxDone` if already finished, else the driver's prepare
    /// error.
    pub async fn prepare(&self, query: &str) -> Result<Statement, DbError> {
        let mut guard = self.conn.lock().await;
        let Some(tc) = guard.as_mut() else {
            return Err(DbError::TxDone);
        };
        let si = tc.conn.conn.prepare(query).await?;
        Ok(Statement::for_tx(
            self.db.clone(),
            query,
            Arc::clone(&self.conn),
            si,
        ))
    }

    /// Rebind a handle-prepared statement onto this transaction's
    /// connection.
    ///
    /// The returned statement never fails here; a statement from a
    /// different handle, a finished transaction, or a failed re-prepare
    /// yields a statement whose sticky error fires on first use.
    pub async fn stmt(&self, stmt: &Statement) -> Statement {
        if !Arc::ptr_eq(&self.db.inner, &stmt.db().inner) {
            return Statement::with_sticky(
                self.db.clone(),
                stmt.query_text(),
                DbError::StatementMismatch,
            );
        }
        let mut guard = self.conn.lock().await;
        let Some(tc) = guard.as_mut() else {
            return Statement::with_sticky(self.db.clone(), stmt.query_text(), DbError::TxDone);
        };
        match tc.conn.conn.prepare(stmt.query_text()).await {
            Ok(si) => Statement::for_tx(
                self.db.clone(),
                stmt.query_text(),
                Arc::clone(&self.conn),
                si,
            ),
            Err(err) => Statement::with_sticky(self.db.clone(), stmt.query_text(), err),
        }
    }

    /// Execute a statement inside the transaction without returning
    /// rows.
    ///
    /// # Errors
    ///
    /// `DbError::TxDone` if already finished, plus argument and driver
    /// errors.
    pub async fn exec(&self, query: &str, args: &[Value]) -> Result<ExecResult, DbError> {
        let mut guard = self.conn.lock().await;
        let Some(tc) = guard.as_mut() else {
            return Err(DbError::TxDone);
        };
        exec_on_conn(&mut *tc.conn.conn, query, args).await
    }

    /// Execute a query inside the transaction.
    ///
    /// The returned cursor holds the transaction's connection lock until
    /// it is closed or exhausted; further operations on the transaction
    /// wait for it.
    ///
    /// # Errors
    ///
    /// `DbError::TxDone` if already finished, plus prepare and execution
    /// errors.
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
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let conn = Arc::clone(&self.conn);
        let db = self.db.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let mut guard = conn.lock().await;
                if let Some(mut tc) = guard.take() {
                    let _ = tc.txi.rollback().await;
                    db.put_conn(tc.conn, None).await;
                }
            });
        }
    }
}
