//! Prepared statements.
//!
//! A statement prepared on the handle is not bound to one connection: it
//! remembers every `(connection, driver statement)` pair it has prepared
//! so far and, at execution time, reclaims the first of those
//! connections still sitting in the idle pool. When all of them are
//! busy it prepares again on a fresh connection and remembers the new
//! pair. Statements created inside a transaction instead always use the
//! transaction's pinned connection.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;

use crate::convert::driver_args;
use crate::db::Db;
use crate::driver::DriverStatement;
use crate::error::DbError;
use crate::pool::{ConnGuard, MAX_BAD_CONN_RETRIES};
use crate::rows::{ExecResult, Row, Rows};
use crate::transaction::TxConn;
use crate::value::Value;

/// A driver statement shared between the remembered list and in-flight
/// executions. The lock serializes driver access; exclusivity of the
/// paired connection is what makes concurrent use of one [`Statement`]
/// safe.
pub(crate) type SharedStmt = Arc<AsyncMutex<Box<dyn DriverStatement>>>;

#[derive(Clone)]
struct ConnStmt {
    conn_id: u64,
    stmt: SharedStmt,
}

struct TxBinding {
    conn: Arc<AsyncMutex<Option<TxConn>>>,
    stmt: SharedStmt,
}

struct StmtInner {
    closed: bool,
    /// Prepared instances per connection. Entries whose connection has
    /// since been closed are stale and simply never reclaim.
    css: Vec<ConnStmt>,
}

/// A prepared statement, safe for concurrent use.
pub struct Statement {
    db: Db,
    query: String,
    /// Set at construction time; fires on every subsequent operation.
    sticky_err: Option<DbError>,
    /// Present when the statement is bound to a transaction.
    tx: Option<TxBinding>,
    inner: Mutex<StmtInner>,
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl Statement {
    pub(crate) fn for_db(
        db: Db,
        query: &str,
        conn_id: u64,
        si: Box<dyn DriverStatement>,
    ) -> Statement {
        Statement {
            db,
            query: query.to_string(),
            sticky_err: None,
            tx: None,
            inner: Mutex::new(StmtInner {
                closed: false,
                css: vec![ConnStmt {
                    conn_id,
                    stmt: Arc::new(AsyncMutex::new(si)),
                }],
            }),
        }
    }

    pub(crate) fn for_tx(
        db: Db,
        query: &str,
        tx_conn: Arc<AsyncMutex<Option<TxConn>>>,
        si: Box<dyn DriverStatement>,
    ) -> Statement {
        Statement {
            db,
            query: query.to_string(),
            sticky_err: None,
            tx: Some(TxBinding {
                conn: tx_conn,
                stmt: Arc::new(AsyncMutex::new(si)),
            }),
            inner: Mutex::new(StmtInner {
                closed: false,
                css: Vec::new(),
            }),
        }
    }

    pub(crate) fn with_sticky(db: Db, query: &str, err: DbError) -> Statement {
        Statement {
            db,
            query: query.to_string(),
            sticky_err: Some(err),
            tx: None,
            inner: Mutex::new(StmtInner {
                closed: false,
                css: Vec::new(),
            }),
        }
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    /// The SQL text this statement was prepared from.
    #[must_use]
    pub fn query_text(&self) -> &str {
        &self.query
    }

    fn lock_inner(&self) -> MutexGuard<'_, StmtInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Locate a driver statement usable right now, together with the
    /// connection it is prepared on and the way to release it.
    async fn conn_stmt(&self) -> Result<(ConnGuard, SharedStmt), DbError> {
        if let Some(err) = &self.sticky_err {
            return Err(err.clone());
        }
        {
            let inner = self.lock_inner();
            if inner.closed {
                return Err(DbError::StmtClosed);
            }
        }

        // In a transaction, always the connection the transaction was
        // created on; blocks until it is free.
        if let Some(tx) = &self.tx {
            let guard = Arc::clone(&tx.conn).lock_owned().await;
            if guard.is_none() {
                return Err(DbError::TxDone);
            }
            return Ok((ConnGuard::Tx(guard), Arc::clone(&tx.stmt)));
        }

        let candidates: Vec<ConnStmt> = self.lock_inner().css.clone();
        for cs in candidates {
            if let Some(conn) = self.db.conn_if_free(cs.conn_id) {
                return Ok((
                    ConnGuard::Pool {
                        db: self.db.clone(),
                        conn,
                    },
                    cs.stmt,
                ));
            }
        }

        // Every remembered connection is busy: prepare on a fresh one.
        let mut attempt = 0;
        loop {
            let mut conn = self.db.conn().await?;
            match conn.conn.prepare(&self.query).await {
                Ok(si) => {
                    let shared: SharedStmt = Arc::new(AsyncMutex::new(si));
                    self.lock_inner().css.push(ConnStmt {
                        conn_id: conn.id(),
                        stmt: Arc::clone(&shared),
                    });
                    return Ok((
                        ConnGuard::Pool {
                            db: self.db.clone(),
                            conn,
                        },
                        shared,
                    ));
                }
                Err(err) => {
                    self.db.put_conn(conn, Some(&err)).await;
                    attempt += 1;
                    if matches!(err, DbError::BadConnection) && attempt < MAX_BAD_CONN_RETRIES {
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Execute with the given arguments, returning the driver's summary.
    ///
    /// # Errors
    ///
    /// Returns the sticky error, state errors, argument errors, and the
    /// driver's execution error.
    pub async fn exec(&self, args: &[Value]) -> Result<ExecResult, DbError> {
        let (guard, stmt) = self.conn_stmt().await?;
        let result = {
            let mut si = stmt.lock().await;
            exec_statement(&mut **si, args).await
        };
        guard.release(result.as_ref().err()).await;
        result
    }

    /// Execute as a query and return a row cursor.
    ///
    /// The cursor owns the connection the statement ran on until it is
    /// closed or exhausted.
    ///
    /// # Errors
    ///
    /// Returns the sticky error, state errors, argument errors, and the
    /// driver's execution error.
    pub async fn query(&self, args: &[Value]) -> Result<Rows, DbError> {
        let (guard, stmt) = self.conn_stmt().await?;
        let queried = {
            let mut si = stmt.lock().await;
            match driver_args(si.num_input(), args) {
                Ok(dargs) => si.query(&dargs).await,
                Err(err) => Err(err),
            }
        };
        match queried {
            Ok(rowsi) => Ok(Rows::new(guard, rowsi)),
            Err(err) => {
                guard.release(Some(&err)).await;
                Err(err)
            }
        }
    }

    /// Execute as a query expected to return at most one row.
    ///
    /// Always returns a [`Row`]; errors are deferred until its `scan`.
    pub async fn query_row(&self, args: &[Value]) -> Row {
        match self.query(args).await {
            Ok(rows) => Row::from_rows(rows),
            Err(err) => Row::from_err(err),
        }
    }

    /// Close the statement. Idempotent.
    ///
    /// Pool-bound statements reclaim every remembered connection still
    /// idle and close the paired driver statement; instances whose
    /// connection is currently in use are left to the driver when that
    /// connection eventually closes.
    ///
    /// # Errors
    ///
    /// Returns the sticky error, if any.
    pub async fn close(&self) -> Result<(), DbError> {
        if let Some(err) = &self.sticky_err {
            return Err(err.clone());
        }
        let css = {
            let mut inner = self.lock_inner();
            if inner.closed {
                return Ok(());
            }
            inner.closed = true;
            std::mem::take(&mut inner.css)
        };

        if let Some(tx) = &self.tx {
            let mut si = tx.stmt.lock().await;
            let _ = si.close().await;
            return Ok(());
        }

        for cs in css {
            if let Some(conn) = self.db.conn_if_free(cs.conn_id) {
                {
                    let mut si = cs.stmt.lock().await;
                    let _ = si.close().await;
                }
                self.db.put_conn(conn, None).await;
            }
        }
        Ok(())
    }
}

/// Arity-check, normalize arguments, and execute on a driver statement.
pub(crate) async fn exec_statement(
    si: &mut dyn DriverStatement,
    args: &[Value],
) -> Result<ExecResult, DbError> {
    let dargs = driver_args(si.num_input(), args)?;
    let resi = si.exec(&dargs).await?;
    Ok(ExecResult::new(resi))
}
