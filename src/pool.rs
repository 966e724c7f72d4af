//! Idle-connection pool machinery.
//!
//! The pool is a per-handle LIFO list of idle connections guarded by one
//! mutex together with the handle's closed flag. The mutex is never held
//! across a driver call: acquisition pops under the lock and opens with
//! the lock released; release closes with the lock released.

use std::sync::MutexGuard;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::OwnedMutexGuard;

use crate::db::Db;
use crate::driver::DriverConnection;
use crate::error::DbError;
use crate::transaction::TxConn;

/// Idle connections kept per handle; excess connections are closed on
/// release.
pub(crate) const MAX_IDLE_CONNS: usize = 2;

/// Attempts made by `prepare`/`exec`/`begin` before a bad-connection
/// error is surfaced to the caller.
pub(crate) const MAX_BAD_CONN_RETRIES: usize = 10;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// A driver connection tagged with a process-unique id so a specific
/// connection can be reclaimed from the idle list by identity.
pub(crate) struct PoolConn {
    id: u64,
    pub(crate) conn: Box<dyn DriverConnection>,
}

impl PoolConn {
    pub(crate) fn new(conn: Box<dyn DriverConnection>) -> Self {
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            conn,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) async fn close(mut self) -> Result<(), DbError> {
        self.conn.close().await
    }
}

#[derive(Default)]
pub(crate) struct PoolState {
    pub(crate) free: Vec<PoolConn>,
    pub(crate) closed: bool,
}

impl Db {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Pop the most recently used idle connection, or open a fresh one.
    pub(crate) async fn conn(&self) -> Result<PoolConn, DbError> {
        {
            let mut state = self.lock_state();
            if state.closed {
                return Err(DbError::DbClosed);
            }
            if let Some(conn) = state.free.pop() {
                return Ok(conn);
            }
        }
        let raw = self.inner.driver.open(&self.inner.dsn).await?;
        Ok(PoolConn::new(raw))
    }

    /// Remove a specific connection from the idle list, if present.
    pub(crate) fn conn_if_free(&self, wanted: u64) -> Option<PoolConn> {
        let mut state = self.lock_state();
        let idx = state.free.iter().position(|c| c.id() == wanted)?;
        Some(state.free.swap_remove(idx))
    }

    /// Return a connection to the idle list.
    ///
    /// `err` is the last error observed on the connection: a bad
    /// connection is closed and discarded, never pooled. A healthy
    /// connection is pooled while the handle is open and the idle list
    /// is under [`MAX_IDLE_CONNS`], and closed otherwise.
    pub(crate) async fn put_conn(&self, conn: PoolConn, err: Option<&DbError>) {
        if matches!(err, Some(DbError::BadConnection)) {
            let _ = conn.close().await;
            return;
        }
        {
            let mut state = self.lock_state();
            if !state.closed && state.free.len() < MAX_IDLE_CONNS {
                state.free.push(conn);
                return;
            }
        }
        let _ = conn.close().await;
    }
}

/// Ownership of a checked-out connection plus the way to give it back.
///
/// Pool-acquired connections go back through [`Db::put_conn`] with the
/// last observed error; transaction-pinned connections are released by
/// dropping the owned lock guard, which keeps the connection pinned to
/// the transaction itself.
pub(crate) enum ConnGuard {
    Pool { db: Db, conn: PoolConn },
    Tx(OwnedMutexGuard<Option<TxConn>>),
}

impl ConnGuard {
    pub(crate) async fn release(self, err: Option<&DbError>) {
        match self {
            ConnGuard::Pool { db, conn } => db.put_conn(conn, err).await,
            ConnGuard::Tx(guard) => drop(guard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub;

    #[tokio::test]
    async fn reuse_is_lifo() {
        stub::install("pool_unit_lifo");
        let db = Db::open("pool_unit_lifo", "dsn").unwrap();

        let c1 = db.conn().await.unwrap();
        let c2 = db.conn().await.unwrap();
        let (id1, id2) = (c1.id(), c2.id());
        db.put_conn(c1, None).await;
        db.put_conn(c2, None).await;

        // Most recently used comes back first.
        assert_eq!(db.conn().await.unwrap().id(), id2);
        assert_eq!(db.conn().await.unwrap().id(), id1);
    }

    #[tokio::test]
    async fn conn_if_free_removes_the_exact_connection() {
        stub::install("pool_unit_exact");
        let db = Db::open("pool_unit_exact", "dsn").unwrap();

        let c1 = db.conn().await.unwrap();
        let c2 = db.conn().await.unwrap();
        let (id1, id2) = (c1.id(), c2.id());
        db.put_conn(c1, None).await;
        db.put_conn(c2, None).await;

        let taken = db.conn_if_free(id1).unwrap();
        assert_eq!(taken.id(), id1);
        assert!(db.conn_if_free(id1).is_none());
        assert!(db.conn_if_free(id2).is_some());
    }

    #[tokio::test]
    async fn bad_connections_never_pool() {
        let state = stub::install("pool_unit_bad");
        let db = Db::open("pool_unit_bad", "dsn").unwrap();

        let c1 = db.conn().await.unwrap();
        let id1 = c1.id();
        db.put_conn(c1, Some(&DbError::BadConnection)).await;
        assert_eq!(state.closes(), 1);
        assert!(db.conn_if_free(id1).is_none());

        // The next acquisition has to open a fresh connection.
        let _ = db.conn().await.unwrap();
        assert_eq!(state.opens(), 2);
    }

    #[tokio::test]
    async fn excess_idle_connections_are_closed() {
        let state = stub::install("pool_unit_excess");
        let db = Db::open("pool_unit_excess", "dsn").unwrap();

        let c1 = db.conn().await.unwrap();
        let c2 = db.conn().await.unwrap();
        let c3 = db.conn().await.unwrap();
        db.put_conn(c1, None).await;
        db.put_conn(c2, None).await;
        db.put_conn(c3, None).await;

        assert_eq!(state.opens(), 3);
        assert_eq!(state.closes(), 1);
        assert_eq!(db.lock_state().free.len(), MAX_IDLE_CONNS);
    }
}
