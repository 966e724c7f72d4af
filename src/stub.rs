//! An in-memory stub driver for tests and examples.
//!
//! The stub executes nothing: queries return canned result sets keyed by
//! their SQL text, executions are logged, and shared atomic counters
//! expose what the facade did to the driver. Failure injection covers
//! the behaviors the facade must handle: bad connections on prepare,
//! the optional direct-execution fast path, unknown placeholder arity,
//! and iteration errors after the last row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::driver::{
    Driver, DriverConnection, DriverResult, DriverRows, DriverStatement, DriverTransaction,
};
use crate::error::DbError;
use crate::registry;
use crate::value::Value;

/// A canned result set for one query text.
#[derive(Debug, Clone, Default)]
pub struct CannedRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// When set, iteration fails with this message after the last row
    /// instead of reporting exhaustion.
    pub err_after: Option<String>,
}

/// Shared observable state of one stub driver instance.
#[derive(Default)]
pub struct StubState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    prepares: AtomicUsize,
    stmt_closes: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_prepares: AtomicUsize,
    fail_begins: AtomicUsize,
    direct_exec: AtomicBool,
    hide_num_input: AtomicBool,
    results: Mutex<HashMap<String, CannedRows>>,
    exec_log: Mutex<Vec<(String, Vec<Value>)>>,
}

impl StubState {
    fn lock_results(&self) -> MutexGuard<'_, HashMap<String, CannedRows>> {
        match self.results.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_exec_log(&self) -> MutexGuard<'_, Vec<(String, Vec<Value>)>> {
        match self.exec_log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Connections opened so far.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Connections closed so far.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Statements prepared so far, including failed attempts.
    #[must_use]
    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    /// Driver statements closed so far.
    #[must_use]
    pub fn stmt_closes(&self) -> usize {
        self.stmt_closes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Make the next `n` prepares fail with a bad-connection error.
    pub fn fail_next_prepares(&self, n: usize) {
        self.fail_prepares.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` transaction begins fail with a bad-connection
    /// error.
    pub fn fail_next_begins(&self, n: usize) {
        self.fail_begins.store(n, Ordering::SeqCst);
    }

    /// Enable or disable the direct-execution fast path. Disabled, the
    /// stub asks the facade to fall back to prepare-then-execute.
    pub fn set_direct_exec(&self, enabled: bool) {
        self.direct_exec.store(enabled, Ordering::SeqCst);
    }

    /// When hidden, statements report unknown placeholder arity and the
    /// facade must delegate validation to the driver.
    pub fn set_hide_num_input(&self, hidden: bool) {
        self.hide_num_input.store(hidden, Ordering::SeqCst);
    }

    /// Register a canned result set for a query text.
    pub fn put_rows(&self, query: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
        self.lock_results().insert(
            query.to_string(),
            CannedRows {
                columns: columns.iter().map(|c| (*c).to_string()).collect(),
                rows,
                err_after: None,
            },
        );
    }

    /// Register a canned result set whose iteration fails after the
    /// last row.
    pub fn put_rows_failing(
        &self,
        query: &str,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
        err: &str,
    ) {
        self.lock_results().insert(
            query.to_string(),
            CannedRows {
                columns: columns.iter().map(|c| (*c).to_string()).collect(),
                rows,
                err_after: Some(err.to_string()),
            },
        );
    }

    /// Everything executed through `exec`, in order.
    #[must_use]
    pub fn exec_log(&self) -> Vec<(String, Vec<Value>)> {
        self.lock_exec_log().clone()
    }

    fn record_exec(&self, query: &str, args: &[Value]) -> i64 {
        let mut log = self.lock_exec_log();
        log.push((query.to_string(), args.to_vec()));
        log.len() as i64
    }

    fn take_prepare_failure(&self) -> bool {
        take_one(&self.fail_prepares)
    }

    fn take_begin_failure(&self) -> bool {
        take_one(&self.fail_begins)
    }

    fn canned(&self, query: &str) -> Result<CannedRows, DbError> {
        self.lock_results().get(query).cloned().ok_or_else(|| {
            DbError::Execution(format!("stub: no result registered for query {query:?}"))
        })
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Register a fresh stub driver under `name` and hand back its state.
///
/// Names are one-shot process-wide, like any driver registration; tests
/// use one name per scenario.
pub fn install(name: &str) -> Arc<StubState> {
    let state = Arc::new(StubState::default());
    registry::register(name, Arc::new(StubDriver::with_state(Arc::clone(&state))));
    state
}

/// The stub driver itself. Usually installed via [`install`].
pub struct StubDriver {
    state: Arc<StubState>,
}

impl StubDriver {
    #[must_use]
    pub fn with_state(state: Arc<StubState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Driver for StubDriver {
    async fn open(&self, _dsn: &str) -> Result<Box<dyn DriverConnection>, DbError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct StubConnection {
    state: Arc<StubState>,
}

#[async_trait]
impl DriverConnection for StubConnection {
    async fn prepare(&mut self, query: &str) -> Result<Box<dyn DriverStatement>, DbError> {
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        if self.state.take_prepare_failure() {
            return Err(DbError::BadConnection);
        }
        Ok(Box::new(StubStatement {
            state: Arc::clone(&self.state),
            query: query.to_string(),
        }))
    }

    async fn begin(&mut self) -> Result<Box<dyn DriverTransaction>, DbError> {
        if self.state.take_begin_failure() {
            return Err(DbError::BadConnection);
        }
        Ok(Box::new(StubTransaction {
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&mut self) -> Result<(), DbError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exec_direct(
        &mut self,
        query: &str,
        args: &[Value],
    ) -> Result<Box<dyn DriverResult>, DbError> {
        if !self.state.direct_exec.load(Ordering::SeqCst) {
            return Err(DbError::Skip);
        }
        let id = self.state.record_exec(query, args);
        Ok(Box::new(StubResult {
            last_insert_id: id,
            rows_affected: 1,
        }))
    }
}

struct StubStatement {
    state: Arc<StubState>,
    query: String,
}

#[async_trait]
impl DriverStatement for StubStatement {
    fn num_input(&self) -> Option<usize> {
        if self.state.hide_num_input.load(Ordering::SeqCst) {
            None
        } else {
            Some(self.query.matches('?').count())
        }
    }

    async fn exec(&mut self, args: &[Value]) -> Result<Box<dyn DriverResult>, DbError> {
        let id = self.state.record_exec(&self.query, args);
        Ok(Box::new(StubResult {
            last_insert_id: id,
            rows_affected: 1,
        }))
    }

    async fn query(&mut self, _args: &[Value]) -> Result<Box<dyn DriverRows>, DbError> {
        let canned = self.state.canned(&self.query)?;
        Ok(Box::new(StubRows { canned, cursor: 0 }))
    }

    async fn close(&mut self) -> Result<(), DbError> {
        self.state.stmt_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubRows {
    canned: CannedRows,
    cursor: usize,
}

#[async_trait]
impl DriverRows for StubRows {
    fn columns(&self) -> Vec<String> {
        self.canned.columns.clone()
    }

    async fn next(&mut self, dest: &mut [Value]) -> Result<bool, DbError> {
        let Some(row) = self.canned.rows.get(self.cursor) else {
            if let Some(msg) = &self.canned.err_after {
                return Err(DbError::Execution(msg.clone()));
            }
            return Ok(false);
        };
        for (d, v) in dest.iter_mut().zip(row.iter()) {
            *d = v.clone();
        }
        self.cursor += 1;
        Ok(true)
    }

    async fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}

struct StubResult {
    last_insert_id: i64,
    rows_affected: i64,
}

impl DriverResult for StubResult {
    fn last_insert_id(&self) -> Result<i64, DbError> {
        Ok(self.last_insert_id)
    }

    fn rows_affected(&self) -> Result<i64, DbError> {
        Ok(self.rows_affected)
    }
}

struct StubTransaction {
    state: Arc<StubState>,
}

#[async_trait]
impl DriverTransaction for StubTransaction {
    async fn commit(&mut self) -> Result<(), DbError> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
