/*!
 * SQL Conduit - a uniform facade over pluggable SQL drivers
 *
 * This crate sits between application code and database drivers,
 * providing one API for executing statements, iterating result sets,
 * managing transactions, pooling connections, and converting between
 * driver-native values and application destinations. Drivers implement
 * the traits in [`driver`] and register under a name; everything else is
 * driver-agnostic.
 *
 * # Features
 *
 * - Lazy per-handle connection pooling with LIFO reuse and
 *   bad-connection fencing
 * - Prepared statements that rebind to whichever of their connections is
 *   free, re-preparing on a fresh one when all are busy
 * - Transactions pinned to a single connection with one-shot
 *   commit/rollback
 * - Row cursors with per-row scan into typed destinations
 * - Lossless-or-error value conversion in both directions
 *
 * # Example
 *
 * ```rust,no_run
 * use sql_conduit::{Db, ScanDest, Value};
 *
 * async fn example() -> Result<(), sql_conduit::DbError> {
 *     // A driver crate has registered itself under "stub".
 *     let db = Db::open("stub", "app.db")?;
 *
 *     db.exec(
 *         "INSERT INTO users (id, name) VALUES (?, ?)",
 *         &[Value::Int(1), Value::from("alice")],
 *     )
 *     .await?;
 *
 *     let mut name = String::new();
 *     db.query_row("SELECT name FROM users WHERE id = ?", &[Value::Int(1)])
 *         .await
 *         .scan(&mut [ScanDest::Text(&mut name)])
 *         .await?;
 *
 *     let tx = db.begin().await?;
 *     tx.exec("UPDATE users SET name = ? WHERE id = ?", &[
 *         Value::from("bob"),
 *         Value::Int(1),
 *     ])
 *     .await?;
 *     tx.commit().await?;
 *
 *     db.close().await?;
 *     Ok(())
 * }
 * ```
 */

#![forbid(unsafe_code)]

// Re-export everything that should be part of the public API
pub mod prelude {
    //! Convenient imports for common functionality.

    pub use crate::convert::{RawBytes, ScanDest, Scanner};
    pub use crate::db::Db;
    pub use crate::error::DbError;
    pub use crate::register;
    pub use crate::rows::{ExecResult, Row, Rows};
    pub use crate::statement::Statement;
    pub use crate::transaction::Transaction;
    pub use crate::value::{Value, Valuer};
}

// Core modules
pub mod convert;
pub mod db;
pub mod driver;
pub mod error;
pub mod registry;
pub mod rows;
pub mod statement;
pub mod stub;
pub mod transaction;
pub mod value;

mod pool;

// Direct exports of frequently used types for simplicity
pub use convert::{RawBytes, ScanDest, Scanner};
pub use db::Db;
pub use error::DbError;
pub use registry::register;
pub use rows::{ExecResult, Row, Rows};
pub use statement::Statement;
pub use transaction::Transaction;
pub use value::{Value, Valuer};
