use std::time::Duration;

use sql_conduit::stub;
use sql_conduit::{Db, DbError, ScanDest, Value};
use tokio::time::sleep;

#[tokio::test]
async fn transaction_pins_its_connection() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t03_pinned");
    let db = Db::open("t03_pinned", "dsn")?;

    let tx = db.begin().await?;
    assert_eq!(state.opens(), 1);

    tx.exec("UPDATE t SET v = ?", &[Value::Int(1)]).await?;

    // Handle-level work cannot consume the pinned connection.
    db.exec("INSERT INTO t (v) VALUES (?)", &[Value::Int(2)])
        .await?;
    assert_eq!(state.opens(), 2);

    tx.commit().await?;
    assert_eq!(state.commits(), 1);

    // The pinned connection is back in the pool now.
    db.exec("INSERT INTO t (v) VALUES (?)", &[Value::Int(3)])
        .await?;
    assert_eq!(state.opens(), 2);

    // Terminal state is sticky.
    let err = tx
        .exec("UPDATE t SET v = ?", &[Value::Int(4)])
        .await
        .unwrap_err();
    assert_eq!(err, DbError::TxDone);
    assert_eq!(tx.commit().await.unwrap_err(), DbError::TxDone);
    assert_eq!(tx.rollback().await.unwrap_err(), DbError::TxDone);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_handle_work_opens_its_own_connection()
-> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t03_concurrent");
    let db = Db::open("t03_concurrent", "dsn")?;

    let tx = db.begin().await?;
    let worker = {
        let db = db.clone();
        tokio::spawn(async move {
            for i in 0..10i64 {
                db.exec("INSERT INTO t (v) VALUES (?)", &[Value::Int(i)])
                    .await?;
            }
            Ok::<(), DbError>(())
        })
    };
    for i in 0..10i64 {
        tx.exec("UPDATE t SET v = ?", &[Value::Int(i)]).await?;
    }
    worker.await??;
    tx.commit().await?;

    // One connection for the transaction, one for the worker.
    assert_eq!(state.opens(), 2);
    assert_eq!(state.exec_log().len(), 20);
    Ok(())
}

#[tokio::test]
async fn rollback_returns_the_connection() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t03_rollback");
    let db = Db::open("t03_rollback", "dsn")?;

    let tx = db.begin().await?;
    tx.exec("UPDATE t SET v = ?", &[Value::Int(1)]).await?;
    tx.rollback().await?;
    assert_eq!(state.rollbacks(), 1);

    db.exec("INSERT INTO t (v) VALUES (?)", &[Value::Int(2)])
        .await?;
    assert_eq!(state.opens(), 1);
    Ok(())
}

#[tokio::test]
async fn transaction_statement_stops_working_after_commit()
-> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t03_tx_stmt");
    let db = Db::open("t03_tx_stmt", "dsn")?;

    let tx = db.begin().await?;
    let stmt = tx.prepare("INSERT INTO t (v) VALUES (?)").await?;
    stmt.exec(&[Value::Int(1)]).await?;
    stmt.exec(&[Value::Int(2)]).await?;
    assert_eq!(state.exec_log().len(), 2);

    tx.commit().await?;
    let err = stmt.exec(&[Value::Int(3)]).await.unwrap_err();
    assert_eq!(err, DbError::TxDone);
    Ok(())
}

#[tokio::test]
async fn queries_inside_a_transaction_serialize() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t03_tx_query");
    state.put_rows("SELECT v FROM t", &["v"], vec![vec![Value::Int(42)]]);
    let db = Db::open("t03_tx_query", "dsn")?;

    let tx = db.begin().await?;
    let mut rows = tx.query("SELECT v FROM t", &[]).await?;
    let mut v = 0i64;
    while rows.next().await {
        rows.scan(&mut [ScanDest::Int(&mut v)])?;
    }
    rows.err()?;
    assert_eq!(v, 42);

    // The cursor released the transaction lock on exhaustion.
    tx.exec("UPDATE t SET v = ?", &[Value::Int(1)]).await?;
    tx.commit().await?;
    assert_eq!(state.opens(), 1);
    Ok(())
}

#[tokio::test]
async fn rebinding_a_foreign_statement_is_a_sticky_error()
-> Result<(), Box<dyn std::error::Error>> {
    stub::install("t03_foreign_a");
    stub::install("t03_foreign_b");
    let db_a = Db::open("t03_foreign_a", "dsn")?;
    let db_b = Db::open("t03_foreign_b", "dsn")?;

    let stmt_b = db_b.prepare("INSERT INTO t (v) VALUES (?)").await?;
    let tx = db_a.begin().await?;

    let rebound = tx.stmt(&stmt_b).await;
    let err = rebound.exec(&[Value::Int(1)]).await.unwrap_err();
    assert_eq!(err, DbError::StatementMismatch);
    // The sticky error fires on every use, close included.
    assert_eq!(rebound.close().await.unwrap_err(), DbError::StatementMismatch);

    tx.rollback().await?;
    Ok(())
}

#[tokio::test]
async fn rebinding_a_local_statement_works() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t03_rebind");
    let db = Db::open("t03_rebind", "dsn")?;

    let stmt = db.prepare("INSERT INTO t (v) VALUES (?)").await?;
    let tx = db.begin().await?;
    let rebound = tx.stmt(&stmt).await;
    rebound.exec(&[Value::Int(1)]).await?;
    tx.commit().await?;

    assert_eq!(state.exec_log().len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_an_unfinished_transaction_rolls_back()
-> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t03_drop");
    let db = Db::open("t03_drop", "dsn")?;

    {
        let tx = db.begin().await?;
        tx.exec("UPDATE t SET v = ?", &[Value::Int(1)]).await?;
        drop(tx);
    }

    // The rollback runs on a spawned task; give it a moment.
    for _ in 0..50 {
        if state.rollbacks() == 1 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.rollbacks(), 1);
    // The release runs right after the rollback; give it a moment too.
    sleep(Duration::from_millis(50)).await;

    // The connection went back to the pool.
    db.exec("INSERT INTO t (v) VALUES (?)", &[Value::Int(2)])
        .await?;
    assert_eq!(state.opens(), 1);
    Ok(())
}
