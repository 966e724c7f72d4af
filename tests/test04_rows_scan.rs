use sql_conduit::stub;
use sql_conduit::{Db, DbError, RawBytes, ScanDest, Value};

#[tokio::test]
async fn iterate_and_scan_two_rows() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t04_two_rows");
    state.put_rows(
        "SELECT id, name FROM t",
        &["id", "name"],
        vec![
            vec![Value::Int(1), Value::Blob(b"a".to_vec())],
            vec![Value::Int(2), Value::Blob(b"b".to_vec())],
        ],
    );
    let db = Db::open("t04_two_rows", "dsn")?;

    let mut rows = db.query("SELECT id, name FROM t", &[]).await?;
    assert_eq!(rows.columns()?, vec!["id", "name"]);

    let mut id = 0i64;
    let mut first = Vec::new();
    let mut second = Vec::new();

    assert!(rows.next().await);
    rows.scan(&mut [ScanDest::Int(&mut id), ScanDest::Bytes(&mut first)])?;
    assert_eq!(id, 1);

    assert!(rows.next().await);
    rows.scan(&mut [ScanDest::Int(&mut id), ScanDest::Bytes(&mut second)])?;
    assert_eq!(id, 2);
    assert_eq!(second, b"b");

    // The first row's bytes are caller-owned: advancing the cursor did
    // not disturb them, and writing to them disturbs nothing else.
    assert_eq!(first, b"a");
    first[0] = b'!';
    assert_eq!(second, b"b");

    // Two rows, so the third advance reports clean exhaustion.
    assert!(!rows.next().await);
    rows.err()?;

    // Exhaustion closed the cursor and released the connection.
    assert!(rows.columns().is_err());
    db.close().await?;
    assert_eq!(state.closes(), 1);
    Ok(())
}

#[tokio::test]
async fn iteration_error_is_surfaced_by_err() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t04_iter_err");
    state.put_rows_failing(
        "SELECT v FROM t",
        &["v"],
        vec![vec![Value::Int(1)]],
        "wire torn",
    );
    let db = Db::open("t04_iter_err", "dsn")?;

    let mut rows = db.query("SELECT v FROM t", &[]).await?;
    assert!(rows.next().await);
    assert!(!rows.next().await);

    let err = rows.err().unwrap_err();
    assert_eq!(err, DbError::Execution("wire torn".into()));
    // Scan after a failed advance reports the same error.
    let mut v = 0i64;
    assert_eq!(
        rows.scan(&mut [ScanDest::Int(&mut v)]).unwrap_err(),
        DbError::Execution("wire torn".into())
    );

    rows.close().await?;
    Ok(())
}

#[tokio::test]
async fn raw_bytes_take_the_driver_buffer() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t04_raw");
    state.put_rows(
        "SELECT name FROM t",
        &["name"],
        vec![vec![Value::Blob(b"abc".to_vec())]],
    );
    let db = Db::open("t04_raw", "dsn")?;

    let mut rows = db.query("SELECT name FROM t", &[]).await?;
    assert!(rows.next().await);

    let mut raw = RawBytes::default();
    rows.scan(&mut [ScanDest::Raw(&mut raw)])?;
    assert_eq!(raw.as_slice(), Some(&b"abc"[..]));

    // The take vacated the column: a second scan of the same row sees
    // NULL.
    let mut again: Option<Vec<u8>> = Some(Vec::new());
    rows.scan(&mut [ScanDest::OptBytes(&mut again)])?;
    assert_eq!(again, None);

    rows.close().await?;
    Ok(())
}

#[tokio::test]
async fn scan_failures_name_the_column() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t04_scan_err");
    state.put_rows(
        "SELECT id, name FROM t",
        &["id", "name"],
        vec![vec![Value::Int(1), Value::Text("alice".into())]],
    );
    let db = Db::open("t04_scan_err", "dsn")?;

    let mut rows = db.query("SELECT id, name FROM t", &[]).await?;
    assert!(rows.next().await);

    let mut a = 0i64;
    let mut b = 0i64;
    let err = rows
        .scan(&mut [ScanDest::Int(&mut a), ScanDest::Int(&mut b)])
        .unwrap_err();
    match err {
        DbError::Scan { index, .. } => assert_eq!(index, 1),
        other => panic!("expected scan error, got {other:?}"),
    }

    // Destination count must match the column count.
    let err = rows.scan(&mut [ScanDest::Int(&mut a)]).unwrap_err();
    assert!(matches!(err, DbError::Parameter(_)));

    rows.close().await?;
    Ok(())
}

#[tokio::test]
async fn scan_requires_a_prior_next() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t04_no_next");
    state.put_rows("SELECT v FROM t", &["v"], vec![vec![Value::Int(1)]]);
    let db = Db::open("t04_no_next", "dsn")?;

    let mut rows = db.query("SELECT v FROM t", &[]).await?;
    let mut v = 0i64;
    assert!(rows.scan(&mut [ScanDest::Int(&mut v)]).is_err());

    rows.close().await?;
    // Close is idempotent, and a closed cursor refuses to scan.
    rows.close().await?;
    assert_eq!(
        rows.scan(&mut [ScanDest::Int(&mut v)]).unwrap_err(),
        DbError::RowsClosed
    );
    Ok(())
}

#[tokio::test]
async fn query_row_scans_the_first_row() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t04_query_row");
    state.put_rows(
        "SELECT name FROM t WHERE id = ?",
        &["name"],
        vec![
            vec![Value::Text("alice".into())],
            vec![Value::Text("bob".into())],
        ],
    );
    let db = Db::open("t04_query_row", "dsn")?;

    let mut name = String::new();
    db.query_row("SELECT name FROM t WHERE id = ?", &[Value::Int(1)])
        .await
        .scan(&mut [ScanDest::Text(&mut name)])
        .await?;
    assert_eq!(name, "alice");

    // The cursor is gone and its connection pooled.
    db.close().await?;
    assert_eq!(state.closes(), 1);
    Ok(())
}

#[tokio::test]
async fn query_row_defers_its_errors_to_scan() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t04_deferred");
    state.put_rows("SELECT v FROM empty", &["v"], vec![]);
    let db = Db::open("t04_deferred", "dsn")?;

    // Empty result set: the sentinel comes from scan, not query_row.
    let mut v = 0i64;
    let err = db
        .query_row("SELECT v FROM empty", &[])
        .await
        .scan(&mut [ScanDest::Int(&mut v)])
        .await
        .unwrap_err();
    assert_eq!(err, DbError::NoRows);

    // Query failure: also deferred.
    let err = db
        .query_row("SELECT v FROM unregistered", &[])
        .await
        .scan(&mut [ScanDest::Int(&mut v)])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Execution(_)));
    Ok(())
}

#[tokio::test]
async fn query_row_rejects_borrow_view_destinations() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t04_row_raw");
    state.put_rows(
        "SELECT name FROM t",
        &["name"],
        vec![vec![Value::Blob(b"abc".to_vec())]],
    );
    let db = Db::open("t04_row_raw", "dsn")?;

    let mut raw = RawBytes::default();
    let err = db
        .query_row("SELECT name FROM t", &[])
        .await
        .scan(&mut [ScanDest::Raw(&mut raw)])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Parameter(_)));
    assert!(raw.is_null());

    // The cursor was still closed and its connection released.
    db.close().await?;
    assert_eq!(state.closes(), 1);
    Ok(())
}

#[tokio::test]
async fn opaque_destination_gets_the_native_value() -> Result<(), Box<dyn std::error::Error>> {
    let state = stub::install("t04_any");
    state.put_rows(
        "SELECT v FROM t",
        &["v"],
        vec![vec![Value::Timestamp(Default::default())]],
    );
    let db = Db::open("t04_any", "dsn")?;

    let mut any = Value::Null;
    db.query_row("SELECT v FROM t", &[])
        .await
        .scan(&mut [ScanDest::Any(&mut any)])
        .await?;
    assert!(matches!(any, Value::Timestamp(_)));
    Ok(())
}
