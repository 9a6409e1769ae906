//! Integration tests for the SeaORM driver adapter
//!
//! Runs real statements against an in-memory SQLite database through the
//! profiling wrapper.

use sea_orm::{Database, DatabaseConnection, TransactionTrait};
use sqlscope_core::{
    CaptureHandle, Driver, Params, ProfiledDriver, SeaOrmDriver, SeaOrmOutput, SqlParam,
    StatementCall,
};

async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory database");

    let driver = SeaOrmDriver::new(db.clone(), "default");
    let none = Params::default();
    driver
        .execute(StatementCall::new(
            "CREATE TABLE film (film_id INTEGER PRIMARY KEY, title TEXT NOT NULL)",
            &none,
        ))
        .await
        .expect("Failed to create table");

    db
}

#[tokio::test]
async fn test_profiled_statements_are_recorded() {
    let db = setup_db().await;
    let capture = CaptureHandle::start("POST", "/films");
    let driver = ProfiledDriver::new(SeaOrmDriver::new(db, "default"), capture.clone());

    let insert = Params::Positional(vec![SqlParam::from(1i64), SqlParam::from("Alien")]);
    let output = driver
        .execute(StatementCall::new(
            "INSERT INTO film (film_id, title) VALUES (?, ?)",
            &insert,
        ))
        .await
        .expect("insert");
    assert!(matches!(output, SeaOrmOutput::Executed { rows_affected: 1 }));

    let select = Params::Positional(vec![SqlParam::from(1i64)]);
    let output = driver
        .execute(StatementCall::new(
            "SELECT title FROM film WHERE film_id = ?",
            &select,
        ))
        .await
        .expect("select");
    match output {
        SeaOrmOutput::Rows(rows) => {
            assert_eq!(rows.len(), 1);
            let title: String = rows[0].try_get("", "title").unwrap();
            assert_eq!(title, "Alien");
        }
        other => panic!("unexpected output: {:?}", other),
    }

    let captured = capture.take().expect("capture");
    assert_eq!(captured.statements.len(), 2);

    let insert_record = &captured.statements[0];
    assert_eq!(insert_record.db_vendor, "sqlite");
    assert_eq!(insert_record.db_alias, "default");
    assert_eq!(insert_record.rows_affected, Some(1));
    assert_eq!(insert_record.params, serde_json::json!([1, "Alien"]));
    assert!(insert_record.tables.contains("film"));

    let select_record = &captured.statements[1];
    assert_eq!(select_record.rows_affected, Some(1));
    assert!(!select_record.is_in_transaction);
}

#[tokio::test]
async fn test_failure_inside_transaction_marks_rollback() {
    let db = setup_db().await;
    let txn = db.begin().await.expect("begin");
    let capture = CaptureHandle::start("PUT", "/films/1");
    let driver = ProfiledDriver::new(SeaOrmDriver::in_transaction(txn, "default"), capture.clone());

    let none = Params::default();
    let result = driver
        .execute(StatementCall::new("SELECT * FROM no_such_table", &none))
        .await;
    assert!(result.is_err());

    let record = &capture.take().expect("capture").statements[0];
    assert!(record.failed);
    assert!(record.is_in_transaction);
    assert!(record.needs_rollback);
    assert!(record.tables.contains("no_such_table"));

    driver
        .into_inner()
        .into_connection()
        .rollback()
        .await
        .expect("rollback");
}

#[tokio::test]
async fn test_named_params_are_rejected() {
    let db = setup_db().await;
    let driver = SeaOrmDriver::new(db, "default");

    let named = Params::Named(vec![("id".to_string(), SqlParam::from(1i64))]);
    let result = driver
        .execute(StatementCall::new(
            "SELECT title FROM film WHERE film_id = :id",
            &named,
        ))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_null_params_reach_non_text_columns() {
    let db = setup_db().await;
    let capture = CaptureHandle::start("POST", "/rentals");
    let driver = ProfiledDriver::new(SeaOrmDriver::new(db, "default"), capture.clone());

    let none = Params::default();
    driver
        .execute(StatementCall::new(
            "CREATE TABLE rental (rental_id INTEGER PRIMARY KEY, return_day INTEGER)",
            &none,
        ))
        .await
        .expect("create");

    let insert = Params::Positional(vec![SqlParam::from(1i64), SqlParam::Null]);
    driver
        .execute(StatementCall::new(
            "INSERT INTO rental (rental_id, return_day) VALUES (?, ?)",
            &insert,
        ))
        .await
        .expect("insert");

    let output = driver
        .execute(StatementCall::new(
            "SELECT rental_id FROM rental WHERE return_day IS NULL",
            &none,
        ))
        .await
        .expect("select");
    match output {
        SeaOrmOutput::Rows(rows) => assert_eq!(rows.len(), 1),
        other => panic!("unexpected output: {:?}", other),
    }

    // The capture keeps the statement as the application issued it
    let captured = capture.take().expect("capture");
    let insert_record = &captured.statements[1];
    assert_eq!(
        insert_record.sql,
        "INSERT INTO rental (rental_id, return_day) VALUES (?, ?)"
    );
    assert_eq!(insert_record.params, serde_json::json!([1, null]));
}
