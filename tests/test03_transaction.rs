#![cfg(feature = "test-utils")]

use sql_dal::DriverError;
use sql_dal::driver::DriverConnection;
use sql_dal::prelude::*;
use sql_dal::test_utils::{MockPool, MockResponse, fast_config};

fn setup() -> (MockPool, Dal<MockPool>) {
    let pool = MockPool::new(0, 4);
    let dal = Dal::new(pool.clone(), fast_config(0, 4)).expect("valid config");
    (pool, dal)
}

fn statements() -> Vec<SqlBind> {
    vec![
        SqlBind::new("INSERT INTO a VALUES (:x)", Binds::named([("x", BindValue::from(1_i64))])),
        SqlBind::new("UPDATE b SET n = n + 1", Binds::none()),
        SqlBind::new("DELETE FROM c", Binds::none()),
    ]
}

#[tokio::test]
async fn statements_run_in_order_then_commit() {
    let (pool, dal) = setup();
    pool.when("INSERT INTO a", [MockResponse::Affected(1)]);
    pool.when("UPDATE b", [MockResponse::Affected(3)]);

    let results = dal
        .execute_transaction(statements(), QueryOptions::new())
        .await
        .unwrap();
    let affected: Vec<_> = results.iter().map(|r| r.rows_affected).collect();
    assert_eq!(affected, vec![Some(1), Some(3), None]);

    assert_eq!(
        pool.events(),
        vec![
            "execute:INSERT INTO a VALUES (:x)",
            "execute:UPDATE b SET n = n + 1",
            "execute:DELETE FROM c",
            "commit",
            "release",
        ]
    );
    assert_eq!(pool.commits(), 1);
    assert_eq!(pool.rollbacks(), 0);
}

#[tokio::test]
async fn failing_statement_rolls_back_and_stops() {
    let (pool, dal) = setup();
    pool.when(
        "UPDATE b",
        [MockResponse::Error(DriverError::new("ORA-00001: unique constraint violated"))],
    );

    let err = dal
        .execute_transaction(statements(), QueryOptions::new())
        .await
        .unwrap_err();
    match err.kind() {
        DalError::TransactionFailed {
            statement_index,
            rollback,
            ..
        } => {
            assert_eq!(*statement_index, 1);
            assert!(rollback.is_none());
        }
        other => panic!("expected TransactionFailed, got {other:?}"),
    }
    assert!(err.to_string().contains("ORA-00001"));
    assert!(!pool.executed().iter().any(|sql| sql.starts_with("DELETE")));
    assert_eq!(pool.rollbacks(), 1);
    assert_eq!(pool.commits(), 0);
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn rollback_failure_is_compounded_not_swallowed() {
    let (pool, dal) = setup();
    pool.when("UPDATE b", [MockResponse::Error(DriverError::new("ORA-01400: cannot insert NULL"))]);
    pool.fail_rollback(DriverError::new("ORA-03113: end-of-file on communication channel"));

    let err = dal
        .execute_transaction(statements(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(err.driver_error().unwrap().message.contains("ORA-01400"));
    let rollback = err.rollback_error().expect("rollback failure is attached");
    assert!(rollback.to_string().contains("ORA-03113"));
    assert!(err.to_string().contains("rollback also failed"));
    assert_eq!(pool.released(), 1);
    assert_eq!(pool.leaked(), 0);
}

#[tokio::test]
async fn commit_failure_surfaces_and_releases() {
    let (pool, dal) = setup();
    pool.fail_commit(DriverError::new("ORA-02091: transaction rolled back"));

    let err = dal
        .execute_transaction(statements(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(err.driver_error().unwrap().message.contains("ORA-02091"));
    assert_eq!(pool.events().last().map(String::as_str), Some("release"));
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn caller_connection_keeps_its_commit_mode() {
    let (pool, dal) = setup();
    let mut conn = dal.get_db_connection(AcquireOptions::default()).await.unwrap();
    assert!(conn.auto_commit());

    dal.execute_transaction(statements(), QueryOptions::new().connection(&mut conn))
        .await
        .unwrap();
    pool.when("DELETE FROM c", [MockResponse::Error(DriverError::new("ORA-02292: child record found"))]);
    dal.execute_transaction(statements(), QueryOptions::new().connection(&mut conn))
        .await
        .unwrap_err();

    assert!(conn.auto_commit());
    assert_eq!(pool.released(), 0);
    assert_eq!(pool.commits(), 1);
    assert_eq!(pool.rollbacks(), 1);
    dal.release(conn).await.unwrap();
}

#[tokio::test]
async fn empty_transaction_just_commits() {
    let (pool, dal) = setup();
    let results = dal
        .execute_transaction(Vec::new(), QueryOptions::new())
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(pool.events(), vec!["commit", "release"]);
}
