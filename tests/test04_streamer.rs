#![cfg(feature = "test-utils")]

use sql_dal::DriverError;
use sql_dal::error::CursorPhase;
use sql_dal::prelude::*;
use sql_dal::test_utils::{MockPool, MockResponse, clob, failing_lob, fast_config};

fn setup() -> (MockPool, Dal<MockPool>) {
    let pool = MockPool::new(0, 4);
    let dal = Dal::new(pool.clone(), fast_config(0, 4)).expect("valid config");
    (pool, dal)
}

fn numbered(n: i64) -> Vec<Vec<RowValues>> {
    (1..=n).map(|i| vec![RowValues::Int(i)]).collect()
}

#[tokio::test]
async fn rows_are_fetched_in_batches_until_a_short_one() {
    let (pool, dal) = setup();
    pool.when("FROM big", [MockResponse::rows(&["ID"], numbered(151))]);

    let rows = dal
        .select_all_rows_sql("SELECT id FROM big", Binds::none(), QueryOptions::new())
        .await
        .unwrap();

    assert_eq!(rows.len(), 151);
    assert_eq!(rows[150].get("ID"), Some(&RowValues::Int(151)));
    assert_eq!(pool.fetch_sizes(), vec![50, 50, 50, 50]);
    assert_eq!(
        pool.events(),
        vec!["open_cursor:SELECT id FROM big", "cursor_close", "release"]
    );
}

#[tokio::test]
async fn batch_size_override_applies() {
    let (pool, dal) = setup();
    pool.when("FROM big", [MockResponse::rows(&["ID"], numbered(10))]);

    let rows = dal
        .select_all_rows_sql("SELECT id FROM big", Binds::none(), QueryOptions::new().batch_size(4))
        .await
        .unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(pool.fetch_sizes(), vec![4, 4, 4]);

    let err = dal
        .select_all_rows_sql("SELECT id FROM big", Binds::none(), QueryOptions::new().batch_size(0))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DalError::InvalidArgument(_)));
}

#[tokio::test]
async fn limit_and_page_rewrite_the_query() {
    let (pool, dal) = setup();
    dal.select_all_rows_sql(
        "SELECT id FROM emp ORDER BY name",
        Binds::none(),
        QueryOptions::new().limit(10).page(3),
    )
    .await
    .unwrap();

    // dbVer defaults to 11, so rownum paging
    let sql = pool.executed().pop().unwrap();
    assert!(sql.contains("ORDER BY name, rowid"), "{sql}");
    assert!(sql.contains("WHERE rownum < ((3 * 10) + 1 )"), "{sql}");
    assert!(sql.contains("WHERE r__ >= (((3 -1) * 10) + 1)"), "{sql}");
}

#[tokio::test]
async fn total_count_adds_the_count_column() {
    let pool = MockPool::new(0, 4);
    let mut cfg = fast_config(0, 4);
    cfg.db_ver = "19.3".into();
    let dal = Dal::new(pool.clone(), cfg).unwrap();

    dal.select_all_rows_sql(
        "SELECT id, name FROM emp ORDER BY id",
        Binds::none(),
        QueryOptions::new().limit(5).total_count(true),
    )
    .await
    .unwrap();
    let sql = pool.executed().pop().unwrap();
    assert_eq!(
        sql,
        "SELECT id, name, COUNT(1) OVER () AS cnt__ FROM emp ORDER BY id\nOFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
    );
}

#[tokio::test]
async fn lobs_are_inlined_on_request() {
    let (pool, dal) = setup();
    pool.when(
        "FROM docs",
        [
            MockResponse::rows(&["ID", "BODY"], vec![vec![RowValues::Int(1), clob("first body")]]),
            MockResponse::rows(&["ID", "BODY"], vec![vec![RowValues::Int(1), clob("second body")]]),
        ],
    );

    let rows = dal
        .select_all_rows_sql("SELECT id, body FROM docs", Binds::none(), QueryOptions::new().fetch_clobs(true))
        .await
        .unwrap();
    assert_eq!(rows[0].get("BODY"), Some(&RowValues::Text("first body".into())));

    let rows = dal
        .select_all_rows_sql("SELECT id, body FROM docs", Binds::none(), QueryOptions::new())
        .await
        .unwrap();
    let lob = rows[0].get("BODY").and_then(RowValues::as_lob).expect("lob handle");
    assert_eq!(lob.materialize().await.unwrap(), RowValues::Text("second body".into()));
}

#[tokio::test]
async fn lob_read_failure_closes_cursor_then_releases() {
    let (pool, dal) = setup();
    pool.when("FROM docs", [MockResponse::rows(&["BODY"], vec![vec![failing_lob()]])]);

    let err = dal
        .select_all_rows_sql("SELECT body FROM docs", Binds::none(), QueryOptions::new().fetch_clobs(true))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DalError::Lob(_)));
    assert_eq!(pool.events()[1..], ["cursor_close", "release"]);
}

#[tokio::test]
async fn open_failure_releases_the_connection() {
    let (pool, dal) = setup();
    pool.when(
        "FROM nowhere",
        [MockResponse::Error(DriverError::object_not_found(
            "ORA-00942: table or view does not exist",
        ))],
    );

    let err = dal
        .select_all_rows_sql("SELECT * FROM nowhere", Binds::none(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        DalError::Cursor { phase: CursorPhase::Open, .. }
    ));
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn close_failure_is_reported_after_release() {
    let (pool, dal) = setup();
    pool.when("FROM big", [MockResponse::rows(&["ID"], numbered(3))]);
    pool.fail_cursor_close(DriverError::new("ORA-01001: invalid cursor"));

    let err = dal
        .select_all_rows_sql("SELECT id FROM big", Binds::none(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        DalError::Cursor { phase: CursorPhase::Close, .. }
    ));
    assert_eq!(pool.released(), 1);
    assert_eq!(pool.leaked(), 0);
}

#[tokio::test]
async fn table_descriptor_select_builds_named_binds() {
    let (pool, dal) = setup();
    pool.when("FROM emp", [MockResponse::rows(&["NAME"], vec![vec!["ann".into()]])]);

    let row = dal
        .select_one_row(
            TableQuery::new("emp")
                .fields(["name"])
                .filter(Filter::eq([("dept", RowValues::Int(10)), ("boss", RowValues::Null)])),
            QueryOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(row.get("name"), Some(&RowValues::Text("ann".into())));
    assert_eq!(
        pool.executed(),
        vec!["SELECT name FROM emp WHERE dept = :w0 AND boss IS NULL"]
    );
    assert_eq!(
        pool.executed_binds(),
        vec![Binds::named([("w0", BindValue::from(10_i64))])]
    );
}

#[tokio::test]
async fn fetch_failure_closes_cursor_then_releases() {
    let (pool, dal) = setup();
    pool.when("FROM big", [MockResponse::rows(&["ID"], numbered(120))]);
    pool.fail_fetch(1, DriverError::new("ORA-01002: fetch out of sequence"));

    let err = dal
        .select_all_rows_sql("SELECT id FROM big", Binds::none(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        DalError::Cursor { phase: CursorPhase::Fetch, .. }
    ));
    assert_eq!(err.contexts()[0].sql.as_deref(), Some("SELECT id FROM big"));
    assert_eq!(pool.fetch_sizes(), vec![50, 50]);
    assert_eq!(
        pool.events(),
        vec!["open_cursor:SELECT id FROM big", "cursor_close", "release"]
    );
    assert_eq!(pool.released(), 1);
    assert_eq!(pool.leaked(), 0);
}
