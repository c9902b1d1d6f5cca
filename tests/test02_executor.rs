#![cfg(feature = "test-utils")]

use sql_dal::DriverError;
use sql_dal::prelude::*;
use sql_dal::test_utils::{MockPool, MockResponse, clob, failing_lob, fast_config};

fn setup() -> (MockPool, Dal<MockPool>) {
    let pool = MockPool::new(0, 4);
    let dal = Dal::new(pool.clone(), fast_config(0, 4)).expect("valid config");
    (pool, dal)
}

#[tokio::test]
async fn one_row_queries_enforce_cardinality() {
    let (pool, dal) = setup();
    pool.when("FROM emp WHERE id = 1", [MockResponse::rows(&["ID", "NAME"], vec![vec![RowValues::Int(1), "ann".into()]])]);
    pool.when("FROM emp WHERE id = 0", [MockResponse::rows(&["ID", "NAME"], vec![])]);
    pool.when(
        "FROM emp",
        [MockResponse::rows(
            &["ID", "NAME"],
            vec![vec![RowValues::Int(1), "ann".into()], vec![RowValues::Int(2), "bob".into()]],
        )],
    );

    let row = dal
        .select_one_row_sql("SELECT id, name FROM emp WHERE id = 1", Binds::none(), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(row.get("name"), Some(&RowValues::Text("ann".into())));

    for (sql, actual) in [
        ("SELECT id, name FROM emp WHERE id = 0", 0),
        ("SELECT id, name FROM emp", 2),
    ] {
        let err = dal
            .select_one_row_sql(sql, Binds::none(), QueryOptions::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err.kind(), DalError::UnexpectedRowCount { expected: 1, actual: a } if *a == actual),
            "{err}"
        );
        assert!(err.contexts().iter().any(|c| c.sql.as_deref() == Some(sql)));
    }

    let err = dal
        .select_one_value_sql("SELECT id, name FROM emp WHERE id = 1", Binds::none(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        DalError::UnexpectedColumnCount { expected: 1, actual: 2 }
    ));
    assert_eq!(pool.acquired(), pool.released());
}

#[tokio::test]
async fn one_value_returns_the_cell() {
    let (pool, dal) = setup();
    pool.when("COUNT(*)", [MockResponse::rows(&["N"], vec![vec![RowValues::Int(42)]])]);
    let value = dal
        .select_one_value_sql("SELECT COUNT(*) FROM emp", Binds::none(), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(value, RowValues::Int(42));
}

#[tokio::test]
async fn driver_errors_carry_sql_and_binds() {
    let (pool, dal) = setup();
    pool.when(
        "missing_table",
        [MockResponse::Error(DriverError::object_not_found(
            "ORA-00942: table or view does not exist",
        ))],
    );
    let binds = Binds::named([("id", BindValue::from(7_i64))]);
    let err = dal
        .query_sql("SELECT * FROM missing_table WHERE id = :id", binds.clone(), QueryOptions::new())
        .await
        .unwrap_err();

    let ctx = err.contexts()[0];
    assert_eq!(ctx.tag.as_deref(), Some("querySql"));
    assert_eq!(ctx.binds(), Some(&binds));
    assert!(err.to_string().contains("ORA-00942"));
    assert!(err.to_string().contains("missing_table"));
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn clob_value_is_read_before_release() {
    let (pool, dal) = setup();
    pool.when("FROM docs WHERE id = 1", [MockResponse::rows(&["BODY"], vec![vec![clob("long text body")]])]);
    pool.when("FROM docs WHERE id = 2", [MockResponse::rows(&["BODY"], vec![])]);
    pool.when("FROM docs WHERE id = 3", [MockResponse::rows(&["BODY"], vec![vec![failing_lob()]])]);

    let text = dal
        .select_one_clob_value_sql("SELECT body FROM docs WHERE id = 1", Binds::none(), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(text.as_deref(), Some("long text body"));

    let none = dal
        .select_one_clob_value_sql("SELECT body FROM docs WHERE id = 2", Binds::none(), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(none, None);

    let err = dal
        .select_one_clob_value_sql("SELECT body FROM docs WHERE id = 3", Binds::none(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DalError::Lob(_)));
    assert_eq!(pool.acquired(), 3);
    assert_eq!(pool.released(), 3);
}

#[tokio::test]
async fn insert_returning_id_substitutes_the_sequence_value() {
    let (pool, dal) = setup();
    pool.when("emp_seq.NEXTVAL", [MockResponse::rows(&["NEXTVAL"], vec![vec![RowValues::Int(1001)]])]);
    pool.when("INSERT INTO emp", [MockResponse::Affected(1)]);

    let binds = Binds::named([
        ("id", BindValue::PrimaryKey),
        ("name", BindValue::from("carol")),
    ]);
    let id = dal
        .insert_returning_id_sql(
            "INSERT INTO emp (id, name) VALUES (:id, :name)",
            binds,
            "emp_seq",
            QueryOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(id, RowValues::Int(1001));

    let insert_binds = pool.executed_binds().pop().unwrap();
    assert_eq!(
        insert_binds,
        Binds::named([
            ("id", BindValue::from(1001_i64)),
            ("name", BindValue::from("carol")),
        ])
    );
    assert_eq!(pool.acquired(), 1);
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn failed_sequence_skips_the_insert() {
    let (pool, dal) = setup();
    pool.when(
        "bad_seq.NEXTVAL",
        [MockResponse::Error(DriverError::object_not_found(
            "ORA-02289: sequence does not exist",
        ))],
    );

    let err = dal
        .insert_returning_id_sql(
            "INSERT INTO emp (id) VALUES (:id)",
            Binds::named([("id", BindValue::PrimaryKey)]),
            "bad_seq",
            QueryOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(err.driver_error().unwrap().message.contains("ORA-02289"));
    assert!(pool.executed().iter().all(|sql| !sql.starts_with("INSERT")));
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn primary_key_placeholder_is_required_once() {
    let (pool, dal) = setup();
    for binds in [
        Binds::named([("name", BindValue::from("x"))]),
        Binds::named([("a", BindValue::PrimaryKey), ("b", BindValue::PrimaryKey)]),
    ] {
        let err = dal
            .insert_returning_id_sql("INSERT INTO emp VALUES (:a)", binds, "emp_seq", QueryOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), DalError::InvalidArgument(_)));
    }
    assert_eq!(pool.acquired(), 0);
}

#[tokio::test]
async fn insert_touching_no_rows_is_reported() {
    let (pool, dal) = setup();
    pool.when("emp_seq.NEXTVAL", [MockResponse::rows(&["NEXTVAL"], vec![vec![RowValues::Int(5)]])]);
    pool.when("INSERT INTO emp", [MockResponse::Affected(0)]);

    let err = dal
        .insert_returning_id_sql(
            "INSERT INTO emp (id) SELECT :id FROM dual WHERE 1 = 0",
            Binds::named([("id", BindValue::PrimaryKey)]),
            "emp_seq",
            QueryOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        DalError::UnexpectedRowCount { expected: 1, actual: 0 }
    ));
    assert_eq!(pool.released(), 1);
}

#[test]
fn unknown_output_format_is_rejected() {
    let err = "csv".parse::<OutFormat>().unwrap_err();
    assert!(matches!(err, DalError::UnsupportedOutputFormat(ref v) if v == "csv"));
    assert_eq!("out_format_array".parse::<OutFormat>().unwrap(), OutFormat::Array);

    let err = DalConfig::from_json_str(r#"{"connection": {"connectString": "db"}, "outFormat": "csv"}"#)
        .unwrap_err();
    assert!(matches!(err, DalError::UnsupportedOutputFormat(_)), "{err}");
}
