#![cfg(feature = "test-utils")]

use sql_dal::DriverError;
use sql_dal::prelude::*;
use sql_dal::test_utils::{MockPool, MockResponse, fast_config};

fn setup() -> (MockPool, Dal<MockPool>) {
    let pool = MockPool::new(0, 4);
    let dal = Dal::new(pool.clone(), fast_config(0, 4)).expect("valid config");
    (pool, dal)
}

fn line(text: &str) -> MockResponse {
    MockResponse::OutBinds(vec![
        ("ln".into(), RowValues::Text(text.into())),
        ("st".into(), RowValues::Int(0)),
    ])
}

fn no_more_lines() -> MockResponse {
    MockResponse::OutBinds(vec![("ln".into(), RowValues::Null), ("st".into(), RowValues::Int(1))])
}

#[tokio::test]
async fn out_binds_come_back_by_name() {
    let (pool, dal) = setup();
    pool.when(
        "hr.raise_salary",
        [MockResponse::OutBinds(vec![("new_salary".into(), RowValues::Int(5500))])],
    );

    let result = dal
        .run_procedure(
            "hr.raise_salary",
            Binds::named([
                ("emp_id", BindValue::from(7_i64)),
                ("since", BindValue::expression("To_Date(?, 'yyyymmdd')", "20240101")),
                ("new_salary", BindValue::Param(BindParam::out(DbType::Number))),
            ]),
            QueryOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.out_binds.get("new_salary"), Some(&RowValues::Int(5500)));
    assert_eq!(result.dbms_output, None);
    assert_eq!(
        pool.executed(),
        vec!["BEGIN hr.raise_salary(:emp_id, To_Date(:since, 'yyyymmdd'), :new_salary); END;"]
    );
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn line_output_is_collected_until_status_changes() {
    let (pool, dal) = setup();
    pool.when(
        "DBMS_OUTPUT.GET_LINE",
        [line("step 1"), line("step 2"), no_more_lines()],
    );

    let result = dal
        .run_procedure("batch_job", Binds::none(), QueryOptions::new().dbms_output(true))
        .await
        .unwrap();
    assert_eq!(result.dbms_output.as_deref(), Some("step 1\nstep 2"));

    let executed = pool.executed();
    assert_eq!(executed[0], "BEGIN DBMS_OUTPUT.ENABLE(NULL); END;");
    assert_eq!(executed[1], "BEGIN batch_job(); END;");
    assert_eq!(executed.len(), 5);
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn positional_args_get_numbered_placeholders() {
    let (pool, dal) = setup();
    dal.run_procedure(
        "pkg.proc",
        Binds::positional(vec![BindValue::from("a"), BindValue::from(2_i64)]),
        QueryOptions::new(),
    )
    .await
    .unwrap();
    assert_eq!(pool.executed(), vec!["BEGIN pkg.proc(:0, :1); END;"]);
}

#[tokio::test]
async fn procedure_failure_is_annotated_and_releases() {
    let (pool, dal) = setup();
    pool.when(
        "missing_proc",
        [MockResponse::Error(DriverError::object_not_found(
            "PLS-00201: identifier 'MISSING_PROC' must be declared",
        ))],
    );

    let err = dal
        .run_procedure("missing_proc", Binds::none(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("PLS-00201"));
    assert_eq!(err.contexts()[0].tag.as_deref(), Some("runProcedure"));
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn malformed_procedure_name_never_reaches_the_database() {
    let (pool, dal) = setup();
    let err = dal
        .run_procedure("x; DROP TABLE emp", Binds::none(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DalError::InvalidArgument(_)));
    assert_eq!(pool.acquired(), 0);
}
