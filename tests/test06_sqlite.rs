#![cfg(feature = "sqlite")]

use sql_dal::DriverErrorKind;
use sql_dal::prelude::*;
use sql_dal::sqlite::SqliteDal;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn open(dir: &TempDir) -> Result<SqliteDal, DalError> {
    init_tracing();
    let path = dir.path().join("dal.db");
    let cfg = DalConfig::builder(path.to_string_lossy())
        .pool_size(1, 4)
        .backoff_ms(1, 3)
        .finish()?;
    let dal = Dal::new_sqlite(cfg).await?;
    dal.query_sql(
        "CREATE TABLE IF NOT EXISTS emp (id INTEGER PRIMARY KEY, name TEXT NOT NULL, dept INTEGER)",
        Binds::none(),
        QueryOptions::new(),
    )
    .await?;
    Ok(dal)
}

async fn seed(dal: &SqliteDal, n: i64) -> Result<(), DalError> {
    let statements = (1..=n)
        .map(|i| {
            SqlBind::new(
                "INSERT INTO emp (id, name, dept) VALUES (?, ?, ?)",
                Binds::from(vec![
                    RowValues::Int(i),
                    RowValues::Text(format!("emp{i:02}")),
                    RowValues::Int(i % 3),
                ]),
            )
        })
        .collect();
    dal.execute_transaction(statements, QueryOptions::new()).await?;
    Ok(())
}

async fn count(dal: &SqliteDal) -> Result<i64, DalError> {
    let value = dal
        .select_one_value_sql("SELECT COUNT(*) FROM emp", Binds::none(), QueryOptions::new())
        .await?;
    Ok(value.as_i64_lossy().unwrap_or(-1))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_middle_statement_rolls_back_and_skips_the_rest() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dal = open(&dir).await?;
    seed(&dal, 3).await?;

    let err = dal
        .execute_transaction(
            vec![
                SqlBind::new(
                    "INSERT INTO emp (id, name) VALUES (:id, :name)",
                    Binds::named([("id", BindValue::from(100_i64)), ("name", BindValue::from("temp"))]),
                ),
                SqlBind::new("INSERT INTO missing_table VALUES (1)", Binds::none()),
                SqlBind::new(
                    "INSERT INTO emp (id, name) VALUES (?, ?)",
                    Binds::from(vec![RowValues::Int(101), RowValues::Text("never".into())]),
                ),
            ],
            QueryOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.kind(), DalError::TransactionFailed { statement_index: 1, .. }));
    assert_eq!(err.driver_error().map(|e| e.kind), Some(DriverErrorKind::ObjectNotFound));
    assert!(err.rollback_error().is_none());
    assert_eq!(count(&dal).await?, 3);
    let leftovers = dal
        .select_all_rows_sql("SELECT id FROM emp WHERE id >= 100", Binds::none(), QueryOptions::new())
        .await?;
    assert!(leftovers.is_empty());
    assert_eq!(dal.pool_status().connections_in_use, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pages_are_stable_and_complete() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dal = open(&dir).await?;
    seed(&dal, 25).await?;

    let page = |n: usize| {
        let dal = dal.clone();
        async move {
            dal.select_all_rows_sql(
                "SELECT id, name FROM emp ORDER BY id",
                Binds::none(),
                QueryOptions::new().limit(10).page(n).batch_size(3),
            )
            .await
        }
    };

    let mut ids = Vec::new();
    for n in 1..=3 {
        let first = page(n).await?;
        let again = page(n).await?;
        assert_eq!(first, again);
        ids.extend(first.iter().filter_map(|r| r.get("id").and_then(RowValues::as_i64_lossy)));
    }
    assert_eq!(ids, (1..=25).collect::<Vec<_>>());
    assert!(page(4).await?.is_empty());

    let with_total = dal
        .select_all_rows_sql(
            "SELECT id, name FROM emp ORDER BY id",
            Binds::none(),
            QueryOptions::new().limit(10).page(3).total_count(true),
        )
        .await?;
    assert_eq!(with_total.len(), 5);
    assert_eq!(with_total[0].get("cnt__"), Some(&RowValues::Int(25)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_row_cardinality_against_real_rows() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dal = open(&dir).await?;
    seed(&dal, 2).await?;

    let row = dal
        .select_one_row_sql(
            "SELECT name FROM emp WHERE id = :id",
            Binds::named([("id", BindValue::from(2_i64))]),
            QueryOptions::new(),
        )
        .await?;
    assert_eq!(row.get("name"), Some(&RowValues::Text("emp02".into())));

    let err = dal
        .select_one_row_sql(
            "SELECT name FROM emp WHERE id = :id",
            Binds::named([("id", BindValue::from(99_i64))]),
            QueryOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DalError::UnexpectedRowCount { expected: 1, actual: 0 }));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_return_every_connection() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dal = open(&dir).await?;

    let mut handles = Vec::new();
    for i in 0..16_i64 {
        let dal = dal.clone();
        handles.push(tokio::spawn(async move {
            dal.query_sql(
                "INSERT INTO emp (id, name) VALUES (?, ?)",
                Binds::from(vec![RowValues::Int(i), RowValues::Text(format!("w{i}"))]),
                QueryOptions::new(),
            )
            .await?;
            dal.select_all_rows_sql("SELECT * FROM emp", Binds::none(), QueryOptions::new())
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(count(&dal).await?, 16);
    let status = dal.pool_status();
    assert_eq!(status.connections_in_use, 0);
    assert!(status.connections_open <= 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn counter_table_stands_in_for_a_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dal = open(&dir).await?;
    dal.execute_transaction(
        vec![
            SqlBind::new("CREATE TABLE emp_seq (next_val INTEGER NOT NULL)", Binds::none()),
            SqlBind::new("INSERT INTO emp_seq VALUES (500)", Binds::none()),
        ],
        QueryOptions::new(),
    )
    .await?;

    let id = dal
        .insert_returning_id(
            "emp",
            vec![
                ("id".into(), BindValue::PrimaryKey),
                ("name".into(), BindValue::from("dora")),
            ],
            "emp_seq",
            QueryOptions::new(),
        )
        .await?;
    assert_eq!(id, RowValues::Int(501));

    let name = dal
        .select_one_value(
            TableQuery::new("emp")
                .fields(["name"])
                .filter(Filter::eq([("id", RowValues::Int(501))])),
            QueryOptions::new(),
        )
        .await?;
    assert_eq!(name, RowValues::Text("dora".into()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn table_helpers_round_out_crud() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dal = open(&dir).await?;
    seed(&dal, 6).await?;

    let updated = dal
        .update(
            "emp",
            vec![("name".into(), RowValues::Text("renamed".into()))],
            Filter::raw("dept = ? AND id > ?", vec![RowValues::Int(0), RowValues::Int(0)]),
            QueryOptions::new(),
        )
        .await?;
    assert_eq!(updated.rows_affected, Some(2));

    let deleted = dal
        .del("emp", Filter::eq([("name", RowValues::Text("renamed".into()))]), QueryOptions::new())
        .await?;
    assert_eq!(deleted.rows_affected, Some(2));

    let rows = dal
        .select_all_rows(
            TableQuery::new("emp").fields(["id"]).order(["id DESC"]),
            QueryOptions::new().limit(2),
        )
        .await?;
    let ids: Vec<_> = rows.iter().filter_map(|r| r.get("id").and_then(RowValues::as_i64_lossy)).collect();
    assert_eq!(ids, vec![5, 4]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blobs_stream_and_inline() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dal = open(&dir).await?;
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    dal.query_sql("CREATE TABLE files (body BLOB)", Binds::none(), QueryOptions::new())
        .await?;
    dal.query_sql(
        "INSERT INTO files VALUES (?)",
        Binds::from(vec![RowValues::Blob(payload.clone())]),
        QueryOptions::new(),
    )
    .await?;

    let rows = dal
        .select_all_rows_sql("SELECT body FROM files", Binds::none(), QueryOptions::new().fetch_clobs(true))
        .await?;
    assert_eq!(rows[0].get("body"), Some(&RowValues::Blob(payload)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn procedures_are_unimplemented_on_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dal = open(&dir).await?;
    let err = dal
        .run_procedure("anything", Binds::none(), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DalError::Unimplemented(_)));
    assert_eq!(dal.pool_status().connections_in_use, 0);
    Ok(())
}
