//! End-to-end pipeline tests
//!
//! The decode-and-transform tests run anywhere. The store-backed tests
//! need a reachable Postgres at `DATABASE_URL` and drop/recreate the
//! entity tables, so they are ignored by default. Run them against a
//! scratch database, single-threaded:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/adp_test cargo test -p adp-ingest -- --ignored --test-threads=1
//! ```

use adp_common::config::{
    AdpConfig, DatabaseConfig, DEFAULT_BATCH_SIZE, DEFAULT_PROGRESS_INTERVAL,
};
use adp_common::schema::{self, Entity, TableDef};
use adp_ingest::decoder::SnapshotReader;
use adp_ingest::discover::SnapshotFile;
use adp_ingest::entities::WorkRecord;
use adp_ingest::orchestrator;
use adp_ingest::transform::{EntityTransformer, Row, WorksTransformer};
use adp_ingest::writer::{BatchWriter, ErrorLog, WriteMode};
use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::PgPool;
use std::io::Write;
use std::path::Path;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
    PgPool::connect(&url).await.expect("connect to test database")
}

fn create_table_sql(table: &TableDef) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.ty.sql_name()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", table.name, columns)
}

/// Constraint-free recreate; the repair pipeline owns constraints
async fn recreate_tables(pool: &PgPool) {
    for table in schema::TABLES {
        sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", table.name))
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(&create_table_sql(table))
            .execute(pool)
            .await
            .unwrap();
    }
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

fn concept_row(id: &str, level: &str) -> Row {
    Row(vec![
        Some(id.to_string()),
        None,
        Some(format!("concept {}", id)),
        Some(level.to_string()),
        None,
        Some("10".to_string()),
        Some("5".to_string()),
        Some("2024-01-01".to_string()),
    ])
}

fn write_gz_fixture(path: &Path, lines: &[&str]) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    encoder.finish().unwrap();
}

fn test_config(state_dir: &Path) -> AdpConfig {
    AdpConfig {
        database: DatabaseConfig {
            url: std::env::var("DATABASE_URL").unwrap(),
            max_connections: 4,
            connect_timeout_secs: 10,
        },
        snapshot_dir: state_dir.to_path_buf(),
        state_dir: state_dir.to_path_buf(),
        manifest_dir: state_dir.to_path_buf(),
        batch_size: DEFAULT_BATCH_SIZE,
        max_workers: 2,
        file_timeout_secs: 60,
        progress_interval: DEFAULT_PROGRESS_INTERVAL,
        orphan_threshold: 0.01,
        sample_size: 50,
    }
}

/// Three-line fixture, one repeated ID, one unparseable line: exactly one
/// row comes out, with the drops showing up in the counters. Decode and
/// transform only, so no store is involved.
#[test]
fn three_line_fixture_yields_one_row_one_duplicate_one_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("part_000.gz");
    write_gz_fixture(
        &fixture,
        &[
            r#"{"id":"https://openalex.org/W1","display_name":"First"}"#,
            "this line is not json",
            r#"{"id":"W1","display_name":"Repeat of W1"}"#,
        ],
    );

    let mut reader = SnapshotReader::<WorkRecord>::open(&fixture, 1000, None).unwrap();
    let mut transformer = WorksTransformer::default();
    let mut works_rows = 0usize;
    for record in reader.by_ref() {
        for (table, _) in transformer.transform(record.unwrap()) {
            if table == "works" {
                works_rows += 1;
            }
        }
    }

    assert_eq!(works_rows, 1);
    assert_eq!(reader.stats().lines, 3);
    assert_eq!(reader.stats().malformed, 1);
    assert_eq!(transformer.counts().duplicates, 1);
}

#[tokio::test]
#[ignore]
async fn copy_path_writes_batches() {
    let pool = test_pool().await;
    recreate_tables(&pool).await;
    let dir = tempfile::tempdir().unwrap();

    let mut writer = BatchWriter::new(
        &pool,
        WriteMode::Clean,
        3,
        ErrorLog::new(dir.path(), Entity::Concepts),
    )
    .await
    .unwrap();
    for i in 0..7 {
        writer
            .add("concepts", concept_row(&format!("C{}", i), "0"))
            .await
            .unwrap();
    }
    let stats = writer.finish().await.unwrap();

    assert_eq!(stats.rows_written, 7);
    assert_eq!(stats.copy_fallbacks, 0);
    assert_eq!(count(&pool, "concepts").await, 7);
}

#[tokio::test]
#[ignore]
async fn fallback_preserves_valid_neighbors() {
    let pool = test_pool().await;
    recreate_tables(&pool).await;
    let dir = tempfile::tempdir().unwrap();

    let mut writer = BatchWriter::new(
        &pool,
        WriteMode::Clean,
        100,
        ErrorLog::new(dir.path(), Entity::Concepts),
    )
    .await
    .unwrap();
    writer.add("concepts", concept_row("C1", "0")).await.unwrap();
    // Non-numeric level poisons the COPY batch
    writer
        .add("concepts", concept_row("C2", "not-a-number"))
        .await
        .unwrap();
    writer.add("concepts", concept_row("C3", "1")).await.unwrap();
    let stats = writer.finish().await.unwrap();

    assert_eq!(stats.copy_fallbacks, 1);
    assert_eq!(stats.rows_written, 2);
    assert_eq!(stats.rows_skipped, 1);
    assert_eq!(count(&pool, "concepts").await, 2);

    let log = std::fs::read_to_string(dir.path().join("concepts_errors.log")).unwrap();
    assert!(log.contains("COPY rejected"));
    assert!(log.contains("row rejected"));
}

#[tokio::test]
#[ignore]
async fn failed_finish_restores_session_role() {
    let url = std::env::var("DATABASE_URL").unwrap();
    // One pooled connection, so the writer's connection is the one we
    // inspect after it is returned.
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .unwrap();
    recreate_tables(&pool).await;
    let dir = tempfile::tempdir().unwrap();

    let mut writer = BatchWriter::new(
        &pool,
        WriteMode::Clean,
        100,
        ErrorLog::new(dir.path(), Entity::Concepts),
    )
    .await
    .unwrap();
    // The only row is bad, so COPY and the row-wise fallback both fail.
    writer
        .add("concepts", concept_row("C1", "not-a-number"))
        .await
        .unwrap();
    assert!(writer.finish().await.is_err());

    let role: String = sqlx::query_scalar("SHOW session_replication_role")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(role, "origin");
}

#[tokio::test]
#[ignore]
async fn update_mode_upserts_on_conflict() {
    let pool = test_pool().await;
    recreate_tables(&pool).await;
    sqlx::query("ALTER TABLE concepts ADD CONSTRAINT concepts_pkey PRIMARY KEY (id)")
        .execute(&pool)
        .await
        .unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut writer = BatchWriter::new(
        &pool,
        WriteMode::Update,
        100,
        ErrorLog::new(dir.path(), Entity::Concepts),
    )
    .await
    .unwrap();
    writer.add("concepts", concept_row("C1", "0")).await.unwrap();
    writer.finish().await.unwrap();

    let mut writer = BatchWriter::new(
        &pool,
        WriteMode::Update,
        100,
        ErrorLog::new(dir.path(), Entity::Concepts),
    )
    .await
    .unwrap();
    writer.add("concepts", concept_row("C1", "3")).await.unwrap();
    writer.finish().await.unwrap();

    assert_eq!(count(&pool, "concepts").await, 1);
    let level: i32 = sqlx::query_scalar("SELECT level FROM concepts WHERE id = 'C1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(level, 3);
}

#[tokio::test]
#[ignore]
async fn file_load_fans_out_and_counts() {
    let pool = test_pool().await;
    recreate_tables(&pool).await;
    let dir = tempfile::tempdir().unwrap();

    let fixture = dir.path().join("part_000.gz");
    write_gz_fixture(
        &fixture,
        &[
            r#"{"id":"https://openalex.org/W1","display_name":"First","publication_year":2020,"authorships":[{"author":{"id":"A1"},"institutions":[{"id":"I1"}]}],"referenced_works":["W2","W2"],"concepts":[{"id":"C1","score":0.9}]}"#,
            "this line is not json",
            r#"{"id":"W1","display_name":"Repeat of W1"}"#,
            r#"{"id":"W2","display_name":"Second","counts_by_year":[{"year":2021,"cited_by_count":4}]}"#,
        ],
    );

    let file = SnapshotFile {
        path: fixture.clone(),
        relative: "part_000.gz".to_string(),
    };
    let outcome = orchestrator::process_file(
        pool.clone(),
        test_config(dir.path()),
        Entity::Works,
        &file,
        WriteMode::Clean,
        false,
    )
    .await
    .unwrap();

    assert_eq!(outcome.lines, 4);
    assert_eq!(outcome.malformed, 1);
    assert_eq!(outcome.duplicates, 1);
    assert_eq!(count(&pool, "works").await, 2);
    assert_eq!(count(&pool, "works_authorships").await, 1);
    // Repeated reference collapses within the record
    assert_eq!(count(&pool, "works_referenced_works").await, 1);
    assert_eq!(count(&pool, "works_concepts").await, 1);
    assert_eq!(count(&pool, "works_counts_by_year").await, 1);
}
