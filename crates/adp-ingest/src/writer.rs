//! Batch writer: COPY fast path with row-wise fallback
//!
//! Rows are buffered per table and flushed through the store's bulk-copy
//! endpoint. When the store rejects a COPY payload (typically one malformed
//! value in an otherwise valid batch), the same buffer is replayed as
//! row-wise conflict-tolerant inserts so a single bad row never discards
//! its neighbors. Only a failure of both paths is fatal for a batch.
//!
//! The writer owns one pooled connection for its whole lifetime and turns
//! off row-level constraint triggers on it (`session_replication_role`);
//! the repair pipeline re-establishes and validates those guarantees after
//! all entity types have loaded.

use crate::transform::Row;
use adp_common::copy_text;
use adp_common::error::{AdpError, Result};
use adp_common::schema::{self, Entity, TableDef};
use chrono::Utc;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Write strategy selected by `--mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WriteMode {
    /// Fresh insert: COPY fast path, conflict-ignoring fallback
    #[default]
    Clean,
    /// Conflict-tolerant upsert; COPY cannot express conflicts, so this
    /// mode is row-wise from the start
    Update,
}

/// Counters accumulated across all flushes of one writer
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteStats {
    pub rows_written: u64,
    /// Rows individually rejected by the row-wise path
    pub rows_skipped: u64,
    /// Batches that fell back from COPY to row-wise inserts
    pub copy_fallbacks: u64,
}

/// Append-only, entity-scoped error log
///
/// One line per failure: timestamp, table, error text. Logging failures are
/// reported but never escalate; the error log must not take the load down.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(state_dir: &Path, entity: Entity) -> Self {
        Self {
            path: state_dir.join(format!("{}_errors.log", entity)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, table: &str, error: &str) {
        let line = format!(
            "{}\t{}\t{}\n",
            Utc::now().to_rfc3339(),
            table,
            error.replace('\n', " ")
        );
        let written = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "Failed to append to error log");
        }
    }
}

/// Per-table buffering bulk writer
pub struct BatchWriter {
    conn: PoolConnection<Postgres>,
    mode: WriteMode,
    batch_size: usize,
    buffers: HashMap<&'static str, Vec<Row>>,
    stats: WriteStats,
    error_log: ErrorLog,
}

impl BatchWriter {
    /// Acquire a dedicated connection and prepare it for bulk loading
    pub async fn new(
        pool: &PgPool,
        mode: WriteMode,
        batch_size: usize,
        error_log: ErrorLog,
    ) -> Result<Self> {
        let mut conn = pool.acquire().await?;

        // Row-level FK enforcement is prohibitively slow at bulk volume.
        sqlx::query("SET session_replication_role = replica")
            .execute(&mut *conn)
            .await?;

        Ok(Self {
            conn,
            mode,
            batch_size: batch_size.max(1),
            buffers: HashMap::new(),
            stats: WriteStats::default(),
            error_log,
        })
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Buffer one row; flushes the table when its buffer fills
    pub async fn add(&mut self, table: &'static str, row: Row) -> Result<()> {
        let buffer = self.buffers.entry(table).or_default();
        buffer.push(row);
        if buffer.len() >= self.batch_size {
            self.flush(table).await?;
        }
        Ok(())
    }

    /// Flush one table's buffer through COPY, falling back row-wise
    pub async fn flush(&mut self, table: &'static str) -> Result<()> {
        let rows = match self.buffers.get_mut(table) {
            Some(buffer) if !buffer.is_empty() => std::mem::take(buffer),
            _ => return Ok(()),
        };
        let table_def = schema::table(table)?;

        match self.mode {
            WriteMode::Clean => match copy_batch(&mut self.conn, table_def, &rows).await {
                Ok(written) => {
                    self.stats.rows_written += written;
                    debug!(table, rows = written, "Flushed batch via COPY");
                },
                Err(e) => {
                    warn!(
                        table,
                        rows = rows.len(),
                        error = %e,
                        "Bulk load rejected, falling back to row-wise inserts"
                    );
                    self.error_log.record(table, &format!("COPY rejected: {}", e));
                    self.stats.copy_fallbacks += 1;
                    self.insert_rows(table_def, &rows).await?;
                },
            },
            WriteMode::Update => self.insert_rows(table_def, &rows).await?,
        }

        Ok(())
    }

    /// Flush every buffered table
    pub async fn flush_all(&mut self) -> Result<()> {
        let tables: Vec<&'static str> = self.buffers.keys().copied().collect();
        for table in tables {
            self.flush(table).await?;
        }
        Ok(())
    }

    /// Drain all buffers, restore the connection, and return the counters
    ///
    /// The session role is restored even when the final flush fails; the
    /// connection must never return to the pool in replica mode.
    pub async fn finish(mut self) -> Result<WriteStats> {
        let flushed = self.flush_all().await;
        let restored = sqlx::query("RESET session_replication_role")
            .execute(&mut *self.conn)
            .await;
        flushed?;
        restored?;
        Ok(self.stats)
    }

    /// Row-wise conflict-tolerant replay of one buffer
    ///
    /// Individually rejected rows are counted and logged; the batch is only
    /// fatal when every row of it is rejected.
    async fn insert_rows(&mut self, table_def: &TableDef, rows: &[Row]) -> Result<()> {
        let statement = insert_statement(table_def, self.mode);
        let mut rejected = 0usize;

        for row in rows {
            let mut query = sqlx::query(&statement);
            for value in &row.0 {
                query = query.bind(value.as_deref());
            }
            match query.execute(&mut *self.conn).await {
                Ok(result) => self.stats.rows_written += result.rows_affected(),
                Err(e) => {
                    rejected += 1;
                    self.stats.rows_skipped += 1;
                    debug!(table = table_def.name, error = %e, "Row rejected by fallback path");
                    self.error_log
                        .record(table_def.name, &format!("row rejected: {}", e));
                },
            }
        }

        if rejected == rows.len() && !rows.is_empty() {
            return Err(AdpError::BatchFailed {
                table: table_def.name.to_string(),
                message: format!("all {} rows rejected by row-wise fallback", rows.len()),
            });
        }
        Ok(())
    }
}

/// Stream one buffer through the COPY endpoint
async fn copy_batch(
    conn: &mut PoolConnection<Postgres>,
    table_def: &TableDef,
    rows: &[Row],
) -> sqlx::Result<u64> {
    let statement = format!(
        "COPY {} ({}) FROM STDIN",
        table_def.name,
        table_def.column_list()
    );

    let mut payload = String::new();
    for row in rows {
        copy_text::encode_row(&row.0, &mut payload);
    }

    let mut sink = conn.copy_in_raw(&statement).await?;
    sink.send(payload.as_bytes()).await?;
    sink.finish().await
}

/// Build the row-wise statement with typed placeholder casts
///
/// Values are bound as text; the cast list comes from the static catalog,
/// never from the caller.
fn insert_statement(table_def: &TableDef, mode: WriteMode) -> String {
    let placeholders = table_def
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("${}::{}", i + 1, c.ty.sql_name()))
        .collect::<Vec<_>>()
        .join(", ");
    let base = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_def.name,
        table_def.column_list(),
        placeholders
    );

    match mode {
        WriteMode::Clean => format!("{} ON CONFLICT DO NOTHING", base),
        WriteMode::Update => {
            let conflict = table_def.primary_key.join(", ");
            let assignments: Vec<String> = table_def
                .non_key_columns()
                .map(|c| format!("{} = EXCLUDED.{}", c.name, c.name))
                .collect();
            if table_def.primary_key.is_empty() || assignments.is_empty() {
                format!("{} ON CONFLICT DO NOTHING", base)
            } else {
                format!(
                    "{} ON CONFLICT ({}) DO UPDATE SET {}",
                    base,
                    conflict,
                    assignments.join(", ")
                )
            }
        },
    }
}
