//! Orphan analysis and quarantine
//!
//! A child row is orphaned when its FK-bearing column carries a value with
//! no matching parent row. Analysis runs per declared FK edge: count the
//! orphans, sample their identifiers into a CSV manifest, and summarize
//! all edges into one report. Cleanup deletes the orphaned rows, but an
//! edge whose orphan rate exceeds the configured threshold needs explicit
//! operator confirmation first.
//!
//! The deletion count must equal the immediately preceding analysis count
//! for that edge; a mismatch means the table changed under the repair run
//! and is reported loudly.

use crate::select_tables;
use adp_common::config::AdpConfig;
use adp_common::error::{AdpError, Result};
use adp_common::schema::{self, Entity, ForeignKey, TableDef};
use serde::Serialize;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Analysis result for one FK edge
#[derive(Debug, Clone)]
pub struct EdgeAnalysis {
    pub table: &'static str,
    pub column: &'static str,
    pub parent_table: &'static str,
    /// Entity type the missing parents belong to
    pub referenced_entity: Entity,
    /// Child rows with a non-null reference and no parent
    pub orphan_rows: i64,
    /// Child rows with a non-null reference
    pub referencing_rows: i64,
    /// Sampled orphaned identifiers, capped at `sample_size`
    pub sample: Vec<String>,
}

impl EdgeAnalysis {
    /// Orphan fraction of referencing rows; zero when nothing references
    pub fn rate(&self) -> f64 {
        if self.referencing_rows == 0 {
            0.0
        } else {
            self.orphan_rows as f64 / self.referencing_rows as f64
        }
    }
}

/// Options resolved from the CLI
#[derive(Debug, Clone)]
pub struct OrphanOptions {
    pub table: Option<String>,
    pub threshold: f64,
    /// Skip the interactive gate for above-threshold edges
    pub assume_yes: bool,
    /// Analyze and write manifests, never delete
    pub analyze_only: bool,
}

/// Outcome of one `orphans` run
#[derive(Debug, Default)]
pub struct OrphanOutcome {
    pub analyses: Vec<EdgeAnalysis>,
    pub rows_deleted: u64,
    /// Edges skipped because the operator declined cleanup
    pub edges_declined: usize,
    /// Edges whose deletion count diverged from the analysis count
    pub conservation_mismatches: usize,
}

#[derive(Debug, Serialize)]
struct ManifestRecord<'a> {
    id: &'a str,
    referenced_entity: &'a str,
    table: &'a str,
    column: &'a str,
}

#[derive(Debug, Serialize)]
struct SummaryRecord<'a> {
    table: &'a str,
    column: &'a str,
    parent_table: &'a str,
    orphan_rows: i64,
    referencing_rows: i64,
    rate: f64,
}

/// Analyze every selected FK edge and, unless analyze-only, clean it up
pub async fn run(
    pool: &PgPool,
    config: &AdpConfig,
    options: &OrphanOptions,
) -> Result<OrphanOutcome> {
    let tables = select_tables(options.table.as_deref())?;
    std::fs::create_dir_all(&config.manifest_dir)?;

    let mut outcome = OrphanOutcome::default();

    for table in tables {
        for fk in table.foreign_keys {
            let analysis = analyze_edge(pool, table, fk, config.sample_size).await?;
            write_manifest(&config.manifest_dir, &analysis)?;
            info!(
                table = analysis.table,
                column = analysis.column,
                orphans = analysis.orphan_rows,
                referencing = analysis.referencing_rows,
                rate = analysis.rate(),
                "Edge analyzed"
            );

            if !options.analyze_only && analysis.orphan_rows > 0 {
                if analysis.rate() > options.threshold && !options.assume_yes {
                    if !confirm_cleanup(&analysis, options.threshold)? {
                        warn!(
                            table = analysis.table,
                            column = analysis.column,
                            "Cleanup declined by operator"
                        );
                        outcome.edges_declined += 1;
                        outcome.analyses.push(analysis);
                        continue;
                    }
                }
                let deleted = delete_orphans(pool, table, fk).await?;
                outcome.rows_deleted += deleted;
                if deleted != analysis.orphan_rows as u64 {
                    warn!(
                        table = analysis.table,
                        column = analysis.column,
                        analyzed = analysis.orphan_rows,
                        deleted,
                        "Deletion count diverged from analysis; table changed mid-run"
                    );
                    outcome.conservation_mismatches += 1;
                }
            }

            outcome.analyses.push(analysis);
        }
    }

    write_summary(&config.manifest_dir, &outcome.analyses)?;
    info!(
        edges = outcome.analyses.len(),
        rows_deleted = outcome.rows_deleted,
        declined = outcome.edges_declined,
        "Orphan pass finished"
    );
    Ok(outcome)
}

/// Count and sample orphaned rows for one FK edge
pub async fn analyze_edge(
    pool: &PgPool,
    table: &TableDef,
    fk: &ForeignKey,
    sample_size: i64,
) -> Result<EdgeAnalysis> {
    let referencing: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL",
        table.name, fk.column
    ))
    .fetch_one(pool)
    .await?;

    let orphans: i64 = sqlx::query_scalar(&orphan_predicate(
        &format!("SELECT COUNT(*) FROM {} c", table.name),
        fk,
    ))
    .fetch_one(pool)
    .await?;

    let sample: Vec<String> = sqlx::query_scalar(&format!(
        "{} LIMIT $1",
        orphan_predicate(
            &format!("SELECT DISTINCT c.{} FROM {} c", fk.column, table.name),
            fk,
        )
    ))
    .bind(sample_size)
    .fetch_all(pool)
    .await?;

    Ok(EdgeAnalysis {
        table: table.name,
        column: fk.column,
        parent_table: fk.parent_table,
        referenced_entity: schema::entity_for_table(fk.parent_table)?,
        orphan_rows: orphans,
        referencing_rows: referencing,
        sample,
    })
}

/// Delete the orphaned rows for one FK edge, returning the count
pub async fn delete_orphans(pool: &PgPool, table: &TableDef, fk: &ForeignKey) -> Result<u64> {
    let statement = orphan_predicate(&format!("DELETE FROM {} c", table.name), fk);
    let result = sqlx::query(&statement).execute(pool).await?;
    Ok(result.rows_affected())
}

/// Append the shared orphan WHERE clause to a statement head
fn orphan_predicate(head: &str, fk: &ForeignKey) -> String {
    format!(
        "{} WHERE c.{} IS NOT NULL AND NOT EXISTS \
         (SELECT 1 FROM {} p WHERE p.{} = c.{})",
        head, fk.column, fk.parent_table, fk.parent_column, fk.column
    )
}

fn confirm_cleanup(analysis: &EdgeAnalysis, threshold: f64) -> Result<bool> {
    let prompt = format!(
        "{}.{}: {} of {} referencing rows ({:.2}%) are orphaned, above the {:.2}% threshold. Delete them?",
        analysis.table,
        analysis.column,
        analysis.orphan_rows,
        analysis.referencing_rows,
        analysis.rate() * 100.0,
        threshold * 100.0
    );
    inquire::Confirm::new(&prompt)
        .with_default(false)
        .prompt()
        .map_err(|_| AdpError::CleanupDeclined {
            table: analysis.table.to_string(),
            column: analysis.column.to_string(),
        })
}

/// One CSV manifest per edge: `orphans_<table>_<column>.csv`
fn write_manifest(manifest_dir: &Path, analysis: &EdgeAnalysis) -> Result<()> {
    let path = manifest_path(manifest_dir, analysis.table, analysis.column);
    let mut writer = csv::Writer::from_path(&path)?;
    let entity = analysis.referenced_entity.as_str();
    for id in &analysis.sample {
        writer.serialize(ManifestRecord {
            id,
            referenced_entity: entity,
            table: analysis.table,
            column: analysis.column,
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_summary(manifest_dir: &Path, analyses: &[EdgeAnalysis]) -> Result<()> {
    let path = manifest_dir.join("orphans_summary.csv");
    let mut writer = csv::Writer::from_path(&path)?;
    for analysis in analyses {
        writer.serialize(SummaryRecord {
            table: analysis.table,
            column: analysis.column,
            parent_table: analysis.parent_table,
            orphan_rows: analysis.orphan_rows,
            referencing_rows: analysis.referencing_rows,
            rate: analysis.rate(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn manifest_path(manifest_dir: &Path, table: &str, column: &str) -> PathBuf {
    manifest_dir.join(format!("orphans_{}_{}.csv", table, column))
}
