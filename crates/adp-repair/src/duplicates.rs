//! Duplicate-key reconciliation
//!
//! The load path tolerates repeated keys (COPY cannot check them and the
//! fallback only skips rows the store rejects), so before a primary key
//! can be added every key group with more than one member has to be
//! resolved. Groups are classified by a SHA-256 fingerprint over the
//! non-key columns, computed client-side from the store's canonical jsonb
//! rendering of each row:
//!
//! - every member identical: collapse, keeping the physically-first row
//!   (lowest `ctid`)
//! - members diverge: report for manual review, never auto-resolve
//!
//! Divergent groups are also persisted to
//! `<manifest_dir>/duplicates_divergent.csv` so the review survives the
//! terminal. `--dry-run` classifies and reports without deleting.

use crate::select_tables;
use adp_common::error::{AdpError, Result};
use adp_common::schema::TableDef;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// A key group whose members disagree outside the key columns
#[derive(Debug, Clone)]
pub struct DivergentGroup {
    pub table: &'static str,
    /// Key values, textual, in declared key order
    pub key: Vec<String>,
    pub members: usize,
    pub distinct_payloads: usize,
}

/// Outcome of one `dedupe` run
#[derive(Debug, Default)]
pub struct DedupeReport {
    pub tables_scanned: usize,
    pub groups_found: u64,
    pub groups_collapsed: u64,
    pub rows_deleted: u64,
    pub divergent: Vec<DivergentGroup>,
    pub dry_run: bool,
}

impl DedupeReport {
    pub fn is_clean(&self) -> bool {
        self.divergent.is_empty()
    }
}

/// Physical row address, ordered so the first-loaded row sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Ctid {
    block: u64,
    offset: u64,
}

impl Ctid {
    /// Parse the store's `(block,offset)` rendering
    fn parse(raw: &str) -> Result<Self> {
        let inner = raw
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| bad_ctid(raw))?;
        let (block, offset) = inner.split_once(',').ok_or_else(|| bad_ctid(raw))?;
        Ok(Self {
            block: block.parse().map_err(|_| bad_ctid(raw))?,
            offset: offset.parse().map_err(|_| bad_ctid(raw))?,
        })
    }

    fn literal(&self) -> String {
        format!("'({},{})'::tid", self.block, self.offset)
    }
}

fn bad_ctid(raw: &str) -> AdpError {
    AdpError::State(format!("unparseable row address: {}", raw))
}

/// Scan the selected tables and collapse exact duplicate key groups
pub async fn run(
    pool: &PgPool,
    manifest_dir: &Path,
    only: Option<&str>,
    dry_run: bool,
) -> Result<DedupeReport> {
    let tables = select_tables(only)?;
    let mut report = DedupeReport {
        dry_run,
        ..Default::default()
    };

    for table in tables {
        if table.primary_key.is_empty() {
            continue;
        }
        report.tables_scanned += 1;
        dedupe_table(pool, table, dry_run, &mut report).await?;
    }

    if !report.divergent.is_empty() {
        std::fs::create_dir_all(manifest_dir)?;
        write_divergent_manifest(manifest_dir, &report.divergent)?;
    }

    info!(
        tables = report.tables_scanned,
        groups = report.groups_found,
        collapsed = report.groups_collapsed,
        rows_deleted = report.rows_deleted,
        divergent = report.divergent.len(),
        dry_run,
        "Dedupe finished"
    );
    Ok(report)
}

async fn dedupe_table(
    pool: &PgPool,
    table: &'static TableDef,
    dry_run: bool,
    report: &mut DedupeReport,
) -> Result<()> {
    for key in duplicate_keys(pool, table).await? {
        report.groups_found += 1;
        let members = fetch_group(pool, table, &key).await?;

        let distinct: HashSet<&str> = members.iter().map(|m| m.fingerprint.as_str()).collect();
        if distinct.len() > 1 {
            warn!(
                table = table.name,
                key = %key.join("/"),
                members = members.len(),
                distinct = distinct.len(),
                "Divergent duplicate group left for manual review"
            );
            report.divergent.push(DivergentGroup {
                table: table.name,
                key,
                members: members.len(),
                distinct_payloads: distinct.len(),
            });
            continue;
        }

        // Identical group: every member but the physically-first goes.
        // A group can shrink below two members between the key scan and
        // the fetch (nothing serializes concurrent dedupe runs); such a
        // group needs no collapse.
        let doomed = collapse_plan(members.iter().map(|m| m.ctid).collect());
        if doomed.is_empty() {
            continue;
        }
        report.groups_collapsed += 1;

        if dry_run {
            report.rows_deleted += doomed.len() as u64;
            continue;
        }

        let literals: Vec<String> = doomed.iter().map(Ctid::literal).collect();
        let statement = format!(
            "DELETE FROM {} WHERE ctid = ANY (ARRAY[{}])",
            table.name,
            literals.join(", ")
        );
        let result = sqlx::query(&statement).execute(pool).await?;
        report.rows_deleted += result.rows_affected();
    }
    Ok(())
}

/// Addresses to delete from one identical group: all but the lowest
fn collapse_plan(mut addresses: Vec<Ctid>) -> Vec<Ctid> {
    addresses.sort_unstable();
    if addresses.len() < 2 {
        return Vec::new();
    }
    addresses.split_off(1)
}

/// Key values (textual) of every group with more than one member
async fn duplicate_keys(pool: &PgPool, table: &TableDef) -> Result<Vec<Vec<String>>> {
    let key_list = table
        .primary_key
        .iter()
        .map(|k| format!("{}::text", k))
        .collect::<Vec<_>>()
        .join(", ");
    let statement = format!(
        "SELECT {} FROM {} GROUP BY {} HAVING COUNT(*) > 1",
        key_list,
        table.name,
        table.primary_key.join(", ")
    );

    let rows = sqlx::query(&statement).fetch_all(pool).await?;
    let mut keys = Vec::with_capacity(rows.len());
    for row in rows {
        let mut key = Vec::with_capacity(table.primary_key.len());
        for i in 0..table.primary_key.len() {
            key.push(row.try_get::<String, _>(i)?);
        }
        keys.push(key);
    }
    Ok(keys)
}

#[derive(Debug, Serialize)]
struct DivergentRecord<'a> {
    table: &'a str,
    key: String,
    members: usize,
    distinct_payloads: usize,
}

/// Persist divergent groups for manual review
fn write_divergent_manifest(manifest_dir: &Path, groups: &[DivergentGroup]) -> Result<()> {
    let path = manifest_dir.join("duplicates_divergent.csv");
    let mut writer = csv::Writer::from_path(&path)?;
    for group in groups {
        writer.serialize(DivergentRecord {
            table: group.table,
            key: group.key.join("/"),
            members: group.members,
            distinct_payloads: group.distinct_payloads,
        })?;
    }
    writer.flush()?;
    Ok(())
}

struct GroupMember {
    ctid: Ctid,
    /// Hex SHA-256 over the row's non-key jsonb rendering
    fingerprint: String,
}

/// Fetch one group's members with their non-key content fingerprints
async fn fetch_group(
    pool: &PgPool,
    table: &TableDef,
    key: &[String],
) -> Result<Vec<GroupMember>> {
    // jsonb renders with normalized key order, so equal rows hash equal.
    let strip = table
        .primary_key
        .iter()
        .map(|k| format!(" - '{}'", k))
        .collect::<String>();
    let predicate = table
        .primary_key
        .iter()
        .enumerate()
        .map(|(i, k)| format!("t.{}::text = ${}", k, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let statement = format!(
        "SELECT t.ctid::text, (to_jsonb(t){})::text FROM {} t WHERE {}",
        strip, table.name, predicate
    );

    let mut query = sqlx::query(&statement);
    for value in key {
        query = query.bind(value);
    }

    let rows = query.fetch_all(pool).await?;
    let mut members = Vec::with_capacity(rows.len());
    for row in rows {
        let ctid: String = row.try_get(0)?;
        let payload: String = row.try_get(1)?;
        members.push(GroupMember {
            ctid: Ctid::parse(&ctid)?,
            fingerprint: hex::encode(Sha256::digest(payload.as_bytes())),
        });
    }
    Ok(members)
}
