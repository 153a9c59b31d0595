//! Merged-identifier remapping
//!
//! The snapshot publishes a merged-IDs reference alongside the data:
//! `merged_ids/<entity>/*.csv(.gz)`, columns `merge_date,id,merge_into_id`,
//! listing deprecated identifiers and their canonical replacements. Child
//! rows loaded from older files may still reference the deprecated side,
//! so before orphan analysis every FK-bearing column pointing at an
//! entity's root table is rewritten old -> canonical.
//!
//! Each entity's mapping is staged into a session-local temp table via the
//! bulk-copy endpoint and applied with one UPDATE per FK edge. Running
//! this before `constraints` is deliberate: the rewrite can produce exact
//! duplicates in child tables, which `dedupe` then collapses.

use adp_common::copy_text;
use adp_common::error::Result;
use adp_common::ids::normalize_id;
use adp_common::schema::{Entity, ENTITY_LOAD_ORDER, TABLES};
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use sqlx::PgPool;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One line of a merged-IDs reference file
#[derive(Debug, Deserialize)]
struct MergedIdRecord {
    #[allow(dead_code)]
    merge_date: Option<String>,
    id: Option<String>,
    merge_into_id: Option<String>,
}

/// A deprecated identifier and its canonical replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub old_id: String,
    pub canonical_id: String,
}

/// Outcome of one `remap` run
#[derive(Debug, Default)]
pub struct RemapReport {
    /// Mappings loaded per entity
    pub mappings: Vec<(Entity, usize)>,
    pub columns_rewritten: usize,
    pub rows_updated: u64,
}

/// Rewrite every FK-bearing column through the merged-IDs reference
pub async fn run(pool: &PgPool, merged_ids_dir: &Path) -> Result<RemapReport> {
    let mut report = RemapReport::default();

    for &entity in ENTITY_LOAD_ORDER {
        let mappings = load_mappings(merged_ids_dir, entity)?;
        if mappings.is_empty() {
            continue;
        }
        info!(%entity, mappings = mappings.len(), "Loaded merged-ID reference");
        apply_entity(pool, entity, &mappings, &mut report).await?;
        report.mappings.push((entity, mappings.len()));
    }

    info!(
        entities = report.mappings.len(),
        columns = report.columns_rewritten,
        rows_updated = report.rows_updated,
        "Remap finished"
    );
    Ok(report)
}

/// Read and normalize every reference file for one entity
pub fn load_mappings(merged_ids_dir: &Path, entity: Entity) -> Result<Vec<Mapping>> {
    let entity_dir = merged_ids_dir.join(entity.as_str());
    if !entity_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&entity_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_reference_file(p))
        .collect();
    paths.sort();

    let mut mappings = Vec::new();
    for path in paths {
        read_reference_file(&path, &mut mappings)?;
    }
    Ok(mappings)
}

fn is_reference_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".csv") || n.ends_with(".csv.gz"))
}

fn read_reference_file(path: &Path, mappings: &mut Vec<Mapping>) -> Result<()> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut csv_reader = csv::Reader::from_reader(reader);
    for record in csv_reader.deserialize::<MergedIdRecord>() {
        let record = record?;
        let (Some(old_id), Some(canonical_id)) = (
            normalize_id(record.id.as_deref()),
            normalize_id(record.merge_into_id.as_deref()),
        ) else {
            warn!(path = %path.display(), "Reference line missing an identifier, skipped");
            continue;
        };
        if old_id == canonical_id {
            continue;
        }
        mappings.push(Mapping {
            old_id,
            canonical_id,
        });
    }
    Ok(())
}

/// Stage one entity's mapping and rewrite its referencing columns
async fn apply_entity(
    pool: &PgPool,
    entity: Entity,
    mappings: &[Mapping],
    report: &mut RemapReport,
) -> Result<()> {
    // Temp tables are session-scoped; the whole rewrite stays on one
    // connection.
    let mut conn = pool.acquire().await?;

    sqlx::query("CREATE TEMP TABLE id_remap (old_id text PRIMARY KEY, canonical_id text NOT NULL)")
        .execute(&mut *conn)
        .await?;

    let mut payload = String::new();
    for mapping in mappings {
        copy_text::encode_row(
            &[
                Some(mapping.old_id.clone()),
                Some(mapping.canonical_id.clone()),
            ],
            &mut payload,
        );
    }
    let mut sink = conn
        .copy_in_raw("COPY id_remap (old_id, canonical_id) FROM STDIN")
        .await?;
    sink.send(payload.as_bytes()).await?;
    sink.finish().await?;

    let root = entity.root_table();
    for (table, fk) in referencing_edges(root) {
        let statement = format!(
            "UPDATE {} SET {} = m.canonical_id FROM id_remap m WHERE {}.{} = m.old_id",
            table, fk, table, fk
        );
        let result = sqlx::query(&statement).execute(&mut *conn).await?;
        report.columns_rewritten += 1;
        report.rows_updated += result.rows_affected();
        info!(
            %entity,
            table,
            column = fk,
            rows = result.rows_affected(),
            "Column rewritten"
        );
    }

    sqlx::query("DROP TABLE id_remap").execute(&mut *conn).await?;
    Ok(())
}

/// Every (table, column) edge whose parent is the given root table
fn referencing_edges(root_table: &str) -> Vec<(&'static str, &'static str)> {
    let mut edges = Vec::new();
    for table in TABLES {
        for fk in table.foreign_keys {
            if fk.parent_table == root_table {
                edges.push((table.name, fk.column));
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const REFERENCE: &str = "merge_date,id,merge_into_id\n\
        2024-01-01,https://openalex.org/A1,https://openalex.org/A9\n\
        2024-01-01,A2,A9\n\
        2024-01-01,A3,A3\n\
        2024-01-01,,A9\n";

    #[test]
    fn test_load_mappings_normalizes_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let entity_dir = dir.path().join("authors");
        std::fs::create_dir_all(&entity_dir).unwrap();
        std::fs::write(entity_dir.join("2024-01-01.csv"), REFERENCE).unwrap();

        let mappings = load_mappings(dir.path(), Entity::Authors).unwrap();
        // Self-mappings and lines without both identifiers are dropped
        assert_eq!(
            mappings,
            vec![
                Mapping {
                    old_id: "A1".to_string(),
                    canonical_id: "A9".to_string()
                },
                Mapping {
                    old_id: "A2".to_string(),
                    canonical_id: "A9".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_load_mappings_reads_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let entity_dir = dir.path().join("works");
        std::fs::create_dir_all(&entity_dir).unwrap();

        let file = File::create(entity_dir.join("2024-02-01.csv.gz")).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(b"merge_date,id,merge_into_id\n2024-02-01,W1,W2\n")
            .unwrap();
        encoder.finish().unwrap();

        let mappings = load_mappings(dir.path(), Entity::Works).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].old_id, "W1");
    }

    #[test]
    fn test_missing_entity_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_mappings(dir.path(), Entity::Concepts)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_referencing_edges_cover_all_declared_fks() {
        let edges = referencing_edges("works");
        assert!(edges.contains(&("works_authorships", "work_id")));
        assert!(edges.contains(&("works_referenced_works", "referenced_work_id")));
        assert!(edges.contains(&("works_concepts", "work_id")));
        assert!(edges.contains(&("works_counts_by_year", "work_id")));

        let institution_edges = referencing_edges("institutions");
        assert!(institution_edges.contains(&("authors", "last_known_institution_id")));
        assert!(institution_edges
            .contains(&("institutions_associated_institutions", "associated_institution_id")));
    }
}
