//! Snapshot file discovery
//!
//! The snapshot tree partitions files by entity type and update date:
//! `data/<entity>/updated_date=<date>/part_NNN.gz`. Discovery returns the
//! part-files for one entity in deterministic (sorted) order; the relative
//! path doubles as the file's identifier in the processing state.

use adp_common::error::Result;
use adp_common::schema::Entity;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// One discovered snapshot part-file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    /// Path relative to the snapshot root; the state-file identifier
    pub relative: String,
}

/// Discover all part-files for one entity, sorted by relative path
pub fn discover(snapshot_dir: &Path, entity: Entity) -> Result<Vec<SnapshotFile>> {
    let entity_root = snapshot_dir.join("data").join(entity.as_str());
    if !entity_root.is_dir() {
        warn!(
            entity = %entity,
            path = %entity_root.display(),
            "No snapshot directory for entity"
        );
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&entity_root).min_depth(2).max_depth(2) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_part_file(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(snapshot_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        files.push(SnapshotFile {
            path: entry.path().to_path_buf(),
            relative,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn is_part_file(path: &Path) -> bool {
    let in_dated_dir = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("updated_date="));
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("part_") && n.ends_with(".gz"));
    in_dated_dir && name_matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_discovers_sorted_part_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("data/works/updated_date=2024-02-01/part_001.gz"));
        touch(&root.join("data/works/updated_date=2024-01-01/part_000.gz"));
        touch(&root.join("data/works/updated_date=2024-02-01/part_000.gz"));
        // Non-matching files are ignored
        touch(&root.join("data/works/updated_date=2024-02-01/manifest"));
        touch(&root.join("data/works/stray_part_000.gz"));
        touch(&root.join("data/authors/updated_date=2024-01-01/part_000.gz"));

        let files = discover(root, Entity::Works).unwrap();
        let relatives: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(
            relatives,
            vec![
                "data/works/updated_date=2024-01-01/part_000.gz",
                "data/works/updated_date=2024-02-01/part_000.gz",
                "data/works/updated_date=2024-02-01/part_001.gz",
            ]
        );
    }

    #[test]
    fn test_missing_entity_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path(), Entity::Concepts).unwrap().is_empty());
    }
}
