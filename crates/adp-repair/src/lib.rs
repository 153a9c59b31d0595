//! ADP constraint-repair pipeline
//!
//! The bulk load lands rows with row-level integrity enforcement turned
//! off. This crate restores the guarantees afterwards, in order:
//!
//! 1. [`remap`] - rewrite references to merged (deprecated) entity
//!    identifiers to their canonical ones
//! 2. [`constraints`] - add primary keys, FK-column indexes, and
//!    `NOT VALID` foreign keys
//! 3. [`duplicates`] - collapse exact duplicate key groups, report
//!    divergent ones
//! 4. [`orphans`] - quarantine child rows whose parent never arrived
//! 5. [`constraints::validate`] - `VALIDATE CONSTRAINT` per foreign key
//!
//! Every phase is idempotent and reads its table identities from the
//! static catalog, never from user input.

pub mod constraints;
pub mod duplicates;
pub mod orphans;
pub mod remap;

use adp_common::error::Result;
use adp_common::schema::{self, TableDef};

/// Resolve an optional `--table` filter against the catalog
///
/// `None` selects every table; a name that is not in the catalog is an
/// error before any SQL is assembled.
pub fn select_tables(only: Option<&str>) -> Result<Vec<&'static TableDef>> {
    match only {
        Some(name) => Ok(vec![schema::table(name)?]),
        None => Ok(schema::TABLES.iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_all_tables() {
        let tables = select_tables(None).unwrap();
        assert_eq!(tables.len(), schema::TABLES.len());
    }

    #[test]
    fn test_select_single_table() {
        let tables = select_tables(Some("works")).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "works");
    }

    #[test]
    fn test_unknown_table_rejected() {
        assert!(select_tables(Some("works; DROP TABLE works")).is_err());
    }
}
