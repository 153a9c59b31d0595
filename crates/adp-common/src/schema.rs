//! Static table catalog for the scholarly-corpus schema
//!
//! Every table the pipelines touch is declared here at build time: column
//! list and types (in physical column order), primary-key columns, and
//! foreign-key edges. Both pipelines assemble SQL with dynamic table and
//! column names; [`table`] is the allow-list that makes that safe: an
//! identifier that does not come out of this catalog never reaches the
//! database.
//!
//! The column order of a [`TableDef`] MUST match the deployed DDL exactly;
//! the COPY payload is positional.

use crate::error::{AdpError, Result};

/// One category of record in the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Works,
    Authors,
    Institutions,
    Sources,
    Concepts,
}

/// Entities in load order: small reference tables before the two large
/// fact tables, so files with few foreign references land first.
pub const ENTITY_LOAD_ORDER: &[Entity] = &[
    Entity::Concepts,
    Entity::Institutions,
    Entity::Sources,
    Entity::Authors,
    Entity::Works,
];

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Works => "works",
            Entity::Authors => "authors",
            Entity::Institutions => "institutions",
            Entity::Sources => "sources",
            Entity::Concepts => "concepts",
        }
    }

    /// The entity's root table, which parents all its child tables
    pub fn root_table(&self) -> &'static str {
        self.as_str()
    }
}

impl std::str::FromStr for Entity {
    type Err = AdpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "works" => Ok(Entity::Works),
            "authors" => Ok(Entity::Authors),
            "institutions" => Ok(Entity::Institutions),
            "sources" => Ok(Entity::Sources),
            "concepts" => Ok(Entity::Concepts),
            _ => Err(AdpError::UnknownEntity(s.to_string())),
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Postgres column type, as far as the pipelines care
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    BigInt,
    DoublePrecision,
    Boolean,
    Date,
}

impl ColumnType {
    /// SQL type name used for placeholder casts in row-wise statements
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::DoublePrecision => "double precision",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
        }
    }
}

/// Column metadata
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn col(name: &'static str, ty: ColumnType) -> Column {
    Column { name, ty }
}

/// A declared foreign-key edge: child column -> parent table/column
#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub column: &'static str,
    pub parent_table: &'static str,
    pub parent_column: &'static str,
}

/// Static metadata for one table
#[derive(Debug)]
pub struct TableDef {
    pub name: &'static str,
    /// Owning entity; also scopes error logs and load summaries
    pub entity: Entity,
    /// Columns in physical order (the COPY payload is positional)
    pub columns: &'static [Column],
    /// Declared key; empty means the table carries no usable key
    pub primary_key: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
}

impl TableDef {
    /// Comma-joined column list for COPY / INSERT statements
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key.contains(&name)
    }

    /// Non-key columns, used for upsert SET lists and duplicate hashing
    pub fn non_key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !self.is_key_column(c.name))
    }

    /// Name under which the primary-key constraint is created
    pub fn pk_constraint_name(&self) -> String {
        format!("{}_pkey", self.name)
    }

    /// Name under which a foreign-key constraint is created
    pub fn fk_constraint_name(&self, fk: &ForeignKey) -> String {
        format!("fk_{}_{}", self.name, fk.column)
    }
}

use ColumnType::{BigInt, Boolean, Date, DoublePrecision, Integer, Text};

/// Every table the pipelines know about, grouped by entity
pub static TABLES: &[TableDef] = &[
    // ------------------------------------------------------------------
    // concepts
    // ------------------------------------------------------------------
    TableDef {
        name: "concepts",
        entity: Entity::Concepts,
        columns: &[
            col("id", Text),
            col("wikidata", Text),
            col("display_name", Text),
            col("level", Integer),
            col("description", Text),
            col("works_count", BigInt),
            col("cited_by_count", BigInt),
            col("updated_date", Date),
        ],
        primary_key: &["id"],
        foreign_keys: &[],
    },
    TableDef {
        name: "concepts_ancestors",
        entity: Entity::Concepts,
        columns: &[col("concept_id", Text), col("ancestor_id", Text)],
        primary_key: &["concept_id", "ancestor_id"],
        foreign_keys: &[
            ForeignKey {
                column: "concept_id",
                parent_table: "concepts",
                parent_column: "id",
            },
            ForeignKey {
                column: "ancestor_id",
                parent_table: "concepts",
                parent_column: "id",
            },
        ],
    },
    // ------------------------------------------------------------------
    // institutions
    // ------------------------------------------------------------------
    TableDef {
        name: "institutions",
        entity: Entity::Institutions,
        columns: &[
            col("id", Text),
            col("ror", Text),
            col("display_name", Text),
            col("country_code", Text),
            col("type", Text),
            col("homepage_url", Text),
            col("works_count", BigInt),
            col("cited_by_count", BigInt),
            col("updated_date", Date),
        ],
        primary_key: &["id"],
        foreign_keys: &[],
    },
    TableDef {
        name: "institutions_geo",
        entity: Entity::Institutions,
        columns: &[
            col("institution_id", Text),
            col("city", Text),
            col("region", Text),
            col("country_code", Text),
            col("latitude", DoublePrecision),
            col("longitude", DoublePrecision),
        ],
        primary_key: &["institution_id"],
        foreign_keys: &[ForeignKey {
            column: "institution_id",
            parent_table: "institutions",
            parent_column: "id",
        }],
    },
    TableDef {
        name: "institutions_associated_institutions",
        entity: Entity::Institutions,
        columns: &[
            col("institution_id", Text),
            col("associated_institution_id", Text),
            col("relationship", Text),
        ],
        primary_key: &["institution_id", "associated_institution_id"],
        foreign_keys: &[
            ForeignKey {
                column: "institution_id",
                parent_table: "institutions",
                parent_column: "id",
            },
            ForeignKey {
                column: "associated_institution_id",
                parent_table: "institutions",
                parent_column: "id",
            },
        ],
    },
    // ------------------------------------------------------------------
    // sources
    // ------------------------------------------------------------------
    TableDef {
        name: "sources",
        entity: Entity::Sources,
        columns: &[
            col("id", Text),
            col("issn_l", Text),
            col("issns", Text),
            col("display_name", Text),
            col("publisher", Text),
            col("is_oa", Boolean),
            col("homepage_url", Text),
            col("works_count", BigInt),
            col("cited_by_count", BigInt),
            col("updated_date", Date),
        ],
        primary_key: &["id"],
        foreign_keys: &[],
    },
    // ------------------------------------------------------------------
    // authors
    // ------------------------------------------------------------------
    TableDef {
        name: "authors",
        entity: Entity::Authors,
        columns: &[
            col("id", Text),
            col("orcid", Text),
            col("display_name", Text),
            col("display_name_alternatives", Text),
            col("last_known_institution_id", Text),
            col("works_count", BigInt),
            col("cited_by_count", BigInt),
            col("updated_date", Date),
        ],
        primary_key: &["id"],
        foreign_keys: &[ForeignKey {
            column: "last_known_institution_id",
            parent_table: "institutions",
            parent_column: "id",
        }],
    },
    TableDef {
        name: "authors_counts_by_year",
        entity: Entity::Authors,
        columns: &[
            col("author_id", Text),
            col("year", Integer),
            col("works_count", BigInt),
            col("cited_by_count", BigInt),
        ],
        primary_key: &["author_id", "year"],
        foreign_keys: &[ForeignKey {
            column: "author_id",
            parent_table: "authors",
            parent_column: "id",
        }],
    },
    // ------------------------------------------------------------------
    // works
    // ------------------------------------------------------------------
    TableDef {
        name: "works",
        entity: Entity::Works,
        columns: &[
            col("id", Text),
            col("doi", Text),
            col("title", Text),
            col("publication_year", Integer),
            col("publication_date", Date),
            col("type", Text),
            col("language", Text),
            col("source_id", Text),
            col("cited_by_count", BigInt),
            col("is_retracted", Boolean),
            col("abstract", Text),
            col("updated_date", Date),
        ],
        primary_key: &["id"],
        foreign_keys: &[ForeignKey {
            column: "source_id",
            parent_table: "sources",
            parent_column: "id",
        }],
    },
    TableDef {
        name: "works_authorships",
        entity: Entity::Works,
        columns: &[
            col("work_id", Text),
            col("author_position", Integer),
            col("author_id", Text),
            col("institution_id", Text),
            col("raw_affiliation", Text),
        ],
        primary_key: &["work_id", "author_position", "author_id"],
        foreign_keys: &[
            ForeignKey {
                column: "work_id",
                parent_table: "works",
                parent_column: "id",
            },
            ForeignKey {
                column: "author_id",
                parent_table: "authors",
                parent_column: "id",
            },
            ForeignKey {
                column: "institution_id",
                parent_table: "institutions",
                parent_column: "id",
            },
        ],
    },
    TableDef {
        name: "works_referenced_works",
        entity: Entity::Works,
        columns: &[col("work_id", Text), col("referenced_work_id", Text)],
        primary_key: &["work_id", "referenced_work_id"],
        foreign_keys: &[
            ForeignKey {
                column: "work_id",
                parent_table: "works",
                parent_column: "id",
            },
            ForeignKey {
                column: "referenced_work_id",
                parent_table: "works",
                parent_column: "id",
            },
        ],
    },
    TableDef {
        name: "works_concepts",
        entity: Entity::Works,
        columns: &[
            col("work_id", Text),
            col("concept_id", Text),
            col("score", DoublePrecision),
        ],
        primary_key: &["work_id", "concept_id"],
        foreign_keys: &[
            ForeignKey {
                column: "work_id",
                parent_table: "works",
                parent_column: "id",
            },
            ForeignKey {
                column: "concept_id",
                parent_table: "concepts",
                parent_column: "id",
            },
        ],
    },
    TableDef {
        name: "works_counts_by_year",
        entity: Entity::Works,
        columns: &[
            col("work_id", Text),
            col("year", Integer),
            col("cited_by_count", BigInt),
        ],
        primary_key: &["work_id", "year"],
        foreign_keys: &[ForeignKey {
            column: "work_id",
            parent_table: "works",
            parent_column: "id",
        }],
    },
];

/// Look a table up in the catalog; the allow-list gate for dynamic SQL
pub fn table(name: &str) -> Result<&'static TableDef> {
    TABLES
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| AdpError::UnknownTable(name.to_string()))
}

/// The entity a parent table belongs to (for orphan manifests)
pub fn entity_for_table(name: &str) -> Result<Entity> {
    Ok(table(name)?.entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup_is_an_allow_list() {
        assert!(table("works").is_ok());
        assert!(table("works; DROP TABLE works").is_err());
        assert!(table("pg_catalog.pg_tables").is_err());
    }

    #[test]
    fn test_table_names_unique() {
        let names: HashSet<_> = TABLES.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), TABLES.len());
    }

    #[test]
    fn test_primary_key_columns_exist() {
        for t in TABLES {
            for key in t.primary_key {
                assert!(
                    t.column_index(key).is_some(),
                    "{}.{} declared as key but missing from columns",
                    t.name,
                    key
                );
            }
        }
    }

    #[test]
    fn test_foreign_keys_resolve() {
        for t in TABLES {
            for fk in t.foreign_keys {
                assert!(t.column_index(fk.column).is_some(), "{}.{}", t.name, fk.column);
                let parent = table(fk.parent_table).expect("parent table in catalog");
                assert!(
                    parent.column_index(fk.parent_column).is_some(),
                    "{}.{}",
                    fk.parent_table,
                    fk.parent_column
                );
                assert!(
                    parent.is_key_column(fk.parent_column),
                    "FK {} -> {}.{} must target a key column",
                    fk.column,
                    fk.parent_table,
                    fk.parent_column
                );
            }
        }
    }

    #[test]
    fn test_every_entity_has_a_root_table() {
        for entity in ENTITY_LOAD_ORDER {
            let root = table(entity.root_table()).expect("root table in catalog");
            assert_eq!(root.primary_key, &["id"]);
        }
    }

    #[test]
    fn test_load_order_covers_all_entities() {
        let ordered: HashSet<_> = ENTITY_LOAD_ORDER.iter().collect();
        for t in TABLES {
            assert!(ordered.contains(&t.entity), "{} entity missing from load order", t.name);
        }
    }
}
