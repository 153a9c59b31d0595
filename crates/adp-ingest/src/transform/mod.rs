//! Record transformation: snapshot records to per-table rows
//!
//! One transformer per entity type, each a pure mapping
//! `Record -> {table: [rows]}` plus counters. Transformers normalize
//! identifiers, flatten simple lists into delimiter-joined columns, fan
//! one-to-many relations out to child-table rows, and enforce intra-file
//! uniqueness of the primary entity ID. They never touch the store.

use adp_common::schema::{Entity, TableDef};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::collections::HashSet;

mod authors;
mod concepts;
mod institutions;
mod sources;
mod works;

pub use authors::AuthorsTransformer;
pub use concepts::ConceptsTransformer;
pub use institutions::InstitutionsTransformer;
pub use sources::SourcesTransformer;
pub use works::WorksTransformer;

pub use adp_common::ids::{normalize_id, ID_PREFIX};

/// Separator for simple lists flattened into one scalar column
pub const LIST_SEPARATOR: &str = "|";

/// One table row: text-encoded values in declared column order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row(pub Vec<Option<String>>);

/// Rows produced from one record, keyed by target table
pub type RowSet = Vec<(&'static str, Row)>;

/// Counters a transformer accumulates over one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformCounts {
    /// Records dropped because their primary ID repeated within the file
    pub duplicates: u64,
    /// Records dropped because they carry no primary ID at all
    pub missing_id: u64,
}

/// Entity-specific record transformer
pub trait EntityTransformer: Default {
    type Record: DeserializeOwned;

    const ENTITY: Entity;

    /// Map one record to its rows; an empty set means the record was dropped
    fn transform(&mut self, record: Self::Record) -> RowSet;

    fn counts(&self) -> TransformCounts;
}

/// Intra-file primary-ID admission: normalizes, rejects blanks and repeats
#[derive(Debug, Default)]
pub(crate) struct SeenIds {
    seen: HashSet<String>,
    counts: TransformCounts,
}

impl SeenIds {
    /// Returns the normalized ID if this record should be kept
    pub fn admit(&mut self, raw: Option<&str>) -> Option<String> {
        let Some(id) = normalize_id(raw) else {
            self.counts.missing_id += 1;
            return None;
        };
        if !self.seen.insert(id.clone()) {
            self.counts.duplicates += 1;
            return None;
        }
        Some(id)
    }

    pub fn counts(&self) -> TransformCounts {
        self.counts
    }
}

/// Join a simple list into one delimiter-separated column value
pub fn join_list(values: Option<Vec<String>>) -> Option<String> {
    let values = values?;
    if values.is_empty() {
        return None;
    }
    Some(values.join(LIST_SEPARATOR))
}

/// Rebuild an abstract's text body from its positional inverted index
pub fn reconstruct_abstract(index: &HashMap<String, Vec<u32>>) -> Option<String> {
    let mut positions: Vec<(u32, &str)> = Vec::new();
    for (token, offsets) in index {
        for &offset in offsets {
            positions.push((offset, token.as_str()));
        }
    }
    if positions.is_empty() {
        return None;
    }
    positions.sort_unstable();

    let mut text = String::new();
    for (i, (_, token)) in positions.iter().enumerate() {
        if i > 0 {
            text.push(' ');
        }
        text.push_str(token);
    }
    Some(text)
}

/// Catalog lookup for a table the transformers are hard-wired against
///
/// Membership of these names in the static catalog is a build-time fact;
/// a miss here is a programming error, not a runtime condition.
pub(crate) fn def(name: &'static str) -> &'static TableDef {
    adp_common::schema::table(name)
        .unwrap_or_else(|_| panic!("table {} missing from static catalog", name))
}

/// Builder assembling one row in column order
#[derive(Debug, Default)]
pub(crate) struct RowBuilder {
    values: Vec<Option<String>>,
}

impl RowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, value: Option<String>) -> Self {
        self.values.push(value.filter(|v| !v.is_empty()));
        self
    }

    pub fn int(mut self, value: Option<i32>) -> Self {
        self.values.push(value.map(|v| v.to_string()));
        self
    }

    pub fn bigint(mut self, value: Option<i64>) -> Self {
        self.values.push(value.map(|v| v.to_string()));
        self
    }

    pub fn float(mut self, value: Option<f64>) -> Self {
        self.values.push(value.map(|v| v.to_string()));
        self
    }

    pub fn boolean(mut self, value: Option<bool>) -> Self {
        self.values
            .push(value.map(|v| if v { "t" } else { "f" }.to_string()));
        self
    }

    /// Dates stay textual; the store validates them on the way in
    pub fn date(mut self, value: Option<String>) -> Self {
        self.values.push(value.filter(|v| !v.is_empty()));
        self
    }

    pub fn build(self, def: &TableDef) -> Row {
        debug_assert_eq!(
            self.values.len(),
            def.columns.len(),
            "row width mismatch for table {}",
            def.name
        );
        Row(self.values)
    }
}
