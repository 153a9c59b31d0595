//! Transformer for work records
//!
//! The widest fan-out in the pipeline: one work yields rows in `works`,
//! `works_authorships`, `works_referenced_works`, `works_concepts`, and
//! `works_counts_by_year`, and carries the rebuilt abstract text.

use super::{
    def, normalize_id, reconstruct_abstract, EntityTransformer, RowBuilder, RowSet, SeenIds,
    TransformCounts,
};
use crate::entities::WorkRecord;
use adp_common::schema::Entity;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct WorksTransformer {
    seen: SeenIds,
}

impl EntityTransformer for WorksTransformer {
    type Record = WorkRecord;

    const ENTITY: Entity = Entity::Works;

    fn transform(&mut self, record: Self::Record) -> RowSet {
        let Some(id) = self.seen.admit(record.id.as_deref()) else {
            return Vec::new();
        };

        let mut rows: RowSet = Vec::new();

        let abstract_text = record
            .abstract_inverted_index
            .as_ref()
            .and_then(reconstruct_abstract);
        let source_id = record
            .primary_location
            .and_then(|loc| loc.source)
            .and_then(|source| normalize_id(source.id.as_deref()));

        rows.push((
            "works",
            RowBuilder::new()
                .text(Some(id.clone()))
                .text(record.doi)
                .text(record.title)
                .int(record.publication_year)
                .date(record.publication_date)
                .text(record.type_)
                .text(record.language)
                .text(source_id)
                .bigint(record.cited_by_count)
                .boolean(record.is_retracted)
                .text(abstract_text)
                .date(record.updated_date)
                .build(def("works")),
        ));

        for (position, authorship) in record.authorships.unwrap_or_default().into_iter().enumerate()
        {
            let Some(author_id) = authorship
                .author
                .as_ref()
                .and_then(|author| normalize_id(author.id.as_deref()))
            else {
                continue;
            };

            // The authorship table keys on one institution; the first
            // listed affiliation wins.
            let institution_id = authorship
                .institutions
                .as_ref()
                .and_then(|list| list.first())
                .and_then(|inst| normalize_id(inst.id.as_deref()));

            rows.push((
                "works_authorships",
                RowBuilder::new()
                    .text(Some(id.clone()))
                    .int(Some(position as i32 + 1))
                    .text(Some(author_id))
                    .text(institution_id)
                    .text(authorship.raw_affiliation_string)
                    .build(def("works_authorships")),
            ));
        }

        let mut seen_refs = HashSet::new();
        for referenced in record.referenced_works.unwrap_or_default() {
            let Some(referenced_id) = normalize_id(Some(&referenced)) else {
                continue;
            };
            if !seen_refs.insert(referenced_id.clone()) {
                continue;
            }
            rows.push((
                "works_referenced_works",
                RowBuilder::new()
                    .text(Some(id.clone()))
                    .text(Some(referenced_id))
                    .build(def("works_referenced_works")),
            ));
        }

        let mut seen_concepts = HashSet::new();
        for concept in record.concepts.unwrap_or_default() {
            let Some(concept_id) = normalize_id(concept.id.as_deref()) else {
                continue;
            };
            if !seen_concepts.insert(concept_id.clone()) {
                continue;
            }
            rows.push((
                "works_concepts",
                RowBuilder::new()
                    .text(Some(id.clone()))
                    .text(Some(concept_id))
                    .float(concept.score)
                    .build(def("works_concepts")),
            ));
        }

        for counts in record.counts_by_year.unwrap_or_default() {
            let Some(year) = counts.year else { continue };
            rows.push((
                "works_counts_by_year",
                RowBuilder::new()
                    .text(Some(id.clone()))
                    .int(Some(year))
                    .bigint(counts.cited_by_count)
                    .build(def("works_counts_by_year")),
            ));
        }

        rows
    }

    fn counts(&self) -> TransformCounts {
        self.seen.counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Row;

    fn work(json: &str) -> WorkRecord {
        serde_json::from_str(json).unwrap()
    }

    fn rows_for<'a>(rows: &'a RowSet, table: &str) -> Vec<&'a Row> {
        rows.iter()
            .filter(|(t, _)| *t == table)
            .map(|(_, r)| r)
            .collect()
    }

    #[test]
    fn test_full_fanout() {
        let mut transformer = WorksTransformer::default();
        let rows = transformer.transform(work(
            r#"{
                "id": "https://openalex.org/W1",
                "doi": "10.1000/xyz",
                "display_name": "Tractatus",
                "publication_year": 1921,
                "primary_location": {"source": {"id": "https://openalex.org/S9"}},
                "authorships": [
                    {"author": {"id": "https://openalex.org/A1"},
                     "institutions": [{"id": "https://openalex.org/I7"}],
                     "raw_affiliation_string": "Cambridge"},
                    {"author": {"id": "https://openalex.org/A2"}}
                ],
                "referenced_works": ["https://openalex.org/W2", "https://openalex.org/W2"],
                "concepts": [{"id": "https://openalex.org/C5", "score": 0.9}],
                "counts_by_year": [{"year": 2020, "cited_by_count": 3}]
            }"#,
        ));

        let works = rows_for(&rows, "works");
        assert_eq!(works.len(), 1);
        assert_eq!(works[0].0[0].as_deref(), Some("W1"));
        assert_eq!(works[0].0[7].as_deref(), Some("S9"));

        let authorships = rows_for(&rows, "works_authorships");
        assert_eq!(authorships.len(), 2);
        assert_eq!(authorships[0].0[1].as_deref(), Some("1"));
        assert_eq!(authorships[0].0[3].as_deref(), Some("I7"));
        assert_eq!(authorships[1].0[2].as_deref(), Some("A2"));
        assert_eq!(authorships[1].0[3], None);

        // Repeated references collapse within one record
        assert_eq!(rows_for(&rows, "works_referenced_works").len(), 1);
        assert_eq!(rows_for(&rows, "works_concepts").len(), 1);
        assert_eq!(rows_for(&rows, "works_counts_by_year").len(), 1);
    }

    #[test]
    fn test_intra_file_duplicate_dropped() {
        let mut transformer = WorksTransformer::default();
        let first = transformer.transform(work(r#"{"id":"W1","display_name":"a"}"#));
        let second = transformer.transform(work(r#"{"id":"W1","display_name":"b"}"#));
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(transformer.counts().duplicates, 1);
    }

    #[test]
    fn test_missing_id_dropped() {
        let mut transformer = WorksTransformer::default();
        assert!(transformer.transform(work(r#"{"display_name":"orphan"}"#)).is_empty());
        assert_eq!(transformer.counts().missing_id, 1);
    }

    #[test]
    fn test_abstract_rebuilt_from_inverted_index() {
        let mut transformer = WorksTransformer::default();
        let rows = transformer.transform(work(
            r#"{"id":"W1","abstract_inverted_index":{"world":[1],"hello":[0]}}"#,
        ));
        let works = rows_for(&rows, "works");
        assert_eq!(works[0].0[10].as_deref(), Some("hello world"));
    }

    #[test]
    fn test_row_widths_match_catalog() {
        let mut transformer = WorksTransformer::default();
        let rows = transformer.transform(work(
            r#"{"id":"W1",
                "authorships":[{"author":{"id":"A1"}}],
                "referenced_works":["W2"],
                "concepts":[{"id":"C1","score":0.5}],
                "counts_by_year":[{"year":2021,"cited_by_count":1}]}"#,
        ));
        for (table, row) in &rows {
            let table_def = adp_common::schema::table(table).unwrap();
            assert_eq!(row.0.len(), table_def.columns.len(), "width of {}", table);
        }
    }

    #[test]
    fn test_authorship_without_author_id_skipped() {
        let mut transformer = WorksTransformer::default();
        let rows = transformer.transform(work(
            r#"{"id":"W1","authorships":[{"raw_affiliation_string":"somewhere"}]}"#,
        ));
        assert!(rows_for(&rows, "works_authorships").is_empty());
    }
}
