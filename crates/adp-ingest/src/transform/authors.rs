//! Transformer for author records

use super::{
    def, join_list, normalize_id, EntityTransformer, RowBuilder, RowSet, SeenIds, TransformCounts,
};
use crate::entities::AuthorRecord;
use adp_common::schema::Entity;

#[derive(Debug, Default)]
pub struct AuthorsTransformer {
    seen: SeenIds,
}

impl EntityTransformer for AuthorsTransformer {
    type Record = AuthorRecord;

    const ENTITY: Entity = Entity::Authors;

    fn transform(&mut self, record: Self::Record) -> RowSet {
        let Some(id) = self.seen.admit(record.id.as_deref()) else {
            return Vec::new();
        };

        let mut rows: RowSet = Vec::new();

        let last_known_institution_id = record
            .last_known_institution
            .and_then(|inst| normalize_id(inst.id.as_deref()));

        rows.push((
            "authors",
            RowBuilder::new()
                .text(Some(id.clone()))
                .text(record.orcid)
                .text(record.display_name)
                .text(join_list(record.display_name_alternatives))
                .text(last_known_institution_id)
                .bigint(record.works_count)
                .bigint(record.cited_by_count)
                .date(record.updated_date)
                .build(def("authors")),
        ));

        for counts in record.counts_by_year.unwrap_or_default() {
            let Some(year) = counts.year else { continue };
            rows.push((
                "authors_counts_by_year",
                RowBuilder::new()
                    .text(Some(id.clone()))
                    .int(Some(year))
                    .bigint(counts.works_count)
                    .bigint(counts.cited_by_count)
                    .build(def("authors_counts_by_year")),
            ));
        }

        rows
    }

    fn counts(&self) -> TransformCounts {
        self.seen.counts()
    }
}
