//! Transformer for concept records

use super::{
    def, normalize_id, EntityTransformer, RowBuilder, RowSet, SeenIds, TransformCounts,
};
use crate::entities::ConceptRecord;
use adp_common::schema::Entity;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ConceptsTransformer {
    seen: SeenIds,
}

impl EntityTransformer for ConceptsTransformer {
    type Record = ConceptRecord;

    const ENTITY: Entity = Entity::Concepts;

    fn transform(&mut self, record: Self::Record) -> RowSet {
        let Some(id) = self.seen.admit(record.id.as_deref()) else {
            return Vec::new();
        };

        let mut rows: RowSet = Vec::new();

        rows.push((
            "concepts",
            RowBuilder::new()
                .text(Some(id.clone()))
                .text(record.wikidata)
                .text(record.display_name)
                .int(record.level)
                .text(record.description)
                .bigint(record.works_count)
                .bigint(record.cited_by_count)
                .date(record.updated_date)
                .build(def("concepts")),
        ));

        let mut seen_ancestors = HashSet::new();
        for ancestor in record.ancestors.unwrap_or_default() {
            let Some(ancestor_id) = normalize_id(ancestor.id.as_deref()) else {
                continue;
            };
            if !seen_ancestors.insert(ancestor_id.clone()) {
                continue;
            }
            rows.push((
                "concepts_ancestors",
                RowBuilder::new()
                    .text(Some(id.clone()))
                    .text(Some(ancestor_id))
                    .build(def("concepts_ancestors")),
            ));
        }

        rows
    }

    fn counts(&self) -> TransformCounts {
        self.seen.counts()
    }
}
