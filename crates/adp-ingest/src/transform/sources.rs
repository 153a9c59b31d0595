//! Transformer for source (venue) records

use super::{def, join_list, EntityTransformer, RowBuilder, RowSet, SeenIds, TransformCounts};
use crate::entities::SourceRecord;
use adp_common::schema::Entity;

#[derive(Debug, Default)]
pub struct SourcesTransformer {
    seen: SeenIds,
}

impl EntityTransformer for SourcesTransformer {
    type Record = SourceRecord;

    const ENTITY: Entity = Entity::Sources;

    fn transform(&mut self, record: Self::Record) -> RowSet {
        let Some(id) = self.seen.admit(record.id.as_deref()) else {
            return Vec::new();
        };

        vec![(
            "sources",
            RowBuilder::new()
                .text(Some(id))
                .text(record.issn_l)
                .text(join_list(record.issn))
                .text(record.display_name)
                .text(record.publisher)
                .boolean(record.is_oa)
                .text(record.homepage_url)
                .bigint(record.works_count)
                .bigint(record.cited_by_count)
                .date(record.updated_date)
                .build(def("sources")),
        )]
    }

    fn counts(&self) -> TransformCounts {
        self.seen.counts()
    }
}
