//! Transformer for institution records

use super::{
    def, normalize_id, EntityTransformer, RowBuilder, RowSet, SeenIds, TransformCounts,
};
use crate::entities::InstitutionRecord;
use adp_common::schema::Entity;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct InstitutionsTransformer {
    seen: SeenIds,
}

impl EntityTransformer for InstitutionsTransformer {
    type Record = InstitutionRecord;

    const ENTITY: Entity = Entity::Institutions;

    fn transform(&mut self, record: Self::Record) -> RowSet {
        let Some(id) = self.seen.admit(record.id.as_deref()) else {
            return Vec::new();
        };

        let mut rows: RowSet = Vec::new();

        rows.push((
            "institutions",
            RowBuilder::new()
                .text(Some(id.clone()))
                .text(record.ror)
                .text(record.display_name)
                .text(record.country_code)
                .text(record.type_)
                .text(record.homepage_url)
                .bigint(record.works_count)
                .bigint(record.cited_by_count)
                .date(record.updated_date)
                .build(def("institutions")),
        ));

        if let Some(geo) = record.geo {
            let has_content = geo.city.is_some()
                || geo.region.is_some()
                || geo.country_code.is_some()
                || geo.latitude.is_some()
                || geo.longitude.is_some();
            if has_content {
                rows.push((
                    "institutions_geo",
                    RowBuilder::new()
                        .text(Some(id.clone()))
                        .text(geo.city)
                        .text(geo.region)
                        .text(geo.country_code)
                        .float(geo.latitude)
                        .float(geo.longitude)
                        .build(def("institutions_geo")),
                ));
            }
        }

        let mut seen_associates = HashSet::new();
        for associated in record.associated_institutions.unwrap_or_default() {
            let Some(associated_id) = normalize_id(associated.id.as_deref()) else {
                continue;
            };
            if !seen_associates.insert(associated_id.clone()) {
                continue;
            }
            rows.push((
                "institutions_associated_institutions",
                RowBuilder::new()
                    .text(Some(id.clone()))
                    .text(Some(associated_id))
                    .text(associated.relationship)
                    .build(def("institutions_associated_institutions")),
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

    #[test]
    fn test_geo_and_associations_fanned_out() {
        let mut transformer = InstitutionsTransformer::default();
        let record: InstitutionRecord = serde_json::from_str(
            r#"{
                "id": "https://openalex.org/I1",
                "display_name": "University of Jena",
                "geo": {"city": "Jena", "country_code": "DE", "latitude": 50.92, "longitude": 11.58},
                "associated_institutions": [
                    {"id": "https://openalex.org/I2", "relationship": "related"},
                    {"id": "https://openalex.org/I2", "relationship": "related"}
                ]
            }"#,
        )
        .unwrap();

        let rows = transformer.transform(record);
        let tables: Vec<&str> = rows.iter().map(|(t, _)| *t).collect();
        assert_eq!(
            tables,
            vec![
                "institutions",
                "institutions_geo",
                "institutions_associated_institutions"
            ]
        );
    }

    #[test]
    fn test_empty_geo_object_produces_no_row() {
        let mut transformer = InstitutionsTransformer::default();
        let record: InstitutionRecord =
            serde_json::from_str(r#"{"id":"I1","geo":{}}"#).unwrap();
        let rows = transformer.transform(record);
        assert_eq!(rows.len(), 1);
    }
}
