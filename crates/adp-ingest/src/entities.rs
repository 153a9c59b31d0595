//! Snapshot record shapes, one struct per entity type
//!
//! Decoding is deliberately tolerant: every field is optional, unknown
//! fields are ignored, and a record missing its identifier is still a valid
//! decode (the transformer drops it with a counter). Field names follow the
//! snapshot's JSON keys.

use serde::Deserialize;
use std::collections::HashMap;

/// A dehydrated cross-reference: only the identifier matters here
#[derive(Debug, Clone, Deserialize)]
pub struct EntityRef {
    pub id: Option<String>,
}

/// Per-year citation/output counters shared by works and authors
#[derive(Debug, Clone, Deserialize)]
pub struct YearCounts {
    pub year: Option<i32>,
    pub works_count: Option<i64>,
    pub cited_by_count: Option<i64>,
}

// ----------------------------------------------------------------------
// works
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct WorkRecord {
    pub id: Option<String>,
    pub doi: Option<String>,
    #[serde(alias = "display_name")]
    pub title: Option<String>,
    pub publication_year: Option<i32>,
    pub publication_date: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub language: Option<String>,
    pub primary_location: Option<Location>,
    pub cited_by_count: Option<i64>,
    pub is_retracted: Option<bool>,
    /// Positional inverted index: token -> positions in the abstract
    pub abstract_inverted_index: Option<HashMap<String, Vec<u32>>>,
    pub authorships: Option<Vec<Authorship>>,
    pub referenced_works: Option<Vec<String>>,
    pub concepts: Option<Vec<ConceptScore>>,
    pub counts_by_year: Option<Vec<YearCounts>>,
    pub updated_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub source: Option<EntityRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Authorship {
    pub author: Option<EntityRef>,
    pub institutions: Option<Vec<EntityRef>>,
    pub raw_affiliation_string: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConceptScore {
    pub id: Option<String>,
    pub score: Option<f64>,
}

// ----------------------------------------------------------------------
// authors
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorRecord {
    pub id: Option<String>,
    pub orcid: Option<String>,
    pub display_name: Option<String>,
    pub display_name_alternatives: Option<Vec<String>>,
    pub last_known_institution: Option<EntityRef>,
    pub works_count: Option<i64>,
    pub cited_by_count: Option<i64>,
    pub counts_by_year: Option<Vec<YearCounts>>,
    pub updated_date: Option<String>,
}

// ----------------------------------------------------------------------
// institutions
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InstitutionRecord {
    pub id: Option<String>,
    pub ror: Option<String>,
    pub display_name: Option<String>,
    pub country_code: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub homepage_url: Option<String>,
    pub works_count: Option<i64>,
    pub cited_by_count: Option<i64>,
    pub geo: Option<Geo>,
    pub associated_institutions: Option<Vec<AssociatedInstitution>>,
    pub updated_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Geo {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssociatedInstitution {
    pub id: Option<String>,
    pub relationship: Option<String>,
}

// ----------------------------------------------------------------------
// sources
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRecord {
    pub id: Option<String>,
    pub issn_l: Option<String>,
    pub issn: Option<Vec<String>>,
    pub display_name: Option<String>,
    #[serde(alias = "host_organization_name")]
    pub publisher: Option<String>,
    pub is_oa: Option<bool>,
    pub homepage_url: Option<String>,
    pub works_count: Option<i64>,
    pub cited_by_count: Option<i64>,
    pub updated_date: Option<String>,
}

// ----------------------------------------------------------------------
// concepts
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConceptRecord {
    pub id: Option<String>,
    pub wikidata: Option<String>,
    pub display_name: Option<String>,
    pub level: Option<i32>,
    pub description: Option<String>,
    pub works_count: Option<i64>,
    pub cited_by_count: Option<i64>,
    pub ancestors: Option<Vec<EntityRef>>,
    pub updated_date: Option<String>,
}
