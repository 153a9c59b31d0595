//! ADP bulk-load pipeline
//!
//! Streams a scholarly-corpus snapshot (gzip NDJSON, partitioned by entity
//! type and update date) into Postgres:
//!
//! ```text
//! orchestrator -> decoder -> transform -> writer -> Postgres COPY
//! ```
//!
//! Each snapshot file is decoded lazily, transformed into per-table rows,
//! and bulk-written via the COPY protocol with a row-wise fallback when the
//! fast path is rejected. Per-file completion is persisted so interrupted
//! runs resume instead of restarting.
//!
//! Referential integrity is deliberately not enforced during the load;
//! the `adp-repair` pipeline re-establishes and validates constraints once
//! every entity type has landed.

pub mod decoder;
pub mod discover;
pub mod entities;
pub mod orchestrator;
pub mod state;
pub mod transform;
pub mod writer;
