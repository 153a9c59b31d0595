//! Shared types and infrastructure for the ADP pipelines
//!
//! This crate holds everything both the bulk-load pipeline (`adp-ingest`)
//! and the constraint-repair pipeline (`adp-repair`) depend on:
//!
//! - Error types ([`error::AdpError`])
//! - Logging initialization ([`logging`])
//! - Environment-driven configuration ([`config::AdpConfig`])
//! - Postgres pool construction ([`db`])
//! - The static table catalog ([`schema`]) - column lists, primary keys,
//!   and foreign-key edges for every entity table, known at build time

pub mod config;
pub mod copy_text;
pub mod db;
pub mod error;
pub mod ids;
pub mod logging;
pub mod schema;

pub use error::{AdpError, Result};
