//! Data models for the database adapter.
//!
//! This module re-exports all model types used throughout the crate.

pub mod query;
pub mod schema;

// Re-export commonly used types
pub use query::{QueryParam, Row};
pub use schema::{ColumnDescriptor, TableColumns, parse_default_value};
